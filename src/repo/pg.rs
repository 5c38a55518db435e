//! Postgres + PostGIS store. Multi-statement mutations run in one
//! transaction; report kind selects the table through `ReportKind::table`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Executor, Postgres, QueryBuilder};

use super::*;
use crate::feed::{AreaScope, FeedQuery, OwnershipFilter};
use crate::geo::{GeoPoint, LocationInput, Polygon};

#[derive(Clone)]
pub struct PgRepo { pool: PgPool }

impl PgRepo {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn point(lng: Option<f64>, lat: Option<f64>) -> Option<GeoPoint> {
    GeoPoint::new(lng?, lat?)
}

// ---------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------

/// Common column shape of every per-kind sub-select.
#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Id,
    user_id: Id,
    user_name: String,
    title: String,
    description: Option<String>,
    image: Option<String>,
    address: Option<String>,
    lng: Option<f64>,
    lat: Option<f64>,
    city: Option<String>,
    neighborhood_id: Option<Id>,
    status: String,
    follower_count: i64,
    comment_count: i64,
    created_at: DateTime<Utc>,
    kind: String,
    is_free: Option<bool>,
    swap: Option<String>,
    barter: Option<String>,
    category: Option<String>,
    urgency: Option<String>,
    is_author: bool,
    is_followed: bool,
    distance: Option<f64>,
}

impl TryFrom<ReportRow> for Report {
    type Error = RepoError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let kind: ReportKind = row.kind.parse().map_err(|e: UnknownKind| RepoError::Internal(e.to_string()))?;
        let status: ReportStatus = row.status.parse().map_err(|e: UnknownStatus| RepoError::Internal(e.to_string()))?;
        let details = match kind {
            ReportKind::GiveAway => ReportDetails::GiveAway { is_free: row.is_free.unwrap_or(true), swap: row.swap },
            ReportKind::IssueReport => ReportDetails::IssueReport,
            ReportKind::HelpRequest => ReportDetails::HelpRequest {
                category: row.category.unwrap_or_default(),
                urgency: row.urgency.unwrap_or_default(),
            },
            ReportKind::OfferHelp => ReportDetails::OfferHelp { barter: row.barter },
        };
        Ok(Report {
            id: row.id,
            user_id: row.user_id,
            user_name: row.user_name,
            title: row.title,
            description: row.description,
            image: row.image,
            address: row.address,
            location: point(row.lng, row.lat),
            city: row.city,
            neighborhood_id: row.neighborhood_id,
            status,
            follower_count: row.follower_count,
            comment_count: row.comment_count,
            created_at: row.created_at,
            details,
            is_author: row.is_author,
            is_followed: row.is_followed,
            distance: row.distance,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NeighborhoodRow {
    id: Id,
    name: String,
    name_en: Option<String>,
    city_name: String,
    city_name_en: Option<String>,
    city_id: Option<i64>,
    boundary: String,
}

impl TryFrom<NeighborhoodRow> for Neighborhood {
    type Error = RepoError;

    fn try_from(row: NeighborhoodRow) -> Result<Self, Self::Error> {
        let boundary: Polygon = serde_json::from_str(&row.boundary)
            .map_err(|e| RepoError::Internal(format!("neighborhood {} boundary: {e}", row.id)))?;
        Ok(Neighborhood {
            id: row.id,
            name: row.name,
            name_en: row.name_en,
            city_name: row.city_name,
            city_name_en: row.city_name_en,
            city_id: row.city_id,
            boundary,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Id,
    username: String,
    avatar: Option<String>,
    city: Option<String>,
    neighborhood_id: Option<Id>,
    lng: Option<f64>,
    lat: Option<f64>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            avatar: row.avatar,
            city: row.city,
            neighborhood_id: row.neighborhood_id,
            location: point(row.lng, row.lat),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RelationRow {
    id: Id,
    user_id: Id,
    report_id: Id,
    kind: String,
    content: Option<String>,
    created_at: DateTime<Utc>,
    username: String,
    avatar: Option<String>,
}

impl RelationRow {
    fn kind(&self) -> RepoResult<ReportKind> {
        self.kind.parse().map_err(|e: UnknownKind| RepoError::Internal(e.to_string()))
    }

    fn into_follower(self) -> RepoResult<Follower> {
        Ok(Follower {
            kind: self.kind()?,
            id: self.id,
            user_id: self.user_id,
            report_id: self.report_id,
            created_at: self.created_at,
            username: self.username,
            avatar: self.avatar,
        })
    }

    fn into_comment(self) -> RepoResult<Comment> {
        Ok(Comment {
            kind: self.kind()?,
            id: self.id,
            user_id: self.user_id,
            report_id: self.report_id,
            content: self.content.unwrap_or_default(),
            created_at: self.created_at,
            username: self.username,
            avatar: self.avatar,
        })
    }
}

const USER_SELECT: &str = "SELECT id, username, avatar, city, neighborhood_id, \
    ST_X(location::geometry) AS lng, ST_Y(location::geometry) AS lat, created_at FROM users";

const NEIGHBORHOOD_SELECT: &str = "SELECT id, name, name_en, city_name, city_name_en, city_id, \
    ST_AsGeoJSON(boundary) AS boundary FROM neighborhoods";

// current profile fields are joined in, never snapshotted
const FOLLOWER_SELECT: &str = "SELECT f.id, f.user_id, f.report_id, f.kind, NULL::text AS content, \
    f.created_at, u.username, u.avatar FROM followers f JOIN users u ON u.id = f.user_id";

const COMMENT_SELECT: &str = "SELECT c.id, c.user_id, c.report_id, c.kind, c.content, \
    c.created_at, u.username, u.avatar FROM comments c JOIN users u ON u.id = c.user_id";

// ---------------------------------------------------------------------
// Per-kind sub-select
// ---------------------------------------------------------------------

const SHARED_COLUMNS: &str = "r.id, r.user_id, r.user_name, r.title, r.description, r.image, r.address, \
    ST_X(r.location::geometry) AS lng, ST_Y(r.location::geometry) AS lat, r.city, r.neighborhood_id, \
    r.status, r.follower_count, r.comment_count, r.created_at";

/// Kind specific columns, padded with typed NULLs so every kind has the
/// same shape under UNION ALL.
fn kind_columns(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::GiveAway => {
            "r.is_free, r.swap, NULL::text AS barter, NULL::text AS category, NULL::text AS urgency"
        }
        ReportKind::IssueReport => {
            "NULL::boolean AS is_free, NULL::text AS swap, NULL::text AS barter, NULL::text AS category, NULL::text AS urgency"
        }
        ReportKind::HelpRequest => {
            "NULL::boolean AS is_free, NULL::text AS swap, NULL::text AS barter, r.category, r.urgency"
        }
        ReportKind::OfferHelp => {
            "NULL::boolean AS is_free, NULL::text AS swap, r.barter, NULL::text AS category, NULL::text AS urgency"
        }
    }
}

/// Pushes `SELECT ... FROM <table> r [LEFT JOIN followers f] WHERE TRUE`.
/// The follower join is scoped to the row's kind because report ids repeat
/// across tables.
fn push_report_select(
    qb: &mut QueryBuilder<'_, Postgres>,
    kind: ReportKind,
    viewer: Option<Id>,
    origin: Option<GeoPoint>,
) {
    qb.push("SELECT ")
        .push(SHARED_COLUMNS)
        .push(format_args!(", '{}'::text AS kind, ", kind.as_str()))
        .push(kind_columns(kind))
        .push(", ");
    match viewer {
        Some(v) => {
            qb.push("(r.user_id = ").push_bind(v).push(") AS is_author, (f.id IS NOT NULL) AS is_followed, ");
        }
        None => {
            qb.push("FALSE AS is_author, FALSE AS is_followed, ");
        }
    }
    match origin {
        Some(o) => {
            qb.push("ST_Distance(r.location, ST_SetSRID(ST_MakePoint(")
                .push_bind(o.lng)
                .push(", ")
                .push_bind(o.lat)
                .push("), 4326)::geography) AS distance");
        }
        None => {
            qb.push("NULL::float8 AS distance");
        }
    }
    qb.push(format_args!(" FROM {} r", kind.table()));
    if let Some(v) = viewer {
        qb.push(" LEFT JOIN followers f ON f.report_id = r.id AND f.kind = ")
            .push_bind(kind.as_str())
            .push(" AND f.user_id = ")
            .push_bind(v);
    }
    qb.push(" WHERE TRUE");
}

async fn fetch_report<'c, E>(ex: E, kind: ReportKind, id: Id, for_update: bool) -> RepoResult<Option<Report>>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut qb = QueryBuilder::new("");
    push_report_select(&mut qb, kind, None, None);
    qb.push(" AND r.id = ").push_bind(id);
    if for_update {
        qb.push(" FOR UPDATE OF r");
    }
    let row: Option<ReportRow> = qb.build_query_as().fetch_optional(ex).await?;
    row.map(Report::try_from).transpose()
}

async fn fetch_user<'c, E>(ex: E, id: Id) -> RepoResult<User>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = format!("{USER_SELECT} WHERE id = $1");
    let row: UserRow = sqlx::query_as(&sql).bind(id).fetch_one(ex).await?;
    Ok(row.into())
}

/// Pushes `, <col> = $n` assignments (or values) for the kind columns.
fn push_detail_assignments(qb: &mut QueryBuilder<'_, Postgres>, details: &ReportDetails) {
    match details.clone() {
        ReportDetails::GiveAway { is_free, swap } => {
            qb.push(", is_free = ").push_bind(is_free).push(", swap = ").push_bind(swap);
        }
        ReportDetails::HelpRequest { category, urgency } => {
            qb.push(", category = ").push_bind(category).push(", urgency = ").push_bind(urgency);
        }
        ReportDetails::OfferHelp { barter } => {
            qb.push(", barter = ").push_bind(barter);
        }
        ReportDetails::IssueReport => {}
    }
}

fn push_location(qb: &mut QueryBuilder<'_, Postgres>, p: Option<GeoPoint>) {
    // ST_MakePoint is strict, so a missing point stores NULL
    qb.push("ST_SetSRID(ST_MakePoint(")
        .push_bind(p.map(|p| p.lng))
        .push(", ")
        .push_bind(p.map(|p| p.lat))
        .push("), 4326)::geography");
}

// ---------------------------------------------------------------------
// Neighborhoods
// ---------------------------------------------------------------------

#[async_trait]
impl NeighborhoodRepo for PgRepo {
    async fn add_neighborhood(&self, new: NewNeighborhood) -> RepoResult<Neighborhood> {
        let boundary = serde_json::to_string(&new.boundary).map_err(|e| RepoError::Validation(e.to_string()))?;
        let (id,): (Id,) = sqlx::query_as(
            "INSERT INTO neighborhoods (name, name_en, city_name, city_name_en, city_id, boundary) \
             VALUES ($1, $2, $3, $4, $5, ST_SetSRID(ST_GeomFromGeoJSON($6), 4326)) RETURNING id",
        )
        .bind(&new.name)
        .bind(&new.name_en)
        .bind(&new.city_name)
        .bind(&new.city_name_en)
        .bind(new.city_id)
        .bind(boundary)
        .fetch_one(&self.pool)
        .await?;
        self.neighborhood_by_id(id).await?.ok_or(RepoError::NotFound)
    }

    async fn neighborhood_by_point(&self, lat: f64, lng: f64) -> RepoResult<Option<Neighborhood>> {
        let Some(p) = GeoPoint::new(lng, lat) else { return Ok(None) };
        let sql = format!(
            "{NEIGHBORHOOD_SELECT} WHERE ST_Contains(boundary, ST_SetSRID(ST_MakePoint($1, $2), 4326)) \
             ORDER BY id LIMIT 1"
        );
        let row: Option<NeighborhoodRow> =
            sqlx::query_as(&sql).bind(p.lng).bind(p.lat).fetch_optional(&self.pool).await?;
        row.map(Neighborhood::try_from).transpose()
    }

    async fn neighborhood_by_id(&self, id: Id) -> RepoResult<Option<Neighborhood>> {
        let sql = format!("{NEIGHBORHOOD_SELECT} WHERE id = $1");
        let row: Option<NeighborhoodRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(Neighborhood::try_from).transpose()
    }

    async fn list_neighborhoods(&self, city: Option<&str>) -> RepoResult<Vec<Neighborhood>> {
        let mut qb = QueryBuilder::new(NEIGHBORHOOD_SELECT);
        if let Some(c) = city {
            qb.push(" WHERE city_name = ").push_bind(c);
        }
        qb.push(" ORDER BY id");
        let rows: Vec<NeighborhoodRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Neighborhood::try_from).collect()
    }
}

// ---------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, new: NewUser, neighborhood_id: Option<Id>) -> RepoResult<User> {
        let username = username(&new.username)?;
        let location = new.location.as_ref().and_then(LocationInput::to_point);
        let mut qb = QueryBuilder::new("INSERT INTO users (username, avatar, city, neighborhood_id, location) VALUES (");
        qb.push_bind(username)
            .push(", ")
            .push_bind(new.avatar)
            .push(", ")
            .push_bind(new.city)
            .push(", ")
            .push_bind(neighborhood_id)
            .push(", ");
        push_location(&mut qb, location);
        qb.push(") RETURNING id");
        let (id,): (Id,) = qb.build_query_as().fetch_one(&self.pool).await?;
        fetch_user(&self.pool, id).await
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        fetch_user(&self.pool, id).await
    }

    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
        let mut tx = self.pool.begin().await?;
        let mut user = fetch_user(&mut *tx, id).await?;
        upd.apply(&mut user);
        let mut qb = QueryBuilder::new("UPDATE users SET username = ");
        qb.push_bind(user.username)
            .push(", avatar = ")
            .push_bind(user.avatar)
            .push(", city = ")
            .push_bind(user.city)
            .push(", neighborhood_id = ")
            .push_bind(user.neighborhood_id)
            .push(", location = ");
        push_location(&mut qb, user.location);
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&mut *tx).await?;
        let user = fetch_user(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn delete_user(&self, id: Id) -> RepoResult<User> {
        let mut tx = self.pool.begin().await?;
        let user = fetch_user(&mut *tx, id).await?;

        for kind in ReportKind::ALL {
            let table = kind.table();
            // relations hanging off the user's own reports
            for rel in ["comments", "followers"] {
                let sql = format!(
                    "DELETE FROM {rel} x USING {table} r \
                     WHERE x.report_id = r.id AND x.kind = $1 AND r.user_id = $2"
                );
                sqlx::query(&sql).bind(kind.as_str()).bind(id).execute(&mut *tx).await?;
            }
            let sql = format!("DELETE FROM {table} WHERE user_id = $1");
            sqlx::query(&sql).bind(id).execute(&mut *tx).await?;

            // the user's relations on surviving reports
            for (rel, counter) in [("comments", "comment_count"), ("followers", "follower_count")] {
                let sql = format!(
                    "UPDATE {table} r SET {counter} = GREATEST(r.{counter} - x.n, 0) \
                     FROM (SELECT report_id, COUNT(*) AS n FROM {rel} \
                           WHERE user_id = $1 AND kind = $2 GROUP BY report_id) x \
                     WHERE r.id = x.report_id"
                );
                sqlx::query(&sql).bind(id).bind(kind.as_str()).execute(&mut *tx).await?;
            }
        }
        sqlx::query("DELETE FROM comments WHERE user_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM followers WHERE user_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(user)
    }
}

// ---------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------

#[async_trait]
impl ReportRepo for PgRepo {
    async fn create_report(
        &self,
        kind: ReportKind,
        user_id: Id,
        new: NewReport,
        neighborhood_id: Option<Id>,
    ) -> RepoResult<Report> {
        let details = new.details(kind).map_err(RepoError::validation)?;
        let status = match new.status.as_deref().map(str::trim) {
            None | Some("") => ReportStatus::Active,
            Some(raw) => raw.parse().map_err(|e: UnknownStatus| RepoError::Validation(e.to_string()))?,
        };
        let location = new.location.as_ref().and_then(LocationInput::to_point);

        let mut tx = self.pool.begin().await?;
        let creator = fetch_user(&mut *tx, user_id).await?;
        let city = new.city.or(creator.city);

        let mut qb = QueryBuilder::new(format!(
            "INSERT INTO {} (user_id, user_name, title, description, image, address, city, neighborhood_id, status, location",
            kind.table()
        ));
        match &details {
            ReportDetails::GiveAway { .. } => { qb.push(", is_free, swap"); }
            ReportDetails::HelpRequest { .. } => { qb.push(", category, urgency"); }
            ReportDetails::OfferHelp { .. } => { qb.push(", barter"); }
            ReportDetails::IssueReport => {}
        }
        qb.push(") VALUES (")
            .push_bind(user_id)
            .push(", ")
            .push_bind(creator.username)
            .push(", ")
            .push_bind(new.title.trim().to_string())
            .push(", ")
            .push_bind(new.description)
            .push(", ")
            .push_bind(new.image)
            .push(", ")
            .push_bind(new.address.map(|a| a.trim().to_string()))
            .push(", ")
            .push_bind(city)
            .push(", ")
            .push_bind(neighborhood_id)
            .push(", ")
            .push_bind(status.as_str())
            .push(", ");
        push_location(&mut qb, location);
        match details {
            ReportDetails::GiveAway { is_free, swap } => {
                qb.push(", ").push_bind(is_free).push(", ").push_bind(swap);
            }
            ReportDetails::HelpRequest { category, urgency } => {
                qb.push(", ").push_bind(category).push(", ").push_bind(urgency);
            }
            ReportDetails::OfferHelp { barter } => {
                qb.push(", ").push_bind(barter);
            }
            ReportDetails::IssueReport => {}
        }
        qb.push(") RETURNING id");
        let (id,): (Id,) = qb.build_query_as().fetch_one(&mut *tx).await?;

        let report = fetch_report(&mut *tx, kind, id, false).await?.ok_or(RepoError::NotFound)?;
        tx.commit().await?;
        Ok(report)
    }

    async fn get_report(&self, kind: ReportKind, id: Id) -> RepoResult<Option<Report>> {
        fetch_report(&self.pool, kind, id, false).await
    }

    async fn update_report(&self, kind: ReportKind, id: Id, upd: UpdateReport) -> RepoResult<Report> {
        let mut tx = self.pool.begin().await?;
        let mut report = fetch_report(&mut *tx, kind, id, true).await?.ok_or(RepoError::NotFound)?;
        upd.apply(&mut report).map_err(RepoError::validation)?;

        let mut qb = QueryBuilder::new(format!("UPDATE {} SET title = ", kind.table()));
        qb.push_bind(report.title.clone())
            .push(", description = ")
            .push_bind(report.description.clone())
            .push(", image = ")
            .push_bind(report.image.clone())
            .push(", address = ")
            .push_bind(report.address.clone())
            .push(", city = ")
            .push_bind(report.city.clone())
            .push(", neighborhood_id = ")
            .push_bind(report.neighborhood_id)
            .push(", location = ");
        push_location(&mut qb, report.location);
        push_detail_assignments(&mut qb, &report.details);
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&mut *tx).await?;

        let report = fetch_report(&mut *tx, kind, id, false).await?.ok_or(RepoError::NotFound)?;
        tx.commit().await?;
        Ok(report)
    }

    async fn update_report_status(&self, kind: ReportKind, id: Id, status: &str) -> RepoResult<Report> {
        let status = ReportStatus::coerce(status).map_err(|e| RepoError::Validation(e.to_string()))?;
        let sql = format!("UPDATE {} SET status = $1 WHERE id = $2", kind.table());
        let done = sqlx::query(&sql).bind(status.as_str()).bind(id).execute(&self.pool).await?;
        if done.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        fetch_report(&self.pool, kind, id, false).await?.ok_or(RepoError::NotFound)
    }

    async fn remove_report(&self, kind: ReportKind, id: Id) -> RepoResult<Report> {
        let mut tx = self.pool.begin().await?;
        let snapshot = fetch_report(&mut *tx, kind, id, true).await?.ok_or(RepoError::NotFound)?;
        sqlx::query("DELETE FROM comments WHERE report_id = $1 AND kind = $2")
            .bind(id)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM followers WHERE report_id = $1 AND kind = $2")
            .bind(id)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;
        let sql = format!("DELETE FROM {} WHERE id = $1", kind.table());
        sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------

#[async_trait]
impl FeedRepo for PgRepo {
    async fn query_reports(&self, q: &FeedQuery) -> RepoResult<Vec<Report>> {
        let scope = q.scope()?;
        let ownership = q.filter.ownership;
        if ownership != OwnershipFilter::All && q.viewer_id.is_none() {
            return Ok(Vec::new());
        }
        let origin = q.origin();

        let mut qb = QueryBuilder::new("SELECT * FROM (");
        for (i, &kind) in q.filter.categories.iter().enumerate() {
            if i > 0 {
                qb.push(" UNION ALL ");
            }
            qb.push("(");
            push_report_select(&mut qb, kind, q.viewer_id, origin);
            match &scope {
                AreaScope::Everywhere => {}
                AreaScope::City(city) => {
                    qb.push(" AND r.city = ").push_bind(city.clone());
                }
                AreaScope::Neighborhood(id) => {
                    qb.push(" AND r.neighborhood_id = ").push_bind(*id);
                }
            }
            match (ownership, q.viewer_id) {
                (OwnershipFilter::Own, Some(v)) => {
                    qb.push(" AND r.user_id = ").push_bind(v);
                }
                (OwnershipFilter::Followed, Some(_)) => {
                    qb.push(" AND f.id IS NOT NULL");
                }
                _ => {}
            }
            qb.push(")");
        }
        qb.push(") AS feed ORDER BY ");
        if origin.is_some() {
            qb.push("distance ASC NULLS LAST, created_at DESC, id DESC");
        } else {
            qb.push("created_at DESC, id DESC");
        }
        qb.push(" LIMIT ")
            .push_bind(q.clamped_limit())
            .push(" OFFSET ")
            .push_bind(q.clamped_offset());

        let rows: Vec<ReportRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Report::try_from).collect()
    }
}

// ---------------------------------------------------------------------
// Followers & comments
// ---------------------------------------------------------------------

/// Locks the report row so counter updates serialize per report.
async fn lock_report(tx: &mut sqlx::Transaction<'_, Postgres>, kind: ReportKind, id: Id) -> RepoResult<()> {
    let sql = format!("SELECT id FROM {} WHERE id = $1 FOR UPDATE", kind.table());
    let found: Option<(Id,)> = sqlx::query_as(&sql).bind(id).fetch_optional(&mut **tx).await?;
    found.map(|_| ()).ok_or(RepoError::NotFound)
}

async fn bump_counter(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    kind: ReportKind,
    id: Id,
    counter: &str,
    delta: i64,
) -> RepoResult<()> {
    let sql = format!(
        "UPDATE {} SET {counter} = GREATEST({counter} + $1, 0) WHERE id = $2",
        kind.table()
    );
    sqlx::query(&sql).bind(delta).bind(id).execute(&mut **tx).await?;
    Ok(())
}

#[async_trait]
impl RelationRepo for PgRepo {
    async fn follow(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<Follower> {
        let mut tx = self.pool.begin().await?;
        lock_report(&mut tx, kind, report_id).await?;
        fetch_user(&mut *tx, user_id).await?;
        let inserted: Option<(Id,)> = sqlx::query_as(
            "INSERT INTO followers (user_id, report_id, kind) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, report_id, kind) DO NOTHING RETURNING id",
        )
        .bind(user_id)
        .bind(report_id)
        .bind(kind.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((id,)) = inserted else { return Err(RepoError::AlreadyExists) };
        bump_counter(&mut tx, kind, report_id, "follower_count", 1).await?;

        let sql = format!("{FOLLOWER_SELECT} WHERE f.id = $1");
        let row: RelationRow = sqlx::query_as(&sql).bind(id).fetch_one(&mut *tx).await?;
        tx.commit().await?;
        row.into_follower()
    }

    async fn unfollow(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<Unfollowed> {
        let mut tx = self.pool.begin().await?;
        let deleted: Option<(Id,)> = sqlx::query_as(
            "DELETE FROM followers WHERE user_id = $1 AND report_id = $2 AND kind = $3 RETURNING id",
        )
        .bind(user_id)
        .bind(report_id)
        .bind(kind.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if deleted.is_none() {
            return Ok(Unfollowed { removed: false });
        }
        bump_counter(&mut tx, kind, report_id, "follower_count", -1).await?;
        tx.commit().await?;
        Ok(Unfollowed { removed: true })
    }

    async fn is_following(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<bool> {
        let (found,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM followers WHERE user_id = $1 AND report_id = $2 AND kind = $3)",
        )
        .bind(user_id)
        .bind(report_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn list_followers(&self, kind: ReportKind, report_id: Id) -> RepoResult<Vec<Follower>> {
        let sql = format!("{FOLLOWER_SELECT} WHERE f.report_id = $1 AND f.kind = $2 ORDER BY f.created_at DESC, f.id DESC");
        let rows: Vec<RelationRow> =
            sqlx::query_as(&sql).bind(report_id).bind(kind.as_str()).fetch_all(&self.pool).await?;
        rows.into_iter().map(RelationRow::into_follower).collect()
    }

    async fn add_comment(&self, user_id: Id, report_id: Id, kind: ReportKind, content: &str) -> RepoResult<Comment> {
        let content = comment_body(content)?;
        let mut tx = self.pool.begin().await?;
        lock_report(&mut tx, kind, report_id).await?;
        fetch_user(&mut *tx, user_id).await?;
        let (id,): (Id,) = sqlx::query_as(
            "INSERT INTO comments (user_id, report_id, kind, content) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(user_id)
        .bind(report_id)
        .bind(kind.as_str())
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;
        bump_counter(&mut tx, kind, report_id, "comment_count", 1).await?;

        let sql = format!("{COMMENT_SELECT} WHERE c.id = $1");
        let row: RelationRow = sqlx::query_as(&sql).bind(id).fetch_one(&mut *tx).await?;
        tx.commit().await?;
        row.into_comment()
    }

    async fn list_comments(&self, report_id: Id, kind: ReportKind) -> RepoResult<Vec<Comment>> {
        let sql = format!("{COMMENT_SELECT} WHERE c.report_id = $1 AND c.kind = $2 ORDER BY c.created_at DESC, c.id DESC");
        let rows: Vec<RelationRow> =
            sqlx::query_as(&sql).bind(report_id).bind(kind.as_str()).fetch_all(&self.pool).await?;
        rows.into_iter().map(RelationRow::into_comment).collect()
    }

    async fn delete_comment(&self, user_id: Id, comment_id: Id) -> RepoResult<Comment> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("{COMMENT_SELECT} WHERE c.id = $1 FOR UPDATE OF c");
        let row: RelationRow = sqlx::query_as(&sql).bind(comment_id).fetch_one(&mut *tx).await?;
        if row.user_id != user_id {
            return Err(RepoError::Forbidden);
        }
        let comment = row.into_comment()?;
        sqlx::query("DELETE FROM comments WHERE id = $1").bind(comment_id).execute(&mut *tx).await?;
        bump_counter(&mut tx, comment.kind, comment.report_id, "comment_count", -1).await?;
        tx.commit().await?;
        Ok(comment)
    }
}
