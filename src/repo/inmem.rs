//! Single-process store. Every mutation holds the write guard for its whole
//! duration, which gives the same all-or-nothing behavior as a SQL
//! transaction. State is snapshotted to JSON after each write when a data
//! directory is configured.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::*;
use crate::feed::{order_and_page, FeedQuery, OwnershipFilter};
use crate::geo::{GeoPoint, LocationInput};

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FollowerRow {
    id: Id,
    user_id: Id,
    report_id: Id,
    kind: ReportKind,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommentRow {
    id: Id,
    user_id: Id,
    report_id: Id,
    kind: ReportKind,
    content: String,
    created_at: DateTime<Utc>,
}

/// One map per report kind, mirroring the four tables of the SQL schema.
#[derive(Default, Serialize, Deserialize)]
struct ReportTables {
    give_aways: BTreeMap<Id, Report>,
    issue_reports: BTreeMap<Id, Report>,
    help_requests: BTreeMap<Id, Report>,
    offer_helps: BTreeMap<Id, Report>,
}

impl ReportTables {
    fn table(&self, kind: ReportKind) -> &BTreeMap<Id, Report> {
        match kind {
            ReportKind::GiveAway => &self.give_aways,
            ReportKind::IssueReport => &self.issue_reports,
            ReportKind::HelpRequest => &self.help_requests,
            ReportKind::OfferHelp => &self.offer_helps,
        }
    }

    fn table_mut(&mut self, kind: ReportKind) -> &mut BTreeMap<Id, Report> {
        match kind {
            ReportKind::GiveAway => &mut self.give_aways,
            ReportKind::IssueReport => &mut self.issue_reports,
            ReportKind::HelpRequest => &mut self.help_requests,
            ReportKind::OfferHelp => &mut self.offer_helps,
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct State {
    neighborhoods: BTreeMap<Id, Neighborhood>,
    users: BTreeMap<Id, User>,
    reports: ReportTables,
    followers: BTreeMap<Id, FollowerRow>,
    comments: BTreeMap<Id, CommentRow>,
    /// Per-table id sequences; report ids repeat across kinds.
    sequences: BTreeMap<String, Id>,
}

impl State {
    fn next_id(&mut self, table: &str) -> Id {
        let seq = self.sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    fn report_exists(&self, kind: ReportKind, id: Id) -> bool {
        self.reports.table(kind).contains_key(&id)
    }

    fn follow_row(&self, user_id: Id, report_id: Id, kind: ReportKind) -> Option<&FollowerRow> {
        self.followers
            .values()
            .find(|f| f.user_id == user_id && f.report_id == report_id && f.kind == kind)
    }

    fn bump_counters(&mut self, kind: ReportKind, id: Id, followers: i64, comments: i64) {
        if let Some(r) = self.reports.table_mut(kind).get_mut(&id) {
            r.follower_count = (r.follower_count + followers).max(0);
            r.comment_count = (r.comment_count + comments).max(0);
        }
    }

    /// Drops every comment and follower row pointing at `(id, kind)`.
    fn purge_relations(&mut self, kind: ReportKind, id: Id) {
        self.comments.retain(|_, c| !(c.report_id == id && c.kind == kind));
        self.followers.retain(|_, f| !(f.report_id == id && f.kind == kind));
    }

    fn profile(&self, user_id: Id) -> (String, Option<String>) {
        self.users
            .get(&user_id)
            .map(|u| (u.username.clone(), u.avatar.clone()))
            .unwrap_or_default()
    }

    fn follower_view(&self, row: &FollowerRow) -> Follower {
        let (username, avatar) = self.profile(row.user_id);
        Follower {
            id: row.id,
            user_id: row.user_id,
            report_id: row.report_id,
            kind: row.kind,
            created_at: row.created_at,
            username,
            avatar,
        }
    }

    fn comment_view(&self, row: &CommentRow) -> Comment {
        let (username, avatar) = self.profile(row.user_id);
        Comment {
            id: row.id,
            user_id: row.user_id,
            report_id: row.report_id,
            kind: row.kind,
            content: row.content.clone(),
            created_at: row.created_at,
            username,
            avatar,
        }
    }
}

#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    /// Store that lives only as long as the process.
    pub fn ephemeral() -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
    }

    /// Store persisted to `<dir>/state.json`, loading any existing snapshot.
    pub fn with_data_dir(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(SNAPSHOT_FILE);
        let state = Self::load_state_from(&path);
        Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    log::info!("[inmem] loaded snapshot '{}'", path.display());
                    s
                }
                Err(e) => {
                    log::warn!("[inmem] failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            },
            Err(e) => {
                log::info!("[inmem] no snapshot at '{}': {e}. Starting empty.", path.display());
                State::default()
            }
        }
    }

    /// Writes `state` to a sibling temp file and renames it over the
    /// snapshot. Called with the write guard held so writers never interleave.
    fn persist(&self, state: &State) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        let bytes = match serde_json::to_vec_pretty(state) {
            Ok(b) => b,
            Err(e) => {
                log::error!("[inmem] failed to serialize snapshot: {e}");
                return;
            }
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path)) {
            log::error!("[inmem] failed to write snapshot '{}': {e}", path.display());
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    /// Runs `f` under the write guard and snapshots only if it succeeded.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
        let mut s = self.write()?;
        let out = f(&mut *s)?;
        self.persist(&s);
        Ok(out)
    }
}

impl Default for InMemRepo {
    fn default() -> Self {
        Self::ephemeral()
    }
}

#[async_trait]
impl NeighborhoodRepo for InMemRepo {
    async fn add_neighborhood(&self, new: NewNeighborhood) -> RepoResult<Neighborhood> {
        self.mutate(|s| {
            let id = s.next_id("neighborhoods");
            let n = Neighborhood {
                id,
                name: new.name,
                name_en: new.name_en,
                city_name: new.city_name,
                city_name_en: new.city_name_en,
                city_id: new.city_id,
                boundary: new.boundary,
            };
            s.neighborhoods.insert(id, n.clone());
            Ok(n)
        })
    }

    async fn neighborhood_by_point(&self, lat: f64, lng: f64) -> RepoResult<Option<Neighborhood>> {
        let Some(p) = GeoPoint::new(lng, lat) else { return Ok(None) };
        let s = self.read()?;
        // BTreeMap iterates in id order, so the first hit is the lowest id
        Ok(s.neighborhoods.values().find(|n| n.boundary.contains(&p)).cloned())
    }

    async fn neighborhood_by_id(&self, id: Id) -> RepoResult<Option<Neighborhood>> {
        Ok(self.read()?.neighborhoods.get(&id).cloned())
    }

    async fn list_neighborhoods(&self, city: Option<&str>) -> RepoResult<Vec<Neighborhood>> {
        let s = self.read()?;
        Ok(s.neighborhoods
            .values()
            .filter(|n| city.map_or(true, |c| n.city_name == c))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, new: NewUser, neighborhood_id: Option<Id>) -> RepoResult<User> {
        let username = username(&new.username)?;
        self.mutate(|s| {
            let id = s.next_id("users");
            let user = User {
                id,
                username,
                avatar: new.avatar,
                city: new.city,
                neighborhood_id,
                location: new.location.as_ref().and_then(LocationInput::to_point),
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            Ok(user)
        })
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
        self.mutate(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            upd.apply(user);
            Ok(user.clone())
        })
    }

    async fn delete_user(&self, id: Id) -> RepoResult<User> {
        self.mutate(|s| {
            let user = s.users.remove(&id).ok_or(RepoError::NotFound)?;

            for kind in ReportKind::ALL {
                let owned: Vec<Id> = s
                    .reports
                    .table(kind)
                    .values()
                    .filter(|r| r.user_id == id)
                    .map(|r| r.id)
                    .collect();
                for report_id in owned {
                    s.purge_relations(kind, report_id);
                    s.reports.table_mut(kind).remove(&report_id);
                }
            }

            // relations on other people's reports
            let comments: Vec<CommentRow> = s.comments.values().filter(|c| c.user_id == id).cloned().collect();
            for c in comments {
                s.comments.remove(&c.id);
                s.bump_counters(c.kind, c.report_id, 0, -1);
            }
            let follows: Vec<FollowerRow> = s.followers.values().filter(|f| f.user_id == id).cloned().collect();
            for f in follows {
                s.followers.remove(&f.id);
                s.bump_counters(f.kind, f.report_id, -1, 0);
            }
            Ok(user)
        })
    }
}

#[async_trait]
impl ReportRepo for InMemRepo {
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
        self.mutate(|s| {
            let creator = s.users.get(&user_id).ok_or(RepoError::NotFound)?;
            let user_name = creator.username.clone();
            let city = new.city.clone().or_else(|| creator.city.clone());
            let id = s.next_id(kind.table());
            let report = Report {
                id,
                user_id,
                user_name,
                title: new.title.trim().to_string(),
                description: new.description,
                image: new.image,
                address: new.address.map(|a| a.trim().to_string()),
                location: new.location.as_ref().and_then(LocationInput::to_point),
                city,
                neighborhood_id,
                status,
                follower_count: 0,
                comment_count: 0,
                created_at: Utc::now(),
                details,
                is_author: false,
                is_followed: false,
                distance: None,
            };
            s.reports.table_mut(kind).insert(id, report.clone());
            Ok(report)
        })
    }

    async fn get_report(&self, kind: ReportKind, id: Id) -> RepoResult<Option<Report>> {
        Ok(self.read()?.reports.table(kind).get(&id).cloned())
    }

    async fn update_report(&self, kind: ReportKind, id: Id, upd: UpdateReport) -> RepoResult<Report> {
        self.mutate(|s| {
            let report = s.reports.table_mut(kind).get_mut(&id).ok_or(RepoError::NotFound)?;
            let mut edited = report.clone();
            upd.apply(&mut edited).map_err(RepoError::validation)?;
            *report = edited.clone();
            Ok(edited)
        })
    }

    async fn update_report_status(&self, kind: ReportKind, id: Id, status: &str) -> RepoResult<Report> {
        let status = ReportStatus::coerce(status).map_err(|e| RepoError::Validation(e.to_string()))?;
        self.mutate(|s| {
            let report = s.reports.table_mut(kind).get_mut(&id).ok_or(RepoError::NotFound)?;
            report.status = status;
            Ok(report.clone())
        })
    }

    async fn remove_report(&self, kind: ReportKind, id: Id) -> RepoResult<Report> {
        self.mutate(|s| {
            let report = s.reports.table_mut(kind).remove(&id).ok_or(RepoError::NotFound)?;
            s.purge_relations(kind, id);
            Ok(report)
        })
    }
}

#[async_trait]
impl FeedRepo for InMemRepo {
    async fn query_reports(&self, q: &FeedQuery) -> RepoResult<Vec<Report>> {
        let scope = q.scope()?;
        let ownership = q.filter.ownership;
        if ownership != OwnershipFilter::All && q.viewer_id.is_none() {
            return Ok(Vec::new());
        }
        let origin = q.origin();

        let s = self.read()?;
        let mut rows = Vec::new();
        for &kind in &q.filter.categories {
            for r in s.reports.table(kind).values().filter(|r| scope.admits(r)) {
                let is_author = q.viewer_id == Some(r.user_id);
                let is_followed = q
                    .viewer_id
                    .map(|v| s.follow_row(v, r.id, kind).is_some())
                    .unwrap_or(false);
                match ownership {
                    OwnershipFilter::Own if !is_author => continue,
                    OwnershipFilter::Followed if !is_followed => continue,
                    _ => {}
                }
                let mut row = r.clone();
                row.is_author = is_author;
                row.is_followed = is_followed;
                row.distance = origin.zip(r.location).map(|(o, p)| o.distance_meters(&p));
                rows.push(row);
            }
        }
        Ok(order_and_page(rows, q))
    }
}

#[async_trait]
impl RelationRepo for InMemRepo {
    async fn follow(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<Follower> {
        self.mutate(|s| {
            if !s.report_exists(kind, report_id) || !s.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            if s.follow_row(user_id, report_id, kind).is_some() {
                return Err(RepoError::AlreadyExists);
            }
            let id = s.next_id("followers");
            let row = FollowerRow { id, user_id, report_id, kind, created_at: Utc::now() };
            s.followers.insert(id, row.clone());
            s.bump_counters(kind, report_id, 1, 0);
            Ok(s.follower_view(&row))
        })
    }

    async fn unfollow(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<Unfollowed> {
        {
            let s = self.read()?;
            if s.follow_row(user_id, report_id, kind).is_none() {
                return Ok(Unfollowed { removed: false });
            }
        }
        self.mutate(|s| {
            // re-check under the write guard
            let Some(id) = s.follow_row(user_id, report_id, kind).map(|f| f.id) else {
                return Ok(Unfollowed { removed: false });
            };
            s.followers.remove(&id);
            s.bump_counters(kind, report_id, -1, 0);
            Ok(Unfollowed { removed: true })
        })
    }

    async fn is_following(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<bool> {
        Ok(self.read()?.follow_row(user_id, report_id, kind).is_some())
    }

    async fn list_followers(&self, kind: ReportKind, report_id: Id) -> RepoResult<Vec<Follower>> {
        let s = self.read()?;
        let mut rows: Vec<&FollowerRow> = s
            .followers
            .values()
            .filter(|f| f.report_id == report_id && f.kind == kind)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rows.into_iter().map(|f| s.follower_view(f)).collect())
    }

    async fn add_comment(&self, user_id: Id, report_id: Id, kind: ReportKind, content: &str) -> RepoResult<Comment> {
        let content = comment_body(content)?;
        self.mutate(|s| {
            if !s.report_exists(kind, report_id) || !s.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            let id = s.next_id("comments");
            let row = CommentRow { id, user_id, report_id, kind, content, created_at: Utc::now() };
            s.comments.insert(id, row.clone());
            s.bump_counters(kind, report_id, 0, 1);
            Ok(s.comment_view(&row))
        })
    }

    async fn list_comments(&self, report_id: Id, kind: ReportKind) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        let mut rows: Vec<&CommentRow> = s
            .comments
            .values()
            .filter(|c| c.report_id == report_id && c.kind == kind)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rows.into_iter().map(|c| s.comment_view(c)).collect())
    }

    async fn delete_comment(&self, user_id: Id, comment_id: Id) -> RepoResult<Comment> {
        self.mutate(|s| {
            let row = s.comments.get(&comment_id).ok_or(RepoError::NotFound)?;
            if row.user_id != user_id {
                return Err(RepoError::Forbidden);
            }
            let view = s.comment_view(row);
            s.comments.remove(&comment_id);
            s.bump_counters(view.kind, view.report_id, 0, -1);
            Ok(view)
        })
    }
}
