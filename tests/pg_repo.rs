#![cfg(feature = "postgres-store")]

use hood::feed::{FeedFilter, FeedQuery};
use hood::geo::{LocationInput, Polygon};
use hood::models::*;
use hood::repo::pg::PgRepo;
use hood::repo::{FeedRepo, NeighborhoodRepo, RelationRepo, RepoError, ReportRepo, UserRepo};
use serial_test::serial;
use sqlx::postgres::{PgPool, PgPoolOptions};

async fn pg_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await
        .ok()?;
    PgRepo::new(pool.clone()).migrate().await.ok()?;
    Some(pool)
}

async fn pg_repo() -> Option<PgRepo> {
    pg_pool().await.map(PgRepo::new)
}

/// Moves both sequences to the same value so the next rows share an id.
async fn align_ids(pool: &PgPool, tables: &[&str]) {
    let mut top = 0i64;
    for t in tables {
        let seq: String = sqlx::query_scalar("SELECT pg_get_serial_sequence($1, 'id')").bind(*t).fetch_one(pool).await.unwrap();
        let last: i64 = sqlx::query_scalar(&format!("SELECT last_value FROM {seq}")).fetch_one(pool).await.unwrap();
        top = top.max(last);
    }
    for t in tables {
        sqlx::query("SELECT setval(pg_get_serial_sequence($1, 'id'), $2)").bind(*t).bind(top).execute(pool).await.unwrap();
    }
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

async fn user(r: &PgRepo, city: Option<String>) -> User {
    r.create_user(NewUser { username: unique("user"), city, ..Default::default() }, None).await.unwrap()
}

fn report_for(kind: ReportKind, title: &str, city: &str) -> NewReport {
    let mut n = NewReport {
        title: title.into(),
        address: Some("1 Main St".into()),
        city: Some(city.into()),
        ..Default::default()
    };
    if kind == ReportKind::HelpRequest {
        n.category = Some("groceries".into());
        n.urgency = Some("high".into());
    }
    n
}

#[tokio::test]
#[serial]
async fn pg_point_resolution() {
    let Some(r) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return; };
    // far away from anything another run could have seeded
    let ring = vec![[-170.0, -80.0], [-169.0, -80.0], [-169.0, -79.0], [-170.0, -79.0], [-170.0, -80.0]];
    let n = r
        .add_neighborhood(NewNeighborhood {
            name: unique("hood"),
            name_en: None,
            city_name: unique("city"),
            city_name_en: None,
            city_id: None,
            boundary: Polygon::from_ring(ring.clone()),
        })
        .await
        .unwrap();
    assert_eq!(n.boundary, Polygon::from_ring(ring));

    let hit = r.neighborhood_by_point(-79.5, -169.5).await.unwrap().unwrap();
    assert!(hit.id <= n.id);
    assert!(r.neighborhood_by_point(f64::NAN, 0.0).await.unwrap().is_none());
    assert_eq!(r.list_neighborhoods(Some(&n.city_name)).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn pg_report_relations_and_cascade() {
    let Some(r) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return; };
    let city = unique("city");
    let owner = user(&r, Some(city.clone())).await;
    let fan = user(&r, None).await;
    let kind = ReportKind::HelpRequest;

    let mut new = report_for(kind, "shopping", &city);
    new.location = Some(LocationInput::new(32.08, 34.78));
    let rep = r.create_report(kind, owner.id, new, None).await.unwrap();
    assert_eq!(rep.status, ReportStatus::Active);
    assert_eq!(rep.location.map(|p| (p.lat * 100.0).round()), Some(3208.0));
    assert_eq!(rep.details, ReportDetails::HelpRequest { category: "groceries".into(), urgency: "high".into() });

    r.follow(fan.id, rep.id, kind).await.unwrap();
    assert!(matches!(r.follow(fan.id, rep.id, kind).await, Err(RepoError::AlreadyExists)));
    r.add_comment(fan.id, rep.id, kind, "on my way").await.unwrap();
    let stored = r.get_report(kind, rep.id).await.unwrap().unwrap();
    assert_eq!((stored.follower_count, stored.comment_count), (1, 1));

    let blank = r.update_report_status(kind, rep.id, "").await.unwrap();
    assert_eq!(blank.status, ReportStatus::NoStatus);

    r.remove_report(kind, rep.id).await.unwrap();
    assert!(r.list_comments(rep.id, kind).await.unwrap().is_empty());
    assert!(r.list_followers(kind, rep.id).await.unwrap().is_empty());
    assert!(matches!(r.remove_report(kind, rep.id).await, Err(RepoError::NotFound)));
}

#[tokio::test]
#[serial]
async fn pg_feed_union_and_scopes() {
    let Some(r) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return; };
    let city = unique("city");
    let u = user(&r, Some(city.clone())).await;
    let gift = r.create_report(ReportKind::GiveAway, u.id, report_for(ReportKind::GiveAway, "chair", &city), None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let issue = r
        .create_report(ReportKind::IssueReport, u.id, report_for(ReportKind::IssueReport, "light", &city), None)
        .await
        .unwrap();

    // NBR with no neighborhood narrows to the city
    let filter = FeedFilter::parse(Some("NBR"), &["give_away", "issue_report"], None, None).unwrap();
    let mut q = FeedQuery::new(filter);
    q.city = Some(city.clone());
    let rows = r.query_reports(&q).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].kind(), rows[0].id), (ReportKind::IssueReport, issue.id));
    assert_eq!((rows[1].kind(), rows[1].id), (ReportKind::GiveAway, gift.id));

    let filter = FeedFilter::parse(Some("CITY"), &["give_away"], Some("OWN"), None).unwrap();
    let mut q = FeedQuery::new(filter);
    q.city = Some(city);
    q.viewer_id = Some(u.id);
    let rows = r.query_reports(&q).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows.iter().all(|row| row.is_author));

    r.delete_user(u.id).await.unwrap();
    assert!(r.get_report(ReportKind::GiveAway, gift.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn pg_followed_feed_joins_on_kind() {
    let Some(pool) = pg_pool().await else { eprintln!("skip: no DATABASE_URL"); return; };
    let r = PgRepo::new(pool.clone());
    let city = unique("city");
    let owner = user(&r, Some(city.clone())).await;
    let fan = user(&r, None).await;

    align_ids(&pool, &["give_aways", "issue_reports"]).await;
    let gift = r.create_report(ReportKind::GiveAway, owner.id, report_for(ReportKind::GiveAway, "lamp", &city), None).await.unwrap();
    let issue = r
        .create_report(ReportKind::IssueReport, owner.id, report_for(ReportKind::IssueReport, "pothole", &city), None)
        .await
        .unwrap();
    assert_eq!(gift.id, issue.id);
    r.follow(fan.id, gift.id, ReportKind::GiveAway).await.unwrap();

    let filter = FeedFilter::parse(Some("CITY"), &["give_away", "issue_report"], Some("FOLLOWED"), None).unwrap();
    let mut q = FeedQuery::new(filter);
    q.city = Some(city.clone());
    q.viewer_id = Some(fan.id);
    let rows = r.query_reports(&q).await.unwrap();
    assert_eq!(rows.iter().map(|row| (row.kind(), row.id)).collect::<Vec<_>>(), vec![(ReportKind::GiveAway, gift.id)]);
    assert!(rows[0].is_followed);

    let filter = FeedFilter::parse(Some("CITY"), &["give_away", "issue_report"], None, None).unwrap();
    let mut q = FeedQuery::new(filter);
    q.city = Some(city);
    q.viewer_id = Some(fan.id);
    let rows = r.query_reports(&q).await.unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row.is_followed, row.kind() == ReportKind::GiveAway, "{:?}", row.kind());
    }

    r.delete_user(owner.id).await.unwrap();
}
