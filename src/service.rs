//! Request-level orchestration on top of the repository traits: stamping a
//! neighborhood on anything that carries a location, owner checks, and
//! filling feed context from the viewer's profile.

use tracing::{info, warn};

use crate::feed::{FeedParams, FeedQuery, DEFAULT_LIMIT};
use crate::geo::{GeoPoint, LocationInput};
use crate::models::*;
use crate::repo::{Repo, RepoError, RepoResult};

/// Neighborhood containing `point`. Lookup failures degrade to `None`.
pub async fn resolve_neighborhood(repo: &dyn Repo, point: Option<GeoPoint>) -> Option<Id> {
    let p = point?;
    match repo.neighborhood_by_point(p.lat, p.lng).await {
        Ok(Some(n)) => Some(n.id),
        Ok(None) => {
            warn!(lat = p.lat, lng = p.lng, "no neighborhood contains point");
            None
        }
        Err(e) => {
            warn!(error = %e, "neighborhood lookup failed, continuing without one");
            None
        }
    }
}

/// Loads neighborhood boundaries into an empty store. Returns how many
/// were added; a store that already has neighborhoods is left alone.
pub async fn seed_neighborhoods(repo: &dyn Repo, records: Vec<NewNeighborhood>) -> RepoResult<usize> {
    if !repo.list_neighborhoods(None).await?.is_empty() {
        return Ok(0);
    }
    let mut added = 0;
    for n in records {
        repo.add_neighborhood(n).await?;
        added += 1;
    }
    info!(added, "neighborhoods seeded");
    Ok(added)
}

fn parsed(location: &Option<LocationInput>) -> Option<GeoPoint> {
    location.as_ref().and_then(LocationInput::to_point)
}

pub async fn register_user(repo: &dyn Repo, new: NewUser) -> RepoResult<User> {
    let neighborhood_id = resolve_neighborhood(repo, parsed(&new.location)).await;
    let user = repo.create_user(new, neighborhood_id).await?;
    info!(user_id = user.id, neighborhood_id = ?user.neighborhood_id, "user registered");
    Ok(user)
}

pub async fn update_profile(repo: &dyn Repo, user_id: Id, mut upd: UpdateUser) -> RepoResult<User> {
    if let Some(p) = parsed(&upd.location) {
        upd.neighborhood = Some(resolve_neighborhood(repo, Some(p)).await);
    }
    repo.update_user(user_id, upd).await
}

pub async fn delete_account(repo: &dyn Repo, user_id: Id) -> RepoResult<User> {
    let user = repo.delete_user(user_id).await?;
    info!(user_id, "account deleted with its reports and relations");
    Ok(user)
}

pub async fn create_report(repo: &dyn Repo, user_id: Id, kind: ReportKind, new: NewReport) -> RepoResult<Report> {
    let neighborhood_id = resolve_neighborhood(repo, parsed(&new.location)).await;
    let mut report = repo.create_report(kind, user_id, new, neighborhood_id).await?;
    report.is_author = true;
    info!(kind = %kind, report_id = report.id, user_id, "report created");
    Ok(report)
}

/// Single report with the viewer's relationship flags filled in.
pub async fn view_report(repo: &dyn Repo, viewer: Option<Id>, kind: ReportKind, id: Id) -> RepoResult<Report> {
    let mut report = repo.get_report(kind, id).await?.ok_or(RepoError::NotFound)?;
    if let Some(v) = viewer {
        report.is_author = report.user_id == v;
        report.is_followed = repo.is_following(v, id, kind).await?;
    }
    Ok(report)
}

async fn owned_report(repo: &dyn Repo, caller: Id, kind: ReportKind, id: Id) -> RepoResult<Report> {
    let report = repo.get_report(kind, id).await?.ok_or(RepoError::NotFound)?;
    if report.user_id != caller {
        return Err(RepoError::Forbidden);
    }
    Ok(report)
}

pub async fn edit_report(
    repo: &dyn Repo,
    caller: Id,
    kind: ReportKind,
    id: Id,
    mut upd: UpdateReport,
) -> RepoResult<Report> {
    owned_report(repo, caller, kind, id).await?;
    if let Some(p) = parsed(&upd.location) {
        upd.neighborhood = Some(resolve_neighborhood(repo, Some(p)).await);
    }
    let mut report = repo.update_report(kind, id, upd).await?;
    report.is_author = true;
    Ok(report)
}

pub async fn change_status(repo: &dyn Repo, caller: Id, kind: ReportKind, id: Id, status: &str) -> RepoResult<Report> {
    owned_report(repo, caller, kind, id).await?;
    let mut report = repo.update_report_status(kind, id, status).await?;
    report.is_author = true;
    info!(kind = %kind, report_id = id, status = report.status.as_str(), "report status changed");
    Ok(report)
}

pub async fn delete_report(repo: &dyn Repo, caller: Id, kind: ReportKind, id: Id) -> RepoResult<Report> {
    owned_report(repo, caller, kind, id).await?;
    let report = repo.remove_report(kind, id).await?;
    info!(kind = %kind, report_id = id, "report deleted with its comments and followers");
    Ok(report)
}

/// Builds and runs the feed query. City, neighborhood and location missing
/// from the request are taken from the viewer's profile.
pub async fn feed(repo: &dyn Repo, viewer: Option<Id>, params: &FeedParams) -> RepoResult<Vec<Report>> {
    let filter = params.filter()?;
    let mut q = FeedQuery::new(filter);
    q.viewer_id = viewer;
    q.city = params.city.clone().filter(|c| !c.trim().is_empty());
    q.neighborhood_id = params.neighborhood_id;
    q.viewer_location = LocationInput {
        lat: params.lat.clone().map(Into::into),
        lng: params.lng.clone().map(Into::into),
    }
    .to_point();
    q.limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    q.offset = params.offset.unwrap_or(0);

    if let Some(v) = viewer {
        match repo.get_user(v).await {
            Ok(user) => {
                // the profile neighborhood only belongs to the profile city
                let same_city = q.city.is_none() || q.city == user.city;
                if q.neighborhood_id.is_none() && same_city {
                    q.neighborhood_id = user.neighborhood_id;
                }
                if q.city.is_none() {
                    q.city = user.city;
                }
                if q.viewer_location.is_none() {
                    q.viewer_location = user.location;
                }
            }
            Err(RepoError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    repo.query_reports(&q).await
}
