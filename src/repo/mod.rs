use async_trait::async_trait;

use crate::feed::FeedQuery;
use crate::models::*;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("already exists")] AlreadyExists,
    #[error("forbidden")] Forbidden,
    #[error("validation: {0}")] Validation(String),
    #[error("internal: {0}")] Internal(String),
}

impl RepoError {
    pub fn validation(problems: Vec<String>) -> Self {
        RepoError::Validation(problems.join("; "))
    }
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::AlreadyExists,
            other => RepoError::Internal(other.to_string()),
        }
    }
}

impl From<crate::feed::FilterError> for RepoError {
    fn from(e: crate::feed::FilterError) -> Self {
        RepoError::Validation(e.to_string())
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Neighborhood reference data. Lookups never mutate.
#[async_trait]
pub trait NeighborhoodRepo: Send + Sync {
    async fn add_neighborhood(&self, new: NewNeighborhood) -> RepoResult<Neighborhood>;
    /// Containing neighborhood, lowest id on overlap; `None` for
    /// non-finite coordinates or points outside every boundary.
    async fn neighborhood_by_point(&self, lat: f64, lng: f64) -> RepoResult<Option<Neighborhood>>;
    async fn neighborhood_by_id(&self, id: Id) -> RepoResult<Option<Neighborhood>>;
    /// Ordered by id; `city` matches `city_name` exactly.
    async fn list_neighborhoods(&self, city: Option<&str>) -> RepoResult<Vec<Neighborhood>>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser, neighborhood_id: Option<Id>) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User>;
    /// Removes the account together with its reports (and their relations),
    /// its comments and its follows, fixing counters on surviving reports.
    async fn delete_user(&self, id: Id) -> RepoResult<User>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    async fn create_report(
        &self,
        kind: ReportKind,
        user_id: Id,
        new: NewReport,
        neighborhood_id: Option<Id>,
    ) -> RepoResult<Report>;
    async fn get_report(&self, kind: ReportKind, id: Id) -> RepoResult<Option<Report>>;
    async fn update_report(&self, kind: ReportKind, id: Id, upd: UpdateReport) -> RepoResult<Report>;
    async fn update_report_status(&self, kind: ReportKind, id: Id, status: &str) -> RepoResult<Report>;
    /// Deletes comments, followers and the row in one unit; returns the
    /// deleted row.
    async fn remove_report(&self, kind: ReportKind, id: Id) -> RepoResult<Report>;
}

#[async_trait]
pub trait FeedRepo: Send + Sync {
    async fn query_reports(&self, q: &FeedQuery) -> RepoResult<Vec<Report>>;
}

#[async_trait]
pub trait RelationRepo: Send + Sync {
    async fn follow(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<Follower>;
    async fn unfollow(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<Unfollowed>;
    async fn is_following(&self, user_id: Id, report_id: Id, kind: ReportKind) -> RepoResult<bool>;
    /// Newest first.
    async fn list_followers(&self, kind: ReportKind, report_id: Id) -> RepoResult<Vec<Follower>>;
    async fn add_comment(&self, user_id: Id, report_id: Id, kind: ReportKind, content: &str) -> RepoResult<Comment>;
    /// Newest first.
    async fn list_comments(&self, report_id: Id, kind: ReportKind) -> RepoResult<Vec<Comment>>;
    async fn delete_comment(&self, user_id: Id, comment_id: Id) -> RepoResult<Comment>;
}

pub trait Repo: NeighborhoodRepo + UserRepo + ReportRepo + FeedRepo + RelationRepo {}

impl<T> Repo for T where T: NeighborhoodRepo + UserRepo + ReportRepo + FeedRepo + RelationRepo {}

/// Trimmed comment body, or a validation error when nothing is left.
pub(crate) fn comment_body(content: &str) -> RepoResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(RepoError::Validation("comment content is required".into()));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn username(raw: &str) -> RepoResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RepoError::Validation("username is required".into()));
    }
    Ok(trimmed.to_string())
}
