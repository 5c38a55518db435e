use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::Auth;
use crate::error::ApiError;
use crate::feed::FeedParams;
use crate::geo::LocationInput;
use crate::models::*;
use crate::rate_limit::{Action, RateLimiterFacade};
use crate::repo::Repo;
use crate::service;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/users").route(web::post().to(register_user)))
            .service(
                web::resource("/users/me")
                    .route(web::patch().to(update_me))
                    .route(web::delete().to(delete_me)),
            )
            .service(web::resource("/users/{id}").route(web::get().to(get_user)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/auth/refresh").route(web::post().to(refresh_token)))
            .service(web::resource("/neighborhoods").route(web::get().to(list_neighborhoods)))
            // before {id} so "resolve" is not taken for an id
            .service(web::resource("/neighborhoods/resolve").route(web::get().to(resolve_neighborhood)))
            .service(web::resource("/neighborhoods/{id}").route(web::get().to(get_neighborhood)))
            .service(web::resource("/reports").route(web::get().to(list_reports)))
            .service(web::resource("/reports/{kind}").route(web::post().to(create_report)))
            .service(
                web::resource("/reports/{kind}/{id}")
                    .route(web::get().to(get_report))
                    .route(web::patch().to(update_report))
                    .route(web::delete().to(delete_report)),
            )
            .service(web::resource("/reports/{kind}/{id}/status").route(web::put().to(set_report_status)))
            .service(
                web::resource("/reports/{kind}/{id}/follow")
                    .route(web::post().to(follow_report))
                    .route(web::delete().to(unfollow_report)),
            )
            .service(web::resource("/reports/{kind}/{id}/followers").route(web::get().to(list_followers)))
            .service(
                web::resource("/reports/{kind}/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(web::resource("/comments/{id}").route(web::delete().to(delete_comment))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub limits: RateLimiterFacade,
}

fn kind_of(raw: &str) -> Result<ReportKind, ApiError> {
    raw.parse::<ReportKind>().map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn throttle(data: &AppState, action: Action, user_id: Id) -> Result<(), ApiError> {
    if data.limits.allow(action, user_id) {
        Ok(())
    } else {
        tracing::debug!(user_id, ?action, "rate limited");
        Err(ApiError::TooManyRequests)
    }
}

fn issue_token(user_id: Id, username: &str) -> Result<String, ApiError> {
    crate::auth::create_jwt(user_id, username).map_err(|e| {
        tracing::error!(error = %e, "token signing failed");
        ApiError::Internal
    })
}

// ---------------------------------------------------------------------
// Users and tokens
// ---------------------------------------------------------------------

#[derive(Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user: User,
    pub token: String,
}

#[derive(Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub id: Id,
    pub username: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = NewUser,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Username missing")
    )
)]
pub async fn register_user(data: web::Data<AppState>, payload: web::Json<NewUser>) -> Result<HttpResponse, ApiError> {
    let user = service::register_user(data.repo.as_ref(), payload.into_inner()).await?;
    let token = issue_token(user.id, &user.username)?;
    Ok(HttpResponse::Created().json(RegisterResponse { user, token }))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "Profile", body = User),
        (status = 404, description = "No such user")
    )
)]
pub async fn get_user(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/me",
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Profile updated", body = User),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn update_me(auth: Auth, data: web::Data<AppState>, payload: web::Json<UpdateUser>) -> Result<HttpResponse, ApiError> {
    let user = service::update_profile(data.repo.as_ref(), auth.user_id(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/me",
    responses(
        (status = 204, description = "Account and everything it owns deleted"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn delete_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    service::delete_account(data.repo.as_ref(), auth.user_id()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user info", body = MeResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(MeResponse { id: auth.user_id(), username: auth.0.name }))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    responses(
        (status = 200, description = "Fresh token", body = TokenResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn refresh_token(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    // deleted accounts must not keep renewing
    let user = data.repo.get_user(auth.user_id()).await.map_err(|_| ApiError::Unauthorized)?;
    let token = issue_token(user.id, &user.username)?;
    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

// ---------------------------------------------------------------------
// Neighborhoods
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CityParams {
    pub city: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PointParams {
    pub lat: Option<String>,
    pub lng: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/neighborhoods",
    params(CityParams),
    responses((status = 200, description = "Neighborhoods ordered by id", body = [Neighborhood]))
)]
pub async fn list_neighborhoods(data: web::Data<AppState>, q: web::Query<CityParams>) -> Result<HttpResponse, ApiError> {
    let city = q.city.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let list = data.repo.list_neighborhoods(city).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[utoipa::path(
    get,
    path = "/api/v1/neighborhoods/resolve",
    params(PointParams),
    responses(
        (status = 200, description = "Containing neighborhood", body = Neighborhood),
        (status = 400, description = "lat/lng missing or not numbers"),
        (status = 404, description = "Point is outside every neighborhood")
    )
)]
pub async fn resolve_neighborhood(data: web::Data<AppState>, q: web::Query<PointParams>) -> Result<HttpResponse, ApiError> {
    let q = q.into_inner();
    let point = LocationInput { lat: q.lat.map(Into::into), lng: q.lng.map(Into::into) }
        .to_point()
        .ok_or_else(|| ApiError::BadRequest("lat and lng must be valid coordinates".into()))?;
    let n = data.repo.neighborhood_by_point(point.lat, point.lng).await?.ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(n))
}

#[utoipa::path(
    get,
    path = "/api/v1/neighborhoods/{id}",
    params(("id" = Id, Path, description = "Neighborhood id")),
    responses(
        (status = 200, description = "Neighborhood", body = Neighborhood),
        (status = 404, description = "No such neighborhood")
    )
)]
pub async fn get_neighborhood(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let n = data.repo.neighborhood_by_id(path.into_inner()).await?.ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(n))
}

// ---------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/reports",
    params(FeedParams),
    responses(
        (status = 200, description = "Feed across the requested kinds", body = [Report]),
        (status = 400, description = "Invalid filter")
    )
)]
pub async fn list_reports(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    q: web::Query<FeedParams>,
) -> Result<HttpResponse, ApiError> {
    let viewer = auth.as_ref().map(Auth::user_id);
    let rows = service::feed(data.repo.as_ref(), viewer, &q).await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{kind}",
    params(("kind" = ReportKind, Path, description = "Report kind")),
    request_body = NewReport,
    responses(
        (status = 201, description = "Report created", body = Report),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Too many reports")
    )
)]
pub async fn create_report(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewReport>,
) -> Result<HttpResponse, ApiError> {
    let kind = kind_of(&path)?;
    throttle(&data, Action::Report, auth.user_id())?;
    let report = service::create_report(data.repo.as_ref(), auth.user_id(), kind, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(report))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{kind}/{id}",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report", body = Report),
        (status = 404, description = "No such report")
    )
)]
pub async fn get_report(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let viewer = auth.as_ref().map(Auth::user_id);
    let report = service::view_report(data.repo.as_ref(), viewer, kind_of(&kind)?, id).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    patch,
    path = "/api/v1/reports/{kind}/{id}",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    request_body = UpdateReport,
    responses(
        (status = 200, description = "Report updated", body = Report),
        (status = 403, description = "Not the author"),
        (status = 404, description = "No such report")
    )
)]
pub async fn update_report(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    payload: web::Json<UpdateReport>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let report = service::edit_report(data.repo.as_ref(), auth.user_id(), kind_of(&kind)?, id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    put,
    path = "/api/v1/reports/{kind}/{id}/status",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Status changed", body = Report),
        (status = 400, description = "Unknown status"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "No such report")
    )
)]
pub async fn set_report_status(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    payload: web::Json<StatusUpdate>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let report = service::change_status(data.repo.as_ref(), auth.user_id(), kind_of(&kind)?, id, &payload.status).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    delete,
    path = "/api/v1/reports/{kind}/{id}",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    responses(
        (status = 200, description = "Deleted report", body = Report),
        (status = 403, description = "Not the author"),
        (status = 404, description = "No such report")
    )
)]
pub async fn delete_report(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let report = service::delete_report(data.repo.as_ref(), auth.user_id(), kind_of(&kind)?, id).await?;
    Ok(HttpResponse::Ok().json(report))
}

// ---------------------------------------------------------------------
// Follows and comments
// ---------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/reports/{kind}/{id}/follow",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    responses(
        (status = 201, description = "Now following", body = Follower),
        (status = 404, description = "No such report"),
        (status = 409, description = "Already following"),
        (status = 429, description = "Too many follows")
    )
)]
pub async fn follow_report(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let kind = kind_of(&kind)?;
    throttle(&data, Action::Follow, auth.user_id())?;
    let follower = data.repo.follow(auth.user_id(), id, kind).await?;
    Ok(HttpResponse::Created().json(follower))
}

#[utoipa::path(
    delete,
    path = "/api/v1/reports/{kind}/{id}/follow",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    responses((status = 200, description = "Follow removed, or was never there", body = Unfollowed))
)]
pub async fn unfollow_report(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let result = data.repo.unfollow(auth.user_id(), id, kind_of(&kind)?).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{kind}/{id}/followers",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    responses((status = 200, description = "Followers, newest first", body = [Follower]))
)]
pub async fn list_followers(data: web::Data<AppState>, path: web::Path<(String, Id)>) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let list = data.repo.list_followers(kind_of(&kind)?, id).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{kind}/{id}/comments",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    responses((status = 200, description = "Comments, newest first", body = [Comment]))
)]
pub async fn list_comments(data: web::Data<AppState>, path: web::Path<(String, Id)>) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let list = data.repo.list_comments(id, kind_of(&kind)?).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{kind}/{id}/comments",
    params(("kind" = ReportKind, Path, description = "Report kind"), ("id" = Id, Path, description = "Report id")),
    request_body = NewComment,
    responses(
        (status = 201, description = "Comment added", body = Comment),
        (status = 400, description = "Empty comment"),
        (status = 404, description = "No such report"),
        (status = 429, description = "Too many comments")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, Id)>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let kind = kind_of(&kind)?;
    throttle(&data, Action::Comment, auth.user_id())?;
    let comment = data.repo.add_comment(auth.user_id(), id, kind, &payload.content).await?;
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Deleted comment", body = Comment),
        (status = 403, description = "Not the comment's author"),
        (status = 404, description = "No such comment")
    )
)]
pub async fn delete_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let comment = data.repo.delete_comment(auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(comment))
}
