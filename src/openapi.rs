use crate::feed::{AreaFilter, FeedOrder, OwnershipFilter};
use crate::geo::{GeoPoint, LocationInput};
use crate::models::{
    Comment, Follower, Neighborhood, NewComment, NewReport, NewUser, Report, ReportKind, ReportStatus, StatusUpdate,
    Unfollowed, UpdateReport, UpdateUser, User,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register_user,
        crate::routes::get_user,
        crate::routes::update_me,
        crate::routes::delete_me,
        crate::routes::auth_me,
        crate::routes::refresh_token,
        crate::routes::list_neighborhoods,
        crate::routes::resolve_neighborhood,
        crate::routes::get_neighborhood,
        crate::routes::list_reports,
        crate::routes::create_report,
        crate::routes::get_report,
        crate::routes::update_report,
        crate::routes::set_report_status,
        crate::routes::delete_report,
        crate::routes::follow_report,
        crate::routes::unfollow_report,
        crate::routes::list_followers,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::delete_comment,
    ),
    components(schemas(
        User, NewUser, UpdateUser, Neighborhood, GeoPoint, LocationInput,
        Report, ReportKind, ReportStatus, NewReport, UpdateReport, StatusUpdate,
        Follower, Comment, NewComment, Unfollowed,
        AreaFilter, OwnershipFilter, FeedOrder,
        crate::routes::RegisterResponse, crate::routes::TokenResponse, crate::routes::MeResponse,
    )),
    tags(
        (name = "users", description = "Accounts and tokens"),
        (name = "neighborhoods", description = "Neighborhood lookup"),
        (name = "reports", description = "Reports, feed, follows and comments"),
    )
)]
pub struct ApiDoc;
