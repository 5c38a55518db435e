use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::geo::{GeoPoint, LocationInput, Polygon};

pub type Id = i64;

// ---------------------------------------------------------------------
// Report kinds
// ---------------------------------------------------------------------

/// The four report kinds. Each kind lives in its own table and the tag
/// strings are shared by the follower and comment tables as discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    GiveAway,
    IssueReport,
    HelpRequest,
    OfferHelp,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [
        ReportKind::GiveAway,
        ReportKind::IssueReport,
        ReportKind::HelpRequest,
        ReportKind::OfferHelp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::GiveAway => "give_away",
            ReportKind::IssueReport => "issue_report",
            ReportKind::HelpRequest => "help_request",
            ReportKind::OfferHelp => "offer_help",
        }
    }

    /// Backing table for the kind.
    pub fn table(self) -> &'static str {
        match self {
            ReportKind::GiveAway => "give_aways",
            ReportKind::IssueReport => "issue_reports",
            ReportKind::HelpRequest => "help_requests",
            ReportKind::OfferHelp => "offer_helps",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown report kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for ReportKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    #[default]
    Active,
    Resolved,
    Archived,
    /// Stored when a status update arrives blank.
    NoStatus,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Active => "ACTIVE",
            ReportStatus::Resolved => "RESOLVED",
            ReportStatus::Archived => "ARCHIVED",
            ReportStatus::NoStatus => "NO_STATUS",
        }
    }

    /// Parses a client supplied status; blank input maps to `NoStatus`.
    pub fn coerce(raw: &str) -> Result<Self, UnknownStatus> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(ReportStatus::NoStatus);
        }
        trimmed.parse()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ReportStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(ReportStatus::Active),
            "RESOLVED" => Ok(ReportStatus::Resolved),
            "ARCHIVED" => Ok(ReportStatus::Archived),
            "NO_STATUS" => Ok(ReportStatus::NoStatus),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------

/// Kind specific columns. Serialized inline next to the shared fields with
/// a `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportDetails {
    GiveAway { is_free: bool, swap: Option<String> },
    IssueReport,
    HelpRequest { category: String, urgency: String },
    OfferHelp { barter: Option<String> },
}

impl ReportDetails {
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportDetails::GiveAway { .. } => ReportKind::GiveAway,
            ReportDetails::IssueReport => ReportKind::IssueReport,
            ReportDetails::HelpRequest { .. } => ReportKind::HelpRequest,
            ReportDetails::OfferHelp { .. } => ReportKind::OfferHelp,
        }
    }

    /// Kind specific rules that must hold after create and after every edit.
    pub fn problems(&self) -> Vec<String> {
        let blank = |v: &str| v.trim().is_empty();
        let mut out = Vec::new();
        match self {
            ReportDetails::GiveAway { is_free: false, swap } if swap.as_deref().map_or(true, blank) => {
                out.push("swap is required when the give-away is not free".to_string());
            }
            ReportDetails::HelpRequest { category, urgency } => {
                if blank(category) {
                    out.push("category is required".to_string());
                }
                if blank(urgency) {
                    out.push("urgency is required".to_string());
                }
            }
            _ => {}
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub id: Id,
    pub user_id: Id,
    /// Creator display name at the time the report was posted.
    pub user_name: String,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub city: Option<String>,
    pub neighborhood_id: Option<Id>,
    pub status: ReportStatus,
    pub follower_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub details: ReportDetails,
    // viewer relative, computed per query
    #[serde(default)]
    pub is_author: bool,
    #[serde(default)]
    pub is_followed: bool,
    /// Meters from the viewer; only set under distance ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

impl Report {
    pub fn kind(&self) -> ReportKind {
        self.details.kind()
    }
}

/// Create payload. Shared and kind specific fields arrive flat; which of the
/// kind specific ones are required depends on the kind in the URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub address: Option<String>,
    pub location: Option<LocationInput>,
    pub city: Option<String>,
    pub status: Option<String>,
    pub is_free: Option<bool>,
    pub swap: Option<String>,
    pub barter: Option<String>,
    pub category: Option<String>,
    pub urgency: Option<String>,
}

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

impl NewReport {
    /// Checks required fields for `kind` and builds the kind specific part.
    /// Every problem is reported, not just the first.
    pub fn details(&self, kind: ReportKind) -> Result<ReportDetails, Vec<String>> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title is required".to_string());
        }
        if non_blank(&self.address).is_none() {
            missing.push("address is required".to_string());
        }
        let details = match kind {
            ReportKind::IssueReport => ReportDetails::IssueReport,
            ReportKind::GiveAway => ReportDetails::GiveAway {
                is_free: self.is_free.unwrap_or(true),
                swap: non_blank(&self.swap),
            },
            ReportKind::OfferHelp => ReportDetails::OfferHelp { barter: non_blank(&self.barter) },
            ReportKind::HelpRequest => ReportDetails::HelpRequest {
                category: non_blank(&self.category).unwrap_or_default(),
                urgency: non_blank(&self.urgency).unwrap_or_default(),
            },
        };
        missing.extend(details.problems());
        if missing.is_empty() { Ok(details) } else { Err(missing) }
    }
}

/// Partial edit. `None` leaves a field unchanged; kind specific fields that
/// do not belong to the report's kind are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateReport {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub address: Option<String>,
    pub location: Option<LocationInput>,
    pub city: Option<String>,
    pub is_free: Option<bool>,
    pub swap: Option<String>,
    pub barter: Option<String>,
    pub category: Option<String>,
    pub urgency: Option<String>,
    /// Filled by the service layer after resolving `location`.
    #[serde(skip)]
    pub neighborhood: Option<Option<Id>>,
}

impl UpdateReport {
    /// Merges the edit into `r`. On error `r` may be partly changed, so
    /// callers apply to a copy.
    pub fn apply(&self, r: &mut Report) -> Result<(), Vec<String>> {
        if let Some(t) = non_blank(&self.title) { r.title = t; }
        if let Some(d) = &self.description { r.description = Some(d.clone()); }
        if let Some(i) = &self.image { r.image = Some(i.clone()); }
        if let Some(a) = non_blank(&self.address) { r.address = Some(a); }
        if let Some(c) = &self.city { r.city = Some(c.clone()); }
        // an unparsable location never overwrites a stored one
        if let Some(p) = self.location.as_ref().and_then(LocationInput::to_point) {
            r.location = Some(p);
        }
        if let Some(n) = self.neighborhood { r.neighborhood_id = n; }
        match &mut r.details {
            ReportDetails::GiveAway { is_free, swap } => {
                if let Some(f) = self.is_free { *is_free = f; }
                if self.swap.is_some() { *swap = non_blank(&self.swap); }
            }
            ReportDetails::OfferHelp { barter } => {
                if let Some(b) = &self.barter { *barter = Some(b.clone()); }
            }
            ReportDetails::HelpRequest { category, urgency } => {
                if let Some(c) = non_blank(&self.category) { *category = c; }
                if let Some(u) = non_blank(&self.urgency) { *urgency = u; }
            }
            ReportDetails::IssueReport => {}
        }
        let problems = r.details.problems();
        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdate {
    #[serde(default)]
    pub status: String,
}

// ---------------------------------------------------------------------
// Neighborhoods
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Neighborhood {
    pub id: Id,
    pub name: String,
    pub name_en: Option<String>,
    pub city_name: String,
    pub city_name_en: Option<String>,
    pub city_id: Option<i64>,
    #[schema(value_type = Object)]
    pub boundary: Polygon,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNeighborhood {
    pub name: String,
    pub name_en: Option<String>,
    pub city_name: String,
    pub city_name_en: Option<String>,
    pub city_id: Option<i64>,
    pub boundary: Polygon,
}

// ---------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub avatar: Option<String>,
    pub city: Option<String>,
    pub neighborhood_id: Option<Id>,
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    #[serde(default)]
    pub username: String,
    pub avatar: Option<String>,
    pub city: Option<String>,
    pub location: Option<LocationInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub city: Option<String>,
    pub location: Option<LocationInput>,
    #[serde(skip)]
    pub neighborhood: Option<Option<Id>>,
}

impl UpdateUser {
    pub fn apply(&self, u: &mut User) {
        if let Some(n) = non_blank(&self.username) { u.username = n; }
        if let Some(a) = &self.avatar { u.avatar = Some(a.clone()); }
        if let Some(c) = &self.city { u.city = Some(c.clone()); }
        if let Some(p) = self.location.as_ref().and_then(LocationInput::to_point) {
            u.location = Some(p);
        }
        if let Some(n) = self.neighborhood { u.neighborhood_id = n; }
    }
}

// ---------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Follower {
    pub id: Id,
    pub user_id: Id,
    pub report_id: Id,
    pub kind: ReportKind,
    pub created_at: DateTime<Utc>,
    // joined from users
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    pub id: Id,
    pub user_id: Id,
    pub report_id: Id,
    pub kind: ReportKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Unfollowed {
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_round_trip() {
        for k in ReportKind::ALL {
            assert_eq!(k.as_str().parse::<ReportKind>().unwrap(), k);
            assert_eq!(serde_json::to_value(k).unwrap(), k.as_str());
        }
        assert!("garage_sale".parse::<ReportKind>().is_err());
    }

    #[test]
    fn every_kind_has_its_own_table() {
        let mut tables: Vec<_> = ReportKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), ReportKind::ALL.len());
    }

    #[test]
    fn blank_status_coerces_to_sentinel() {
        assert_eq!(ReportStatus::coerce("").unwrap(), ReportStatus::NoStatus);
        assert_eq!(ReportStatus::coerce("   ").unwrap(), ReportStatus::NoStatus);
        assert_eq!(ReportStatus::coerce("resolved").unwrap(), ReportStatus::Resolved);
        assert!(ReportStatus::coerce("pending").is_err());
        assert_eq!(serde_json::to_value(ReportStatus::NoStatus).unwrap(), "NO_STATUS");
    }

    #[test]
    fn help_request_collects_every_missing_field() {
        let errs = NewReport::default().details(ReportKind::HelpRequest).unwrap_err();
        assert_eq!(errs.len(), 4, "{errs:?}");
    }

    #[test]
    fn give_away_defaults_to_free() {
        let new = NewReport { title: "Sofa".into(), address: Some("Herzl 1".into()), ..Default::default() };
        assert_eq!(
            new.details(ReportKind::GiveAway).unwrap(),
            ReportDetails::GiveAway { is_free: true, swap: None }
        );
        let swap = NewReport { is_free: Some(false), ..new };
        assert!(swap.details(ReportKind::GiveAway).is_err());
    }

    #[test]
    fn edit_keeps_give_away_rules() {
        let new = NewReport { title: "Sofa".into(), address: Some("Herzl 1".into()), ..Default::default() };
        let details = new.details(ReportKind::GiveAway).unwrap();
        let mut r = sample_report(details);

        let priced = UpdateReport { is_free: Some(false), ..Default::default() };
        assert!(priced.apply(&mut r.clone()).is_err());

        let blank_swap = UpdateReport { is_free: Some(false), swap: Some("  ".into()), ..Default::default() };
        assert!(blank_swap.apply(&mut r.clone()).is_err());

        let traded = UpdateReport { is_free: Some(false), swap: Some("a lamp".into()), ..Default::default() };
        traded.apply(&mut r).unwrap();
        assert_eq!(r.details, ReportDetails::GiveAway { is_free: false, swap: Some("a lamp".into()) });
    }

    fn sample_report(details: ReportDetails) -> Report {
        Report {
            id: 1,
            user_id: 2,
            user_name: "dana".into(),
            title: "Broken lamp".into(),
            description: None,
            image: None,
            address: Some("Dizengoff 10".into()),
            location: None,
            city: Some("Tel Aviv".into()),
            neighborhood_id: None,
            status: ReportStatus::Active,
            follower_count: 0,
            comment_count: 0,
            created_at: Utc::now(),
            details,
            is_author: false,
            is_followed: false,
            distance: None,
        }
    }

    #[test]
    fn report_serializes_kind_inline() {
        let r = sample_report(ReportDetails::HelpRequest { category: "moving".into(), urgency: "high".into() });
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["kind"], "help_request");
        assert_eq!(v["category"], "moving");
        assert_eq!(v["status"], "ACTIVE");
        assert!(v.get("distance").is_none());
    }

    #[test]
    fn update_ignores_bad_location_and_foreign_fields() {
        let mut r: Report = serde_json::from_value(serde_json::json!({
            "id": 1, "user_id": 1, "user_name": "a", "title": "t", "description": null,
            "image": null, "address": "x", "location": {"lng": 1.0, "lat": 2.0}, "city": null,
            "neighborhood_id": 3, "status": "ACTIVE", "follower_count": 0, "comment_count": 0,
            "created_at": "2024-01-01T00:00:00Z", "kind": "issue_report"
        }))
        .unwrap();
        let upd = UpdateReport {
            title: Some("new".into()),
            location: Some(LocationInput { lat: Some(crate::geo::Coordinate::Text("?".into())), lng: None }),
            barter: Some("coffee".into()),
            ..Default::default()
        };
        upd.apply(&mut r).unwrap();
        assert_eq!(r.title, "new");
        assert_eq!(r.location, Some(GeoPoint { lng: 1.0, lat: 2.0 }));
        assert_eq!(r.neighborhood_id, Some(3));
        assert_eq!(r.details, ReportDetails::IssueReport);
    }
}
