//! Feed vocabulary: filter parsing, area scoping and ordering.
//!
//! Both store backends consume a validated [`FeedQuery`]; the in-memory one
//! also uses [`order_and_page`] to finish the union the way SQL would.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::geo::GeoPoint;
use crate::models::{Id, Report, ReportKind};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AreaFilter {
    Country,
    City,
    Nbr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum OwnershipFilter {
    #[default]
    All,
    Own,
    Followed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedOrder {
    #[default]
    Recent,
    Distance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub area: AreaFilter,
    /// Non-empty, deduplicated, in `ReportKind` order.
    pub categories: Vec<ReportKind>,
    pub ownership: OwnershipFilter,
    pub order: FeedOrder,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("category filter must name at least one report kind")]
    NoCategories,
    #[error("unknown report kind '{0}'")]
    UnknownCategory(String),
    #[error("unknown area filter '{0}'")]
    UnknownArea(String),
    #[error("unknown ownership filter '{0}'")]
    UnknownOwnership(String),
    #[error("area filter {0:?} needs a city")]
    MissingCity(AreaFilter),
}

fn blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl FeedFilter {
    /// Validates raw client strings. Absent area means `COUNTRY`, absent
    /// ownership means `ALL`; any order other than `DISTANCE` is recency.
    pub fn parse(
        area: Option<&str>,
        categories: &[&str],
        ownership: Option<&str>,
        order: Option<&str>,
    ) -> Result<Self, FilterError> {
        let area = match area.map(|a| a.trim().to_ascii_uppercase()).as_deref() {
            None | Some("") | Some("COUNTRY") => AreaFilter::Country,
            Some("CITY") => AreaFilter::City,
            Some("NBR") => AreaFilter::Nbr,
            Some(other) => return Err(FilterError::UnknownArea(other.to_string())),
        };
        let ownership = match ownership.map(|o| o.trim().to_ascii_uppercase()).as_deref() {
            None | Some("") | Some("ALL") => OwnershipFilter::All,
            Some("OWN") => OwnershipFilter::Own,
            Some("FOLLOWED") => OwnershipFilter::Followed,
            Some(other) => return Err(FilterError::UnknownOwnership(other.to_string())),
        };
        let order = match order.map(|o| o.trim().to_ascii_uppercase()).as_deref() {
            Some("DISTANCE") => FeedOrder::Distance,
            _ => FeedOrder::Recent,
        };
        let mut kinds = Vec::with_capacity(categories.len());
        for raw in categories {
            let kind = raw
                .parse::<ReportKind>()
                .map_err(|_| FilterError::UnknownCategory(raw.to_string()))?;
            kinds.push(kind);
        }
        kinds.sort();
        kinds.dedup();
        if kinds.is_empty() {
            return Err(FilterError::NoCategories);
        }
        Ok(Self { area, categories: kinds, ownership, order })
    }
}

/// Area predicate after applying the NBR fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AreaScope {
    Everywhere,
    City(String),
    Neighborhood(Id),
}

#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub city: Option<String>,
    pub neighborhood_id: Option<Id>,
    pub viewer_location: Option<GeoPoint>,
    pub limit: i64,
    pub offset: i64,
    pub filter: FeedFilter,
    pub viewer_id: Option<Id>,
}

impl FeedQuery {
    pub fn new(filter: FeedFilter) -> Self {
        Self {
            city: None,
            neighborhood_id: None,
            viewer_location: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
            filter,
            viewer_id: None,
        }
    }

    /// NBR without a neighborhood falls back to the city.
    pub fn scope(&self) -> Result<AreaScope, FilterError> {
        let city = || {
            blank(&self.city)
                .map(|c| AreaScope::City(c.to_string()))
                .ok_or(FilterError::MissingCity(self.filter.area))
        };
        match self.filter.area {
            AreaFilter::Country => Ok(AreaScope::Everywhere),
            AreaFilter::City => city(),
            AreaFilter::Nbr => match self.neighborhood_id {
                Some(id) => Ok(AreaScope::Neighborhood(id)),
                None => city(),
            },
        }
    }

    /// Distance ordering only applies when there is a point to measure from.
    pub fn origin(&self) -> Option<GeoPoint> {
        match self.filter.order {
            FeedOrder::Distance => self.viewer_location,
            FeedOrder::Recent => None,
        }
    }

    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, MAX_LIMIT)
    }

    pub fn clamped_offset(&self) -> i64 {
        self.offset.max(0)
    }
}

impl AreaScope {
    pub fn admits(&self, r: &Report) -> bool {
        match self {
            AreaScope::Everywhere => true,
            AreaScope::City(c) => r.city.as_deref() == Some(c.as_str()),
            AreaScope::Neighborhood(id) => r.neighborhood_id == Some(*id),
        }
    }
}

fn by_distance(a: &Report, b: &Report) -> Ordering {
    // rows without a stored point go last, like NULLs under ASC
    match (a.distance, b.distance) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn by_recency(a: &Report, b: &Report) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

/// Orders the unioned rows and applies limit/offset across all kinds.
pub fn order_and_page(mut rows: Vec<Report>, q: &FeedQuery) -> Vec<Report> {
    if q.origin().is_some() {
        rows.sort_by(|a, b| by_distance(a, b).then_with(|| by_recency(a, b)));
    } else {
        rows.sort_by(by_recency);
    }
    rows.into_iter()
        .skip(q.clamped_offset() as usize)
        .take(q.clamped_limit() as usize)
        .collect()
}

/// Query string accepted by `GET /api/v1/reports`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeedParams {
    pub city: Option<String>,
    pub neighborhood_id: Option<Id>,
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// COUNTRY, CITY or NBR
    pub area: Option<String>,
    /// Comma separated report kinds
    pub categories: Option<String>,
    /// ALL, OWN or FOLLOWED
    pub scope: Option<String>,
    /// DISTANCE or RECENT
    pub order: Option<String>,
}

impl FeedParams {
    pub fn filter(&self) -> Result<FeedFilter, FilterError> {
        let categories: Vec<&str> = self
            .categories
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        FeedFilter::parse(
            self.area.as_deref(),
            &categories,
            self.scope.as_deref(),
            self.order.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(area: &str) -> FeedFilter {
        FeedFilter::parse(Some(area), &["give_away"], None, None).unwrap()
    }

    #[test]
    fn empty_or_unknown_categories_rejected() {
        assert_eq!(FeedFilter::parse(None, &[], None, None), Err(FilterError::NoCategories));
        assert!(matches!(
            FeedFilter::parse(None, &["give_away", "yard_sale"], None, None),
            Err(FilterError::UnknownCategory(_))
        ));
    }

    #[test]
    fn unknown_area_and_ownership_rejected() {
        assert!(matches!(FeedFilter::parse(Some("STREET"), &["give_away"], None, None), Err(FilterError::UnknownArea(_))));
        assert!(matches!(
            FeedFilter::parse(None, &["give_away"], Some("MINE"), None),
            Err(FilterError::UnknownOwnership(_))
        ));
    }

    #[test]
    fn categories_are_deduplicated() {
        let f = FeedFilter::parse(Some("nbr"), &["offer_help", "give_away", "offer_help"], Some("own"), Some("distance")).unwrap();
        assert_eq!(f.categories, vec![ReportKind::GiveAway, ReportKind::OfferHelp]);
        assert_eq!(f.area, AreaFilter::Nbr);
        assert_eq!(f.ownership, OwnershipFilter::Own);
        assert_eq!(f.order, FeedOrder::Distance);
    }

    #[test]
    fn nbr_without_neighborhood_falls_back_to_city() {
        let mut q = FeedQuery::new(filter("NBR"));
        q.city = Some("Springfield".into());
        assert_eq!(q.scope().unwrap(), AreaScope::City("Springfield".into()));
        q.neighborhood_id = Some(7);
        assert_eq!(q.scope().unwrap(), AreaScope::Neighborhood(7));
    }

    #[test]
    fn city_scope_needs_a_city() {
        let q = FeedQuery::new(filter("CITY"));
        assert_eq!(q.scope(), Err(FilterError::MissingCity(AreaFilter::City)));
        assert_eq!(FeedQuery::new(filter("COUNTRY")).scope().unwrap(), AreaScope::Everywhere);
    }

    #[test]
    fn distance_order_needs_an_origin() {
        let f = FeedFilter::parse(None, &["give_away"], None, Some("DISTANCE")).unwrap();
        let mut q = FeedQuery::new(f);
        assert!(q.origin().is_none());
        q.viewer_location = GeoPoint::new(34.0, 32.0);
        assert!(q.origin().is_some());
    }

    #[test]
    fn params_split_categories() {
        let p = FeedParams { categories: Some("give_away, issue_report,".into()), ..Default::default() };
        assert_eq!(p.filter().unwrap().categories, vec![ReportKind::GiveAway, ReportKind::IssueReport]);
        assert_eq!(FeedParams::default().filter(), Err(FilterError::NoCategories));
    }
}
