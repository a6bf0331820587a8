//! Group resolution for access reviews.
//!
//! Groups are selected in two passes: a server-side `$filter` narrows the
//! directory query, then a fixed chain of client-side predicates re-checks
//! everything and enforces the safety exclusions. Role-assignable and
//! dynamic groups never leave the resolver.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::filter::{FilterBuilder, ODataFilter};
use crate::{EntraError, EntraResult, GraphClient};

/// Group fields requested from the directory.
const GROUP_SELECT_FIELDS: &str = "id,displayName,mailNickname,createdDateTime,visibility,\
    membershipRule,isAssignableToRole,groupTypes";

/// Base filter used when the caller gives none: Microsoft 365 groups.
pub const DEFAULT_GROUP_FILTER: &str = "groupTypes/any(c:c eq 'Unified')";

/// Group as returned by `GET /groups`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub mail_nickname: String,
    pub created_date_time: Option<DateTime<Utc>>,
    pub visibility: Option<String>,
    pub membership_rule: Option<String>,
    pub is_assignable_to_role: Option<bool>,
    #[serde(default)]
    pub group_types: Vec<String>,
}

impl Group {
    /// Role-assignable groups are managed through PIM, not access reviews.
    #[must_use]
    pub fn is_role_assignable(&self) -> bool {
        self.is_assignable_to_role == Some(true)
    }

    /// Dynamic groups have their membership computed from a rule.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.membership_rule.is_some() || self.group_types.iter().any(|t| t == "DynamicMembership")
    }
}

/// Group visibility filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "Private",
            Self::Public => "Public",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = EntraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(EntraError::Config(format!(
                "Visibility must be Private or Public, got '{other}'"
            ))),
        }
    }
}

/// Parses a semicolon-separated prefix list. Blank entries are dropped.
#[must_use]
pub fn parse_prefix_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Selection parameters for the resolver.
#[derive(Debug, Clone, Default)]
pub struct GroupQuery {
    /// Server-side filter expression; `None` means `DEFAULT_GROUP_FILTER`.
    pub base_filter: Option<String>,
    pub include_prefixes: Vec<String>,
    pub exclude_prefixes: Vec<String>,
    pub visibility: Option<Visibility>,
    pub min_age_days: Option<u32>,
    /// Resolve exactly this group, ignoring the selection filters.
    pub group_id: Option<String>,
    /// `$expand` clause. Graph rejects negation and sorting next to it.
    pub expand: Option<String>,
}

/// Rendered directory query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupQueryPlan {
    pub filter: Option<String>,
    pub order_by: Option<&'static str>,
    pub expand: Option<String>,
    /// Requires `$count=true` and `ConsistencyLevel: eventual`.
    pub advanced: bool,
}

impl GroupQueryPlan {
    /// Query string for `GET /groups`.
    #[must_use]
    pub fn query_string(&self, page_size: u32) -> String {
        let mut query = format!("$select={GROUP_SELECT_FIELDS}&$top={page_size}");
        if let Some(filter) = &self.filter {
            query.push_str(&format!("&$filter={}", urlencoding::encode(filter)));
        }
        if let Some(order_by) = self.order_by {
            query.push_str(&format!("&$orderby={order_by}"));
        }
        if let Some(expand) = &self.expand {
            query.push_str(&format!("&$expand={}", urlencoding::encode(expand)));
        }
        if self.advanced {
            query.push_str("&$count=true");
        }
        query
    }
}

impl GroupQuery {
    fn expanding(&self) -> bool {
        self.expand.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    /// Builds the server-side part of the query.
    #[must_use]
    pub fn plan(&self) -> GroupQueryPlan {
        if let Some(id) = &self.group_id {
            return GroupQueryPlan {
                filter: ODataFilter::equals("id", id.as_str()).render(),
                order_by: None,
                expand: self.expand.clone().filter(|_| self.expanding()),
                advanced: false,
            };
        }

        let expanding = self.expanding();

        let include = ODataFilter::Or(
            self.include_prefixes
                .iter()
                .map(|p| ODataFilter::starts_with("mailNickname", p.as_str()))
                .collect(),
        );

        let exclude = (!expanding).then(|| {
            ODataFilter::And(
                self.exclude_prefixes
                    .iter()
                    .map(|p| ODataFilter::not(ODataFilter::starts_with("mailNickname", p.as_str())))
                    .collect(),
            )
        });

        let base = self
            .base_filter
            .clone()
            .unwrap_or_else(|| DEFAULT_GROUP_FILTER.to_string());

        let filter = FilterBuilder::new()
            .and(ODataFilter::Expression(base))
            .and(include)
            .and_maybe(exclude)
            .build();

        let order_by = (!expanding).then_some("displayName");
        let advanced = filter
            .as_ref()
            .is_some_and(|f| f.uses_negation() || order_by.is_some());

        GroupQueryPlan {
            filter: filter.and_then(|f| f.render()),
            order_by,
            expand: if expanding { self.expand.clone() } else { None },
            advanced,
        }
    }

    /// Builds the client-side predicate chain in evaluation order.
    ///
    /// # Errors
    ///
    /// Returns `EntraError::Config` when a prefix list cannot be compiled or
    /// the minimum age reaches past the representable date range.
    pub fn predicates(&self, run_start: DateTime<Utc>) -> EntraResult<Vec<GroupPredicate>> {
        let mut chain = vec![GroupPredicate::NotRoleAssignable, GroupPredicate::NotDynamic];

        if let Some(id) = &self.group_id {
            chain.push(GroupPredicate::IdEquals(id.clone()));
            return Ok(chain);
        }

        if let Some(regex) = prefix_regex(&self.include_prefixes)? {
            chain.push(GroupPredicate::IncludePrefixes(regex));
        }
        if let Some(regex) = prefix_regex(&self.exclude_prefixes)? {
            chain.push(GroupPredicate::ExcludePrefixes(regex));
        }
        if let Some(visibility) = self.visibility {
            chain.push(GroupPredicate::Visibility(visibility));
        }
        if let Some(days) = self.min_age_days {
            let cutoff = run_start
                .checked_sub_signed(Duration::days(i64::from(days)))
                .ok_or_else(|| {
                    EntraError::Config(format!("min_age_days {days} is out of range"))
                })?;
            chain.push(GroupPredicate::CreatedOnOrBefore(cutoff));
        }
        Ok(chain)
    }
}

/// Compiles `^(?:p1|p2|...)` with each prefix escaped. `None` for an empty list.
fn prefix_regex(prefixes: &[String]) -> EntraResult<Option<Regex>> {
    if prefixes.is_empty() {
        return Ok(None);
    }
    let alternatives: Vec<String> = prefixes.iter().map(|p| regex::escape(p)).collect();
    Regex::new(&format!("^(?:{})", alternatives.join("|")))
        .map(Some)
        .map_err(|e| EntraError::Config(format!("Invalid prefix list: {e}")))
}

/// One client-side check applied to every group.
#[derive(Debug, Clone)]
pub enum GroupPredicate {
    NotRoleAssignable,
    NotDynamic,
    IncludePrefixes(Regex),
    ExcludePrefixes(Regex),
    Visibility(Visibility),
    CreatedOnOrBefore(DateTime<Utc>),
    IdEquals(String),
}

impl GroupPredicate {
    #[must_use]
    pub fn matches(&self, group: &Group) -> bool {
        match self {
            Self::NotRoleAssignable => !group.is_role_assignable(),
            Self::NotDynamic => !group.is_dynamic(),
            Self::IncludePrefixes(re) => re.is_match(&group.mail_nickname),
            Self::ExcludePrefixes(re) => !re.is_match(&group.mail_nickname),
            Self::Visibility(v) => group
                .visibility
                .as_deref()
                .is_some_and(|actual| actual.eq_ignore_ascii_case(v.as_str())),
            Self::CreatedOnOrBefore(cutoff) => {
                group.created_date_time.is_some_and(|created| created <= *cutoff)
            }
            Self::IdEquals(id) => group.id.eq_ignore_ascii_case(id),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::NotRoleAssignable => "role_assignable",
            Self::NotDynamic => "dynamic",
            Self::IncludePrefixes(_) => "include_prefix",
            Self::ExcludePrefixes(_) => "exclude_prefix",
            Self::Visibility(_) => "visibility",
            Self::CreatedOnOrBefore(_) => "min_age",
            Self::IdEquals(_) => "group_id",
        }
    }
}

/// Applies the predicate chain, then sorts by display name unless the
/// server already did.
#[must_use]
pub fn apply_client_filters(
    groups: Vec<Group>,
    predicates: &[GroupPredicate],
    server_sorted: bool,
) -> Vec<Group> {
    let mut remaining = groups;
    for predicate in predicates {
        let before = remaining.len();
        remaining.retain(|g| predicate.matches(g));
        if remaining.len() != before {
            debug!(
                predicate = predicate.name(),
                removed = before - remaining.len(),
                "Client-side filter applied"
            );
        }
    }

    if !server_sorted {
        remaining.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    }
    remaining
}

/// Read access to directory groups.
#[async_trait]
pub trait GroupDirectory {
    /// Returns every group matching the server-side plan, all pages.
    async fn list_groups(&self, plan: &GroupQueryPlan) -> EntraResult<Vec<Group>>;
}

#[async_trait]
impl GroupDirectory for GraphClient {
    #[instrument(skip(self))]
    async fn list_groups(&self, plan: &GroupQueryPlan) -> EntraResult<Vec<Group>> {
        let url = format!(
            "{}/groups?{}",
            self.base_url(),
            plan.query_string(self.config().page_size)
        );

        let mut groups = Vec::new();
        self.get_paginated(&url, plan.advanced, |page: Vec<Group>| {
            debug!("Processing page with {} groups", page.len());
            groups.extend(page);
            Ok(())
        })
        .await?;

        Ok(groups)
    }
}

/// Resolves the ordered set of groups to review.
///
/// Directory failures are returned as-is; there is no partial result.
#[instrument(skip(directory, query))]
pub async fn resolve_groups<D: GroupDirectory + Sync>(
    directory: &D,
    query: &GroupQuery,
    run_start: DateTime<Utc>,
) -> EntraResult<Vec<Group>> {
    let plan = query.plan();
    let predicates = query.predicates(run_start)?;

    info!(
        filter = plan.filter.as_deref().unwrap_or(""),
        advanced = plan.advanced,
        "Querying groups"
    );

    let fetched = directory.list_groups(&plan).await?;
    let fetched_count = fetched.len();
    let groups = apply_client_filters(fetched, &predicates, plan.order_by.is_some());

    info!(
        fetched = fetched_count,
        resolved = groups.len(),
        "Groups resolved"
    );
    Ok(groups)
}
