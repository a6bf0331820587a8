//! Access review definitions for resolved groups.
//!
//! One single-instance review per group: members and guests of the group
//! plus B2B direct connect participants of the team's shared channels,
//! reviewed by the group owners.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tracing::{error, info, instrument};

use crate::error::describe_error;
use crate::groups::Group;
use crate::{EntraError, EntraResult, GraphClient};

const QUERY_TYPE: &str = "MicrosoftGraph";
const QUERY_SCOPE_TYPE: &str = "#microsoft.graph.accessReviewQueryScope";
const MEMBERSHIPS_SCOPE_TYPE: &str = "#microsoft.graph.principalResourceMembershipsScope";

/// Decision applied when a reviewer does not respond.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DefaultDecision {
    #[default]
    None,
    Approve,
    Deny,
    Recommendation,
}

impl DefaultDecision {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Approve => "Approve",
            Self::Deny => "Deny",
            Self::Recommendation => "Recommendation",
        }
    }

    /// Auto-apply is on only when a decision is set.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        *self != Self::None
    }
}

impl std::str::FromStr for DefaultDecision {
    type Err = EntraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "approve" => Ok(Self::Approve),
            "deny" => Ok(Self::Deny),
            "recommendation" => Ok(Self::Recommendation),
            other => Err(EntraError::Config(format!(
                "Default decision must be None, Approve, Deny or Recommendation, got '{other}'"
            ))),
        }
    }
}

/// Submitter parameters shared by every group of a run.
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    pub duration_days: u32,
    pub default_decision: DefaultDecision,
    /// Extra text shown to reviewers.
    pub reviewer_text: Option<String>,
    pub display_name_prefix: String,
    /// Build everything, submit nothing.
    pub dry_run: bool,
    /// Pause after each live submission.
    pub throttle: StdDuration,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            duration_days: 14,
            default_decision: DefaultDecision::None,
            reviewer_text: None,
            display_name_prefix: "Access review:".to_string(),
            dry_run: false,
            throttle: StdDuration::from_millis(50),
        }
    }
}

/// `accessReviewScheduleDefinition` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessReviewDefinition {
    pub display_name: String,
    pub description_for_admins: String,
    pub description_for_reviewers: String,
    pub scope: ReviewScope,
    pub reviewers: Vec<QueryScope>,
    pub settings: ReviewScheduleSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewScope {
    #[serde(rename = "@odata.type")]
    pub odata_type: &'static str,
    pub principal_scopes: Vec<QueryScope>,
    pub resource_scopes: Vec<QueryScope>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryScope {
    #[serde(rename = "@odata.type", skip_serializing_if = "Option::is_none")]
    pub odata_type: Option<&'static str>,
    pub query: String,
    pub query_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_root: Option<String>,
}

impl QueryScope {
    fn scope(query: String) -> Self {
        Self {
            odata_type: Some(QUERY_SCOPE_TYPE),
            query,
            query_type: QUERY_TYPE,
            query_root: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewScheduleSettings {
    pub mail_notifications_enabled: bool,
    pub reminder_notifications_enabled: bool,
    pub justification_required_on_approval: bool,
    pub default_decision_enabled: bool,
    pub default_decision: &'static str,
    pub instance_duration_in_days: u32,
    pub auto_apply_decisions_enabled: bool,
    pub recommendations_enabled: bool,
    pub recurrence: Recurrence,
}

/// Single-instance recurrence: no pattern, a bounded range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    pub pattern: Option<serde_json::Value>,
    pub range: RecurrenceRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRange {
    #[serde(rename = "type")]
    pub range_type: &'static str,
    pub number_of_occurrences: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Start and end date of a review begun on `run_start`.
///
/// The end date is one day past the instance duration so the last review
/// day is complete.
///
/// # Errors
///
/// Returns `EntraError::Config` when the end date is past the calendar range.
pub fn review_window(
    run_start: DateTime<Utc>,
    duration_days: u32,
) -> EntraResult<(NaiveDate, NaiveDate)> {
    let start = run_start.date_naive();
    let end = start
        .checked_add_days(Days::new(u64::from(duration_days) + 1))
        .ok_or_else(|| {
            EntraError::Config(format!("duration_days {duration_days} is out of range"))
        })?;
    Ok((start, end))
}

/// Builds the definition for `group`.
///
/// # Errors
///
/// Fails when the review window cannot be computed.
pub fn build_definition(
    group: &Group,
    run_start: DateTime<Utc>,
    settings: &ReviewSettings,
) -> EntraResult<AccessReviewDefinition> {
    let (start_date, end_date) = review_window(run_start, settings.duration_days)?;
    let id = &group.id;

    let members = QueryScope::scope(format!("/groups/{id}/transitiveMembers"));
    // Queried for every group; a plain group simply has no shared channels.
    let shared_channel_members = QueryScope {
        query_root: Some(format!(
            "/teams/{id}/channels?$filter=(membershipType eq 'shared')"
        )),
        ..QueryScope::scope("./members".to_string())
    };

    Ok(AccessReviewDefinition {
        display_name: format!("{} {}", settings.display_name_prefix, group.display_name)
            .trim()
            .to_string(),
        description_for_admins: format!(
            "Review of members, guests and shared channel participants of group {id} ({})",
            group.mail_nickname
        ),
        description_for_reviewers: settings.reviewer_text.clone().unwrap_or_default(),
        scope: ReviewScope {
            odata_type: MEMBERSHIPS_SCOPE_TYPE,
            principal_scopes: vec![members, shared_channel_members],
            resource_scopes: vec![QueryScope::scope(format!("/groups/{id}"))],
        },
        reviewers: vec![QueryScope {
            odata_type: None,
            query: format!("/groups/{id}/owners"),
            query_type: QUERY_TYPE,
            query_root: None,
        }],
        settings: ReviewScheduleSettings {
            mail_notifications_enabled: true,
            reminder_notifications_enabled: true,
            justification_required_on_approval: true,
            default_decision_enabled: settings.default_decision.is_enabled(),
            default_decision: settings.default_decision.as_str(),
            instance_duration_in_days: settings.duration_days,
            auto_apply_decisions_enabled: settings.default_decision.is_enabled(),
            recommendations_enabled: true,
            recurrence: Recurrence {
                pattern: None,
                range: RecurrenceRange {
                    range_type: "numbered",
                    number_of_occurrences: 0,
                    start_date,
                    end_date,
                },
            },
        },
    })
}

/// Definition as echoed back by Graph.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedReview {
    pub id: String,
    pub status: Option<String>,
}

/// Write access to access review definitions.
#[async_trait]
pub trait AccessReviewApi {
    async fn create_definition(&self, definition: &AccessReviewDefinition)
        -> EntraResult<CreatedReview>;
}

#[async_trait]
impl AccessReviewApi for GraphClient {
    #[instrument(skip(self, definition), fields(display_name = %definition.display_name))]
    async fn create_definition(
        &self,
        definition: &AccessReviewDefinition,
    ) -> EntraResult<CreatedReview> {
        let url = format!(
            "{}/identityGovernance/accessReviews/definitions",
            self.base_url()
        );
        self.post(&url, definition).await
    }
}

/// Outcome of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReviewStatus {
    Created,
    DryRun,
    Failed,
}

/// Per-group result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultRecord {
    pub group_id: String,
    pub display_name: String,
    pub mail_nickname: String,
    pub created_date_time: Option<DateTime<Utc>>,
    pub status: ReviewStatus,
    pub review_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub error: Option<String>,
}

impl ResultRecord {
    fn new(group: &Group, window: (NaiveDate, NaiveDate), status: ReviewStatus) -> Self {
        Self {
            group_id: group.id.clone(),
            display_name: group.display_name.clone(),
            mail_nickname: group.mail_nickname.clone(),
            created_date_time: group.created_date_time,
            status,
            review_id: None,
            start_date: window.0,
            end_date: window.1,
            error: None,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status != ReviewStatus::Failed
    }
}

/// Builds and, unless dry-running, submits the review for one group.
///
/// # Errors
///
/// Returns the submission error unchanged.
pub async fn submit_review<A: AccessReviewApi + Sync>(
    api: &A,
    group: &Group,
    run_start: DateTime<Utc>,
    settings: &ReviewSettings,
) -> EntraResult<ResultRecord> {
    let definition = build_definition(group, run_start, settings)?;
    let window = (
        definition.settings.recurrence.range.start_date,
        definition.settings.recurrence.range.end_date,
    );

    if settings.dry_run {
        info!(
            group_id = %group.id,
            mail_nickname = %group.mail_nickname,
            "Dry run, access review not submitted"
        );
        return Ok(ResultRecord::new(group, window, ReviewStatus::DryRun));
    }

    let created = api.create_definition(&definition).await?;
    info!(
        group_id = %group.id,
        review_id = %created.id,
        status = created.status.as_deref().unwrap_or("unknown"),
        "Access review created"
    );

    let mut record = ResultRecord::new(group, window, ReviewStatus::Created);
    record.review_id = Some(created.id);
    Ok(record)
}

/// Submits a review for every group in order. Failures become records;
/// the returned list always has one entry per group.
#[instrument(skip_all, fields(groups = groups.len(), dry_run = settings.dry_run))]
pub async fn launch_reviews<A: AccessReviewApi + Sync>(
    api: &A,
    groups: &[Group],
    run_start: DateTime<Utc>,
    settings: &ReviewSettings,
) -> Vec<ResultRecord> {
    let mut records = Vec::with_capacity(groups.len());

    for group in groups {
        match submit_review(api, group, run_start, settings).await {
            Ok(record) => records.push(record),
            Err(e) => {
                let description = describe_error(&e);
                error!(
                    group_id = %group.id,
                    mail_nickname = %group.mail_nickname,
                    error = %description,
                    "Access review submission failed"
                );
                let day = run_start.date_naive();
                let window =
                    review_window(run_start, settings.duration_days).unwrap_or((day, day));
                let mut record = ResultRecord::new(group, window, ReviewStatus::Failed);
                record.error = Some(description);
                records.push(record);
            }
        }

        if !settings.dry_run && !settings.throttle.is_zero() {
            tokio::time::sleep(settings.throttle).await;
        }
    }

    records
}
