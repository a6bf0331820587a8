//! Access reviews command - Create one access review per selected group

use chrono::{DateTime, NaiveTime, Utc};
use clap::Args;
use std::time::Duration;
use tenantgov_entra::access_review::{launch_reviews, DefaultDecision, ReviewSettings};
use tenantgov_entra::groups::{parse_prefix_list, resolve_groups, GroupQuery, Visibility};
use tenantgov_entra::report::{RunReport, DEFAULT_BATCH_SIZE};
use tenantgov_entra::EntraError;
use tracing::{info, warn};

use super::ConnectionArgs;
use crate::error::{CliError, CliResult};

/// Arguments for the access-reviews command
#[derive(Args, Debug)]
#[command(about = "Create access reviews for Microsoft 365 groups")]
pub struct AccessReviewsArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Server-side OData filter for groups (default: Microsoft 365 groups)
    #[arg(long, env = "TENANTGOV_GROUP_FILTER")]
    pub filter: Option<String>,

    /// Mail nickname prefixes to include, separated by ';'
    #[arg(long, env = "TENANTGOV_INCLUDE_PREFIXES", default_value = "")]
    pub include_prefixes: String,

    /// Mail nickname prefixes to exclude, separated by ';'
    #[arg(long, env = "TENANTGOV_EXCLUDE_PREFIXES", default_value = "")]
    pub exclude_prefixes: String,

    /// Only groups with this visibility: Private or Public
    #[arg(long, env = "TENANTGOV_VISIBILITY")]
    pub visibility: Option<String>,

    /// Only groups created at least this many days before the run
    #[arg(long, env = "TENANTGOV_MIN_AGE_DAYS")]
    pub min_age_days: Option<u32>,

    /// Review exactly this group; selection filters are ignored
    #[arg(long, env = "TENANTGOV_GROUP_ID")]
    pub group_id: Option<String>,

    /// $expand clause for the group query
    #[arg(long, env = "TENANTGOV_EXPAND")]
    pub expand: Option<String>,

    /// Review duration in days
    #[arg(long, env = "TENANTGOV_DURATION_DAYS", default_value_t = 14)]
    pub duration_days: u32,

    /// Decision applied when a reviewer does not respond: None, Approve, Deny or Recommendation
    #[arg(long, env = "TENANTGOV_DEFAULT_DECISION", default_value = "None")]
    pub default_decision: String,

    /// Additional text shown to reviewers
    #[arg(long, env = "TENANTGOV_REVIEWER_TEXT")]
    pub reviewer_text: Option<String>,

    /// Prefix of the review display name
    #[arg(long, env = "TENANTGOV_DISPLAY_NAME_PREFIX", default_value = "Access review:")]
    pub display_name_prefix: String,

    /// Resolve groups and build reviews without creating them
    #[arg(long, env = "TENANTGOV_DRY_RUN")]
    pub dry_run: bool,

    /// Result records per logged batch
    #[arg(long, env = "TENANTGOV_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Pause after each created review, in milliseconds
    #[arg(long, env = "TENANTGOV_THROTTLE_MS", default_value_t = 50)]
    pub throttle_ms: u64,
}

impl AccessReviewsArgs {
    fn group_query(&self) -> CliResult<GroupQuery> {
        let visibility = self
            .visibility
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(str::parse::<Visibility>)
            .transpose()?;

        Ok(GroupQuery {
            base_filter: self.filter.clone().filter(|f| !f.trim().is_empty()),
            include_prefixes: parse_prefix_list(&self.include_prefixes),
            exclude_prefixes: parse_prefix_list(&self.exclude_prefixes),
            visibility,
            min_age_days: self.min_age_days,
            group_id: self.group_id.clone().filter(|id| !id.trim().is_empty()),
            expand: self.expand.clone(),
        })
    }

    fn review_settings(&self) -> CliResult<ReviewSettings> {
        if self.duration_days == 0 {
            return Err(CliError::Validation(
                "--duration-days must be at least 1".into(),
            ));
        }
        let default_decision: DefaultDecision = self.default_decision.parse()?;

        Ok(ReviewSettings {
            duration_days: self.duration_days,
            default_decision,
            reviewer_text: self.reviewer_text.clone(),
            display_name_prefix: self.display_name_prefix.clone(),
            dry_run: self.dry_run,
            throttle: Duration::from_millis(self.throttle_ms),
        })
    }
}

/// Midnight UTC of the day `now` falls on.
fn run_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Execute the access-reviews command
pub async fn execute(args: AccessReviewsArgs) -> CliResult<()> {
    let query = args.group_query()?;
    let settings = args.review_settings()?;
    let run_start = run_start(Utc::now());

    let client = args.connection.connect().await?;

    let groups = resolve_groups(&client, &query, run_start).await?;
    if groups.is_empty() {
        warn!("No groups matched the selection");
        return Ok(());
    }
    info!(
        groups = groups.len(),
        dry_run = settings.dry_run,
        run_start = %run_start.date_naive(),
        "Creating access reviews"
    );

    let records = launch_reviews(&client, &groups, run_start, &settings).await;
    let report = RunReport::from_records(records);
    report.emit(args.batch_size)?;

    match report.finish() {
        Ok(_) => Ok(()),
        Err(EntraError::PartialFailure { failed, total }) => Err(CliError::PartialFailure {
            entity: "groups",
            failed,
            total,
        }),
        Err(e) => Err(e.into()),
    }
}
