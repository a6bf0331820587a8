//! Grant permissions command - Assign the Graph roles the automation needs

use clap::Args;
use tenantgov_entra::permissions::{grant_permissions, GrantOutcome};
use tracing::info;

use super::ConnectionArgs;
use crate::error::CliResult;

/// Arguments for the grant-permissions command
#[derive(Args, Debug)]
#[command(about = "Grant Group.Read.All and AccessReview.ReadWrite.All to a service principal")]
pub struct GrantPermissionsArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Object id of the service principal (e.g. the automation's managed identity)
    #[arg(long, env = "TENANTGOV_PRINCIPAL_ID")]
    pub principal_id: String,
}

/// Execute the grant-permissions command
pub async fn execute(args: GrantPermissionsArgs) -> CliResult<()> {
    let client = args.connection.connect().await?;
    let grants = grant_permissions(&client, args.principal_id.trim()).await?;

    let granted = grants
        .iter()
        .filter(|g| g.outcome == GrantOutcome::Granted)
        .count();
    info!(
        principal_id = %args.principal_id,
        granted,
        already_assigned = grants.len() - granted,
        "Permissions in place"
    );
    Ok(())
}
