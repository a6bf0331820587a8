//! Guest users command - Export guest users of SharePoint and OneDrive sites

use chrono::Utc;
use clap::Args;
use std::path::PathBuf;
use tenantgov_entra::guests::{ensure_output_dir, export_guest_users, GuestExportOptions};
use tenantgov_entra::sites::{discover_sites, read_sites_csv, ServiceScope};
use tracing::info;

use super::ConnectionArgs;
use crate::error::{CliError, CliResult};

/// Arguments for the guest-users command
#[derive(Args, Debug)]
#[command(about = "Export guest users of SharePoint and OneDrive sites to CSV")]
pub struct GuestUsersArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// CSV file with a Url column (and optional Title); replaces site discovery
    #[arg(long, env = "TENANTGOV_SITES_FILE")]
    pub sites_file: Option<PathBuf>,

    /// Sites to inventory when discovering: SharePoint, OneDrive or Both
    #[arg(long, env = "TENANTGOV_SERVICE_SCOPE", default_value = "Both")]
    pub scope: String,

    /// Directory receiving GuestUsers_<timestamp>.csv and Errors_<timestamp>.csv
    #[arg(long, env = "TENANTGOV_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// CSV delimiter for input and output files
    #[arg(long, env = "TENANTGOV_DELIMITER", default_value_t = ',')]
    pub delimiter: char,
}

impl GuestUsersArgs {
    fn delimiter(&self) -> CliResult<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(|b| b.is_ascii() && !b.is_ascii_alphanumeric() && *b != b'"')
            .ok_or_else(|| {
                CliError::Validation(format!(
                    "Delimiter must be a single ASCII punctuation character, got '{}'",
                    self.delimiter
                ))
            })
    }
}

/// Execute the guest-users command
pub async fn execute(args: GuestUsersArgs) -> CliResult<()> {
    let delimiter = args.delimiter()?;
    let scope: ServiceScope = args.scope.parse()?;
    ensure_output_dir(&args.output_dir)?;

    let client = args.connection.connect().await?;

    let sites = match &args.sites_file {
        Some(path) => read_sites_csv(path, delimiter)?,
        None => discover_sites(&client, scope).await?,
    };
    if sites.is_empty() {
        info!("No sites to process");
        return Ok(());
    }

    let options = GuestExportOptions {
        output_dir: args.output_dir.clone(),
        delimiter,
        started_at: Utc::now(),
    };
    let summary = export_guest_users(&client, &sites, &options).await?;

    if summary.failed_sites > 0 {
        return Err(CliError::PartialFailure {
            entity: "sites",
            failed: summary.failed_sites,
            total: summary.sites,
        });
    }
    Ok(())
}
