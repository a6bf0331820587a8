//! tenantgov - Microsoft 365 tenant governance automation
//!
//! This CLI enables administrators to:
//! - Create access reviews for filtered sets of Microsoft 365 groups
//! - Export guest users of SharePoint and OneDrive sites
//! - Grant the automation identity its Microsoft Graph roles

use clap::{Parser, Subcommand};

mod commands;
mod error;
mod logging;

use error::CliResult;
use logging::{LogFormat, DEFAULT_FILTER};

/// tenantgov - Microsoft 365 tenant governance
#[derive(Parser)]
#[command(name = "tenantgov")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log filter directive, overridden by RUST_LOG
    #[arg(long, global = true, env = "TENANTGOV_LOG_LEVEL", default_value = DEFAULT_FILTER)]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, env = "TENANTGOV_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create access reviews for Microsoft 365 groups
    AccessReviews(commands::access_reviews::AccessReviewsArgs),

    /// Export guest users of SharePoint and OneDrive sites
    GuestUsers(commands::guest_users::GuestUsersArgs),

    /// Grant the required Graph application roles to a service principal
    GrantPermissions(commands::grant_permissions::GrantPermissionsArgs),
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(exit_code = e.exit_code(), error = %e, "Run failed");
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    logging::init_logging(&cli.log_level, cli.log_format)?;

    match cli.command {
        Commands::AccessReviews(args) => commands::access_reviews::execute(args).await,
        Commands::GuestUsers(args) => commands::guest_users::execute(args).await,
        Commands::GrantPermissions(args) => commands::grant_permissions::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_access_reviews_with_global_flags() {
        let cli = Cli::try_parse_from([
            "tenantgov",
            "access-reviews",
            "--auth-mode",
            "user-identity",
            "--client-id",
            "3f1c2b9a",
            "--include-prefixes",
            "PRJ-",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::AccessReviews(args) => {
                assert_eq!(args.include_prefixes, "PRJ-");
                assert_eq!(args.connection.client_id.as_deref(), Some("3f1c2b9a"));
            }
            _ => panic!("expected access-reviews"),
        }
    }

    #[test]
    fn test_parse_guest_users() {
        let cli = Cli::try_parse_from([
            "tenantgov",
            "guest-users",
            "--sites-file",
            "sites.csv",
            "--output-dir",
            "/tmp",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::GuestUsers(_)));
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_unknown_auth_mode_rejected() {
        assert!(Cli::try_parse_from([
            "tenantgov",
            "grant-permissions",
            "--principal-id",
            "x",
            "--auth-mode",
            "password",
        ])
        .is_err());
    }
}
