//! CLI error types and exit codes

use tenantgov_entra::EntraError;
use thiserror::Error;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: General error
/// - 2: Authentication error
/// - 3: Network error
/// - 4: Validation error
/// - 5: Server error
/// - 6: Some entities failed, the others were processed
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{failed} of {total} {entity} failed")]
    PartialFailure {
        entity: &'static str,
        failed: usize,
        total: usize,
    },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::AuthenticationFailed(_) => 2,
            CliError::Network(_) => 3,
            CliError::Validation(_) | CliError::NotFound(_) => 4,
            CliError::Server(_) => 5,
            CliError::PartialFailure { .. } => 6,
            CliError::Config(_) | CliError::Io(_) => 1,
        }
    }

    /// Print the error to stderr
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {}", self);
        } else {
            eprintln!("Error: {}", self);
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {}", suggestion);
            } else {
                eprintln!("\nSuggestion: {}", suggestion);
            }
        }
    }

    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::AuthenticationFailed(_) => Some(
                "Check the managed identity assignment or the certificate thumbprint and key.",
            ),
            CliError::Server(message) if message.contains("Authorization_RequestDenied") => Some(
                "Run 'tenantgov grant-permissions' for the automation identity.",
            ),
            CliError::PartialFailure { .. } => Some("See the logged error records for details."),
            _ => None,
        }
    }
}

impl From<EntraError> for CliError {
    fn from(err: EntraError) -> Self {
        let description = tenantgov_entra::describe_error(&err);
        match err {
            EntraError::Config(msg) => CliError::Validation(msg),
            EntraError::Auth(msg) => CliError::AuthenticationFailed(msg),
            EntraError::Http(_) | EntraError::RateLimited { .. } => CliError::Network(description),
            EntraError::GraphApi { .. } => CliError::Server(description),
            EntraError::NotFound(msg) => CliError::NotFound(msg),
            EntraError::Json(_) | EntraError::Url(_) => CliError::Validation(description),
            EntraError::Csv(_) | EntraError::Io(_) => CliError::Io(description),
            EntraError::PartialFailure { failed, total } => CliError::PartialFailure {
                entity: "items",
                failed,
                total,
            },
        }
    }
}
