//! Error types for the tenant governance client.

use thiserror::Error;

/// Result type alias using `EntraError`.
pub type EntraResult<T> = Result<T, EntraError>;

/// Errors that can occur when talking to Microsoft Graph or SharePoint.
#[derive(Debug, Error)]
pub enum EntraError {
    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token acquisition error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Microsoft Graph or SharePoint REST error.
    #[error("Graph API error: {code} - {message}")]
    GraphApi {
        code: String,
        message: String,
        inner_error: Option<String>,
    },

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service throttled the request.
    #[error("Rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// CSV read or write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Some entities of a run failed after the others were committed.
    #[error("{failed} of {total} items failed")]
    PartialFailure { failed: usize, total: usize },
}

/// Renders an error and its `source()` chain on a single line.
///
/// Used for result records and error files, where the full cause has to
/// survive serialization into one CSV cell.
pub fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut description = err.to_string();

    if let Some(EntraError::GraphApi {
        inner_error: Some(inner),
        ..
    }) = err.downcast_ref::<EntraError>()
    {
        description.push_str(" (inner: ");
        description.push_str(inner);
        description.push(')');
    }

    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !description.contains(&text) {
            description.push_str(": ");
            description.push_str(&text);
        }
        source = cause.source();
    }

    description.replace(['\r', '\n'], " ")
}
