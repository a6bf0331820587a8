//! CLI command implementations

pub mod access_reviews;
pub mod grant_permissions;
pub mod guest_users;

use clap::{Args, ValueEnum};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use tenantgov_entra::{AuthMode, CloudEnvironment, GraphClient, GraphConfig};
use tracing::info;

use crate::error::{CliError, CliResult};

/// Credential mode of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthKind {
    /// System-assigned managed identity
    SystemIdentity,
    /// User-assigned managed identity (needs --client-id)
    UserIdentity,
    /// App registration with a certificate (needs tenant, client id, thumbprint, key)
    AppCertificate,
}

/// Connection arguments shared by every command
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// How to authenticate against Microsoft Graph
    #[arg(long, value_enum, env = "TENANTGOV_AUTH_MODE", default_value_t = AuthKind::SystemIdentity)]
    pub auth_mode: AuthKind,

    /// Client id of the user-assigned identity or app registration
    #[arg(long, env = "TENANTGOV_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Tenant id or domain (certificate mode)
    #[arg(long, env = "TENANTGOV_TENANT_ID")]
    pub tenant_id: Option<String>,

    /// SHA-1 thumbprint of the certificate (certificate mode)
    #[arg(long, env = "TENANTGOV_CERT_THUMBPRINT")]
    pub thumbprint: Option<String>,

    /// PEM file with the certificate's RSA private key (certificate mode)
    #[arg(long, env = "TENANTGOV_PRIVATE_KEY_PATH")]
    pub private_key: Option<PathBuf>,

    /// Cloud environment: commercial, usgovernment or china
    #[arg(long, env = "TENANTGOV_CLOUD", default_value = "commercial")]
    pub cloud: String,

    /// Page size for directory queries (1-999)
    #[arg(long, env = "TENANTGOV_PAGE_SIZE", default_value_t = 999)]
    pub page_size: u32,

    /// HTTP timeout in seconds
    #[arg(long, env = "TENANTGOV_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

impl ConnectionArgs {
    /// Resolves the arguments into an authentication mode.
    pub fn auth_mode(&self) -> CliResult<AuthMode> {
        let mode = match self.auth_mode {
            AuthKind::SystemIdentity => AuthMode::SystemIdentity,
            AuthKind::UserIdentity => AuthMode::UserIdentity {
                client_id: required(&self.client_id, "--client-id")?,
            },
            AuthKind::AppCertificate => {
                let key_path = self.private_key.as_ref().ok_or_else(|| {
                    CliError::Validation("--private-key is required for app-certificate".into())
                })?;
                let pem = std::fs::read_to_string(key_path).map_err(|e| {
                    CliError::Io(format!(
                        "Failed to read private key {}: {e}",
                        key_path.display()
                    ))
                })?;
                AuthMode::AppCertificate {
                    tenant_id: required(&self.tenant_id, "--tenant-id")?,
                    client_id: required(&self.client_id, "--client-id")?,
                    thumbprint: required(&self.thumbprint, "--thumbprint")?,
                    private_key: SecretString::from(pem),
                }
            }
        };
        mode.validate()?;
        Ok(mode)
    }

    pub fn graph_config(&self) -> CliResult<GraphConfig> {
        let cloud: CloudEnvironment = self.cloud.parse()?;
        Ok(GraphConfig::builder()
            .cloud(cloud)
            .page_size(self.page_size)
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?)
    }

    /// Builds the client and acquires the first token, so bad credentials
    /// fail before any work starts.
    pub async fn connect(&self) -> CliResult<GraphClient> {
        let client = GraphClient::new(self.graph_config()?, self.auth_mode()?)?;
        client.connect().await?;
        info!(
            auth_mode = client.token_cache().mode().kind(),
            cloud = %self.cloud,
            "Connected to Microsoft Graph"
        );
        Ok(client)
    }
}

fn required(value: &Option<String>, flag: &str) -> CliResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| CliError::Validation(format!("{flag} is required for this auth mode")))
}
