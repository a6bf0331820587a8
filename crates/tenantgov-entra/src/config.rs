//! Connection and authentication configuration.

use secrecy::SecretString;
use std::time::Duration;

use crate::{EntraError, EntraResult};

/// Instance metadata endpoint used for managed identity outside App Service.
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Microsoft national clouds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloudEnvironment {
    /// Global Azure.
    #[default]
    Commercial,
    /// Azure US Government.
    UsGovernment,
    /// Azure China (21Vianet).
    China,
}

impl CloudEnvironment {
    /// Microsoft Graph root for this cloud.
    #[must_use]
    pub fn graph_endpoint(&self) -> &'static str {
        match self {
            Self::Commercial => "https://graph.microsoft.com",
            Self::UsGovernment => "https://graph.microsoft.us",
            Self::China => "https://microsoftgraph.chinacloudapi.cn",
        }
    }

    /// Entra ID login authority for this cloud.
    #[must_use]
    pub fn login_endpoint(&self) -> &'static str {
        match self {
            Self::Commercial => "https://login.microsoftonline.com",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
        }
    }
}

impl std::str::FromStr for CloudEnvironment {
    type Err = EntraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "commercial" | "global" => Ok(Self::Commercial),
            "usgovernment" | "usgov" | "gcchigh" => Ok(Self::UsGovernment),
            "china" => Ok(Self::China),
            other => Err(EntraError::Config(format!("Unknown cloud environment '{other}'"))),
        }
    }
}

/// How the run authenticates. Resolved once into a `TokenCache`.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// System-assigned managed identity of the host.
    SystemIdentity,
    /// User-assigned managed identity.
    UserIdentity { client_id: String },
    /// App registration with a certificate credential.
    AppCertificate {
        tenant_id: String,
        client_id: String,
        /// SHA-1 thumbprint of the certificate, hex encoded.
        thumbprint: String,
        /// PEM-encoded RSA private key of the certificate.
        private_key: SecretString,
    },
}

impl AuthMode {
    /// Validates identifiers and the thumbprint format.
    ///
    /// # Errors
    ///
    /// Returns `EntraError::Config` when a required value is empty or the
    /// thumbprint is not a 40 character hex string.
    pub fn validate(&self) -> EntraResult<()> {
        match self {
            Self::SystemIdentity => Ok(()),
            Self::UserIdentity { client_id } => require("client_id", client_id),
            Self::AppCertificate {
                tenant_id,
                client_id,
                thumbprint,
                ..
            } => {
                require("tenant_id", tenant_id)?;
                require("client_id", client_id)?;
                let normalized = normalize_thumbprint(thumbprint);
                if normalized.len() != 40 || hex::decode(&normalized).is_err() {
                    return Err(EntraError::Config(format!(
                        "Certificate thumbprint must be 40 hex characters, got '{thumbprint}'"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Short name for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SystemIdentity => "system_identity",
            Self::UserIdentity { .. } => "user_identity",
            Self::AppCertificate { .. } => "app_certificate",
        }
    }
}

fn require(name: &str, value: &str) -> EntraResult<()> {
    if value.trim().is_empty() {
        return Err(EntraError::Config(format!("{name} is required")));
    }
    Ok(())
}

/// Strips separators Windows adds when copying a thumbprint.
pub(crate) fn normalize_thumbprint(thumbprint: &str) -> String {
    thumbprint
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '\u{200e}')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Managed identity token endpoint with its protocol details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedIdentityEndpoint {
    pub url: String,
    pub api_version: &'static str,
    /// Secret header required by App Service style endpoints.
    pub identity_header: Option<String>,
}

impl ManagedIdentityEndpoint {
    /// Picks the App Service / Automation endpoint from the environment,
    /// else the instance metadata endpoint.
    #[must_use]
    pub fn from_env() -> Self {
        match (
            std::env::var("IDENTITY_ENDPOINT").ok(),
            std::env::var("IDENTITY_HEADER").ok(),
        ) {
            (Some(url), header) if !url.is_empty() => Self {
                url,
                api_version: "2019-08-01",
                identity_header: header,
            },
            _ => Self::imds(IMDS_TOKEN_ENDPOINT),
        }
    }

    /// Instance-metadata style endpoint at `url`.
    #[must_use]
    pub fn imds(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_version: "2018-02-01",
            identity_header: None,
        }
    }
}

/// Connection settings shared by every call of a run.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub cloud: CloudEnvironment,
    pub graph_endpoint: String,
    pub login_endpoint: String,
    pub managed_identity: ManagedIdentityEndpoint,
    pub api_version: String,
    pub page_size: u32,
    pub timeout: Duration,
}

impl GraphConfig {
    /// Starts a builder with commercial cloud defaults.
    #[must_use]
    pub fn builder() -> GraphConfigBuilder {
        GraphConfigBuilder::default()
    }

    /// `{graph}/{version}`
    #[must_use]
    pub fn graph_base_url(&self) -> String {
        format!(
            "{}/{}",
            self.graph_endpoint.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// Builder for `GraphConfig`.
#[derive(Debug, Default)]
pub struct GraphConfigBuilder {
    cloud: CloudEnvironment,
    graph_endpoint: Option<String>,
    login_endpoint: Option<String>,
    managed_identity: Option<ManagedIdentityEndpoint>,
    api_version: Option<String>,
    page_size: Option<u32>,
    timeout: Option<Duration>,
}

impl GraphConfigBuilder {
    #[must_use]
    pub fn cloud(mut self, cloud: CloudEnvironment) -> Self {
        self.cloud = cloud;
        self
    }

    /// Overrides the Graph root, e.g. for a mock server.
    #[must_use]
    pub fn graph_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.graph_endpoint = Some(endpoint.into());
        self
    }

    /// Overrides the login authority.
    #[must_use]
    pub fn login_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.login_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn managed_identity(mut self, endpoint: ManagedIdentityEndpoint) -> Self {
        self.managed_identity = Some(endpoint);
        self
    }

    #[must_use]
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `EntraError::Config` for a page size outside 1..=999 or an
    /// unparsable endpoint override.
    pub fn build(self) -> EntraResult<GraphConfig> {
        let page_size = self.page_size.unwrap_or(999);
        if !(1..=999).contains(&page_size) {
            return Err(EntraError::Config(format!(
                "page_size must be between 1 and 999, got {page_size}"
            )));
        }

        let graph_endpoint = self
            .graph_endpoint
            .unwrap_or_else(|| self.cloud.graph_endpoint().to_string());
        let login_endpoint = self
            .login_endpoint
            .unwrap_or_else(|| self.cloud.login_endpoint().to_string());
        url::Url::parse(&graph_endpoint)?;
        url::Url::parse(&login_endpoint)?;

        Ok(GraphConfig {
            cloud: self.cloud,
            graph_endpoint,
            login_endpoint,
            managed_identity: self
                .managed_identity
                .unwrap_or_else(ManagedIdentityEndpoint::from_env),
            api_version: self.api_version.unwrap_or_else(|| "v1.0".to_string()),
            page_size,
            timeout: self.timeout.unwrap_or(Duration::from_secs(30)),
        })
    }
}
