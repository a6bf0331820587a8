//! Microsoft 365 tenant governance over Microsoft Graph and SharePoint REST.
//!
//! This crate backs the `tenantgov` command:
//!
//! - Resolve Microsoft 365 groups through a server-side `OData` filter and a
//!   client-side predicate chain ([`groups`])
//! - Create one access review per resolved group ([`access_review`]) and
//!   report the outcome as CSV batches ([`report`])
//! - Inventory guest users across SharePoint and OneDrive sites ([`sites`],
//!   [`guests`])
//! - Grant the automation identity its Graph application roles
//!   ([`permissions`])
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use tenantgov_entra::groups::{resolve_groups, GroupQuery};
//! use tenantgov_entra::{AuthMode, GraphClient, GraphConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GraphConfig::builder().build()?;
//! let client = GraphClient::new(config, AuthMode::SystemIdentity)?;
//! client.connect().await?;
//!
//! let query = GroupQuery {
//!     include_prefixes: vec!["PRJ-".into()],
//!     ..Default::default()
//! };
//! let groups = resolve_groups(&client, &query, Utc::now()).await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod config;
mod error;
mod graph_client;

pub mod access_review;
pub mod filter;
pub mod groups;
pub mod guests;
pub mod permissions;
pub mod report;
pub mod sites;

// Re-exports
pub use auth::TokenCache;
pub use config::{
    AuthMode, CloudEnvironment, GraphConfig, GraphConfigBuilder, ManagedIdentityEndpoint,
    IMDS_TOKEN_ENDPOINT,
};
pub use error::{describe_error, EntraError, EntraResult};
pub use graph_client::{GraphClient, ODataError, ODataErrorBody, ODataResponse};
