//! Site discovery for the guest user export.

use serde::Deserialize;
use std::path::Path;
use tracing::{info, instrument};

use crate::{EntraError, EntraResult, GraphClient};

/// Which services to inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceScope {
    SharePoint,
    OneDrive,
    #[default]
    Both,
}

impl ServiceScope {
    /// Whether a site of the given kind is in scope.
    #[must_use]
    pub fn includes(&self, personal: bool) -> bool {
        match self {
            Self::SharePoint => !personal,
            Self::OneDrive => personal,
            Self::Both => true,
        }
    }
}

impl std::str::FromStr for ServiceScope {
    type Err = EntraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sharepoint" => Ok(Self::SharePoint),
            "onedrive" => Ok(Self::OneDrive),
            "both" | "all" => Ok(Self::Both),
            other => Err(EntraError::Config(format!(
                "Service scope must be SharePoint, OneDrive or Both, got '{other}'"
            ))),
        }
    }
}

/// A site collection to inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSite {
    web_url: String,
    display_name: Option<String>,
    is_personal_site: Option<bool>,
}

impl GraphSite {
    /// OneDrive when flagged personal or hosted on the `-my` host.
    fn is_onedrive(&self) -> bool {
        self.is_personal_site == Some(true) || is_onedrive_url(&self.web_url)
    }
}

/// OneDrive sites live on the `<tenant>-my` host.
#[must_use]
pub fn is_onedrive_url(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .is_some_and(|host| host.contains("-my.sharepoint."))
}

/// Lists every site collection of the tenant within `scope`.
#[instrument(skip(client))]
pub async fn discover_sites(client: &GraphClient, scope: ServiceScope) -> EntraResult<Vec<Site>> {
    let url = format!(
        "{}/sites/getAllSites?$select=webUrl,displayName,isPersonalSite&$top={}",
        client.base_url(),
        client.config().page_size
    );

    let mut sites = Vec::new();
    client
        .get_paginated(&url, false, |page: Vec<GraphSite>| {
            for site in page {
                if scope.includes(site.is_onedrive()) {
                    sites.push(Site {
                        url: site.web_url,
                        title: site.display_name,
                    });
                }
            }
            Ok(())
        })
        .await?;

    info!(count = sites.len(), "Sites discovered");
    Ok(sites)
}

#[derive(Debug, Deserialize)]
struct SiteRow {
    #[serde(alias = "url", alias = "URL", alias = "SiteUrl")]
    #[serde(rename = "Url")]
    url: String,
    #[serde(default, alias = "title", alias = "SiteTitle")]
    #[serde(rename = "Title")]
    title: Option<String>,
}

/// Reads an explicit site list (`Url` column, optional `Title`).
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no `Url` column.
pub fn read_sites_csv(path: &Path, delimiter: u8) -> EntraResult<Vec<Site>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut sites = Vec::new();
    for row in reader.deserialize::<SiteRow>() {
        let row = row?;
        if row.url.is_empty() {
            continue;
        }
        sites.push(Site {
            url: row.url.trim_end_matches('/').to_string(),
            title: row.title.filter(|t| !t.is_empty()),
        });
    }

    info!(count = sites.len(), path = %path.display(), "Sites read from file");
    Ok(sites)
}
