//! Guest user inventory across SharePoint and OneDrive sites.
//!
//! Each site gets its own connection. Matching users are appended to the
//! output file one row at a time; a failing site is logged, written to the
//! error file and skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

use crate::error::describe_error;
use crate::sites::Site;
use crate::{EntraResult, GraphClient};

/// Login name marker of Entra B2B guests.
const B2B_MARKER: &str = "#EXT#";

/// SharePoint-only guests, literal and URL-encoded forms.
const SPO_GUEST_MARKERS: [&str; 2] = ["urn:spo:guest", "urn%3aspo%3aguest"];

/// Columns of the guest export, in order.
pub const GUEST_COLUMNS: [&str; 17] = [
    "SiteUrl",
    "SiteTitle",
    "ExternalUserType",
    "Email",
    "EmailWithFallback",
    "LoginName",
    "Title",
    "Id",
    "UserId",
    "UserPrincipalName",
    "AadObjectId",
    "IsShareByEmailGuestUser",
    "IsEmailAuthenticationGuestUser",
    "IsHiddenInUI",
    "IsSiteAdmin",
    "Groups",
    "Expiration",
];

const ERROR_COLUMNS: [&str; 2] = ["SiteUrl", "Error"];

/// Kind of external user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExternalUserType {
    /// Entra B2B guest.
    B2B,
    /// SharePoint-only guest without a directory object.
    SPO,
}

/// Classifies a login name; `None` for internal users.
#[must_use]
pub fn classify_login(login_name: &str) -> Option<ExternalUserType> {
    if login_name.contains(B2B_MARKER) {
        return Some(ExternalUserType::B2B);
    }
    let lower = login_name.to_ascii_lowercase();
    if SPO_GUEST_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(ExternalUserType::SPO);
    }
    None
}

/// `{ NameId, NameIdIssuer }` claim pair used by SharePoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameId {
    pub name_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SiteGroup {
    pub title: String,
}

/// Entry of `/_api/web/siteusers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SiteUser {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    pub login_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "IsHiddenInUI", default)]
    pub is_hidden_in_ui: bool,
    #[serde(default)]
    pub is_site_admin: bool,
    #[serde(default)]
    pub is_share_by_email_guest_user: bool,
    #[serde(default)]
    pub is_email_authentication_guest_user: bool,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub expiration: Option<String>,
    #[serde(default)]
    pub user_id: Option<NameId>,
    #[serde(default)]
    pub aad_object_id: Option<NameId>,
    #[serde(default)]
    pub groups: Vec<SiteGroup>,
}

/// Email, or the address embedded in the login name.
///
/// B2B logins look like `i:0#.f|membership|jane_fabrikam.com#EXT#@contoso.onmicrosoft.com`,
/// SharePoint guests like `i:0#.f|membership|urn:spo:guest#jane@fabrikam.com`.
#[must_use]
pub fn email_with_fallback(user: &SiteUser, kind: ExternalUserType) -> String {
    if let Some(email) = user.email.as_deref().filter(|e| !e.trim().is_empty()) {
        return email.to_string();
    }

    let login = user.login_name.as_str();
    match kind {
        ExternalUserType::B2B => {
            let before_marker = login.split(B2B_MARKER).next().unwrap_or(login);
            let identity = before_marker.rsplit('|').next().unwrap_or(before_marker);
            match identity.rfind('_') {
                Some(pos) => format!("{}@{}", &identity[..pos], &identity[pos + 1..]),
                None => identity.to_string(),
            }
        }
        ExternalUserType::SPO => login.rsplit('#').next().unwrap_or(login).to_string(),
    }
}

/// One row of the guest export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuestUserRow {
    pub site_url: String,
    pub site_title: String,
    pub external_user_type: ExternalUserType,
    pub email: String,
    pub email_with_fallback: String,
    pub login_name: String,
    pub title: String,
    pub id: i64,
    pub user_id: String,
    pub user_principal_name: String,
    pub aad_object_id: String,
    pub is_share_by_email_guest_user: bool,
    pub is_email_authentication_guest_user: bool,
    #[serde(rename = "IsHiddenInUI")]
    pub is_hidden_in_ui: bool,
    pub is_site_admin: bool,
    pub groups: String,
    pub expiration: String,
}

impl GuestUserRow {
    /// Builds the row for a guest; `None` for internal users.
    #[must_use]
    pub fn from_user(site_url: &str, site_title: &str, user: &SiteUser) -> Option<Self> {
        let kind = classify_login(&user.login_name)?;
        let name_id = |claim: &Option<NameId>| {
            claim
                .as_ref()
                .and_then(|c| c.name_id.clone())
                .unwrap_or_default()
        };

        Some(Self {
            site_url: site_url.to_string(),
            site_title: site_title.to_string(),
            external_user_type: kind,
            email: user.email.clone().unwrap_or_default(),
            email_with_fallback: email_with_fallback(user, kind),
            login_name: user.login_name.clone(),
            title: user.title.clone(),
            id: user.id,
            user_id: name_id(&user.user_id),
            user_principal_name: user.user_principal_name.clone().unwrap_or_default(),
            aad_object_id: name_id(&user.aad_object_id),
            is_share_by_email_guest_user: user.is_share_by_email_guest_user,
            is_email_authentication_guest_user: user.is_email_authentication_guest_user,
            is_hidden_in_ui: user.is_hidden_in_ui,
            is_site_admin: user.is_site_admin,
            groups: user
                .groups
                .iter()
                .map(|g| g.title.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            expiration: user.expiration.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WebInfo {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    value: Vec<T>,
}

/// Connection bound to one site. SharePoint authorizes per host, so the
/// token is acquired for the site's origin when the connection opens.
#[derive(Debug)]
pub struct SiteConnection<'a> {
    client: &'a GraphClient,
    site_url: String,
}

impl<'a> SiteConnection<'a> {
    /// Opens a connection to `site_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or no token can be acquired.
    pub async fn open(client: &'a GraphClient, site_url: &str) -> EntraResult<Self> {
        let origin = url::Url::parse(site_url)?.origin().ascii_serialization();
        client.token_cache().get_token(&origin).await?;
        Ok(Self {
            client,
            site_url: site_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn title(&self) -> EntraResult<String> {
        let url = format!("{}/_api/web?$select=Title", self.site_url);
        let web: WebInfo = self.client.get_sharepoint(&url).await?;
        Ok(web.title)
    }

    /// Lists all users of the site with their group memberships.
    pub async fn users(&self) -> EntraResult<Vec<SiteUser>> {
        let url = format!(
            "{}/_api/web/siteusers?$expand=Groups&$select=Id,Title,LoginName,Email,IsHiddenInUI,\
             IsSiteAdmin,IsShareByEmailGuestUser,IsEmailAuthenticationGuestUser,UserPrincipalName,\
             Expiration,UserId,AadObjectId,Groups/Title",
            self.site_url
        );
        let users: ValueList<SiteUser> = self.client.get_sharepoint(&url).await?;
        Ok(users.value)
    }
}

/// CSV file written row by row with a flush after each row.
struct RowFile {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl RowFile {
    fn create(path: PathBuf, delimiter: u8, columns: &[&str]) -> EntraResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_writer(file);
        writer.write_record(columns)?;
        writer.flush()?;
        Ok(Self { path, writer })
    }

    fn append<T: Serialize>(&mut self, row: &T) -> EntraResult<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SiteErrorRow<'a> {
    site_url: &'a str,
    error: &'a str,
}

/// Output settings of the export.
#[derive(Debug, Clone)]
pub struct GuestExportOptions {
    pub output_dir: PathBuf,
    pub delimiter: u8,
    /// Stamp used in the output file names.
    pub started_at: DateTime<Utc>,
}

impl GuestExportOptions {
    fn file_path(&self, stem: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{stem}_{}.csv",
            self.started_at.format("%Y%m%d-%H%M%S")
        ))
    }

    #[must_use]
    pub fn guest_file(&self) -> PathBuf {
        self.file_path("GuestUsers")
    }

    #[must_use]
    pub fn error_file(&self) -> PathBuf {
        self.file_path("Errors")
    }
}

/// Counts of an export run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub sites: usize,
    pub guests: usize,
    pub failed_sites: usize,
    pub output_file: PathBuf,
    pub error_file: Option<PathBuf>,
}

/// Exports guest users of `sites`.
///
/// # Errors
///
/// Only output file errors abort the export; site failures are recorded.
#[instrument(skip_all, fields(sites = sites.len()))]
pub async fn export_guest_users(
    client: &GraphClient,
    sites: &[Site],
    options: &GuestExportOptions,
) -> EntraResult<ExportSummary> {
    let mut output = RowFile::create(options.guest_file(), options.delimiter, &GUEST_COLUMNS)?;
    let mut errors: Option<RowFile> = None;
    let mut summary = ExportSummary {
        sites: sites.len(),
        output_file: output.path.clone(),
        ..Default::default()
    };

    for (index, site) in sites.iter().enumerate() {
        info!(site = %site.url, progress = %format!("{}/{}", index + 1, sites.len()), "Processing site");

        match export_site(client, site, &mut output).await {
            Ok(count) => summary.guests += count,
            Err(e) => {
                let description = describe_error(&e);
                error!(site = %site.url, error = %description, "Site export failed");
                summary.failed_sites += 1;

                if errors.is_none() {
                    errors = Some(RowFile::create(
                        options.error_file(),
                        options.delimiter,
                        &ERROR_COLUMNS,
                    )?);
                }
                if let Some(file) = errors.as_mut() {
                    file.append(&SiteErrorRow {
                        site_url: &site.url,
                        error: &description,
                    })?;
                }
            }
        }
    }

    summary.error_file = errors.map(|f| f.path);
    info!(
        sites = summary.sites,
        guests = summary.guests,
        failed_sites = summary.failed_sites,
        output = %summary.output_file.display(),
        "Guest export finished"
    );
    Ok(summary)
}

/// Returns the number of guests written for one site.
///
/// Output write failures are site errors here; the caller decides.
async fn export_site(
    client: &GraphClient,
    site: &Site,
    output: &mut RowFile,
) -> EntraResult<usize> {
    let connection = SiteConnection::open(client, &site.url).await?;
    let title = match &site.title {
        Some(title) => title.clone(),
        None => connection.title().await?,
    };

    let mut written = 0;
    for user in connection.users().await? {
        if let Some(row) = GuestUserRow::from_user(&site.url, &title, &user) {
            output.append(&row)?;
            written += 1;
        }
    }

    if written > 0 {
        info!(site = %site.url, guests = written, "Guests found");
    } else {
        warn!(site = %site.url, "No guests on site");
    }
    Ok(written)
}

/// Checks that `dir` exists and is a directory.
///
/// # Errors
///
/// Returns `EntraError::Config` otherwise.
pub fn ensure_output_dir(dir: &Path) -> EntraResult<()> {
    if !dir.is_dir() {
        return Err(crate::EntraError::Config(format!(
            "Output directory '{}' does not exist",
            dir.display()
        )));
    }
    Ok(())
}
