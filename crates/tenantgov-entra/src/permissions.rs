//! Application permission grants for a service principal.
//!
//! The automation identity needs two Graph application roles to read groups
//! and create access reviews. Roles the principal already holds are left
//! alone.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{EntraError, EntraResult, GraphClient};

/// Application id of the Microsoft Graph service principal.
pub const MICROSOFT_GRAPH_APP_ID: &str = "00000003-0000-0000-c000-000000000000";

/// Roles granted by [`grant_permissions`].
pub const REQUIRED_ROLES: [&str; 2] = ["Group.Read.All", "AccessReview.ReadWrite.All"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRole {
    pub id: Uuid,
    pub value: Option<String>,
    #[serde(default)]
    pub allowed_member_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipal {
    pub id: String,
    pub app_id: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub app_roles: Vec<AppRole>,
}

impl ServicePrincipal {
    /// Looks up an application role by its claim value.
    #[must_use]
    pub fn app_role(&self, value: &str) -> Option<&AppRole> {
        self.app_roles.iter().find(|role| {
            role.value.as_deref() == Some(value)
                && (role.allowed_member_types.is_empty()
                    || role.allowed_member_types.iter().any(|t| t == "Application"))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRoleAssignment {
    pub id: Option<String>,
    pub app_role_id: Uuid,
    pub resource_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewAppRoleAssignment<'a> {
    principal_id: &'a str,
    resource_id: &'a str,
    app_role_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GrantOutcome {
    Granted,
    AlreadyAssigned,
}

/// Result for one required role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionGrant {
    pub role: String,
    pub app_role_id: Uuid,
    pub outcome: GrantOutcome,
}

/// Grants the required Graph application roles to `principal_id`.
///
/// # Errors
///
/// Returns `NotFound` if the Graph service principal or one of the roles
/// cannot be found, or the first failed request.
#[instrument(skip(client))]
pub async fn grant_permissions(
    client: &GraphClient,
    principal_id: &str,
) -> EntraResult<Vec<PermissionGrant>> {
    if Uuid::parse_str(principal_id).is_err() {
        return Err(EntraError::Config(format!(
            "Principal id '{principal_id}' is not a valid object id"
        )));
    }

    let graph_sp = find_graph_service_principal(client).await?;
    let existing = list_assignments(client, principal_id).await?;

    let mut grants = Vec::with_capacity(REQUIRED_ROLES.len());
    for role_name in REQUIRED_ROLES {
        let role = graph_sp.app_role(role_name).ok_or_else(|| {
            EntraError::NotFound(format!("App role '{role_name}' on Microsoft Graph"))
        })?;

        let assigned = existing
            .iter()
            .any(|a| a.app_role_id == role.id && a.resource_id == graph_sp.id);

        let outcome = if assigned {
            info!(role = role_name, "App role already assigned");
            GrantOutcome::AlreadyAssigned
        } else {
            let url = format!(
                "{}/servicePrincipals/{}/appRoleAssignments",
                client.base_url(),
                urlencoding::encode(principal_id)
            );
            let body = NewAppRoleAssignment {
                principal_id,
                resource_id: &graph_sp.id,
                app_role_id: role.id,
            };
            let created: AppRoleAssignment = client.post(&url, &body).await?;
            info!(
                role = role_name,
                assignment_id = created.id.as_deref().unwrap_or_default(),
                "App role granted"
            );
            GrantOutcome::Granted
        };

        grants.push(PermissionGrant {
            role: role_name.to_string(),
            app_role_id: role.id,
            outcome,
        });
    }

    Ok(grants)
}

async fn find_graph_service_principal(client: &GraphClient) -> EntraResult<ServicePrincipal> {
    let filter = format!("appId eq '{MICROSOFT_GRAPH_APP_ID}'");
    let url = format!(
        "{}/servicePrincipals?$filter={}&$select=id,appId,displayName,appRoles",
        client.base_url(),
        urlencoding::encode(&filter)
    );

    let mut found = Vec::new();
    client
        .get_paginated(&url, false, |page: Vec<ServicePrincipal>| {
            found.extend(page);
            Ok(())
        })
        .await?;

    found
        .into_iter()
        .find(|sp| sp.app_id == MICROSOFT_GRAPH_APP_ID)
        .ok_or_else(|| EntraError::NotFound("Microsoft Graph service principal".into()))
}

async fn list_assignments(
    client: &GraphClient,
    principal_id: &str,
) -> EntraResult<Vec<AppRoleAssignment>> {
    let url = format!(
        "{}/servicePrincipals/{}/appRoleAssignments",
        client.base_url(),
        urlencoding::encode(principal_id)
    );

    let mut assignments = Vec::new();
    client
        .get_paginated(&url, false, |page: Vec<AppRoleAssignment>| {
            assignments.extend(page);
            Ok(())
        })
        .await?;
    Ok(assignments)
}
