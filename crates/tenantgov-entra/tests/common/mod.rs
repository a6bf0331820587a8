//! Common test utilities for tenantgov-entra integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::time::Duration;
use tenantgov_entra::{AuthMode, GraphClient, GraphConfig, ManagedIdentityEndpoint};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const GRAPH_SP_ID: &str = "0d0a4ae3-9b9e-4f1f-9bd7-1c2c7a2b3f10";
pub const GROUP_READ_ALL: &str = "5b567255-7703-4780-807c-7be8301ae99b";
pub const ACCESS_REVIEW_READWRITE_ALL: &str = "ef5f7d5c-338f-44b0-86c3-351f46c8bb5f";

/// Test data factory for Microsoft 365 groups.
pub fn create_m365_group(id: &str, name: &str, nickname: &str, visibility: &str) -> Value {
    json!({
        "id": id,
        "displayName": name,
        "mailNickname": nickname,
        "createdDateTime": "2023-01-15T08:30:00Z",
        "visibility": visibility,
        "membershipRule": null,
        "isAssignableToRole": false,
        "groupTypes": ["Unified"]
    })
}

/// Test data factory for SharePoint site users.
pub fn create_site_user(id: i64, title: &str, login: &str, email: &str) -> Value {
    json!({
        "Id": id,
        "Title": title,
        "LoginName": login,
        "Email": email,
        "IsHiddenInUI": false,
        "IsSiteAdmin": false,
        "IsShareByEmailGuestUser": false,
        "IsEmailAuthenticationGuestUser": false,
        "UserPrincipalName": null,
        "Expiration": null,
        "UserId": {"NameId": format!("1003{id:012}"), "NameIdIssuer": "urn:federation:microsoftonline"},
        "AadObjectId": null,
        "Groups": [{"Title": "Site Visitors"}]
    })
}

/// Wraps items in an `OData` response format.
pub fn create_odata_response(items: Vec<Value>, next_link: Option<&str>) -> Value {
    let mut response = json!({ "value": items });
    if let Some(link) = next_link {
        response["@odata.nextLink"] = json!(link);
    }
    response
}

/// Creates an `OData` error response.
pub fn create_odata_error(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// Managed identity token response; `expires_on` as a string like the real endpoint.
pub fn create_token_response(access_token: &str) -> Value {
    let expires_on = chrono::Utc::now().timestamp() + 3600;
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_on": expires_on.to_string(),
        "resource": "https://graph.microsoft.com"
    })
}

/// Mock server wrapper standing in for Graph, SharePoint and the
/// managed identity endpoint.
pub struct MockGraphServer {
    pub server: MockServer,
}

impl MockGraphServer {
    /// Creates a new mock server with the token endpoint mounted.
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let mock = Self { server };
        mock.mock_token_endpoint().await;
        mock
    }

    /// Returns the mock server's base URL.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Client authenticating with a system identity against this server.
    pub fn client(&self) -> GraphClient {
        let config = GraphConfig::builder()
            .graph_endpoint(self.url())
            .login_endpoint(self.url())
            .managed_identity(ManagedIdentityEndpoint::imds(format!("{}/msi/token", self.url())))
            .page_size(100)
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        GraphClient::new(config, AuthMode::SystemIdentity).unwrap()
    }

    /// Sets up the managed identity token endpoint.
    pub async fn mock_token_endpoint(&self) {
        Mock::given(method("GET"))
            .and(path("/msi/token"))
            .and(header("Metadata", "true"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(create_token_response("mock-access-token")),
            )
            .mount(&self.server)
            .await;
    }

    /// Sets up the groups list endpoint.
    pub async fn mock_groups_endpoint(&self, groups: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/v1.0/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_odata_response(groups, None)))
            .mount(&self.server)
            .await;
    }

    /// Sets up the access review definitions endpoint; every POST succeeds.
    pub async fn mock_create_review_endpoint(&self) {
        Mock::given(method("POST"))
            .and(path("/v1.0/identityGovernance/accessReviews/definitions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "8a1e3d52-2f63-4c4e-9d1c-1f0a7e3b5c21",
                "status": "NotStarted"
            })))
            .mount(&self.server)
            .await;
    }

    /// Sets up the Microsoft Graph service principal lookup.
    pub async fn mock_graph_service_principal(&self) {
        let sp = json!({
            "id": GRAPH_SP_ID,
            "appId": "00000003-0000-0000-c000-000000000000",
            "displayName": "Microsoft Graph",
            "appRoles": [
                {"id": GROUP_READ_ALL, "value": "Group.Read.All", "allowedMemberTypes": ["Application"]},
                {"id": ACCESS_REVIEW_READWRITE_ALL, "value": "AccessReview.ReadWrite.All", "allowedMemberTypes": ["Application"]},
                {"id": "df021288-bdef-4463-88db-98f22de89214", "value": "User.Read.All", "allowedMemberTypes": ["Application"]}
            ]
        });
        Mock::given(method("GET"))
            .and(path("/v1.0/servicePrincipals"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_odata_response(vec![sp], None)))
            .mount(&self.server)
            .await;
    }

    /// Sets up the app role assignments of `principal_id`.
    pub async fn mock_role_assignments(&self, principal_id: &str, assigned_roles: &[&str]) {
        let assignments: Vec<Value> = assigned_roles
            .iter()
            .enumerate()
            .map(|(i, role)| {
                json!({
                    "id": format!("assignment-{i}"),
                    "appRoleId": role,
                    "resourceId": GRAPH_SP_ID,
                    "principalId": principal_id
                })
            })
            .collect();

        Mock::given(method("GET"))
            .and(path(format!("/v1.0/servicePrincipals/{principal_id}/appRoleAssignments")))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_odata_response(assignments, None)))
            .mount(&self.server)
            .await;
    }

    /// Sets up a SharePoint site with its title and users.
    pub async fn mock_site(&self, site_path: &str, title: &str, users: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(format!("{site_path}/_api/web")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Title": title })))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("{site_path}/_api/web/siteusers")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": users })))
            .mount(&self.server)
            .await;
    }

    /// Sets up a SharePoint site that denies access.
    pub async fn mock_site_denied(&self, site_path: &str) {
        Mock::given(method("GET"))
            .and(path(format!("{site_path}/_api/web/siteusers")))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "odata.error": {
                    "code": "-2147024891, System.UnauthorizedAccessException",
                    "message": {"lang": "en-US", "value": "Access denied."}
                }
            })))
            .mount(&self.server)
            .await;
    }
}
