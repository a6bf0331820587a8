//! End-to-end tests of group resolution and access review submission
//! against a mock Graph server.

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use serde_json::json;
use std::time::Duration;
use tenantgov_entra::access_review::{launch_reviews, ReviewSettings, ReviewStatus};
use tenantgov_entra::groups::{resolve_groups, GroupQuery, Visibility};
use tenantgov_entra::report::RunReport;
use tenantgov_entra::EntraError;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn scenario_groups() -> Vec<serde_json::Value> {
    let mut dynamic = create_m365_group("g-dyn", "PRJ-Dynamic", "PRJ-Dynamic", "Private");
    dynamic["membershipRule"] = json!("user.department -eq \"Sales\"");
    dynamic["groupTypes"] = json!(["Unified", "DynamicMembership"]);

    let mut privileged = create_m365_group("g-role", "PRJ-Admins", "PRJ-Admins", "Private");
    privileged["isAssignableToRole"] = json!(true);

    vec![
        create_m365_group("g-beta", "PRJ-Beta", "PRJ-Beta", "Public"),
        create_m365_group("g-alpha", "PRJ-Alpha", "PRJ-Alpha", "Private"),
        create_m365_group("g-gamma", "OPS-Gamma", "OPS-Gamma", "Private"),
        dynamic,
        privileged,
    ]
}

fn live_settings() -> ReviewSettings {
    ReviewSettings {
        throttle: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_resolve_uses_advanced_query_and_client_predicates() {
    let mock = MockGraphServer::new().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/groups"))
        .and(header("ConsistencyLevel", "eventual"))
        .and(query_param("$count", "true"))
        .and(query_param("$orderby", "displayName"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_odata_response(scenario_groups(), None)),
        )
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let query = GroupQuery {
        include_prefixes: vec!["PRJ-".into()],
        visibility: Some(Visibility::Private),
        ..Default::default()
    };

    let groups = resolve_groups(&client, &query, Utc::now()).await.unwrap();
    let names: Vec<_> = groups.iter().map(|g| g.mail_nickname.as_str()).collect();
    assert_eq!(names, vec!["PRJ-Alpha"]);
}

#[tokio::test]
async fn test_resolve_with_expand_filters_and_sorts_client_side() {
    let mock = MockGraphServer::new().await;

    let mut young = create_m365_group("g-young", "PRJ-Young", "PRJ-Young", "Private");
    young["createdDateTime"] = json!("2024-05-20T00:00:00Z");
    let mut groups = vec![
        create_m365_group("g-zeta", "PRJ-Zeta", "PRJ-Zeta", "Private"),
        young,
    ];
    groups.extend(scenario_groups());
    mock.mock_groups_endpoint(groups).await;

    let client = mock.client();
    let query = GroupQuery {
        include_prefixes: vec!["PRJ-".into()],
        exclude_prefixes: vec!["PRJ-B".into()],
        min_age_days: Some(30),
        expand: Some("owners".into()),
        ..Default::default()
    };
    let run_start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let resolved = resolve_groups(&client, &query, run_start).await.unwrap();
    let names: Vec<_> = resolved.iter().map(|g| g.mail_nickname.as_str()).collect();
    assert_eq!(names, vec!["PRJ-Alpha", "PRJ-Zeta"]);
}

#[tokio::test]
async fn test_resolve_group_id_override() {
    let mock = MockGraphServer::new().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/groups"))
        .and(query_param("$filter", "id eq 'g-gamma'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_odata_response(
            vec![create_m365_group("g-gamma", "OPS-Gamma", "OPS-Gamma", "Private")],
            None,
        )))
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let query = GroupQuery {
        include_prefixes: vec!["PRJ-".into()],
        visibility: Some(Visibility::Public),
        group_id: Some("g-gamma".into()),
        ..Default::default()
    };

    let groups = resolve_groups(&client, &query, Utc::now()).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].id, "g-gamma");
}

#[tokio::test]
async fn test_resolve_follows_next_link() {
    let mock = MockGraphServer::new().await;
    let next = format!("{}/v1.0/groups?$skiptoken=page2", mock.url());

    Mock::given(method("GET"))
        .and(path("/v1.0/groups"))
        .and(query_param("$skiptoken", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_odata_response(
            vec![create_m365_group("g2", "PRJ-Two", "PRJ-Two", "Private")],
            None,
        )))
        .with_priority(1)
        .mount(&mock.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/groups"))
        .and(query_param("$orderby", "displayName"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_odata_response(
            vec![create_m365_group("g1", "PRJ-One", "PRJ-One", "Private")],
            Some(&next),
        )))
        .with_priority(2)
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let groups = resolve_groups(&client, &GroupQuery::default(), Utc::now())
        .await
        .unwrap();
    assert_eq!(groups.len(), 2);
}

#[tokio::test]
async fn test_directory_failure_is_fatal() {
    let mock = MockGraphServer::new().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/groups"))
        .respond_with(ResponseTemplate::new(403).set_body_json(create_odata_error(
            "Authorization_RequestDenied",
            "Insufficient privileges to complete the operation.",
        )))
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let err = resolve_groups(&client, &GroupQuery::default(), Utc::now())
        .await
        .unwrap_err();
    match err {
        EntraError::GraphApi { code, .. } => assert_eq!(code, "Authorization_RequestDenied"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_throttled_directory_query() {
    let mock = MockGraphServer::new().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/groups"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let err = resolve_groups(&client, &GroupQuery::default(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, EntraError::RateLimited { retry_after_secs: 12 }));
}

#[tokio::test]
async fn test_launch_reviews_records_failures_and_continues() {
    let mock = MockGraphServer::new().await;

    Mock::given(method("POST"))
        .and(path("/v1.0/identityGovernance/accessReviews/definitions"))
        .and(body_partial_json(json!({ "displayName": "Access review: PRJ-Beta" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(create_odata_error(
            "BadRequest",
            "Scope is invalid.",
        )))
        .with_priority(1)
        .mount(&mock.server)
        .await;
    mock.mock_create_review_endpoint().await;

    let client = mock.client();
    let groups: Vec<_> = ["PRJ-Alpha", "PRJ-Beta", "PRJ-Gamma"]
        .iter()
        .map(|n| {
            serde_json::from_value(create_m365_group(&n.to_lowercase(), n, n, "Private")).unwrap()
        })
        .collect();

    let run_start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let records = launch_reviews(&client, &groups, run_start, &live_settings()).await;

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, ReviewStatus::Created);
    assert_eq!(
        records[0].review_id.as_deref(),
        Some("8a1e3d52-2f63-4c4e-9d1c-1f0a7e3b5c21")
    );
    assert_eq!(records[1].status, ReviewStatus::Failed);
    assert!(records[1].error.as_deref().unwrap().contains("Scope is invalid."));
    assert_eq!(records[2].status, ReviewStatus::Created);
    assert_eq!(records[2].end_date.to_string(), "2024-06-16");

    let report = RunReport::from_records(records);
    assert!(matches!(
        report.finish(),
        Err(EntraError::PartialFailure { failed: 1, total: 3 })
    ));
}

#[tokio::test]
async fn test_dry_run_submits_nothing() {
    let mock = MockGraphServer::new().await;

    Mock::given(method("POST"))
        .and(path("/v1.0/identityGovernance/accessReviews/definitions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "x"})))
        .expect(0)
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let groups = vec![serde_json::from_value(create_m365_group(
        "g1", "PRJ-One", "PRJ-One", "Private",
    ))
    .unwrap()];
    let settings = ReviewSettings {
        dry_run: true,
        ..live_settings()
    };

    let records = launch_reviews(&client, &groups, Utc::now(), &settings).await;
    assert_eq!(records[0].status, ReviewStatus::DryRun);
    assert!(records[0].review_id.is_none());
}
