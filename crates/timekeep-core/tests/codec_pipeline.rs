//! Payload key translation through the real request/response stages.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use timekeep_core::api::{FormField, Resource};
use timekeep_core::models::{NewTimeEntry, Project, TimeEntry, User};
use timekeep_core::{ApiClient, ApiError};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_json_body_is_sent_in_wire_convention() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/time_entries"))
        .and(body_json(json!({
            "project_id": 7,
            "tag_ids": [1, 2],
            "started_at": "2024-03-01T09:00:00Z",
            "billable": true
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 11,
            "project_id": 7,
            "tag_ids": [1, 2],
            "started_at": "2024-03-01T09:00:00Z",
            "ended_at": null,
            "billable": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let new_entry = NewTimeEntry {
        project_id: Some(7),
        tag_ids: vec![1, 2],
        started_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        billable: true,
        ..Default::default()
    };

    let entry: TimeEntry = client
        .resource(Resource::TimeEntries)
        .create(&new_entry)
        .await
        .unwrap();

    assert_eq!(entry.id, 11);
    assert_eq!(entry.project_id, Some(7));
    assert!(entry.is_running());
    server.verify().await;
}

#[tokio::test]
async fn test_list_decodes_nested_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "name": "Site", "client_id": 3, "archived": false },
            { "id": 2, "name": "App", "client_id": null, "color": "#ff0000", "archived": true }
        ])))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let projects: Vec<Project> = client.resource(Resource::Projects).list().await.unwrap();

    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].client_id, Some(3));
    assert!(projects[1].archived);
}

#[tokio::test]
async fn test_json_without_json_content_type_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"[{ "id": 7, "name": "Legacy", "client_id": 5 }]"#),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let projects: Vec<Project> = client.resource(Resource::Projects).list().await.unwrap();

    assert_eq!(projects[0].client_id, Some(5));
}

#[tokio::test]
async fn test_error_payload_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/time_entries/5"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error_messages": { "ended_at": ["must be after started_at"] }
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let err = client
        .resource(Resource::TimeEntries)
        .update::<Value, _>(5, &json!({ "endedAt": "2024-01-01T00:00:00Z" }))
        .await
        .unwrap_err();

    match err {
        ApiError::Application { status, payload } => {
            assert_eq!(status.as_u16(), 422);
            assert_eq!(payload, json!({ "errorMessages": { "endedAt": ["must be after started_at"] } }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_non_json_error_body_is_kept_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/teams"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let err = client.resource(Resource::Teams).list::<Value>().await.unwrap_err();

    assert_eq!(err.status().map(|s| s.as_u16()), Some(502));
    assert_eq!(err.payload(), Some(&Value::String("upstream down".into())));
}

#[tokio::test]
async fn test_multipart_upload_is_not_rewritten() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/me/avatar"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "email": "ada@example.com",
            "avatar_url": "https://cdn.example.com/a.png"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let fields = vec![
        FormField::Text {
            name: "displayName".into(),
            value: "Ada".into(),
        },
        FormField::File {
            name: "avatarFile".into(),
            file_name: "a.png".into(),
            mime: Some("image/png".into()),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        },
    ];

    let user: User = client.upload("/users/me/avatar", fields).await.unwrap();
    assert_eq!(user.avatar_url.as_deref(), Some("https://cdn.example.com/a.png"));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"displayName\""));
    assert!(body.contains("name=\"avatarFile\""));
    assert!(!body.contains("display_name"));
}

#[tokio::test]
async fn test_delete_accepts_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/tags/3"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    client.resource(Resource::Tags).delete(3).await.unwrap();
    server.verify().await;
}
