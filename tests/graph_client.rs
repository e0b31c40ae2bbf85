use audience_sync::graph::{appsecret_proof, GraphApiClient, GraphApiError};
use audience_sync_core::contract::{
    AdsPlatform, AudienceField, AudienceHandle, UploadSession, UserField, UserPayload, UserRecord,
};
use audience_sync_core::provision::new_audience_request;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FIELDS: [AudienceField; 3] = [
    AudienceField::Name,
    AudienceField::Id,
    AudienceField::TimeCreated,
];

fn client(server: &MockServer) -> GraphApiClient {
    GraphApiClient::new("app-1".into(), "shh", "token-1".into(), "v24.0".into())
        .unwrap()
        .with_base_url(server.uri())
}

fn proof() -> String {
    appsecret_proof("shh", "token-1").unwrap()
}

#[tokio::test]
async fn list_follows_cursors_and_converts_creation_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v24.0/act_1/customaudiences"))
        .and(query_param("fields", "name,id,time_created"))
        .and(query_param("access_token", "token-1"))
        .and(query_param("appsecret_proof", proof().as_str()))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "111", "name": "LOYAL BUYERS O2O", "time_created": 1690000000}],
            "paging": {
                "cursors": {"before": "c0", "after": "c1"},
                "next": "https://graph.facebook.com/v24.0/act_1/customaudiences?after=c1"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v24.0/act_1/customaudiences"))
        .and(query_param("after", "c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "222", "name": "LAPSED USERS O2O", "time_created": 1600000000}],
            "paging": {"cursors": {"before": "c1", "after": "c2"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let audiences = client(&server)
        .list_custom_audiences("act_1", &FIELDS)
        .await
        .unwrap();

    assert_eq!(audiences.len(), 2);
    assert_eq!(audiences[0].id, "111");
    assert_eq!(audiences[0].name, "LOYAL BUYERS O2O");
    assert_eq!(audiences[0].time_created.to_rfc3339(), "2023-07-22T04:26:40+00:00");
    assert_eq!(audiences[1].id, "222");
}

#[tokio::test]
async fn create_posts_audience_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v24.0/act_1/customaudiences"))
        .and(query_param("appsecret_proof", proof().as_str()))
        .and(body_string_contains("name=LOYAL+BUYERS+O2O"))
        .and(body_string_contains("subtype=CUSTOM"))
        .and(body_string_contains("customer_file_source=USER_PROVIDED_ONLY"))
        .and(body_string_contains("description="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "23850000000000001"})))
        .expect(1)
        .mount(&server)
        .await;

    let handle = client(&server)
        .create_custom_audience("act_1", &new_audience_request("LOYAL BUYERS O2O"))
        .await
        .unwrap();

    assert_eq!(handle, AudienceHandle::new("23850000000000001"));
}

#[tokio::test]
async fn upload_sends_payload_and_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v24.0/23850000000000001/users"))
        .and(query_param("access_token", "token-1"))
        .and(body_string_contains(
            "%22schema%22%3A%5B%22FN%22%2C%22EMAIL%22%2C%22LN%22%2C%22PHONE%22%5D",
        ))
        .and(body_string_contains("%5B%22Ana%22%2C%22ana%40example.com%22%2Cnull%2C%22%2B6281%22%5D"))
        .and(body_string_contains("%22batch_seq%22%3A2"))
        .and(body_string_contains("%22last_batch_flag%22%3Atrue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "audience_id": "23850000000000001",
            "session_id": 42,
            "num_received": 1,
            "num_invalid_entries": 0,
            "invalid_entry_samples": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payload = UserPayload {
        schema: vec![
            UserField::FirstName,
            UserField::Email,
            UserField::LastName,
            UserField::Phone,
        ],
        data: vec![UserRecord {
            first_name: Some("Ana".into()),
            email: Some("ana@example.com".into()),
            last_name: None,
            phone: Some("+6281".into()),
        }],
        session: Some(UploadSession {
            session_id: 42,
            batch_seq: 2,
            last_batch_flag: true,
            estimated_num_total: 10_001,
        }),
    };

    let result = client(&server)
        .upload_users(&AudienceHandle::new("23850000000000001"), &payload)
        .await
        .unwrap();

    assert_eq!(result.audience_id, "23850000000000001");
    assert_eq!(result.num_received, 1);
    assert_eq!(result.num_invalid_entries, 0);
}

#[tokio::test]
async fn graph_errors_surface_code_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v24.0/act_1/customaudiences"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Invalid OAuth access token.",
                "type": "OAuthException",
                "code": 190,
                "fbtrace_id": "AbCdEf"
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_custom_audiences("act_1", &FIELDS)
        .await
        .unwrap_err();

    let graph_error = err.downcast_ref::<GraphApiError>().expect("Graph error type");
    assert_eq!(graph_error.status, 400);
    assert_eq!(graph_error.code, Some(190));
    assert_eq!(graph_error.error_type.as_deref(), Some("OAuthException"));
    assert!(err.to_string().contains("Invalid OAuth access token."));
}
