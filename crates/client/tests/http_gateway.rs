use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use rolodex_client::{AuthToken, GatewayError, HttpGateway, HttpGatewayConfig, RemoteGateway};
use rolodex_core::{Record, RecordId};
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let app = Router::new()
            .route("/person", get(list).post(create))
            .route("/person/:id", put(update).delete(remove));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn gateway(&self) -> HttpGateway {
        HttpGateway::new(HttpGatewayConfig::new(self.base_url.clone())).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn list(headers: HeaderMap) -> Response {
    let auth = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if auth != Some("Bearer good") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([
        { "_id": "1", "nume": "Ana", "status": 0 },
        { "_id": "2", "nume": "Bob" },
    ]))
    .into_response()
}

async fn create(Json(mut body): Json<Value>) -> Response {
    if body.get("_id").is_some() {
        return (StatusCode::BAD_REQUEST, "id is assigned by the server").into_response();
    }
    if body.get("nume").is_none() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "nume is required").into_response();
    }
    body["_id"] = json!("507f1f77bcf86cd799439011");
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn update(Path(id): Path<String>, Json(mut body): Json<Value>) -> Response {
    if id == "maintenance" {
        return (StatusCode::SERVICE_UNAVAILABLE, "upstream down").into_response();
    }
    body["_id"] = json!(id);
    Json(body).into_response()
}

async fn remove(Path(id): Path<String>) -> StatusCode {
    if id == "missing" {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

fn token() -> AuthToken {
    AuthToken::new("good")
}

fn person(name: &str) -> Record {
    Record::from_fields(json!({ "nume": name })).unwrap()
}

#[tokio::test]
async fn fetch_all_decodes_records() {
    let server = TestServer::spawn().await;

    let records = server.gateway().fetch_all(&token()).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, Some(RecordId::new("1").unwrap()));
    assert_eq!(records[1].field("nume"), Some(&json!("Bob")));
}

#[tokio::test]
async fn bad_token_is_rejected() {
    let server = TestServer::spawn().await;

    let err = server
        .gateway()
        .fetch_all(&AuthToken::new("expired"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Rejected { status: Some(401), .. }));
}

#[tokio::test]
async fn create_returns_server_id() {
    let server = TestServer::spawn().await;

    let created = server.gateway().create(&token(), &person("Ana")).await.unwrap();

    assert_eq!(created.id.as_ref().unwrap().as_str(), "507f1f77bcf86cd799439011");
    assert_eq!(created.field("nume"), Some(&json!("Ana")));
}

#[tokio::test]
async fn validation_failure_is_rejected_not_disconnected() {
    let server = TestServer::spawn().await;
    let invalid = Record::from_fields(json!({ "telefon": "0722" })).unwrap();

    let err = server.gateway().create(&token(), &invalid).await.unwrap_err();

    assert!(!err.is_disconnected());
    match err {
        GatewayError::Rejected { status, detail } => {
            assert_eq!(status, Some(422));
            assert_eq!(detail, "nume is required");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn update_targets_record_url() {
    let server = TestServer::spawn().await;
    let record = person("Ana").with_id(RecordId::new("42").unwrap());

    let updated = server.gateway().update(&token(), &record).await.unwrap();

    assert_eq!(updated.id, record.id);
}

#[tokio::test]
async fn update_without_id_is_rejected_locally() {
    let server = TestServer::spawn().await;

    let err = server.gateway().update(&token(), &person("Ana")).await.unwrap_err();

    assert!(matches!(err, GatewayError::Rejected { status: None, .. }));
}

#[tokio::test]
async fn delete_maps_status_codes() {
    let server = TestServer::spawn().await;
    let gateway = server.gateway();

    gateway
        .delete(&token(), &person("Ana").with_id(RecordId::new("42").unwrap()))
        .await
        .unwrap();

    let err = gateway
        .delete(&token(), &person("Ana").with_id(RecordId::new("missing").unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rejected { status: Some(404), .. }));
}

#[tokio::test]
async fn service_unavailable_counts_as_disconnected() {
    let server = TestServer::spawn().await;
    let record = person("Ana").with_id(RecordId::new("maintenance").unwrap());

    let err = server.gateway().update(&token(), &record).await.unwrap_err();

    assert!(err.is_disconnected());
}

#[tokio::test]
async fn unreachable_server_is_disconnected() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = HttpGateway::new(HttpGatewayConfig::new(format!("http://{addr}"))).unwrap();

    let err = gateway.fetch_all(&token()).await.unwrap_err();
    assert!(err.is_disconnected());

    let err = gateway.create(&token(), &person("Ana")).await.unwrap_err();
    assert!(err.is_disconnected());

    let err = gateway.subscribe(&token()).await.unwrap_err();
    assert!(err.is_disconnected());
}
