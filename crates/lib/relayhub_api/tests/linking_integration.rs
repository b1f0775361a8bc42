//! Integration tests: drive the router over an in-memory store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use jsonwebtoken::{EncodingKey, Header, encode};
use relayhub_api::{AppState, config::ApiConfig};
use relayhub_core::config::RelayConfig;
use relayhub_core::homegraph::{GraphNotifier, NotifyError};
use relayhub_core::models::{FlatStates, NewAccount, ProvisionedDevice};
use relayhub_core::store::{ApplianceStore, CredentialStore, MemoryStore};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use url::form_urlencoded;

const CLIENT_ID: &str = "relay-client";
const CLIENT_SECRET: &str = "relay-secret";
const REDIRECT_URI: &str = "https://oauth-redirect.example/r/relayhub";
const EMAIL: &str = "ada@example.com";
const PASSWORD: &str = "correct horse";
const DEVICE_PSK: &str = "device-psk";

#[derive(Default)]
struct FakeNotifier {
    reports: Mutex<Vec<FlatStates>>,
    syncs: Mutex<Vec<String>>,
}

#[async_trait]
impl GraphNotifier for FakeNotifier {
    async fn report_state(
        &self,
        _agent_user_id: &str,
        request_id: &str,
        states: &FlatStates,
    ) -> Result<Value, NotifyError> {
        self.reports.lock().unwrap().push(states.clone());
        Ok(json!({"requestId": request_id}))
    }

    async fn request_sync(&self, agent_user_id: &str) -> Result<Value, NotifyError> {
        self.syncs.lock().unwrap().push(agent_user_id.to_string());
        Ok(json!({}))
    }
}

struct Harness {
    app: Router,
    user_id: String,
    notifier: Arc<FakeNotifier>,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let user_id = store
        .create_account(NewAccount {
            email: EMAIL.into(),
            password_hash: bcrypt::hash(PASSWORD, 4).unwrap(),
            device_jwt_psk: Some(DEVICE_PSK.into()),
        })
        .await
        .unwrap();
    let devices: Vec<ProvisionedDevice> = serde_json::from_value(json!([
        {"id": "light1", "type": "action.devices.types.LIGHT",
         "traits": ["action.devices.traits.OnOff", "action.devices.traits.Brightness"],
         "name": {"name": "Desk lamp"}}
    ]))
    .unwrap();
    store.set_provisioned_devices(&user_id, &devices).await.unwrap();

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        database_url: "postgres://unused".into(),
        request_timeout: Duration::from_secs(5),
        relay: RelayConfig {
            client_id: CLIENT_ID.into(),
            client_secret: CLIENT_SECRET.into(),
            redirect_uris: vec![REDIRECT_URI.into()],
            auth_code_ttl: Duration::from_secs(600),
            report_state_max_age: None,
            homegraph_credentials: None,
            login_page_url: "https://signin.example/relayhub".into(),
        },
    };
    let notifier = Arc::new(FakeNotifier::default());
    let state = AppState::new(config, store.clone(), store, Some(notifier.clone()));
    Harness {
        app: relayhub_api::router(state),
        user_id,
        notifier,
    }
}

fn form(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn post_form(uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form(pairs)))
        .unwrap()
}

fn post_json(uri: &str, bearer: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse JSON")
    };
    (status, json)
}

async fn redirect_location(app: &Router, req: Request<Body>) -> (StatusCode, Option<String>) {
    let resp = app.clone().oneshot(req).await.expect("request");
    let location = resp
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    (resp.status(), location)
}

async fn login_for_code(app: &Router) -> String {
    let (status, location) = redirect_location(
        app,
        post_form(
            "/login",
            &[
                ("username", EMAIL),
                ("password", PASSWORD),
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
                ("state", "xyz"),
            ],
        ),
    )
    .await;
    assert!(status.is_redirection(), "login status {status}");
    let target = Url::parse(&location.expect("location header")).unwrap();
    assert!(target.as_str().starts_with(REDIRECT_URI));
    assert_eq!(
        target.query_pairs().find(|(k, _)| k == "state").unwrap().1,
        "xyz"
    );
    target
        .query_pairs()
        .find(|(k, _)| k == "code")
        .expect("code in redirect")
        .1
        .into_owned()
}

async fn exchange_code(app: &Router, code: &str) -> (StatusCode, Value) {
    send(
        app,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
                ("redirect_uri", REDIRECT_URI),
            ],
        ),
    )
    .await
}

async fn linked_access_token(app: &Router) -> (String, String) {
    let code = login_for_code(app).await;
    let (status, body) = exchange_code(app, &code).await;
    assert_eq!(status, StatusCode::OK);
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["refresh_token"].as_str().unwrap().to_string(),
    )
}

fn sync_request() -> Value {
    json!({"requestId": "r-sync", "inputs": [{"intent": "action.devices.SYNC"}]})
}

fn query_request(ids: &[&str]) -> Value {
    let devices: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
    json!({
        "requestId": "r-query",
        "inputs": [{"intent": "action.devices.QUERY", "payload": {"devices": devices}}]
    })
}

fn device_message(user_id: &str, updates: Value) -> String {
    encode(
        &Header::default(),
        &json!({"user_id": user_id, "u": updates}),
        &EncodingKey::from_secret(DEVICE_PSK.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn authorize_redirects_to_login_or_forbids() {
    let h = harness().await;

    let uri = format!(
        "/auth?client_id={CLIENT_ID}&redirect_uri={}&state=abc&response_type=code",
        form_urlencoded::byte_serialize(REDIRECT_URI.as_bytes()).collect::<String>()
    );
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, location) = redirect_location(&h.app, req).await;
    assert!(status.is_redirection());
    let location = location.unwrap();
    assert!(location.starts_with("https://signin.example/relayhub?"));
    assert!(location.contains("client_id=relay-client"));
    assert!(location.contains("state=abc"));

    let req = Request::builder()
        .uri(format!(
            "/auth?client_id=intruder&redirect_uri={}",
            form_urlencoded::byte_serialize(REDIRECT_URI.as_bytes()).collect::<String>()
        ))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = Request::builder()
        .uri(format!("/auth?client_id={CLIENT_ID}&redirect_uri=https%3A%2F%2Fevil.example"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let h = harness().await;
    let (status, body) = send(
        &h.app,
        post_form(
            "/login",
            &[
                ("username", EMAIL),
                ("password", "battery staple"),
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "unauthorized"}));
}

#[tokio::test]
async fn code_exchange_issues_tokens_once() {
    let h = harness().await;
    let code = login_for_code(&h.app).await;

    let (status, body) = exchange_code(&h.app, &code).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 21600);
    let access = body["access_token"].as_str().unwrap();
    assert!(access.starts_with(&format!("access$@${CLIENT_ID}$@${}$@$", h.user_id)));
    assert!(body["refresh_token"].as_str().unwrap().starts_with("refresh$@$"));

    let (status, body) = exchange_code(&h.app, &code).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "invalid_grant"}));
}

#[tokio::test]
async fn refresh_grant_rotates_access_token() {
    let h = harness().await;
    let (old_access, refresh) = linked_access_token(&h.app).await;

    let (status, body) = send(
        &h.app,
        post_form(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh.as_str()),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("refresh_token").is_none());
    let new_access = body["access_token"].as_str().unwrap().to_string();

    let (status, _) = send(&h.app, post_json("/fulfillment", &old_access, sync_request())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&h.app, post_json("/fulfillment", &new_access, sync_request())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &h.app,
        post_form("/token", &[("grant_type", "password")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "unsupported_grant_type"}));
}

#[tokio::test]
async fn fulfillment_requires_valid_bearer() {
    let h = harness().await;
    let req = Request::builder()
        .method("POST")
        .uri("/fulfillment")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(sync_request().to_string()))
        .unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = format!("access$@${CLIENT_ID}$@${}$@$00ff", h.user_id);
    let (status, _) = send(&h.app, post_json("/fulfillment", &forged, sync_request())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sync_query_and_report_state_flow() {
    let h = harness().await;
    let (access, _) = linked_access_token(&h.app).await;

    let (status, body) = send(&h.app, post_json("/fulfillment", &access, sync_request())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestId"], "r-sync");
    assert_eq!(body["payload"]["agentUserId"], h.user_id.as_str());
    assert_eq!(body["payload"]["devices"][0]["id"], "light1");

    let message = device_message(
        &h.user_id,
        json!([{"id": "light1", "cmd": {"OnOff": {"on": true}}}]),
    );
    let req = Request::builder()
        .method("POST")
        .uri("/reportstate")
        .header(header::AUTHORIZATION, format!("Bearer {message}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["requestId"].is_string());
    assert_eq!(h.notifier.reports.lock().unwrap()[0]["light1"]["on"], true);

    let (status, body) = send(
        &h.app,
        post_json("/fulfillment", &access, query_request(&["light1", "ghost"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["payload"]["devices"]["light1"],
        json!({"on": true, "brightness": 0})
    );
    assert_eq!(body["payload"]["devices"]["ghost"]["errorCode"], "deviceNotFound");
}

#[tokio::test]
async fn report_state_rejects_unknown_devices_and_bad_signatures() {
    let h = harness().await;
    let (access, _) = linked_access_token(&h.app).await;
    send(&h.app, post_json("/fulfillment", &access, sync_request())).await;

    let message = device_message(
        &h.user_id,
        json!([
            {"id": "light1", "cmd": {"OnOff": {"on": true}}},
            {"id": "ghost", "cmd": {"OnOff": {"on": true}}}
        ]),
    );
    let req = Request::builder()
        .method("POST")
        .uri("/reportstate")
        .header(header::AUTHORIZATION, format!("Bearer {message}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Update failed, check device ids"}));

    let forged = encode(
        &Header::default(),
        &json!({"user_id": h.user_id, "u": []}),
        &EncodingKey::from_secret(b"not-the-psk"),
    )
    .unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/reportstate")
        .header(header::AUTHORIZATION, format!("Bearer {forged}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &h.app,
        post_json("/fulfillment", &access, query_request(&["light1"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"]["devices"]["light1"]["on"], false);
}

#[tokio::test]
async fn request_sync_then_disconnect() {
    let h = harness().await;
    let (access, refresh) = linked_access_token(&h.app).await;

    let req = Request::builder()
        .uri("/requestsync")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.notifier.syncs.lock().unwrap().as_slice(), [h.user_id.clone()]);

    let disconnect = json!({
        "requestId": "r-bye",
        "inputs": [{"intent": "action.devices.DISCONNECT"}]
    });
    let (status, body) = send(&h.app, post_json("/fulfillment", &access, disconnect)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, _) = send(&h.app, post_json("/fulfillment", &access, sync_request())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &h.app,
        post_form(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh.as_str()),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "invalid_grant"}));
}
