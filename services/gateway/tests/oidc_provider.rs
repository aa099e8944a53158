use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use gateway::oauth2::provider::{IdentityProvider, OidcProvider, ProviderError};
use gateway::reload::config::{ClaimMappings, OAuth2Config};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use warden_authz::Identity;

#[derive(Default)]
struct IdpState {
    issuer: Mutex<String>,
    discovery_calls: AtomicUsize,
    token_forms: Mutex<Vec<HashMap<String, String>>>,
}

async fn discovery(State(state): State<Arc<IdpState>>) -> impl IntoResponse {
    state.discovery_calls.fetch_add(1, Ordering::SeqCst);
    let issuer = state.issuer.lock().clone();
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "userinfo_endpoint": format!("{issuer}/userinfo"),
    }))
}

async fn token(
    State(state): State<Arc<IdpState>>,
    Form(form): Form<HashMap<String, String>>,
) -> axum::response::Response {
    state.token_forms.lock().push(form.clone());
    let grant = form.get("grant_type").map(String::as_str);
    let accepted = match grant {
        Some("authorization_code") => {
            form.get("code").map(String::as_str) == Some("good-code")
                && form.get("code_verifier").is_some()
        }
        Some("refresh_token") => form.get("refresh_token").map(String::as_str) == Some("r1"),
        _ => false,
    };
    if !accepted {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response();
    }
    Json(json!({
        "access_token": "at-1",
        "token_type": "Bearer",
        "refresh_token": "r2",
    }))
    .into_response()
}

async fn userinfo(headers: HeaderMap) -> axum::response::Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    match bearer {
        Some("Bearer at-1") => Json(json!({
            "sub": "1234",
            "email": "alice@example.com",
            "groups": ["dev", "payments"],
        }))
        .into_response(),
        Some("Bearer broken") => StatusCode::BAD_GATEWAY.into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn spawn_idp() -> (String, Arc<IdpState>) {
    let state = Arc::new(IdpState::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let issuer = format!("http://{}", listener.local_addr().expect("addr"));
    *state.issuer.lock() = issuer.clone();
    let app = Router::new()
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/token", post(token))
        .route("/userinfo", get(userinfo))
        .with_state(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("idp server");
    });
    (issuer, state)
}

fn provider(issuer: &str) -> OidcProvider {
    let config = OAuth2Config {
        provider: "oidc".to_string(),
        issuer_url: format!("{issuer}/"),
        client_id: "warden".to_string(),
        client_secret: "secret".to_string(),
        redirect_url: "http://warden.test/oauth2/callback".to_string(),
        scopes: vec!["openid".to_string(), "email".to_string()],
        claims: ClaimMappings::default(),
    };
    OidcProvider::new(&config, Duration::from_secs(2)).expect("provider")
}

#[tokio::test]
async fn authorization_url_carries_pkce_parameters() {
    let (issuer, state) = spawn_idp().await;
    let provider = provider(&issuer);

    let url = provider
        .authorization_url("sealed-state", "challenge-abc")
        .await
        .expect("authorization url");
    let parsed = url::Url::parse(&url).expect("url");
    assert_eq!(parsed.path(), "/authorize");
    let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["client_id"], "warden");
    assert_eq!(params["redirect_uri"], "http://warden.test/oauth2/callback");
    assert_eq!(params["scope"], "openid email");
    assert_eq!(params["state"], "sealed-state");
    assert_eq!(params["code_challenge"], "challenge-abc");
    assert_eq!(params["code_challenge_method"], "S256");

    provider
        .authorization_url("again", "challenge-def")
        .await
        .expect("authorization url");
    assert_eq!(state.discovery_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn code_exchange_posts_verifier_and_secret() {
    let (issuer, state) = spawn_idp().await;
    let provider = provider(&issuer);

    let tokens = provider
        .exchange_code("good-code", "verifier-xyz")
        .await
        .expect("exchange");
    assert_eq!(tokens.access_token, "at-1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("r2"));

    let forms = state.token_forms.lock().clone();
    let form = &forms[0];
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["code_verifier"], "verifier-xyz");
    assert_eq!(form["client_secret"], "secret");
    assert_eq!(form["redirect_uri"], "http://warden.test/oauth2/callback");
}

#[tokio::test]
async fn rejected_grants_map_to_rejected() {
    let (issuer, _state) = spawn_idp().await;
    let provider = provider(&issuer);

    let err = provider
        .exchange_code("bad-code", "verifier")
        .await
        .unwrap_err();
    assert!(err.is_rejected());

    let err = provider.refresh("unknown").await.unwrap_err();
    assert!(err.is_rejected());
    let refreshed = provider.refresh("r1").await.expect("refresh");
    assert_eq!(refreshed.access_token, "at-1");
}

#[tokio::test]
async fn userinfo_claims_become_identity() {
    let (issuer, _state) = spawn_idp().await;
    let provider = provider(&issuer);

    let identity = provider.verify("at-1").await.expect("verify");
    assert_eq!(identity, Identity::new("alice@example.com", ["dev", "payments"]));

    let err = provider.verify("expired").await.unwrap_err();
    assert!(err.is_rejected());

    let err = provider.verify("broken").await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            ..
        }
    ));
}

#[tokio::test]
async fn unreachable_issuer_is_a_metadata_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let issuer = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);
    let provider = provider(&issuer);

    let err = provider.prefetch().await.unwrap_err();
    assert!(!err.is_rejected());
}
