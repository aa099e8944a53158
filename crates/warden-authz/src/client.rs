//! Cluster API seam and its HTTP implementation.
//!
//! # Purpose
//! [`ClusterApi`] is the narrow surface the gateway needs from the cluster:
//! namespace listing, self access reviews and audit events. [`KubeClient`]
//! implements it over the Kubernetes REST API, impersonating the identity it
//! was built for.
//!
//! # Security boundary
//! Every request carries the gateway's own bearer token. Restricted clients add
//! `Impersonate-User`/`Impersonate-Group` headers so the API server evaluates
//! RBAC as the caller; the privileged client sends none.
use crate::errors::{AuthzResult, ClientError};
use crate::identity::Identity;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const IMPERSONATE_USER: &str = "Impersonate-User";
const IMPERSONATE_GROUP: &str = "Impersonate-Group";
const ACCESS_REVIEW_PATH: &str = "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews";
const PRIVILEGED_SUBJECT: &str = "warden";

/// Operations the gateway performs against the cluster on behalf of a caller.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every namespace name visible to this client.
    async fn list_namespaces(&self) -> AuthzResult<Vec<String>>;

    /// Ask the cluster whether this client's subject may perform `check`.
    async fn check_access(&self, check: &AccessCheck) -> AuthzResult<bool>;

    /// Record an audit event in the cluster.
    async fn record_event(&self, event: &AuditEvent) -> AuthzResult<()>;
}

/// Builds cluster clients bound to an identity (or to no identity for
/// privileged access).
///
/// Implementations must not perform remote calls while building.
pub trait ClientFactory: Send + Sync {
    fn build(&self, identity: Option<&Identity>) -> AuthzResult<Arc<dyn ClusterApi>>;
}

/// A resource attribute check, as understood by `SelfSubjectAccessReview`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheck {
    pub verb: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AccessCheck {
    pub fn new(verb: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            group: String::new(),
            resource: resource.into(),
            namespace: None,
            name: None,
        }
    }

    /// Cluster-wide `list namespaces`, the check that marks an identity as
    /// unrestricted.
    pub fn list_namespaces() -> Self {
        Self::new("list", "namespaces")
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Human-readable form used in denial messages, e.g. `get namespaces/payments`.
    pub fn describe(&self) -> String {
        let resource = if self.group.is_empty() {
            self.resource.clone()
        } else {
            format!("{}.{}", self.resource, self.group)
        };
        let mut out = match &self.name {
            Some(name) => format!("{} {resource}/{name}", self.verb),
            None => format!("{} {resource}", self.verb),
        };
        if let Some(namespace) = &self.namespace {
            out.push_str(&format!(" in namespace {namespace}"));
        }
        out
    }
}

/// An audit record emitted as a cluster event against a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub namespace: String,
    pub reason: String,
    pub message: String,
}

/// Connection settings shared by every client a [`KubeClientFactory`] builds.
#[derive(Debug, Clone)]
pub struct KubeClientSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub ca_pem: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// Builds [`KubeClient`]s that share one connection pool.
#[derive(Clone)]
pub struct KubeClientFactory {
    http: reqwest::Client,
    base_url: Arc<str>,
    token: Option<Arc<str>>,
}

impl KubeClientFactory {
    pub fn new(settings: KubeClientSettings) -> AuthzResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(settings.timeout);
        if let Some(pem) = &settings.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|err| ClientError::Build(format!("cluster ca: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|err| ClientError::Build(err.to_string()))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').into(),
            token: settings.token.map(Into::into),
        })
    }
}

impl ClientFactory for KubeClientFactory {
    fn build(&self, identity: Option<&Identity>) -> AuthzResult<Arc<dyn ClusterApi>> {
        Ok(Arc::new(KubeClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            impersonate: identity.cloned(),
        }))
    }
}

/// Kubernetes REST client, optionally impersonating an [`Identity`].
#[derive(Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    base_url: Arc<str>,
    token: Option<Arc<str>>,
    impersonate: Option<Identity>,
}

#[derive(Debug, Deserialize)]
struct NamespaceList {
    items: Vec<NamespaceItem>,
}

#[derive(Debug, Deserialize)]
struct NamespaceItem {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AccessReviewResponse {
    status: Option<AccessReviewStatus>,
}

#[derive(Debug, Deserialize)]
struct AccessReviewStatus {
    allowed: bool,
}

impl KubeClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(identity) = &self.impersonate {
            builder = builder.header(IMPERSONATE_USER, identity.name());
            for group in identity.groups() {
                builder = builder.header(IMPERSONATE_GROUP, group);
            }
        }
        builder
    }

    fn subject(&self) -> String {
        self.impersonate
            .as_ref()
            .map(|identity| identity.name().to_string())
            .unwrap_or_else(|| PRIVILEGED_SUBJECT.to_string())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        endpoint: &str,
        action: &str,
    ) -> AuthzResult<T> {
        let response = builder.send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            StatusCode::FORBIDDEN => Err(ClientError::Forbidden {
                subject: self.subject(),
                action: action.to_string(),
            }),
            status => Err(ClientError::Status {
                endpoint: endpoint.to_string(),
                status,
            }),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn list_namespaces(&self) -> AuthzResult<Vec<String>> {
        let path = "/api/v1/namespaces";
        let list: NamespaceList = self
            .send_json(self.request(Method::GET, path), path, "list namespaces")
            .await?;
        Ok(list
            .items
            .into_iter()
            .map(|item| item.metadata.name)
            .collect())
    }

    async fn check_access(&self, check: &AccessCheck) -> AuthzResult<bool> {
        let body = json!({
            "apiVersion": "authorization.k8s.io/v1",
            "kind": "SelfSubjectAccessReview",
            "spec": { "resourceAttributes": check },
        });
        let review: AccessReviewResponse = self
            .send_json(
                self.request(Method::POST, ACCESS_REVIEW_PATH).json(&body),
                ACCESS_REVIEW_PATH,
                "create selfsubjectaccessreviews",
            )
            .await?;
        review
            .status
            .map(|status| status.allowed)
            .ok_or_else(|| ClientError::InvalidResponse("access review without status".to_string()))
    }

    async fn record_event(&self, event: &AuditEvent) -> AuthzResult<()> {
        let path = format!("/api/v1/namespaces/{}/events", event.namespace);
        let body = json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {
                "generateName": "warden-audit-",
                "namespace": event.namespace,
            },
            "involvedObject": {
                "apiVersion": "v1",
                "kind": "Namespace",
                "name": event.namespace,
            },
            "reason": event.reason,
            "message": event.message,
            "type": "Normal",
            "source": { "component": "warden" },
        });
        let _: serde_json::Value = self
            .send_json(
                self.request(Method::POST, &path).json(&body),
                &path,
                "create events",
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct Seen {
        users: Mutex<Vec<Option<String>>>,
        groups: Mutex<Vec<Vec<String>>>,
        reviews: Mutex<Vec<Value>>,
    }

    async fn spawn_api_server(seen: Arc<Seen>) -> (SocketAddr, JoinHandle<()>) {
        // Minimal stand-in for the Kubernetes API: alice may list namespaces,
        // everyone else is denied, and `mallory` is forbidden outright.
        let namespaces = {
            let seen = seen.clone();
            move |headers: HeaderMap| {
                let seen = seen.clone();
                async move {
                    let user = headers
                        .get(IMPERSONATE_USER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let groups = headers
                        .get_all(IMPERSONATE_GROUP)
                        .iter()
                        .filter_map(|v| v.to_str().ok().map(str::to_string))
                        .collect();
                    seen.users.lock().expect("lock").push(user.clone());
                    seen.groups.lock().expect("lock").push(groups);
                    if user.as_deref() == Some("mallory") {
                        return Err(axum::http::StatusCode::FORBIDDEN);
                    }
                    Ok(Json(serde_json::json!({
                        "items": [
                            {"metadata": {"name": "default"}},
                            {"metadata": {"name": "payments"}}
                        ]
                    })))
                }
            }
        };
        let reviews = {
            let seen = seen.clone();
            move |headers: HeaderMap, Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    seen.reviews.lock().expect("lock").push(body);
                    let allowed = headers
                        .get(IMPERSONATE_USER)
                        .and_then(|v| v.to_str().ok())
                        == Some("alice");
                    Json(serde_json::json!({"status": {"allowed": allowed}}))
                }
            }
        };
        let app = Router::new()
            .route("/api/v1/namespaces", get(namespaces))
            .route(ACCESS_REVIEW_PATH, post(reviews));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });
        (addr, handle)
    }

    fn factory(addr: SocketAddr) -> KubeClientFactory {
        KubeClientFactory::new(KubeClientSettings {
            base_url: format!("http://{addr}/"),
            token: Some("sa-token".to_string()),
            ca_pem: None,
            timeout: Duration::from_secs(2),
        })
        .expect("factory")
    }

    #[tokio::test]
    async fn impersonates_identity_and_groups() {
        let seen = Arc::new(Seen::default());
        let (addr, _handle) = spawn_api_server(seen.clone()).await;
        let identity = Identity::new("bob", ["dev", "ops"]);
        let client = factory(addr).build(Some(&identity)).expect("client");

        let names = client.list_namespaces().await.expect("list");
        assert_eq!(names, vec!["default", "payments"]);
        assert_eq!(
            seen.users.lock().expect("lock").as_slice(),
            &[Some("bob".to_string())]
        );
        assert_eq!(
            seen.groups.lock().expect("lock")[0],
            vec!["dev".to_string(), "ops".to_string()]
        );
    }

    #[tokio::test]
    async fn privileged_client_sends_no_impersonation() {
        let seen = Arc::new(Seen::default());
        let (addr, _handle) = spawn_api_server(seen.clone()).await;
        let client = factory(addr).build(None).expect("client");
        client.list_namespaces().await.expect("list");
        assert_eq!(seen.users.lock().expect("lock").as_slice(), &[None]);
    }

    #[tokio::test]
    async fn access_review_reports_decision() {
        let seen = Arc::new(Seen::default());
        let (addr, _handle) = spawn_api_server(seen.clone()).await;
        let factory = factory(addr);
        let check = AccessCheck::new("get", "namespaces").named("payments");

        let alice = factory
            .build(Some(&Identity::new("alice", Vec::<String>::new())))
            .expect("client");
        assert!(alice.check_access(&check).await.expect("review"));

        let bob = factory
            .build(Some(&Identity::new("bob", Vec::<String>::new())))
            .expect("client");
        assert!(!bob.check_access(&check).await.expect("review"));

        let reviews = seen.reviews.lock().expect("lock");
        assert_eq!(reviews[0]["kind"], "SelfSubjectAccessReview");
        assert_eq!(reviews[0]["spec"]["resourceAttributes"]["name"], "payments");
        assert!(reviews[0]["spec"]["resourceAttributes"].get("group").is_none());
    }

    #[tokio::test]
    async fn forbidden_response_names_the_caller() {
        let seen = Arc::new(Seen::default());
        let (addr, _handle) = spawn_api_server(seen).await;
        let client = factory(addr)
            .build(Some(&Identity::new("mallory", Vec::<String>::new())))
            .expect("client");
        let err = client.list_namespaces().await.unwrap_err();
        assert_eq!(err.to_string(), "mallory is not allowed to list namespaces");
    }

    #[test]
    fn describe_access_check() {
        let check = AccessCheck::new("list", "helmreleases")
            .with_group("helm.toolkit.fluxcd.io")
            .in_namespace("apps");
        assert_eq!(
            check.describe(),
            "list helmreleases.helm.toolkit.fluxcd.io in namespace apps"
        );
        assert_eq!(
            AccessCheck::new("get", "namespaces").named("a").describe(),
            "get namespaces/a"
        );
    }
}
