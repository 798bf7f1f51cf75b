//! HTTP implementation of the remote authority.
//!
//! Endpoint layout:
//!
//! | Operation          | Request                                   |
//! |--------------------|-------------------------------------------|
//! | login              | `POST /api/auth/login`                    |
//! | session-info       | `GET /api/auth/session`                   |
//! | refresh-session    | `POST /api/auth/refresh`                  |
//! | logout             | `POST /api/auth/logout`                   |
//! | collection         | `GET /api/{collection}[/{id}]?{params}`   |
//! | mutate-resource    | `POST|PUT|PATCH|DELETE /api/{collection}[/{id}]` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{
    BearerToken, CacheKey, Credentials, LoginResponse, MutationOp, MutationRequest,
    MutationResponse, RefreshedSession, RemoteAuthority, RemoteError, SessionInfo, UserIdentity,
    ValidationError, ENTITY_ID_PARAM,
};

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginWire {
    user: UserIdentity,
    token: String,
    #[serde(default)]
    expires_in_seconds: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfoWire {
    expires_in_seconds: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshWire {
    token: String,
    expires_in_seconds: u64,
}

/// `RemoteAuthority` over a JSON REST API.
#[derive(Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::InvalidResponse {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, RemoteError> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse {
                reason: e.to_string(),
            })
    }
}

/// Path and query of the collection read for `key`.
pub fn collection_path(key: &CacheKey) -> (String, Vec<(String, String)>) {
    let segment = key.class().collection_segment();
    let path = match key.entity_id() {
        Some(id) => format!("/api/{}/{}", segment, id),
        None => format!("/api/{}", segment),
    };
    let query = key
        .params()
        .iter()
        .filter(|(name, _)| name.as_str() != ENTITY_ID_PARAM)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    (path, query)
}

/// Method and path of a mutation.
pub fn mutation_route(request: &MutationRequest) -> (Method, String) {
    let segment = request.class.collection_segment();
    let path = match &request.id {
        Some(id) => format!("/api/{}/{}", segment, id),
        None => format!("/api/{}", segment),
    };
    let method = match request.op {
        MutationOp::Create => Method::POST,
        MutationOp::Replace => Method::PUT,
        MutationOp::Patch | MutationOp::BulkPatch => Method::PATCH,
        MutationOp::Delete => Method::DELETE,
    };
    (method, path)
}

/// Map a non-success status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Validation(ValidationError::Rejected {
                reason: error_message(body).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            })
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::transient(format!("HTTP {}", status.as_u16()))
        }
        s if s.is_server_error() => RemoteError::transient(format!("HTTP {}", s.as_u16())),
        s => RemoteError::InvalidResponse {
            reason: format!("HTTP {}: {}", s.as_u16(), error_message(body).unwrap_or_default()),
        },
    }
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Classify a successful mutation response body.
///
/// An empty body is an acknowledgment. An object carrying the id of the
/// entity the request targeted (any id, for creates) is the full entity.
/// Anything else is treated as partial.
pub fn classify_mutation_body(request: &MutationRequest, body: &str) -> MutationResponse {
    if body.trim().is_empty() {
        return MutationResponse::Acknowledged;
    }
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return MutationResponse::Acknowledged,
    };
    if !value.is_object() {
        return MutationResponse::Acknowledged;
    }

    let returned_id = value.get("id").and_then(Value::as_str);
    let is_full = match (request.op, request.id.as_deref(), returned_id) {
        (MutationOp::Create, _, Some(_)) => true,
        (_, Some(target), Some(returned)) => target == returned,
        _ => false,
    };
    if is_full {
        MutationResponse::Entity(value)
    } else {
        MutationResponse::Partial(value)
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, RemoteError> {
        let body = LoginBody {
            email: &credentials.email,
            password: credentials.password(),
        };
        let wire: LoginWire = self
            .send_json(self.request(Method::POST, "/api/auth/login").json(&body))
            .await?;
        Ok(LoginResponse {
            identity: wire.user,
            token: BearerToken::new(wire.token),
            expires_in: wire.expires_in_seconds.map(Duration::from_secs),
        })
    }

    async fn session_info(&self, token: &BearerToken) -> Result<SessionInfo, RemoteError> {
        let wire: SessionInfoWire = self
            .send_json(
                self.request(Method::GET, "/api/auth/session")
                    .bearer_auth(token.expose()),
            )
            .await?;
        Ok(SessionInfo {
            expires_in: Duration::from_secs(wire.expires_in_seconds),
        })
    }

    async fn refresh_session(&self, token: &BearerToken) -> Result<RefreshedSession, RemoteError> {
        let wire: RefreshWire = self
            .send_json(
                self.request(Method::POST, "/api/auth/refresh")
                    .bearer_auth(token.expose()),
            )
            .await?;
        Ok(RefreshedSession {
            token: BearerToken::new(wire.token),
            expires_in: Duration::from_secs(wire.expires_in_seconds),
        })
    }

    async fn logout(&self, token: &BearerToken) -> Result<(), RemoteError> {
        self.send(
            self.request(Method::POST, "/api/auth/logout")
                .bearer_auth(token.expose()),
        )
        .await?;
        Ok(())
    }

    async fn fetch_collection(
        &self,
        token: &BearerToken,
        key: &CacheKey,
    ) -> Result<Value, RemoteError> {
        let (path, query) = collection_path(key);
        self.send_json(
            self.request(Method::GET, &path)
                .bearer_auth(token.expose())
                .query(&query),
        )
        .await
    }

    async fn mutate(
        &self,
        token: &BearerToken,
        request: &MutationRequest,
    ) -> Result<MutationResponse, RemoteError> {
        let (method, path) = mutation_route(request);
        let mut builder = self.request(method, &path).bearer_auth(token.expose());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(MutationResponse::Acknowledged);
        }
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::transient(e.to_string()))?;
        Ok(classify_mutation_body(request, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tether_core::ResourceClass;

    #[test]
    fn test_base_url_is_normalized() {
        let remote = HttpRemote::new(" https://mail.example.com/ ", Duration::from_secs(5)).unwrap();
        assert_eq!(remote.base_url(), "https://mail.example.com");
    }

    #[test]
    fn test_collection_path_for_listing_and_entity() {
        let listing = CacheKey::new(ResourceClass::Emails)
            .with_param("category", "work")
            .with_param("cursor", "c2");
        let (path, query) = collection_path(&listing);
        assert_eq!(path, "/api/emails");
        assert_eq!(
            query,
            vec![
                ("category".to_string(), "work".to_string()),
                ("cursor".to_string(), "c2".to_string())
            ]
        );

        let (path, query) = collection_path(&CacheKey::entity(ResourceClass::Task, "t-3"));
        assert_eq!(path, "/api/tasks/t-3");
        assert!(query.is_empty());
    }

    #[test]
    fn test_mutation_routes() {
        let patch = MutationRequest::patch(ResourceClass::Email, "e-1", json!({"status": {}}));
        assert_eq!(mutation_route(&patch), (Method::PATCH, "/api/emails/e-1".to_string()));

        let create = MutationRequest::create(ResourceClass::Categories, json!({"name": "Work"}));
        assert_eq!(mutation_route(&create), (Method::POST, "/api/categories".to_string()));

        let bulk = MutationRequest::bulk_patch(ResourceClass::Emails, json!({}));
        assert_eq!(mutation_route(&bulk), (Method::PATCH, "/api/emails".to_string()));

        let delete = MutationRequest::delete(ResourceClass::Task, "t-1");
        assert_eq!(mutation_route(&delete), (Method::DELETE, "/api/tasks/t-1".to_string()));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED, ""), RemoteError::Unauthorized);
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            RemoteError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            RemoteError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            RemoteError::InvalidResponse { .. }
        ));
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message":"name taken"}"#),
            RemoteError::Validation(ValidationError::Rejected {
                reason: "name taken".to_string()
            })
        );
    }

    #[test]
    fn test_mutation_body_classification() {
        let patch = MutationRequest::patch(ResourceClass::Email, "e-1", json!({"status": {}}));

        assert_eq!(classify_mutation_body(&patch, ""), MutationResponse::Acknowledged);
        assert_eq!(
            classify_mutation_body(&patch, r#"{"success":true}"#),
            MutationResponse::Partial(json!({"success": true}))
        );
        assert_eq!(
            classify_mutation_body(&patch, r#"{"id":"e-1","subject":"s"}"#),
            MutationResponse::Entity(json!({"id": "e-1", "subject": "s"}))
        );
        assert!(matches!(
            classify_mutation_body(&patch, r#"{"id":"e-2"}"#),
            MutationResponse::Partial(_)
        ));

        let create = MutationRequest::create(ResourceClass::Tasks, json!({"title": "t"}));
        assert!(matches!(
            classify_mutation_body(&create, r#"{"id":"t-9","title":"t"}"#),
            MutationResponse::Entity(_)
        ));
    }

    proptest! {
        #[test]
        fn prop_patch_body_is_entity_only_for_target(
            target in "[a-z0-9-]{1,12}",
            returned in "[a-z0-9-]{1,12}",
        ) {
            let patch = MutationRequest::patch(ResourceClass::Task, &target, json!({"done": true}));
            let body = json!({"id": returned, "done": true}).to_string();
            match classify_mutation_body(&patch, &body) {
                MutationResponse::Entity(value) => {
                    prop_assert_eq!(&target, &returned);
                    prop_assert_eq!(value["id"].as_str(), Some(returned.as_str()));
                }
                MutationResponse::Partial(_) => prop_assert_ne!(&target, &returned),
                MutationResponse::Acknowledged => prop_assert!(false, "object body acknowledged"),
            }
        }

        #[test]
        fn prop_non_object_body_is_acknowledged(
            target in "[a-z0-9-]{1,12}",
            number in any::<i64>(),
            text in "[a-z ]{0,16}",
        ) {
            let delete = MutationRequest::delete(ResourceClass::Task, &target);
            for body in [
                number.to_string(),
                json!(text).to_string(),
                json!([target.clone(), number]).to_string(),
                "null".to_string(),
            ] {
                prop_assert_eq!(classify_mutation_body(&delete, &body), MutationResponse::Acknowledged);
            }
        }
    }
}
