//! Snap store client.
//!
//! Issues scoped store credentials in two steps:
//! 1. POST a token request to the store, which answers with a root macaroon
//!    carrying a third-party caveat addressed to the login service
//! 2. POST that caveat's id with the account login to the login service, which
//!    answers with the discharge macaroon
//!
//! Both macaroons are then wrapped into the `u1-macaroon` envelope that
//! snapcraft accepts as `SNAPCRAFT_STORE_CREDENTIALS`.

pub mod macaroon;
pub mod types;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::LoginCredentials;
use crate::errors::StoreError;
use crate::manager::StoreTokenIssuer;

use macaroon::Macaroon;
use types::{
    permissions_for, DischargeRequest, Package, TokenRequest, UbuntuOneMacaroons,
    UbuntuOneToken, TOKEN_TTL_SECS, U1_TOKEN_TYPE,
};

/// Store path answering with the root macaroon.
pub const TOKENS_PATH: &str = "/dev/api/acl/";
/// Login service path exchanging a caveat id for a discharge macaroon.
pub const DISCHARGE_PATH: &str = "/api/v2/tokens/discharge";

const ROOT_STEP: &str = "root macaroon";
const DISCHARGE_STEP: &str = "discharge macaroon";

pub struct StoreClient {
    http: Client,
    store_url: String,
    auth_url: String,
    credentials: LoginCredentials,
}

impl StoreClient {
    pub fn new(
        store_url: impl Into<String>,
        auth_url: impl Into<String>,
        credentials: LoginCredentials,
        timeout: Duration,
    ) -> Self {
        Self {
            http: crate::http::new_client(timeout),
            store_url: store_url.into(),
            auth_url: auth_url.into(),
            credentials,
        }
    }

    /// Generates a one-year token for `snap` on `<track>/<channel>` with the
    /// default permissions of that channel. Unknown channels are rejected
    /// before any request is made.
    #[instrument(skip(self))]
    pub async fn generate_token(
        &self,
        snap: &str,
        track: &str,
        channel: &str,
    ) -> Result<String, StoreError> {
        let permissions = permissions_for(channel)
            .ok_or_else(|| StoreError::InvalidChannel(channel.to_string()))?;

        let request = TokenRequest {
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            description: format!("tokenator-{snap}-{track}"),
            ttl: TOKEN_TTL_SECS,
            packages: vec![Package::snap(snap)],
            channels: vec![format!("{track}/{channel}")],
        };

        let root = self.root_macaroon(&request).await?;
        let discharge = self.discharge_macaroon(&root).await?;

        debug!(snap, track, channel, "store macaroons acquired");
        encode_token(&root, &discharge)
    }

    async fn root_macaroon(&self, request: &TokenRequest) -> Result<Macaroon, StoreError> {
        let url = join(&self.store_url, TOKENS_PATH);
        let body = self.post_json(ROOT_STEP, &url, request).await?;
        macaroon_field(ROOT_STEP, &body, "macaroon")
    }

    async fn discharge_macaroon(&self, root: &Macaroon) -> Result<Macaroon, StoreError> {
        let location = self.auth_location()?;
        let caveat = root
            .third_party_caveat(&location)
            .ok_or_else(|| StoreError::NoDischargeCaveat(location.clone()))?;
        let caveat_id = caveat.id_str().map_err(|source| StoreError::Macaroon {
            step: DISCHARGE_STEP,
            source,
        })?;

        let request = DischargeRequest {
            email: &self.credentials.login,
            password: &self.credentials.password,
            caveat_id,
        };

        let url = join(&self.auth_url, DISCHARGE_PATH);
        let body = self.post_json(DISCHARGE_STEP, &url, &request).await?;
        macaroon_field(DISCHARGE_STEP, &body, "discharge_macaroon")
    }

    /// Caveat location of the login service: its host, plus the port when non-default.
    fn auth_location(&self) -> Result<String, StoreError> {
        let url = url::Url::parse(&self.auth_url)
            .map_err(|_| StoreError::InvalidAuthUrl(self.auth_url.clone()))?;
        let host = url
            .host_str()
            .ok_or_else(|| StoreError::InvalidAuthUrl(self.auth_url.clone()))?;
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        step: &'static str,
        url: &str,
        body: &T,
    ) -> Result<Value, StoreError> {
        let resp = self
            .http
            .post(url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::request(step, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                step,
                status: status.as_u16(),
                body,
            });
        }

        resp.json().await.map_err(|e| StoreError::request(step, e))
    }
}

#[async_trait]
impl StoreTokenIssuer for StoreClient {
    async fn issue(&self, snap: &str, track: &str, channel: &str) -> anyhow::Result<String> {
        Ok(self.generate_token(snap, track, channel).await?)
    }
}

/// Builds the CI credential: base64(json({"t": "u1-macaroon", "v": {"r", "d"}})).
pub fn encode_token(root: &Macaroon, discharge: &Macaroon) -> Result<String, StoreError> {
    let encode = |m: &Macaroon| {
        m.to_base64().map_err(|source| StoreError::Macaroon {
            step: "encode token",
            source,
        })
    };

    let token = UbuntuOneToken {
        token_type: U1_TOKEN_TYPE.to_string(),
        macaroons: UbuntuOneMacaroons {
            root: encode(root)?,
            discharge: encode(discharge)?,
        },
    };

    Ok(STANDARD.encode(serde_json::to_vec(&token)?))
}

fn macaroon_field(step: &'static str, body: &Value, field: &'static str) -> Result<Macaroon, StoreError> {
    let encoded = body
        .get(field)
        .and_then(Value::as_str)
        .ok_or(StoreError::MissingField { step, field })?;
    Macaroon::from_base64(encoded).map_err(|source| StoreError::Macaroon { step, source })
}

fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::macaroon::Caveat;
    use super::*;
    use wiremock::matchers::{any, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> LoginCredentials {
        LoginCredentials {
            login: "store@example.com".into(),
            password: "hunter2".into(),
        }
    }

    fn client(store: &MockServer, auth: &MockServer) -> StoreClient {
        StoreClient::new(
            store.uri(),
            auth.uri(),
            credentials(),
            Duration::from_secs(5),
        )
    }

    fn auth_location(auth: &MockServer) -> String {
        auth.uri().trim_start_matches("http://").to_string()
    }

    fn root_macaroon(discharge_location: &str) -> Macaroon {
        Macaroon::new(
            "dashboard.snapcraft.io",
            "root-identifier",
            vec![
                Caveat::first_party("dashboard.snapcraft.io|expires|2030-01-01"),
                Caveat::third_party("cid-for-login", b"vid".to_vec(), discharge_location),
            ],
            [1u8; 32],
        )
    }

    fn discharge() -> Macaroon {
        Macaroon::new("login.ubuntu.com", "cid-for-login", vec![], [2u8; 32])
    }

    #[tokio::test]
    async fn test_unknown_channel_fails_before_any_request() {
        let store = MockServer::start().await;
        let auth = MockServer::start().await;
        for server in [&store, &auth] {
            Mock::given(any())
                .respond_with(ResponseTemplate::new(200))
                .expect(0)
                .mount(server)
                .await;
        }

        for channel in ["edge", "beta", "", "candidate/"] {
            let err = client(&store, &auth)
                .generate_token("sample-app", "latest", channel)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidChannel(_)), "{channel}: {err}");
        }
    }

    #[tokio::test]
    async fn test_generate_token_discharges_root_caveat() {
        let store = MockServer::start().await;
        let auth = MockServer::start().await;
        let root = root_macaroon(&auth_location(&auth));

        Mock::given(method("POST"))
            .and(path(TOKENS_PATH))
            .and(body_json(serde_json::json!({
                "permissions": ["package_access", "package_release"],
                "description": "tokenator-sample-app-latest",
                "ttl": TOKEN_TTL_SECS,
                "packages": [{"name": "sample-app", "type": "snap"}],
                "channels": ["latest/stable"],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"macaroon": root.to_base64().unwrap()})),
            )
            .expect(1)
            .mount(&store)
            .await;

        Mock::given(method("POST"))
            .and(path(DISCHARGE_PATH))
            .and(body_json(serde_json::json!({
                "email": "store@example.com",
                "password": "hunter2",
                "caveat_id": "cid-for-login",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"discharge_macaroon": discharge().to_base64().unwrap()}),
            ))
            .expect(1)
            .mount(&auth)
            .await;

        let token = client(&store, &auth)
            .generate_token("sample-app", "latest", "stable")
            .await
            .unwrap();

        let json: Value = serde_json::from_slice(&STANDARD.decode(token).unwrap()).unwrap();
        assert_eq!(json["t"], "u1-macaroon");
        let inner = json["v"].as_object().unwrap();
        assert_eq!(inner.len(), 2);
        let r = Macaroon::from_base64(inner["r"].as_str().unwrap()).unwrap();
        let d = Macaroon::from_base64(inner["d"].as_str().unwrap()).unwrap();
        assert_eq!(r, root);
        assert_eq!(d, discharge());
    }

    #[tokio::test]
    async fn test_root_without_matching_caveat() {
        let store = MockServer::start().await;
        let auth = MockServer::start().await;
        let root = root_macaroon("somewhere-else.example.com");

        Mock::given(method("POST"))
            .and(path(TOKENS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"macaroon": root.to_base64().unwrap()})),
            )
            .mount(&store)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&auth)
            .await;

        let err = client(&store, &auth)
            .generate_token("sample-app", "latest", "candidate")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoDischargeCaveat(loc) if loc == auth_location(&auth)));
    }

    #[tokio::test]
    async fn test_missing_macaroon_field() {
        let store = MockServer::start().await;
        let auth = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKENS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&store)
            .await;

        let err = client(&store, &auth)
            .generate_token("sample-app", "latest", "candidate")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::MissingField {
                step: ROOT_STEP,
                field: "macaroon"
            }
        ));
    }

    #[tokio::test]
    async fn test_discharge_rejected() {
        let store = MockServer::start().await;
        let auth = MockServer::start().await;
        let root = root_macaroon(&auth_location(&auth));

        Mock::given(method("POST"))
            .and(path(TOKENS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"macaroon": root.to_base64().unwrap()})),
            )
            .mount(&store)
            .await;
        Mock::given(method("POST"))
            .and(path(DISCHARGE_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"code":"INVALID_CREDENTIALS"}"#),
            )
            .mount(&auth)
            .await;

        let err = client(&store, &auth)
            .generate_token("sample-app", "latest", "candidate")
            .await
            .unwrap_err();
        match err {
            StoreError::Status { step, status, body } => {
                assert_eq!(step, DISCHARGE_STEP);
                assert_eq!(status, 401);
                assert!(body.contains("INVALID_CREDENTIALS"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_auth_location_includes_non_default_port() {
        let client = StoreClient::new(
            "https://dashboard.snapcraft.io",
            "https://login.ubuntu.com",
            credentials(),
            Duration::from_secs(5),
        );
        assert_eq!(client.auth_location().unwrap(), "login.ubuntu.com");

        let client = StoreClient::new(
            "http://localhost",
            "http://127.0.0.1:8080/",
            credentials(),
            Duration::from_secs(5),
        );
        assert_eq!(client.auth_location().unwrap(), "127.0.0.1:8080");
    }
}
