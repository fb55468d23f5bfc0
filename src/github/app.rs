//! GitHub App authentication.
//!
//! An app authenticates as itself with a short-lived RS256 JWT, then exchanges
//! that JWT for an installation access token scoped to the organization the
//! app is installed on.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{api_url, authorized, error_message};
use crate::errors::GithubAppError;

const JWT_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// JWT claims for GitHub App authentication.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration (seconds since epoch).
    pub exp: u64,
    /// Issuer (GitHub App ID).
    pub iss: String,
}

/// Generate a JWT for GitHub App authentication, valid for 10 minutes.
#[instrument(skip(private_key_pem))]
pub fn generate_app_jwt(app_id: u64, private_key_pem: &str) -> Result<String, GithubAppError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| GithubAppError::Jwt(format!("System time error: {e}")))?;

    let claims = Claims {
        iat: now.as_secs(),
        exp: (now + JWT_LIFETIME).as_secs(),
        iss: app_id.to_string(),
    };

    let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| GithubAppError::Jwt(format!("Invalid RSA private key: {e}")))?;

    let token = encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| GithubAppError::Jwt(format!("Failed to encode JWT: {e}")))?;

    debug!(app_id, exp = claims.exp, "generated GitHub App JWT");
    Ok(token)
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
    access_tokens_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    token: Option<String>,
}

/// Mints installation access tokens for a GitHub App.
#[derive(Clone)]
pub struct AppTokenClient {
    http: Client,
    api_base: String,
}

impl AppTokenClient {
    pub fn new(http: Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }

    /// Returns an access token for the app's first installation.
    #[instrument(skip(self, private_key_pem))]
    pub async fn installation_token(
        &self,
        app_id: u64,
        private_key_pem: &str,
    ) -> Result<String, GithubAppError> {
        let jwt = generate_app_jwt(app_id, private_key_pem)?;
        let url = self.access_tokens_url(&jwt).await?;
        self.fetch_token(&url, &jwt).await
    }

    async fn access_tokens_url(&self, jwt: &str) -> Result<String, GithubAppError> {
        const STEP: &str = "list app installations";

        let resp = authorized(
            self.http.get(api_url(&self.api_base, "/app/installations")),
            jwt,
        )
        .send()
        .await
        .map_err(|e| GithubAppError::request(STEP, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GithubAppError::Api {
                step: STEP,
                status: status.as_u16(),
                message: error_message(resp).await,
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| GithubAppError::request(STEP, e))?;
        let installations: Vec<Installation> = serde_json::from_str(&body)
            .map_err(|source| GithubAppError::InvalidResponse { step: STEP, source })?;

        let installation = installations
            .into_iter()
            .next()
            .ok_or(GithubAppError::NoInstallation)?;
        debug!(installation_id = installation.id, "using app installation");

        installation
            .access_tokens_url
            .ok_or(GithubAppError::MissingAccessTokensUrl)
    }

    async fn fetch_token(&self, url: &str, jwt: &str) -> Result<String, GithubAppError> {
        const STEP: &str = "create installation token";

        let resp = authorized(self.http.post(url), jwt)
            .send()
            .await
            .map_err(|e| GithubAppError::request(STEP, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GithubAppError::Api {
                step: STEP,
                status: status.as_u16(),
                message: error_message(resp).await,
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| GithubAppError::request(STEP, e))?;
        let token: AccessToken = serde_json::from_str(&body)
            .map_err(|source| GithubAppError::InvalidResponse { step: STEP, source })?;

        token.token.ok_or(GithubAppError::MissingToken)
    }
}
