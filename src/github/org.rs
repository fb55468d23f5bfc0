//! Organization administration through the GitHub App.
//!
//! Creating a fine-grained personal access token that targets organization
//! repositories leaves a pending request in the organization. The app's
//! installation token is used to find and approve the request belonging to a
//! freshly created bot token.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::app::AppTokenClient;
use super::{api_url, authorized, error_message, next_link, segment};
use crate::config::GithubAppCredentials;
use crate::errors::GithubAppError;
use crate::manager::TokenRequestApprover;

/// Upper bound on pages of pending requests walked for one approval.
const MAX_REQUEST_PAGES: usize = 50;

/// A pending fine-grained token request, as returned by
/// `GET /orgs/{org}/personal-access-token-requests`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub id: u64,
    pub repositories_url: String,
    #[serde(default)]
    pub token_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestRepository {
    pub full_name: String,
}

#[derive(Serialize)]
struct ReviewRequest<'a> {
    action: &'a str,
}

pub struct OrgClient {
    http: Client,
    api_base: String,
    org: String,
    auxiliary_repo: String,
    app: GithubAppCredentials,
    app_tokens: AppTokenClient,
    token: OnceCell<String>,
}

impl OrgClient {
    pub fn new(
        http: Client,
        api_base: impl Into<String>,
        org: impl Into<String>,
        auxiliary_repo: impl Into<String>,
        app: GithubAppCredentials,
    ) -> Self {
        let api_base = api_base.into();
        Self {
            app_tokens: AppTokenClient::new(http.clone(), api_base.clone()),
            http,
            api_base,
            org: org.into(),
            auxiliary_repo: auxiliary_repo.into(),
            app,
            token: OnceCell::new(),
        }
    }

    /// Installation token, minted on first use and reused afterwards.
    async fn token(&self) -> Result<&str, GithubAppError> {
        let token = self
            .token
            .get_or_try_init(|| {
                self.app_tokens
                    .installation_token(self.app.id, &self.app.private_key)
            })
            .await?;
        Ok(token.as_str())
    }

    /// Approves the single pending request raised by the token `token_name`,
    /// scoped to `repo` and the auxiliary repository.
    #[instrument(skip(self), fields(org = %self.org))]
    pub async fn approve_token_request(
        &self,
        repo: &str,
        token_name: &str,
    ) -> Result<(), GithubAppError> {
        const STEP: &str = "approve token request";

        let token = self.token().await?;
        let request_id = self.find_token_request(token, repo, token_name).await?;

        let url = api_url(
            &self.api_base,
            &format!(
                "/orgs/{}/personal-access-token-requests/{}",
                segment(&self.org),
                request_id
            ),
        );
        let resp = authorized(self.http.post(url), token)
            .json(&ReviewRequest { action: "approve" })
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

        info!(request_id, repo, "approved personal access token request");
        Ok(())
    }

    async fn find_token_request(
        &self,
        token: &str,
        repo: &str,
        token_name: &str,
    ) -> Result<u64, GithubAppError> {
        let requests = self.list_token_requests(token).await?;

        let mut matches = Vec::new();
        for request in &requests {
            // Requests left pending by earlier runs cover the same repositories.
            if request.token_name.as_deref() != Some(token_name) {
                debug!(
                    request_id = request.id,
                    token_name = request.token_name.as_deref().unwrap_or(""),
                    "skipping token request for another token"
                );
                continue;
            }
            let repos = self.list_request_repositories(token, request).await?;
            if matches_request(&repos, &self.org, repo, &self.auxiliary_repo) {
                debug!(request_id = request.id, "matched token request");
                matches.push(request.id);
            }
        }

        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(GithubAppError::NoMatchingRequest {
                org: self.org.clone(),
                repo: repo.to_string(),
            }),
            many => Err(GithubAppError::AmbiguousRequest {
                org: self.org.clone(),
                repo: repo.to_string(),
                count: many.len(),
            }),
        }
    }

    /// Every pending request, following `Link: rel="next"` across pages.
    async fn list_token_requests(&self, token: &str) -> Result<Vec<TokenRequest>, GithubAppError> {
        const STEP: &str = "list token requests";
        let mut next = Some(api_url(
            &self.api_base,
            &format!(
                "/orgs/{}/personal-access-token-requests?per_page=100",
                segment(&self.org)
            ),
        ));

        let mut requests = Vec::new();
        let mut pages = 0;
        while let Some(url) = next {
            pages += 1;
            if pages > MAX_REQUEST_PAGES {
                return Err(GithubAppError::TooManyPages {
                    step: STEP,
                    limit: MAX_REQUEST_PAGES,
                });
            }
            let (page, link): (Vec<TokenRequest>, _) = self.get_json_page(STEP, &url, token).await?;
            requests.extend(page);
            next = link;
        }
        debug!(count = requests.len(), pages, "listed pending token requests");
        Ok(requests)
    }

    async fn list_request_repositories(
        &self,
        token: &str,
        request: &TokenRequest,
    ) -> Result<Vec<RequestRepository>, GithubAppError> {
        self.get_json("list token request repositories", &request.repositories_url, token)
            .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        step: &'static str,
        url: &str,
        token: &str,
    ) -> Result<T, GithubAppError> {
        let (value, _) = self.get_json_page(step, url, token).await?;
        Ok(value)
    }

    /// Decoded body plus the `rel="next"` page URL, if any.
    async fn get_json_page<T: serde::de::DeserializeOwned>(
        &self,
        step: &'static str,
        url: &str,
        token: &str,
    ) -> Result<(T, Option<String>), GithubAppError> {
        let resp = authorized(self.http.get(url), token)
            .send()
            .await
            .map_err(|e| GithubAppError::request(step, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GithubAppError::Api {
                step,
                status: status.as_u16(),
                message: error_message(resp).await,
            });
        }

        let next = next_link(resp.headers());
        let body = resp
            .text()
            .await
            .map_err(|e| GithubAppError::request(step, e))?;
        let value = serde_json::from_str(&body)
            .map_err(|source| GithubAppError::InvalidResponse { step, source })?;
        Ok((value, next))
    }
}

#[async_trait]
impl TokenRequestApprover for OrgClient {
    async fn approve(&self, repo: &str, token_name: &str) -> anyhow::Result<()> {
        Ok(self.approve_token_request(repo, token_name).await?)
    }
}

/// Bot tokens are only ever created for exactly two repositories: the target
/// repo and the auxiliary repo. Anything else belongs to someone else.
pub fn matches_request(
    repos: &[RequestRepository],
    org: &str,
    repo: &str,
    auxiliary_repo: &str,
) -> bool {
    if repos.len() != 2 {
        return false;
    }
    let target = format!("{org}/{repo}");
    let auxiliary = format!("{org}/{auxiliary_repo}");
    let has = |name: &str| repos.iter().any(|r| r.full_name == name);
    has(&target) && has(&auxiliary)
}
