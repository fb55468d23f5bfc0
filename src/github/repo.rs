//! Repository deployment environments and their encrypted secrets.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{api_url, authorized, error_message, segment};
use crate::config::Track;
use crate::errors::RepoError;
use crate::vault::sealed::seal_base64;
use crate::vault::SecretStore;

#[derive(Debug, Deserialize)]
struct Repository {
    id: u64,
}

/// Public key used to seal secrets for one environment.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentPublicKey {
    pub key_id: String,
    pub key: String,
}

#[derive(Serialize)]
struct EncryptedSecret<'a> {
    encrypted_value: &'a str,
    key_id: &'a str,
}

#[derive(Serialize)]
struct EnvironmentSettings {
    can_admins_bypass: bool,
    prevent_self_review: bool,
    deployment_branch_policy: DeploymentBranchPolicy,
}

#[derive(Serialize)]
struct DeploymentBranchPolicy {
    protected_branches: bool,
    custom_branch_policies: bool,
}

#[derive(Serialize)]
struct BranchPolicy<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

/// Writes secrets into repository environments using an organization token.
pub struct RepoClient {
    http: Client,
    api_base: String,
    org: String,
    token: String,
}

impl RepoClient {
    pub fn new(
        http: Client,
        api_base: impl Into<String>,
        org: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            org: org.into(),
            token: token.into(),
        }
    }

    /// Encrypts `value` and stores it as secret `name` in the environment for
    /// `track`, creating the environment first if it does not exist. An existing
    /// secret with the same name is overwritten.
    #[instrument(skip(self, track, value), fields(org = %self.org, environment = %track.environment))]
    pub async fn set_environment_secret(
        &self,
        repo: &str,
        track: &Track,
        name: &str,
        value: &str,
    ) -> Result<(), RepoError> {
        const STEP: &str = "set environment secret";

        let repo_id = self.repository_id(repo).await?;
        self.ensure_environment(repo, track).await?;

        let public_key = self.public_key(repo_id, &track.environment).await?;
        let encrypted_value = seal_base64(&public_key.key, value)?;

        let url = api_url(
            &self.api_base,
            &format!(
                "/repositories/{}/environments/{}/secrets/{}",
                repo_id,
                segment(&track.environment),
                segment(name)
            ),
        );
        let resp = authorized(self.http.put(url), &self.token)
            .json(&EncryptedSecret {
                encrypted_value: &encrypted_value,
                key_id: &public_key.key_id,
            })
            .send()
            .await
            .map_err(|e| RepoError::request(STEP, e))?;
        self.check(STEP, resp).await?;

        info!(repo, secret = name, "set environment secret");
        Ok(())
    }

    async fn repository_id(&self, repo: &str) -> Result<u64, RepoError> {
        const STEP: &str = "get repository";

        let url = api_url(
            &self.api_base,
            &format!("/repos/{}/{}", segment(&self.org), segment(repo)),
        );
        let resp = authorized(self.http.get(url), &self.token)
            .send()
            .await
            .map_err(|e| RepoError::request(STEP, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RepoError::RepositoryNotFound {
                org: self.org.clone(),
                repo: repo.to_string(),
            });
        }
        let resp = self.check(STEP, resp).await?;
        let repository: Repository = resp
            .json()
            .await
            .map_err(|e| RepoError::request(STEP, e))?;
        Ok(repository.id)
    }

    /// Creates the environment for `track` unless it already exists.
    pub async fn ensure_environment(&self, repo: &str, track: &Track) -> Result<(), RepoError> {
        const STEP: &str = "get environment";

        let resp = authorized(self.http.get(self.environment_url(repo, &track.environment)), &self.token)
            .send()
            .await
            .map_err(|e| RepoError::request(STEP, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(repo, environment = %track.environment, "environment missing, creating it");
            return self.create_environment(repo, track).await;
        }
        self.check(STEP, resp).await?;
        Ok(())
    }

    /// Creates an environment restricted to deployments from `track.branch`.
    pub async fn create_environment(&self, repo: &str, track: &Track) -> Result<(), RepoError> {
        const CREATE: &str = "create environment";
        const POLICY: &str = "create deployment branch policy";

        let env_url = self.environment_url(repo, &track.environment);
        let resp = authorized(self.http.put(&env_url), &self.token)
            .json(&EnvironmentSettings {
                can_admins_bypass: true,
                prevent_self_review: true,
                deployment_branch_policy: DeploymentBranchPolicy {
                    protected_branches: false,
                    custom_branch_policies: true,
                },
            })
            .send()
            .await
            .map_err(|e| RepoError::request(CREATE, e))?;
        self.check(CREATE, resp).await?;

        let resp = authorized(
            self.http
                .post(format!("{env_url}/deployment-branch-policies")),
            &self.token,
        )
        .json(&BranchPolicy {
            name: &track.branch,
            kind: "branch",
        })
        .send()
        .await
        .map_err(|e| RepoError::request(POLICY, e))?;
        self.check(POLICY, resp).await?;

        info!(repo, environment = %track.environment, branch = %track.branch, "created environment");
        Ok(())
    }

    async fn public_key(
        &self,
        repo_id: u64,
        environment: &str,
    ) -> Result<EnvironmentPublicKey, RepoError> {
        const STEP: &str = "get environment public key";

        let url = api_url(
            &self.api_base,
            &format!(
                "/repositories/{}/environments/{}/secrets/public-key",
                repo_id,
                segment(environment)
            ),
        );
        let resp = authorized(self.http.get(url), &self.token)
            .send()
            .await
            .map_err(|e| RepoError::request(STEP, e))?;
        let resp = self.check(STEP, resp).await?;
        resp.json().await.map_err(|e| RepoError::request(STEP, e))
    }

    fn environment_url(&self, repo: &str, environment: &str) -> String {
        api_url(
            &self.api_base,
            &format!(
                "/repos/{}/{}/environments/{}",
                segment(&self.org),
                segment(repo),
                segment(environment)
            ),
        )
    }

    async fn check(
        &self,
        step: &'static str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, RepoError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(RepoError::Api {
            step,
            status: status.as_u16(),
            message: error_message(resp).await,
        })
    }
}

#[async_trait]
impl SecretStore for RepoClient {
    async fn put_secret(
        &self,
        repo: &str,
        track: &Track,
        name: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        Ok(self.set_environment_secret(repo, track, name, value).await?)
    }
}
