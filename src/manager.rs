//! Issuance orchestration.
//!
//! For every selected repository and track the manager sets, in order:
//! `SNAP_STORE_CANDIDATE`, `SNAP_STORE_STABLE`, `LP_BUILD_SECRET` and
//! `SNAPCRAFTERS_BOT_COMMIT`, then deletes the bot tokens the new one
//! supersedes. The first failure ends the run; secrets already written stay
//! written and are overwritten by the next run.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, Credentials, Track};
use crate::github::org::OrgClient;
use crate::github::repo::RepoClient;
use crate::pat::{PatClient, PersonalToken};
use crate::rotation::{self, RunId, TOKEN_PREFIX};
use crate::store::StoreClient;
use crate::vault::SecretStore;

pub const LAUNCHPAD_SECRET: &str = "LP_BUILD_SECRET";
pub const BOT_COMMIT_SECRET: &str = "SNAPCRAFTERS_BOT_COMMIT";

/// Store channels with a secret each, in the order they are set.
pub const STORE_CHANNELS: [&str; 2] = ["candidate", "stable"];

/// `SNAP_STORE_<CHANNEL>`
pub fn store_secret_name(channel: &str) -> String {
    format!("SNAP_STORE_{}", channel.to_uppercase())
}

// ── Client seams ──────────────────────────────────────────────

/// Issues store credentials for a snap channel.
/// Implementations: `store::StoreClient`.
#[async_trait]
pub trait StoreTokenIssuer: Send + Sync {
    async fn issue(&self, snap: &str, track: &str, channel: &str) -> anyhow::Result<String>;
}

/// Lists, creates and deletes the bot account's personal access tokens.
/// Implementations: `pat::PatClient`.
#[async_trait]
pub trait PersonalTokenProvider: Send + Sync {
    async fn list_tokens(&self, filter: &str) -> anyhow::Result<Vec<PersonalToken>>;

    async fn create_token(
        &self,
        name: &str,
        repos: &[String],
        resource_owner: &str,
    ) -> anyhow::Result<PersonalToken>;

    async fn delete_token(&self, token: &PersonalToken) -> anyhow::Result<()>;
}

/// Approves the pending organization request raised by the bot token
/// `token_name`. Implementations: `github::org::OrgClient`.
#[async_trait]
pub trait TokenRequestApprover: Send + Sync {
    async fn approve(&self, repo: &str, token_name: &str) -> anyhow::Result<()>;
}

/// Every upstream the manager talks to.
#[derive(Clone)]
pub struct Clients {
    pub store: Arc<dyn StoreTokenIssuer>,
    pub tokens: Arc<dyn PersonalTokenProvider>,
    pub approver: Arc<dyn TokenRequestApprover>,
    pub secrets: Arc<dyn SecretStore>,
}

impl Clients {
    /// Production clients for the configured endpoints.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Self {
        let timeout = config.http_timeout();
        let http = crate::http::new_client(timeout);
        let endpoints = &config.endpoints;

        Self {
            store: Arc::new(StoreClient::new(
                &endpoints.store,
                &endpoints.store_auth,
                credentials.snap_store.clone(),
                timeout,
            )),
            tokens: Arc::new(PatClient::new(
                &endpoints.github_web,
                credentials.bot.clone(),
                timeout,
            )),
            approver: Arc::new(OrgClient::new(
                http.clone(),
                &endpoints.github_api,
                &config.org,
                &config.auxiliary_repo,
                credentials.github_app.clone(),
            )),
            secrets: Arc::new(RepoClient::new(
                http,
                &endpoints.github_api,
                &config.org,
                &credentials.github_token,
            )),
        }
    }
}

// ── Manager ───────────────────────────────────────────────────

pub struct Manager {
    run_id: RunId,
    config: Config,
    launchpad_secret: String,
    clients: Clients,
}

impl Manager {
    pub fn new(config: Config, credentials: Credentials) -> Self {
        let clients = Clients::from_config(&config, &credentials);
        Self::with_clients(config, credentials.launchpad, RunId::generate(), clients)
    }

    pub fn with_clients(
        config: Config,
        launchpad_secret: String,
        run_id: RunId,
        clients: Clients,
    ) -> Self {
        Self {
            run_id,
            config,
            launchpad_secret,
            clients,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Processes every configured repository, or only those named in `filter`
    /// when it is non-empty.
    #[instrument(skip(self), fields(run_id = %self.run_id, org = %self.config.org))]
    pub async fn process(&self, filter: &[String]) -> anyhow::Result<()> {
        // Tokens from earlier runs, some of which this run supersedes.
        let existing = self
            .clients
            .tokens
            .list_tokens(TOKEN_PREFIX)
            .await
            .context("failed to list personal access tokens")?;
        debug!(count = existing.len(), "found existing bot tokens");

        let repos = self.config.filter_repos(filter);
        if repos.is_empty() {
            warn!(?filter, "no configured repositories selected");
        }

        for mut repo in repos {
            repo.ensure_tracks();
            for track in &repo.tracks {
                self.process_track(&repo.name, track, &existing)
                    .await
                    .with_context(|| {
                        format!(
                            "failed to process {}/{} (track {})",
                            self.config.org, repo.name, track.name
                        )
                    })?;
            }
        }

        info!("all repositories processed");
        Ok(())
    }

    async fn process_track(
        &self,
        repo: &str,
        track: &Track,
        existing: &[PersonalToken],
    ) -> anyhow::Result<()> {
        for channel in STORE_CHANNELS {
            self.set_store_secret(repo, track, channel)
                .await
                .with_context(|| format!("failed to set {}/{} store secret", track.name, channel))?;
        }

        self.set_launchpad_secret(repo, track)
            .await
            .context("failed to set Launchpad secret")?;

        self.set_bot_commit_secret(repo, track)
            .await
            .context("failed to set bot commit secret")?;

        self.cleanup(repo, track, existing)
            .await
            .context("failed to clean up superseded personal access tokens")
    }

    async fn set_store_secret(&self, repo: &str, track: &Track, channel: &str) -> anyhow::Result<()> {
        let token = self.clients.store.issue(repo, &track.name, channel).await?;
        let name = store_secret_name(channel);
        self.put_secret(repo, track, &name, &token).await
    }

    async fn set_launchpad_secret(&self, repo: &str, track: &Track) -> anyhow::Result<()> {
        self.put_secret(repo, track, LAUNCHPAD_SECRET, &self.launchpad_secret)
            .await
    }

    /// Creates a bot token scoped to the repository and the auxiliary
    /// repository, approves its organization request and stores it.
    async fn set_bot_commit_secret(&self, repo: &str, track: &Track) -> anyhow::Result<()> {
        let org = &self.config.org;
        let name = rotation::token_name(&self.run_id, repo, &track.name);
        let scope = vec![
            format!("{org}/{repo}"),
            format!("{org}/{}", self.config.auxiliary_repo),
        ];

        let token = self
            .clients
            .tokens
            .create_token(&name, &scope, org)
            .await
            .context("failed to create personal access token")?;

        self.clients
            .approver
            .approve(repo, &token.name)
            .await
            .context("failed to approve personal access token request")?;

        let value = token
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("personal access token '{}' has no value", token.name))?;
        self.put_secret(repo, track, BOT_COMMIT_SECRET, value).await
    }

    /// Deletes the tokens in `existing` that this run's token for
    /// `repo`/`track` replaces.
    async fn cleanup(
        &self,
        repo: &str,
        track: &Track,
        existing: &[PersonalToken],
    ) -> anyhow::Result<()> {
        for token in rotation::superseded(existing, &self.run_id, repo, &track.name) {
            warn!(token_name = %token.name, token_id = %token.id, "deleting superseded personal access token");
            self.clients
                .tokens
                .delete_token(token)
                .await
                .with_context(|| format!("failed to delete personal access token '{}'", token.name))?;
        }
        Ok(())
    }

    async fn put_secret(
        &self,
        repo: &str,
        track: &Track,
        name: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        self.clients
            .secrets
            .put_secret(repo, track, name, value)
            .await
            .with_context(|| format!("failed to set {name} secret"))?;

        info!(
            repo = %format!("{}/{}", self.config.org, repo),
            secret_name = name,
            environment = %track.environment,
            "secret set"
        );
        Ok(())
    }
}
