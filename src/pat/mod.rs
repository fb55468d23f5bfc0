//! Fine-grained personal access tokens, managed through GitHub's web UI.
//!
//! GitHub offers no API for creating fine-grained tokens, so this client logs
//! into the bot account like a browser would, keeps the session cookies, and
//! drives the settings forms. The markup-specific parts live in [`ui`].

pub mod ui;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::LoginCredentials;
use crate::errors::PatError;
use crate::manager::PersonalTokenProvider;

use ui::{FormFields, GithubSettingsUi, ListedToken, NewTokenForm, SettingsUi};

const PROBE_STEP: &str = "session probe";
const LOGIN_STEP: &str = "login";
const LIST_STEP: &str = "list tokens";
const FORM_STEP: &str = "token form";
const SUGGEST_STEP: &str = "repository suggestions";
const CREATE_STEP: &str = "create token";
const DELETE_STEP: &str = "delete token";

/// A personal access token on the bot account.
#[derive(Clone, PartialEq, Eq)]
pub struct PersonalToken {
    pub id: String,
    pub name: String,
    /// Secret value, only known in the response that created the token.
    pub token: Option<String>,
    /// Per-token authorization value for the deletion form.
    pub delete_token: String,
}

impl fmt::Debug for PersonalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonalToken")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl From<ListedToken> for PersonalToken {
    fn from(listed: ListedToken) -> Self {
        Self {
            id: listed.id,
            name: listed.name,
            token: None,
            delete_token: listed.delete_token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// Web session for one GitHub account. Owns its cookie jar; share it by
/// reference, never by cloning.
pub struct PatClient<U = GithubSettingsUi> {
    http: Client,
    base_url: String,
    credentials: LoginCredentials,
    ui: U,
    state: Mutex<SessionState>,
}

impl PatClient<GithubSettingsUi> {
    pub fn new(base_url: impl Into<String>, credentials: LoginCredentials, timeout: Duration) -> Self {
        Self::with_ui(base_url, credentials, timeout, GithubSettingsUi::default())
    }
}

impl<U: SettingsUi> PatClient<U> {
    pub fn with_ui(
        base_url: impl Into<String>,
        credentials: LoginCredentials,
        timeout: Duration,
        ui: U,
    ) -> Self {
        let http = crate::http::builder(timeout)
            .cookie_store(true)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into(),
            credentials,
            ui,
            state: Mutex::new(SessionState::Anonymous),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Lists tokens whose name contains `filter`. Pages after the first are
    /// fetched concurrently; any failed page fails the whole listing.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: &str) -> Result<Vec<PersonalToken>, PatError> {
        self.ensure_session().await?;

        let first = self
            .get_settings_page(LIST_STEP, &self.ui.tokens_path(1))
            .await?;
        let pages = self.ui.page_count(&first)?;
        let mut listed = self.ui.listed_tokens(&first);

        let rest = futures::future::try_join_all((2..=pages).map(|page| async move {
            let html = self
                .get_settings_page(LIST_STEP, &self.ui.tokens_path(page))
                .await?;
            Ok::<_, PatError>(self.ui.listed_tokens(&html))
        }))
        .await?;
        listed.extend(rest.into_iter().flatten());

        let tokens: Vec<PersonalToken> = listed
            .into_iter()
            .filter(|t| t.name.contains(filter))
            .map(PersonalToken::from)
            .collect();
        debug!(pages, matched = tokens.len(), "listed personal access tokens");
        Ok(tokens)
    }

    /// Creates a token named `name` with contents write access to `repos`
    /// (`owner/repo` each), owned by `resource_owner`, expiring in a year.
    ///
    /// Every repository is resolved before the creation form is submitted, so
    /// an unknown repository never leaves a half-scoped token behind.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        name: &str,
        repos: &[String],
        resource_owner: &str,
    ) -> Result<PersonalToken, PatError> {
        self.ensure_session().await?;

        let form_page = self
            .get_settings_page(FORM_STEP, self.ui.new_token_path())
            .await?;
        let authenticity_token = self.ui.new_token_authenticity(&form_page)?;

        let mut repository_ids = Vec::with_capacity(repos.len());
        for repo in repos {
            repository_ids.push(self.repository_id(repo).await?);
        }

        let expires_on = expiry_date(Utc::now())?;
        let fields = self.ui.create_form(&NewTokenForm {
            authenticity_token: &authenticity_token,
            name,
            expires_on: &expires_on,
            resource_owner,
            repository_ids: &repository_ids,
        });

        let html = self
            .post_form(CREATE_STEP, self.ui.create_token_path(), &fields)
            .await?;
        let created = self.ui.created_token(&html)?;

        debug!(token_name = name, token_id = %created.id, "created personal access token");
        Ok(PersonalToken {
            id: created.id,
            name: name.to_string(),
            token: Some(created.token),
            delete_token: created.delete_token,
        })
    }

    /// Deletes `token`. The session is re-checked first; an expired session is
    /// an error rather than a silent re-login.
    #[instrument(skip(self, token), fields(token_name = %token.name, token_id = %token.id))]
    pub async fn delete(&self, token: &PersonalToken) -> Result<(), PatError> {
        self.verify_session().await?;

        let fields = self.ui.delete_form(&token.delete_token);
        let resp = self
            .http
            .post(self.url(&self.ui.token_path(&token.id)))
            .form(&fields)
            .send()
            .await
            .map_err(|e| PatError::request(DELETE_STEP, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PatError::Status {
                step: DELETE_STEP,
                status: status.as_u16(),
            });
        }

        debug!("deleted personal access token");
        Ok(())
    }

    // ── Session ───────────────────────────────────────────────

    async fn ensure_session(&self) -> Result<(), PatError> {
        let mut state = self.state.lock().await;
        if *state == SessionState::Authenticated {
            return Ok(());
        }

        *state = SessionState::Authenticating;
        let result = self.login().await;
        *state = if result.is_ok() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        };
        result
    }

    async fn verify_session(&self) -> Result<(), PatError> {
        let mut state = self.state.lock().await;
        if *state != SessionState::Authenticated {
            drop(state);
            return self.ensure_session().await;
        }

        if self.probe_requires_login().await? {
            *state = SessionState::Anonymous;
            return Err(PatError::SessionExpired);
        }
        Ok(())
    }

    async fn probe_requires_login(&self) -> Result<bool, PatError> {
        let resp = self
            .http
            .head(self.url(self.ui.session_probe_path()))
            .send()
            .await
            .map_err(|e| PatError::request(PROBE_STEP, e))?;
        Ok(self.ui.is_login_page(resp.url()))
    }

    async fn login(&self) -> Result<(), PatError> {
        if !self.probe_requires_login().await? {
            debug!("existing GitHub session is still valid");
            return Ok(());
        }

        let login_page = self.get_page(LOGIN_STEP, self.ui.login_path()).await?;
        let fields = self.ui.login_form(
            &login_page,
            &self.credentials.login,
            &self.credentials.password,
        );

        let html = self
            .post_form(LOGIN_STEP, self.ui.session_path(), &fields)
            .await?;
        if let Some(message) = self.ui.login_error(&html) {
            return Err(PatError::Authentication(message));
        }
        // Verification and two-factor pages carry no error banner.
        if self.probe_requires_login().await? {
            return Err(PatError::Authentication(
                "session is still anonymous after signing in".to_string(),
            ));
        }

        info!(login = %self.credentials.login, "logged in to GitHub");
        Ok(())
    }

    // ── Requests ──────────────────────────────────────────────

    async fn repository_id(&self, repo: &str) -> Result<String, PatError> {
        let (owner, name) = split_repository(repo)?;

        let resp = self
            .http
            .get(self.url(&self.ui.suggestions_path(owner, name)))
            .header("Accept", self.ui.suggestions_accept())
            .send()
            .await
            .map_err(|e| PatError::request(SUGGEST_STEP, e))?;
        let html = self.read_settings_page(SUGGEST_STEP, resp).await?;

        self.ui
            .repository_id(&html, name)
            .ok_or_else(|| PatError::RepositoryNotResolved(repo.to_string()))
    }

    async fn get_page(&self, step: &'static str, path: &str) -> Result<String, PatError> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| PatError::request(step, e))?;
        read_page(step, resp).await
    }

    /// Fetches a page that needs a logged-in session.
    async fn get_settings_page(&self, step: &'static str, path: &str) -> Result<String, PatError> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| PatError::request(step, e))?;
        self.read_settings_page(step, resp).await
    }

    /// Being redirected to the login page means the session cookies are no
    /// longer accepted; the session drops back to anonymous.
    async fn read_settings_page(
        &self,
        step: &'static str,
        resp: reqwest::Response,
    ) -> Result<String, PatError> {
        if self.ui.is_login_page(resp.url()) {
            *self.state.lock().await = SessionState::Anonymous;
            return Err(PatError::SessionExpired);
        }
        read_page(step, resp).await
    }

    /// Form responses are parsed whatever their status: failures are rendered
    /// as banners in the returned page.
    async fn post_form(
        &self,
        step: &'static str,
        path: &str,
        fields: &FormFields,
    ) -> Result<String, PatError> {
        let resp = self
            .http
            .post(self.url(path))
            .form(fields)
            .send()
            .await
            .map_err(|e| PatError::request(step, e))?;
        resp.text().await.map_err(|e| PatError::request(step, e))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

async fn read_page(step: &'static str, resp: reqwest::Response) -> Result<String, PatError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(PatError::Status {
            step,
            status: status.as_u16(),
        });
    }
    resp.text().await.map_err(|e| PatError::request(step, e))
}

fn split_repository(repo: &str) -> Result<(&str, &str), PatError> {
    let invalid = || PatError::InvalidRepository(repo.to_string());
    let (owner, name) = repo.split_once('/').ok_or_else(invalid)?;
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if valid(owner) && valid(name) {
        Ok((owner, name))
    } else {
        Err(invalid())
    }
}

/// Expiry date one calendar year after `now`, as `YYYY-MM-DD`.
pub fn expiry_date(now: DateTime<Utc>) -> Result<String, PatError> {
    now.checked_add_months(Months::new(12))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or(PatError::Expiry)
}

#[async_trait]
impl<U: SettingsUi> PersonalTokenProvider for PatClient<U> {
    async fn list_tokens(&self, filter: &str) -> anyhow::Result<Vec<PersonalToken>> {
        Ok(self.list(filter).await?)
    }

    async fn create_token(
        &self,
        name: &str,
        repos: &[String],
        resource_owner: &str,
    ) -> anyhow::Result<PersonalToken> {
        Ok(self.create(name, repos, resource_owner).await?)
    }

    async fn delete_token(&self, token: &PersonalToken) -> anyhow::Result<()> {
        Ok(self.delete(token).await?)
    }
}
