//! Translation layer between the personal access token client and GitHub's
//! settings pages.
//!
//! Every path, form field name and CSS selector the client depends on lives
//! here. When GitHub changes its markup, this is the only file that should
//! need to change.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::errors::PatError;

/// A token entry as rendered on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedToken {
    pub id: String,
    pub name: String,
    pub delete_token: String,
}

/// What the creation response reveals about a new token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedToken {
    pub id: String,
    pub token: String,
    pub delete_token: String,
}

/// Fields of a token creation form, before UI encoding.
#[derive(Debug, Clone)]
pub struct NewTokenForm<'a> {
    pub authenticity_token: &'a str,
    pub name: &'a str,
    /// `YYYY-MM-DD`
    pub expires_on: &'a str,
    pub resource_owner: &'a str,
    pub repository_ids: &'a [String],
}

pub type FormFields = Vec<(String, String)>;

/// Listing pages beyond this are treated as a broken page, not fetched.
pub const MAX_TOKEN_PAGES: u32 = 100;

/// The session-driven form protocol spoken by a personal access token UI.
///
/// Methods are synchronous and take raw HTML so parsed documents never live
/// across an await point.
pub trait SettingsUi: Send + Sync {
    /// Page probed to find out whether the session is logged in.
    fn session_probe_path(&self) -> &str;
    /// True when the probe ended up on the login page.
    fn is_login_page(&self, url: &Url) -> bool;
    fn login_path(&self) -> &str;
    fn session_path(&self) -> &str;
    fn tokens_path(&self, page: u32) -> String;
    fn new_token_path(&self) -> &str;
    fn create_token_path(&self) -> &str;
    fn token_path(&self, id: &str) -> String;
    fn suggestions_path(&self, owner: &str, repo: &str) -> String;
    /// Accept header for the repository suggestions fragment.
    fn suggestions_accept(&self) -> &str;

    fn login_form(&self, login_page: &str, login: &str, password: &str) -> FormFields;
    fn login_error(&self, html: &str) -> Option<String>;
    /// Number of listing pages, at most [`MAX_TOKEN_PAGES`].
    fn page_count(&self, html: &str) -> Result<u32, PatError>;
    fn listed_tokens(&self, html: &str) -> Vec<ListedToken>;
    fn new_token_authenticity(&self, html: &str) -> Result<String, PatError>;
    fn repository_id(&self, html: &str, repo: &str) -> Option<String>;
    fn create_form(&self, form: &NewTokenForm<'_>) -> FormFields;
    fn created_token(&self, html: &str) -> Result<CreatedToken, PatError>;
    fn delete_form(&self, delete_token: &str) -> FormFields;
}

struct Selectors {
    hidden_inputs: Selector,
    login_error: Selector,
    pagination: Selector,
    access_token: Selector,
    link: Selector,
    authenticity: Selector,
    new_token_authenticity: Selector,
    new_token_value: Selector,
    create_error: Selector,
}

impl Selectors {
    fn new() -> Self {
        let parse = |css: &str| Selector::parse(css).expect("static selector is valid CSS");
        Self {
            hidden_inputs: parse("form input[type='hidden']"),
            login_error: parse(".flash-full.flash-error"),
            pagination: parse(".pagination > .current"),
            access_token: parse(".access-token"),
            link: parse("a"),
            authenticity: parse("input[name=authenticity_token]"),
            new_token_authenticity: parse(
                "#new_user_programmatic_access input[name=authenticity_token]",
            ),
            new_token_value: parse("#new-access-token"),
            create_error: parse(".error,.flash-error.flash-full"),
        }
    }
}

/// github.com's fine-grained token settings pages.
pub struct GithubSettingsUi {
    selectors: Selectors,
}

impl Default for GithubSettingsUi {
    fn default() -> Self {
        Self {
            selectors: Selectors::new(),
        }
    }
}

fn attr(el: ElementRef<'_>, name: &str) -> Option<String> {
    el.value().attr(name).map(str::to_string)
}

fn text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

/// Banner text normalized for error messages.
fn banner(parts: impl Iterator<Item = String>) -> String {
    parts
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl SettingsUi for GithubSettingsUi {
    fn session_probe_path(&self) -> &str {
        "/settings/"
    }

    fn is_login_page(&self, url: &Url) -> bool {
        url.path() == "/login"
    }

    fn login_path(&self) -> &str {
        "/login"
    }

    fn session_path(&self) -> &str {
        "/session"
    }

    fn tokens_path(&self, page: u32) -> String {
        format!("/settings/tokens?page={page}&type=beta")
    }

    fn new_token_path(&self) -> &str {
        "/settings/personal-access-tokens/new"
    }

    fn create_token_path(&self) -> &str {
        "/settings/personal-access-tokens"
    }

    fn token_path(&self, id: &str) -> String {
        format!("/settings/personal-access-tokens/{}", urlencoding::encode(id))
    }

    fn suggestions_path(&self, owner: &str, repo: &str) -> String {
        format!(
            "/settings/personal-access-tokens/suggestions?target_name={}&q={}",
            urlencoding::encode(owner),
            urlencoding::encode(repo)
        )
    }

    fn suggestions_accept(&self) -> &str {
        "text/fragment+html"
    }

    fn login_form(&self, login_page: &str, login: &str, password: &str) -> FormFields {
        let doc = Html::parse_document(login_page);
        let mut fields: FormFields = doc
            .select(&self.selectors.hidden_inputs)
            .filter_map(|input| {
                let name = attr(input, "name")?;
                Some((name, attr(input, "value").unwrap_or_default()))
            })
            .filter(|(name, _)| name != "login" && name != "password")
            .collect();
        fields.push(("login".to_string(), login.to_string()));
        fields.push(("password".to_string(), password.to_string()));
        fields
    }

    fn login_error(&self, html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        let el = doc.select(&self.selectors.login_error).next()?;
        Some(banner(std::iter::once(text(el))))
    }

    fn page_count(&self, html: &str) -> Result<u32, PatError> {
        let doc = Html::parse_document(html);
        let count: u64 = doc
            .select(&self.selectors.pagination)
            .next()
            .and_then(|el| el.value().attr("data-total-pages"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1);
        match u32::try_from(count.max(1)) {
            Ok(count) if count <= MAX_TOKEN_PAGES => Ok(count),
            _ => Err(PatError::PageCount(count)),
        }
    }

    fn listed_tokens(&self, html: &str) -> Vec<ListedToken> {
        let doc = Html::parse_document(html);
        let tokens: Vec<ListedToken> = doc
            .select(&self.selectors.access_token)
            .map(|entry| ListedToken {
                id: attr(entry, "data-id").unwrap_or_default(),
                name: entry
                    .select(&self.selectors.link)
                    .map(text)
                    .collect::<String>()
                    .trim()
                    .to_string(),
                delete_token: entry
                    .select(&self.selectors.authenticity)
                    .next()
                    .and_then(|input| attr(input, "value"))
                    .unwrap_or_default(),
            })
            .collect();
        tokens
    }

    fn new_token_authenticity(&self, html: &str) -> Result<String, PatError> {
        let doc = Html::parse_document(html);
        let value = doc
            .select(&self.selectors.new_token_authenticity)
            .next()
            .and_then(|input| attr(input, "value"));
        value.ok_or(PatError::MissingElement(
            "authenticity token on personal access token form",
        ))
    }

    fn repository_id(&self, html: &str, repo: &str) -> Option<String> {
        let selector = Selector::parse(&format!("[aria-label='Remove {repo}']")).ok()?;
        let doc = Html::parse_fragment(html);
        let id = doc.select(&selector).next().and_then(|el| attr(el, "value"));
        id
    }

    fn create_form(&self, form: &NewTokenForm<'_>) -> FormFields {
        let mut fields: FormFields = [
            ("authenticity_token", form.authenticity_token),
            ("user_programmatic_access[name]", form.name),
            ("user_programmatic_access[default_expires_at]", "custom"),
            ("user_programmatic_access[custom_expires_at]", form.expires_on),
            ("user_programmatic_access[description]", ""),
            ("target_name", form.resource_owner),
            ("install_target", "selected"),
            ("integration[default_permissions][contents]", "write"),
            ("integration[default_permissions][metadata]", "read"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        fields.extend(
            form.repository_ids
                .iter()
                .map(|id| ("repository_ids[]".to_string(), id.clone())),
        );
        fields
    }

    fn created_token(&self, html: &str) -> Result<CreatedToken, PatError> {
        let doc = Html::parse_document(html);
        let entry = doc.select(&self.selectors.access_token).next();

        let token = entry
            .and_then(|e| e.select(&self.selectors.new_token_value).next())
            .and_then(|input| attr(input, "value"));
        let (Some(entry), Some(token)) = (entry, token) else {
            let message = banner(doc.select(&self.selectors.create_error).map(text));
            return Err(PatError::Creation(message));
        };

        let id = attr(entry, "data-id")
            .ok_or(PatError::MissingElement("id of new personal access token"))?;
        let delete_token = entry
            .select(&self.selectors.authenticity)
            .next()
            .and_then(|input| attr(input, "value"))
            .ok_or(PatError::MissingElement(
                "delete token for new personal access token",
            ))?;

        Ok(CreatedToken {
            id,
            token,
            delete_token,
        })
    }

    fn delete_form(&self, delete_token: &str) -> FormFields {
        vec![
            ("_method".to_string(), "delete".to_string()),
            ("authenticity_token".to_string(), delete_token.to_string()),
        ]
    }
}
