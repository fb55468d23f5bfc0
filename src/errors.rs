use std::path::PathBuf;

use thiserror::Error;

// ── Configuration ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found (searched: {searched}), see 'tokenator --help' for details")]
    NotFound { searched: String },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing tokenator config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("required credential {0} is not set")]
    MissingCredential(String),

    #[error("credential {name} is invalid: {reason}")]
    InvalidCredential { name: String, reason: String },
}

// ── Macaroon codec ────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MacaroonError {
    #[error("macaroon data truncated at offset {0}")]
    Truncated(usize),

    #[error("invalid packet header at offset {0}")]
    BadPacketHeader(usize),

    #[error("malformed packet at offset {0}")]
    MalformedPacket(usize),

    #[error("packet of {0} bytes exceeds the maximum packet size")]
    PacketTooLong(usize),

    #[error("expected field '{expected}', found '{found}'")]
    UnexpectedField { expected: &'static str, found: String },

    #[error("caveat field '{0}' appears before any caveat identifier")]
    OrphanCaveatField(String),

    #[error("signature must be 32 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("trailing data after signature at offset {0}")]
    TrailingData(usize),

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
}

// ── Snap store ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid channel specified: '{0}'")]
    InvalidChannel(String),

    #[error("invalid auth service url '{0}'")]
    InvalidAuthUrl(String),

    #[error("{step}: request failed: {source}")]
    Request {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: request timed out")]
    Timeout {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: store returned {status}: {body}")]
    Status {
        step: &'static str,
        status: u16,
        body: String,
    },

    #[error("{step}: no '{field}' found in response json")]
    MissingField {
        step: &'static str,
        field: &'static str,
    },

    #[error("{step}: failed to deserialize macaroon: {source}")]
    Macaroon {
        step: &'static str,
        #[source]
        source: MacaroonError,
    },

    #[error("root macaroon has no caveat for location '{0}'")]
    NoDischargeCaveat(String),

    #[error("failed to serialize token: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn request(step: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { step, source }
        } else {
            Self::Request { step, source }
        }
    }
}

// ── GitHub App / organization ─────────────────────────────────

#[derive(Debug, Error)]
pub enum GithubAppError {
    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("{step}: request failed: {source}")]
    Request {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: request timed out")]
    Timeout {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: GitHub API error: {status} - {message}")]
    Api {
        step: &'static str,
        status: u16,
        message: String,
    },

    #[error("{step}: invalid response from GitHub: {source}")]
    InvalidResponse {
        step: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{step}: more than {limit} pages of results")]
    TooManyPages { step: &'static str, limit: usize },

    #[error("GitHub App has no installations")]
    NoInstallation,

    #[error("no access token URL found for the app installation")]
    MissingAccessTokensUrl,

    #[error("no access token found in response json")]
    MissingToken,

    #[error("could not find personal access token request for {org}/{repo}")]
    NoMatchingRequest { org: String, repo: String },

    #[error("found {count} personal access token requests for {org}/{repo}, refusing to guess")]
    AmbiguousRequest {
        org: String,
        repo: String,
        count: usize,
    },
}

impl GithubAppError {
    pub(crate) fn request(step: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { step, source }
        } else {
            Self::Request { step, source }
        }
    }
}

// ── Personal access tokens (settings UI) ──────────────────────

#[derive(Debug, Error)]
pub enum PatError {
    #[error("failed to login to GitHub: {0}")]
    Authentication(String),

    #[error("GitHub session is no longer valid")]
    SessionExpired,

    #[error("{step}: request failed: {source}")]
    Request {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: request timed out")]
    Timeout {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: GitHub returned {status}")]
    Status { step: &'static str, status: u16 },

    #[error("failed to identify {0} on page")]
    MissingElement(&'static str),

    #[error("token listing claims {0} pages")]
    PageCount(u64),

    #[error("repository '{0}' is not of the form owner/repo")]
    InvalidRepository(String),

    #[error("failed to find repository id for {0}")]
    RepositoryNotResolved(String),

    #[error("failed to compute token expiry date")]
    Expiry,

    #[error("{0}")]
    Creation(String),
}

impl PatError {
    pub(crate) fn request(step: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { step, source }
        } else {
            Self::Request { step, source }
        }
    }
}

// ── Repository secrets ────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SealError {
    #[error("failed to decode public key: {0}")]
    KeyEncoding(#[from] base64::DecodeError),

    #[error("public key must be 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("failed to encrypt secret")]
    Encryption,
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository {org}/{repo} not found")]
    RepositoryNotFound { org: String, repo: String },

    #[error("{step}: request failed: {source}")]
    Request {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: request timed out")]
    Timeout {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: GitHub API error: {status} - {message}")]
    Api {
        step: &'static str,
        status: u16,
        message: String,
    },

    #[error("failed to encrypt secret: {0}")]
    Seal(#[from] SealError),
}

impl RepoError {
    pub(crate) fn request(step: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { step, source }
        } else {
            Self::Request { step, source }
        }
    }
}
