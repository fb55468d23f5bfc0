//! Run identifiers and the naming scheme for bot tokens.
//!
//! Every bot token is named `token8r-<run>-<repo>-<track>`, where `<run>` is
//! four hex characters unique to one invocation. A later run recognises the
//! tokens it superseded by parsing that name back into its fields.

use std::fmt;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::pat::PersonalToken;

/// Prefix shared by every token this tool creates.
pub const TOKEN_PREFIX: &str = "token8r";

const RUN_ID_LEN: usize = 4;

/// Identifier of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// Derived from the current unix time.
    pub fn generate() -> Self {
        Self::from_timestamp(Utc::now().timestamp())
    }

    /// First four hex characters of the SHA-256 of the decimal timestamp.
    pub fn from_timestamp(unix_secs: i64) -> Self {
        let digest = Sha256::digest(unix_secs.to_string().as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(RUN_ID_LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The structured parts of a bot token name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenName<'a> {
    pub run: &'a str,
    /// `<repo>-<track>`
    pub scope: &'a str,
}

impl<'a> TokenName<'a> {
    /// Parses `token8r-<4 hex>-<scope>`. Anything else is not ours.
    pub fn parse(name: &'a str) -> Option<Self> {
        let rest = name.strip_prefix(TOKEN_PREFIX)?.strip_prefix('-')?;
        let (run, scope) = rest.split_once('-')?;
        let is_run = run.len() == RUN_ID_LEN
            && run.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !is_run || scope.is_empty() {
            return None;
        }
        Some(Self { run, scope })
    }
}

/// Name of the bot token created for `repo`/`track` during run `run`.
pub fn token_name(run: &RunId, repo: &str, track: &str) -> String {
    format!("{TOKEN_PREFIX}-{run}-{}", scope(repo, track))
}

fn scope(repo: &str, track: &str) -> String {
    format!("{repo}-{track}")
}

/// True when `name` is a bot token for exactly `repo`/`track` created by a
/// run other than `current`.
pub fn is_superseded(name: &str, current: &RunId, repo: &str, track: &str) -> bool {
    match TokenName::parse(name) {
        Some(parsed) => parsed.run != current.as_str() && parsed.scope == scope(repo, track),
        None => false,
    }
}

/// The tokens from `existing` that the current run's token for `repo`/`track`
/// replaces.
pub fn superseded<'a>(
    existing: &'a [PersonalToken],
    current: &RunId,
    repo: &str,
    track: &str,
) -> Vec<&'a PersonalToken> {
    existing
        .iter()
        .filter(|t| is_superseded(&t.name, current, repo, track))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(id: &str, name: &str) -> PersonalToken {
        PersonalToken {
            id: id.into(),
            name: name.into(),
            token: None,
            delete_token: format!("del-{id}"),
        }
    }

    #[test]
    fn test_run_id_is_stable_for_a_timestamp() {
        let a = RunId::from_timestamp(1_700_000_000);
        let b = RunId::from_timestamp(1_700_000_000);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 4);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        // sha256("0") = 5feceb66...
        assert_eq!(RunId::from_timestamp(0).as_str(), "5fec");
    }

    #[test]
    fn test_token_name_orders_fields() {
        let run = RunId::from_timestamp(0);
        let name = token_name(&run, "sample-app", "latest");
        assert_eq!(name, "token8r-5fec-sample-app-latest");

        let parsed = TokenName::parse(&name).unwrap();
        assert_eq!(parsed.run, "5fec");
        assert_eq!(parsed.scope, "sample-app-latest");
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(TokenName::parse("laptop"), None);
        assert_eq!(TokenName::parse("token8r-zzzz-app-latest"), None);
        assert_eq!(TokenName::parse("token8r-abc-app-latest"), None);
        assert_eq!(TokenName::parse("token8r-abcd-"), None);
        assert_eq!(TokenName::parse("token8rx-abcd-app-latest"), None);
    }

    #[test]
    fn test_superseded_matches_scope_exactly() {
        let current = RunId::from_timestamp(0);
        let existing = vec![
            token("1", "token8r-1111-app-latest"),
            token("2", "token8r-5fec-app-latest"),
            token("3", "token8r-2222-app2-latest"),
            token("4", "token8r-3333-myapp-latest"),
            token("5", "token8r-4444-app-2.0"),
            token("6", "token8r-5555-app-latest"),
            token("7", "personal-app-latest"),
        ];

        let ids: Vec<_> = superseded(&existing, &current, "app", "latest")
            .into_iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "6"]);
    }
}
