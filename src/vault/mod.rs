pub mod sealed;

use async_trait::async_trait;

use crate::config::Track;

/// Destination for CI secrets.
/// Implementations: `github::repo::RepoClient` (GitHub Actions environment secrets).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Encrypt and store `value` as secret `name` in the environment of `track`,
    /// creating the environment first if it does not exist. Storing a name that
    /// already exists overwrites it.
    async fn put_secret(
        &self,
        repo: &str,
        track: &Track,
        name: &str,
        value: &str,
    ) -> anyhow::Result<()>;
}
