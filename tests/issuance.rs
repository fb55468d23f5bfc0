//! Orchestration tests for `Manager::process`, run against in-memory fakes of
//! every upstream so the order and content of calls can be asserted exactly.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;

use tokenator::config::{Config, Track};
use tokenator::manager::{
    Clients, Manager, PersonalTokenProvider, StoreTokenIssuer, TokenRequestApprover,
};
use tokenator::pat::PersonalToken;
use tokenator::rotation::RunId;
use tokenator::vault::SecretStore;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    List(String),
    Issue {
        snap: String,
        track: String,
        channel: String,
    },
    Put {
        repo: String,
        environment: String,
        name: String,
        value: String,
    },
    Create {
        name: String,
        repos: Vec<String>,
        owner: String,
    },
    Approve {
        repo: String,
        token_name: String,
    },
    Delete(String),
}

type Log = Arc<Mutex<Vec<Call>>>;

#[derive(Default)]
struct Failures {
    store_channel: Option<&'static str>,
    approve: bool,
}

struct Fake {
    log: Log,
    existing: Vec<PersonalToken>,
    failures: Failures,
}

impl Fake {
    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StoreTokenIssuer for Fake {
    async fn issue(&self, snap: &str, track: &str, channel: &str) -> anyhow::Result<String> {
        self.record(Call::Issue {
            snap: snap.into(),
            track: track.into(),
            channel: channel.into(),
        });
        if self.failures.store_channel == Some(channel) {
            bail!("store returned 503");
        }
        Ok(format!("store-{snap}-{track}-{channel}"))
    }
}

#[async_trait]
impl PersonalTokenProvider for Fake {
    async fn list_tokens(&self, filter: &str) -> anyhow::Result<Vec<PersonalToken>> {
        self.record(Call::List(filter.into()));
        Ok(self
            .existing
            .iter()
            .filter(|t| t.name.contains(filter))
            .cloned()
            .collect())
    }

    async fn create_token(
        &self,
        name: &str,
        repos: &[String],
        resource_owner: &str,
    ) -> anyhow::Result<PersonalToken> {
        self.record(Call::Create {
            name: name.into(),
            repos: repos.to_vec(),
            owner: resource_owner.into(),
        });
        Ok(PersonalToken {
            id: format!("new-{name}"),
            name: name.into(),
            token: Some(format!("github_pat_{name}")),
            delete_token: "del-new".into(),
        })
    }

    async fn delete_token(&self, token: &PersonalToken) -> anyhow::Result<()> {
        self.record(Call::Delete(token.id.clone()));
        Ok(())
    }
}

#[async_trait]
impl TokenRequestApprover for Fake {
    async fn approve(&self, repo: &str, token_name: &str) -> anyhow::Result<()> {
        self.record(Call::Approve {
            repo: repo.into(),
            token_name: token_name.into(),
        });
        if self.failures.approve {
            bail!("could not find personal access token request");
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for Fake {
    async fn put_secret(
        &self,
        repo: &str,
        track: &Track,
        name: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        self.record(Call::Put {
            repo: repo.into(),
            environment: track.environment.clone(),
            name: name.into(),
            value: value.into(),
        });
        Ok(())
    }
}

fn token(id: &str, name: &str) -> PersonalToken {
    PersonalToken {
        id: id.into(),
        name: name.into(),
        token: None,
        delete_token: format!("del-{id}"),
    }
}

fn config(yaml: &str) -> Config {
    Config::from_yaml(yaml, Path::new("tokenator.yaml")).unwrap()
}

/// Run id `5fec` (derived from timestamp 0).
fn manager(config: Config, existing: Vec<PersonalToken>, failures: Failures) -> (Manager, Log) {
    let log = Log::default();
    let fake = Arc::new(Fake {
        log: log.clone(),
        existing,
        failures,
    });
    let clients = Clients {
        store: fake.clone(),
        tokens: fake.clone(),
        approver: fake.clone(),
        secrets: fake,
    };
    let manager = Manager::with_clients(
        config,
        "lp-secret".into(),
        RunId::from_timestamp(0),
        clients,
    );
    (manager, log)
}

fn put(repo: &str, environment: &str, name: &str, value: &str) -> Call {
    Call::Put {
        repo: repo.into(),
        environment: environment.into(),
        name: name.into(),
        value: value.into(),
    }
}

fn issue(snap: &str, track: &str, channel: &str) -> Call {
    Call::Issue {
        snap: snap.into(),
        track: track.into(),
        channel: channel.into(),
    }
}

mod process_tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_app_end_to_end() {
        let existing = vec![
            token("1", "token8r-1111-sample-app-latest"),
            token("2", "token8r-2222-sample-app2-latest"),
            token("3", "token8r-3333-other-app-latest"),
            token("4", "token8r-5fec-sample-app-latest"),
        ];
        let (manager, log) = manager(
            config("org: snapcrafters\nrepos:\n  - name: sample-app\n"),
            existing,
            Failures::default(),
        );

        manager.process(&[]).await.unwrap();

        let env = "Candidate Branch";
        let expected = vec![
            Call::List("token8r".into()),
            issue("sample-app", "latest", "candidate"),
            put(
                "sample-app",
                env,
                "SNAP_STORE_CANDIDATE",
                "store-sample-app-latest-candidate",
            ),
            issue("sample-app", "latest", "stable"),
            put(
                "sample-app",
                env,
                "SNAP_STORE_STABLE",
                "store-sample-app-latest-stable",
            ),
            put("sample-app", env, "LP_BUILD_SECRET", "lp-secret"),
            Call::Create {
                name: "token8r-5fec-sample-app-latest".into(),
                repos: vec![
                    "snapcrafters/sample-app".into(),
                    "snapcrafters/ci-screenshots".into(),
                ],
                owner: "snapcrafters".into(),
            },
            Call::Approve {
                repo: "sample-app".into(),
                token_name: "token8r-5fec-sample-app-latest".into(),
            },
            put(
                "sample-app",
                env,
                "SNAPCRAFTERS_BOT_COMMIT",
                "github_pat_token8r-5fec-sample-app-latest",
            ),
            Call::Delete("1".into()),
        ];
        assert_eq!(*log.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_every_configured_track_is_processed_in_order() {
        let yaml = r#"
org: snapcrafters
auxiliary_repo: artifacts
repos:
  - name: lib
    tracks:
      - name: "1.0"
        branch: candidate-1.0
        environment: "Candidate 1.0"
      - name: "2.0"
        branch: candidate-2.0
        environment: "Candidate 2.0"
"#;
        let existing = vec![
            token("10", "token8r-aaaa-lib-1.0"),
            token("20", "token8r-bbbb-lib-2.0"),
        ];
        let (manager, log) = manager(config(yaml), existing, Failures::default());

        manager.process(&[]).await.unwrap();

        let log = log.lock().unwrap();
        let creates: Vec<_> = log
            .iter()
            .filter_map(|c| match c {
                Call::Create { name, repos, .. } => Some((name.as_str(), repos.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            creates,
            vec![
                (
                    "token8r-5fec-lib-1.0",
                    vec!["snapcrafters/lib".to_string(), "snapcrafters/artifacts".into()]
                ),
                (
                    "token8r-5fec-lib-2.0",
                    vec!["snapcrafters/lib".to_string(), "snapcrafters/artifacts".into()]
                ),
            ]
        );

        // each superseded token goes right after its own track's bot secret
        let position = |call: &Call| log.iter().position(|c| c == call).unwrap();
        let bot_1 = position(&put(
            "lib",
            "Candidate 1.0",
            "SNAPCRAFTERS_BOT_COMMIT",
            "github_pat_token8r-5fec-lib-1.0",
        ));
        let bot_2 = position(&put(
            "lib",
            "Candidate 2.0",
            "SNAPCRAFTERS_BOT_COMMIT",
            "github_pat_token8r-5fec-lib-2.0",
        ));
        assert_eq!(position(&Call::Delete("10".into())), bot_1 + 1);
        assert_eq!(position(&Call::Delete("20".into())), bot_2 + 1);
    }

    #[tokio::test]
    async fn test_filter_selects_named_repositories_only() {
        let yaml = "org: snapcrafters\nrepos:\n  - name: sample-app\n  - name: other-app\n";
        let (manager, log) = manager(config(yaml), vec![], Failures::default());

        manager
            .process(&["other-app".to_string(), "missing".to_string()])
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log[0], Call::List("token8r".into()));
        assert!(log.iter().all(|c| match c {
            Call::Issue { snap, .. } => snap == "other-app",
            Call::Put { repo, .. } => repo == "other-app",
            Call::Approve { repo, .. } => repo == "other-app",
            _ => true,
        }));
        assert_eq!(
            log.iter().filter(|c| matches!(c, Call::Put { .. })).count(),
            4
        );
    }

    #[tokio::test]
    async fn test_filter_matching_nothing_only_lists() {
        let (manager, log) = manager(
            config("org: snapcrafters\nrepos:\n  - name: sample-app\n"),
            vec![token("1", "token8r-1111-sample-app-latest")],
            Failures::default(),
        );

        manager.process(&["missing".to_string()]).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![Call::List("token8r".into())]);
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_store_failure_aborts_the_run() {
        let yaml = "org: snapcrafters\nrepos:\n  - name: sample-app\n  - name: other-app\n";
        let (manager, log) = manager(
            config(yaml),
            vec![token("1", "token8r-1111-sample-app-latest")],
            Failures {
                store_channel: Some("stable"),
                ..Default::default()
            },
        );

        let err = manager.process(&[]).await.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("snapcrafters/sample-app"), "{message}");
        assert!(message.contains("failed to set latest/stable store secret"), "{message}");
        assert!(message.contains("store returned 503"), "{message}");

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Call::List("token8r".into()),
                issue("sample-app", "latest", "candidate"),
                put(
                    "sample-app",
                    "Candidate Branch",
                    "SNAP_STORE_CANDIDATE",
                    "store-sample-app-latest-candidate",
                ),
                issue("sample-app", "latest", "stable"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unapproved_token_is_not_installed_and_nothing_is_deleted() {
        let (manager, log) = manager(
            config("org: snapcrafters\nrepos:\n  - name: sample-app\n"),
            vec![token("1", "token8r-1111-sample-app-latest")],
            Failures {
                approve: true,
                ..Default::default()
            },
        );

        let err = manager.process(&[]).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to approve personal access token request"));

        let log = log.lock().unwrap();
        assert!(matches!(
            log.last(),
            Some(Call::Approve { repo, token_name })
                if repo == "sample-app" && token_name == "token8r-5fec-sample-app-latest"
        ));
        assert!(!log
            .iter()
            .any(|c| matches!(c, Call::Put { name, .. } if name == "SNAPCRAFTERS_BOT_COMMIT")));
        assert!(!log.iter().any(|c| matches!(c, Call::Delete(_))));
    }
}
