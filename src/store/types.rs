use serde::{Deserialize, Serialize};

/// Token type tag understood by snapcraft for Ubuntu One backed credentials.
pub const U1_TOKEN_TYPE: &str = "u1-macaroon";

/// Store tokens live for one year.
pub const TOKEN_TTL_SECS: u64 = 60 * 60 * 24 * 365;

const CANDIDATE_PERMISSIONS: &[&str] = &[
    "package_access",
    "package_push",
    "package_update",
    "package_release",
];

const STABLE_PERMISSIONS: &[&str] = &["package_access", "package_release"];

/// Returns the ACLs granted to a token for `channel`, or `None` for channels
/// this tool never issues tokens for.
pub fn permissions_for(channel: &str) -> Option<&'static [&'static str]> {
    match channel {
        "candidate" => Some(CANDIDATE_PERMISSIONS),
        "stable" => Some(STABLE_PERMISSIONS),
        _ => None,
    }
}

/// A package in a Canonical store (a snap, for our purposes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Package {
    pub fn snap(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "snap".to_string(),
        }
    }
}

/// Body of the root macaroon request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub permissions: Vec<String>,
    pub description: String,
    pub ttl: u64,
    pub packages: Vec<Package>,
    pub channels: Vec<String>,
}

/// Body of the discharge request sent to the auth service.
#[derive(Serialize)]
pub(crate) struct DischargeRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub caveat_id: &'a str,
}

/// The credential handed to CI, JSON-encoded then base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UbuntuOneToken {
    #[serde(rename = "t")]
    pub token_type: String,
    #[serde(rename = "v")]
    pub macaroons: UbuntuOneMacaroons,
}

/// Both macaroons, each in unpadded URL-safe base64 of the binary form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UbuntuOneMacaroons {
    #[serde(rename = "r")]
    pub root: String,
    #[serde(rename = "d")]
    pub discharge: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_permissions() {
        assert_eq!(
            permissions_for("candidate").unwrap(),
            &["package_access", "package_push", "package_update", "package_release"]
        );
        assert_eq!(
            permissions_for("stable").unwrap(),
            &["package_access", "package_release"]
        );
        assert!(permissions_for("edge").is_none());
        assert!(permissions_for("Stable").is_none());
    }

    #[test]
    fn test_package_serializes_type_field() {
        let json = serde_json::to_value(Package::snap("sample-app")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "sample-app", "type": "snap"}));
    }

    #[test]
    fn test_token_envelope_field_names() {
        let token = UbuntuOneToken {
            token_type: U1_TOKEN_TYPE.into(),
            macaroons: UbuntuOneMacaroons {
                root: "r".into(),
                discharge: "d".into(),
            },
        };
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"t": "u1-macaroon", "v": {"r": "r", "d": "d"}})
        );
    }
}
