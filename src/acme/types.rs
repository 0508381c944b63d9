use std::fmt;

use serde::Deserialize;
use tracing::debug;

/// Server-side lifecycle state of an authorization resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthzState {
    #[default]
    Unknown,
    Pending,
    Valid,
    Invalid,
}

impl AuthzState {
    /// Stable on-disk ordinal.
    pub(crate) fn ordinal(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Pending => 1,
            Self::Valid => 2,
            Self::Invalid => 3,
        }
    }

    pub(crate) fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Pending),
            2 => Some(Self::Valid),
            3 => Some(Self::Invalid),
            _ => None,
        }
    }

    /// Whether the server will not change this state again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

impl fmt::Display for AuthzState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(label)
    }
}

/// One server-offered challenge, decoded from the authorization snapshot.
///
/// The response URL is named `url` in newer protocol versions and `uri` in
/// older ones; the codec reads whichever is present.
#[derive(Debug, Deserialize, Clone)]
pub struct Challenge {
    #[serde(skip)]
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(alias = "uri")]
    pub url: String,
    pub token: String,
    #[serde(rename = "keyAuthorization")]
    pub key_authz: Option<String>,
}

/// Decodes the `challenges` array of an authorization snapshot, skipping
/// entries the codec cannot read.
pub(crate) fn challenges_from_resource(resource: &serde_json::Value) -> Vec<Challenge> {
    let Some(entries) = resource.get("challenges").and_then(|c| c.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .enumerate()
        .filter_map(
            |(index, entry)| match serde_json::from_value::<Challenge>(entry.clone()) {
                Ok(mut challenge) => {
                    challenge.index = index;
                    Some(challenge)
                }
                Err(err) => {
                    debug!("Skipping undecodable challenge at index {index}: {err}");
                    None
                }
            },
        )
        .collect()
}

/// RFC 7807 problem document body, as much of it as the core reads.
#[derive(Debug, Deserialize)]
pub(crate) struct ProblemDocument {
    #[serde(rename = "type")]
    pub(crate) problem_type: Option<String>,
    pub(crate) detail: Option<String>,
}
