use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AcmeError>;

const PREFIX_IETF: &str = "urn:ietf:params:acme:error:";
const PREFIX_URN: &str = "urn:acme:error:";

/// Coarse failure category attached to every error the core produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed server response or unusable protocol state.
    Invalid,
    NotFound,
    AccessDenied,
    /// Transient rejection (e.g. a stale nonce); safe to retry as-is.
    Retry,
    /// The server wants the user to act before the request is retried.
    TryAgain,
    BadArgument,
    NotImplemented,
    General,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Invalid => "invalid",
            Self::NotFound => "not found",
            Self::AccessDenied => "access denied",
            Self::Retry => "retry",
            Self::TryAgain => "try again",
            Self::BadArgument => "bad argument",
            Self::NotImplemented => "not implemented",
            Self::General => "general",
        };
        f.write_str(label)
    }
}

/// A classified RFC 7807 problem document plus the request it came from.
#[derive(Debug, Clone)]
pub struct Problem {
    pub kind: ErrorKind,
    pub problem_type: Option<String>,
    pub detail: Option<String>,
    pub status: u16,
    pub url: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server problem ({}) at {}: {} - {}",
            self.status,
            self.url,
            self.problem_type.as_deref().unwrap_or("unknown type"),
            self.detail.as_deref().unwrap_or("no detail"),
        )
    }
}

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Protocol(Problem),

    #[error("{message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("blob store failure at {}: {source}", .path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate generation failed: {0}")]
    CertGeneration(#[from] rcgen::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl AcmeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(problem) => problem.kind,
            Self::Rejected { kind, .. } => *kind,
            Self::Transport(_)
            | Self::Store { .. }
            | Self::CertGeneration(_)
            | Self::Json(_) => ErrorKind::General,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Rejected {
            kind: ErrorKind::Invalid,
            message: message.into(),
        }
    }

    pub(crate) fn not_implemented(message: impl Into<String>) -> Self {
        Self::Rejected {
            kind: ErrorKind::NotImplemented,
            message: message.into(),
        }
    }

    pub(crate) fn general(message: impl Into<String>) -> Self {
        Self::Rejected {
            kind: ErrorKind::General,
            message: message.into(),
        }
    }

    /// Maps a bare non-2xx HTTP status (no problem document) to an error.
    pub(crate) fn for_status(status: u16, url: &str) -> Self {
        let kind = match status {
            400 => ErrorKind::Invalid,
            403 => ErrorKind::AccessDenied,
            404 => ErrorKind::NotFound,
            _ => ErrorKind::General,
        };
        Self::Rejected {
            kind,
            message: format!("unexpected HTTP status {status} from {url}"),
        }
    }
}

/// Classifies an ACME problem-document `type` string into an [`ErrorKind`].
///
/// Recognized URN prefixes are stripped and the remainder is compared
/// case-insensitively against the fixed table; unknown types classify as
/// [`ErrorKind::General`].
#[must_use]
pub fn problem_kind(problem_type: &str) -> ErrorKind {
    let lowered = problem_type.to_ascii_lowercase();
    let bare = lowered
        .strip_prefix(PREFIX_IETF)
        .or_else(|| lowered.strip_prefix(PREFIX_URN))
        .unwrap_or(&lowered);

    match bare {
        "badcsr" | "badsignaturealgorithm" | "malformed" | "badrevocationreason" => {
            ErrorKind::Invalid
        }
        "badnonce" => ErrorKind::Retry,
        "invalidcontact" | "unsupportedcontact" | "ratelimited" | "rejectedidentifier"
        | "unsupportedidentifier" => ErrorKind::BadArgument,
        "unauthorized" => ErrorKind::AccessDenied,
        "useractionrequired" => ErrorKind::TryAgain,
        "serverinternal" | "caa" | "dns" | "connection" | "tls" | "incorrectresponse" => {
            ErrorKind::General
        }
        _ => ErrorKind::General,
    }
}
