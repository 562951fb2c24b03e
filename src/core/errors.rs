// Domain error taxonomy - secure error handling with no information disclosure

use thiserror::Error;

/// Main error type for the shield. `KillSwitchEngaged` is deliberately not a
/// member here: the spec treats it as a normal verdict, not an error.
#[derive(Error, Debug)]
pub enum ShieldError {
    /// Rules fail to parse or validate. Fatal (process exit) at startup;
    /// surfaced as HTTP 400 when it comes from a caller-triggered `/reload`.
    #[error("config error: {0}")]
    Config(String),

    /// Missing or invalid bearer token (HTTP 401)
    #[error("unauthenticated")]
    Auth,

    /// Malformed JSON or missing required field (HTTP 400)
    #[error("bad request: {0}")]
    Request(String),

    /// Unexpected internal failure during evaluation (HTTP 500)
    #[error("decision error: {0}")]
    Decision(String),

    /// Double-respond or unknown approval id (HTTP 409 / 404)
    #[error("approval error: {0}")]
    Approval(ApprovalError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval not found")]
    NotFound,
    #[error("approval already resolved")]
    AlreadyResolved,
}

impl ShieldError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ShieldError::Config(_) => 400,
            ShieldError::Auth => 401,
            ShieldError::Request(_) => 400,
            ShieldError::Decision(_) => 500,
            ShieldError::Approval(ApprovalError::NotFound) => 404,
            ShieldError::Approval(ApprovalError::AlreadyResolved) => 409,
        }
    }

    /// Stable machine-readable error kind for the `{error, kind}` wire shape.
    pub fn kind(&self) -> &'static str {
        match self {
            ShieldError::Config(_) => "config_error",
            ShieldError::Auth => "auth_error",
            ShieldError::Request(_) => "request_error",
            ShieldError::Decision(_) => "decision_error",
            ShieldError::Approval(ApprovalError::NotFound) => "not_found",
            ShieldError::Approval(ApprovalError::AlreadyResolved) => "conflict",
        }
    }

    /// User-facing message (no sensitive information).
    pub fn user_message(&self) -> String {
        match self {
            ShieldError::Config(msg) => format!("configuration error: {msg}"),
            ShieldError::Auth => "unauthenticated".to_string(),
            ShieldError::Request(msg) => msg.clone(),
            ShieldError::Decision(_) => "internal error".to_string(),
            ShieldError::Approval(e) => e.to_string(),
        }
    }
}

/// Rule loading failures, each carrying a file:line pointer where available.
#[derive(Error, Debug)]
pub enum RuleLoadError {
    #[error("{path}:{line}: failed to parse rules YAML: {source}")]
    Parse {
        path: String,
        line: usize,
        source: serde_yaml::Error,
    },

    #[error("{path}: {message}")]
    Validation { path: String, message: String },

    #[error("{path}: pattern error: {message}")]
    Pattern { path: String, message: String },

    #[error("{path}: include error: {message}")]
    Include { path: String, message: String },

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl From<RuleLoadError> for ShieldError {
    fn from(err: RuleLoadError) -> Self {
        ShieldError::Config(err.to_string())
    }
}
