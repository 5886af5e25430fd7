// Error taxonomy for portal access
use thiserror::Error;

/// Substrings that mark an error as authentication related, whatever its origin.
pub const AUTH_ERROR_SIGNATURES: [&str; 5] = [
    "not authenticated",
    "authentication failed",
    "session expired",
    "re-authentication failed",
    "text/html",
];

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Re-authentication failed")]
    ReauthFailed,

    #[error("API error: {status}")]
    ApiError { status: u16 },

    #[error("Invalid POD identifier: {0}")]
    InvalidPodIdentifier(String),

    #[error("POD not found for stable ID: {0}")]
    PodNotFound(String),

    #[error("Chart data validation failed for {}: {detail}", fields.join(", "))]
    ChartDataInvalid { fields: Vec<String>, detail: String },

    #[error("No points of delivery found")]
    NoPodsFound,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

pub type PortalResult<T> = Result<T, PortalError>;

impl PortalError {
    /// Whether this failure means the account needs re-authorization rather than a later retry.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::NotAuthenticated | Self::AuthenticationFailed(_) | Self::ReauthFailed => true,
            other => message_has_auth_signature(&other.to_string()),
        }
    }
}

pub fn message_has_auth_signature(message: &str) -> bool {
    let lowered = message.to_lowercase();
    AUTH_ERROR_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
}
