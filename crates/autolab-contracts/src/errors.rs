use thiserror::Error;

/// Failure categories surfaced by session operations.
///
/// Every variant is local to the action that raised it; the session itself
/// stays usable and the caller can always retry.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No API key was supplied and none was found in the environment.
    #[error("API key is not configured")]
    MissingApiKey,

    /// The action was rejected before any network call was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The generative service call failed in transport or returned an
    /// error payload. Session state is unchanged.
    #[error("generation failed: {0}")]
    Service(String),

    /// The service answered but no content part decoded as an image.
    /// Session state is unchanged.
    #[error("no image returned")]
    NoImages,
}

impl SessionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
