use thiserror::Error;

use crate::provider::ProviderError;

/// Banner text used when an error renders to an empty string.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to generate animation, please try again.";

/// Library error type for toon-motion operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unusable configuration, most commonly the provider credential.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An image payload could not be read or decoded.
    #[error("could not decode image: {0}")]
    Decode(String),

    /// A remote image could not be fetched.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The provider call for a single frame failed in transport.
    #[error("provider request for frame {} failed: {source}", index + 1)]
    ProviderTransport {
        index: usize,
        #[source]
        source: ProviderError,
    },

    /// The provider answered but the response carried no image part.
    #[error("model did not return an image for frame {}", index + 1)]
    NoImageReturned { index: usize },

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Writing an export artifact failed.
    #[error("export failed: {0}")]
    Export(String),
}

impl Error {
    pub fn missing_credential() -> Self {
        Self::Configuration("missing credential".to_string())
    }

    /// Text shown to the user in the session error banner.
    pub fn user_message(&self) -> String {
        let msg = self.to_string();
        if msg.trim().is_empty() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            msg
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_indices_are_reported_one_based() {
        let err = Error::NoImageReturned { index: 2 };
        assert_eq!(err.user_message(), "model did not return an image for frame 3");
    }

    #[test]
    fn empty_messages_fall_back_to_generic_text() {
        let err = Error::Export(String::new());
        assert_eq!(err.user_message(), "export failed: ");
        let err = Error::Io(std::io::Error::other(""));
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    }
}
