// StartRequest Model
// Operator start-stream form and the command it resolves to

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Source label sent for manually entered inputs
pub const CUSTOM_SOURCE_NAME: &str = "Custom RTMP";

/// Destinations that require a stream key when none is configured
pub const DEFAULT_CREDENTIAL_DESTINATIONS: &[&str] = &["youtube", "facebook", "instagram"];

/// Input picked by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputChoice {
    /// Predefined entry from the source catalog
    Catalog { source_name: String, locator: String },
    /// Manually entered network URL
    Custom { locator: String },
}

/// Destination picked by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationChoice {
    /// Known platform identifier, e.g. "youtube"
    Platform(String),
    /// Manually entered publish URL
    Custom { url: String },
}

/// Start-stream form as filled by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub name: String,
    pub input: InputChoice,
    pub destination: DestinationChoice,
    pub stream_key: String,
}

/// Missing required start-stream fields
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("stream name is required")]
    MissingName,

    #[error("input source is required")]
    MissingInput,

    #[error("destination is required")]
    MissingDestination,

    #[error("stream key is required for {0}")]
    MissingStreamKey(String),
}

/// Destination identifiers whose backend needs a stream key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPolicy {
    destinations: BTreeSet<String>,
}

impl CredentialPolicy {
    pub fn new<I, S>(destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn requires_key(&self, destination: &str) -> bool {
        self.destinations.contains(destination)
    }
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_DESTINATIONS.iter().copied())
    }
}

/// Wire payload of the `start_stream` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCommand {
    pub stream_name: String,
    pub input: String,
    pub destination: String,
    pub stream_key: String,
    pub source_name: String,
}

impl StartRequest {
    /// Resolve the form into a command, failing fast on the first missing field
    pub fn validate(&self, policy: &CredentialPolicy) -> Result<StartCommand, ValidationError> {
        let (input, source_name) = match &self.input {
            InputChoice::Catalog { source_name, locator } => (locator.trim(), source_name.clone()),
            InputChoice::Custom { locator } => (locator.trim(), CUSTOM_SOURCE_NAME.to_string()),
        };
        let destination = match &self.destination {
            DestinationChoice::Platform(id) => id.trim(),
            DestinationChoice::Custom { url } => url.trim(),
        };
        let name = self.name.trim();

        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if input.is_empty() {
            return Err(ValidationError::MissingInput);
        }
        if destination.is_empty() {
            return Err(ValidationError::MissingDestination);
        }
        if policy.requires_key(destination) && self.stream_key.trim().is_empty() {
            return Err(ValidationError::MissingStreamKey(destination.to_string()));
        }

        Ok(StartCommand {
            stream_name: name.to_string(),
            input: input.to_string(),
            destination: destination.to_string(),
            stream_key: self.stream_key.trim().to_string(),
            source_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_request(input: &str, destination: &str) -> StartRequest {
        StartRequest {
            name: "morning-show".to_string(),
            input: InputChoice::Custom { locator: input.to_string() },
            destination: DestinationChoice::Custom { url: destination.to_string() },
            stream_key: String::new(),
        }
    }

    #[test]
    fn test_empty_custom_fields_rejected() {
        let policy = CredentialPolicy::default();
        assert_eq!(
            custom_request("", "").validate(&policy),
            Err(ValidationError::MissingInput)
        );
        assert_eq!(
            custom_request("rtmp://ingest/live/a", "").validate(&policy),
            Err(ValidationError::MissingDestination)
        );
    }

    #[test]
    fn test_custom_request_resolves() {
        let command = custom_request("rtmp://ingest/live/a", "rtmp://cdn.example.com/app")
            .validate(&CredentialPolicy::default())
            .unwrap();
        assert_eq!(
            command,
            StartCommand {
                stream_name: "morning-show".to_string(),
                input: "rtmp://ingest/live/a".to_string(),
                destination: "rtmp://cdn.example.com/app".to_string(),
                stream_key: String::new(),
                source_name: "Custom RTMP".to_string(),
            }
        );
    }

    #[test]
    fn test_credential_destinations_need_key() {
        let policy = CredentialPolicy::default();
        for platform in ["youtube", "facebook", "instagram"] {
            let request = StartRequest {
                name: "show".to_string(),
                input: InputChoice::Catalog {
                    source_name: "Plex 1".to_string(),
                    locator: "rtmp://ingest/live/a".to_string(),
                },
                destination: DestinationChoice::Platform(platform.to_string()),
                stream_key: "  ".to_string(),
            };
            assert_eq!(
                request.validate(&policy),
                Err(ValidationError::MissingStreamKey(platform.to_string()))
            );
        }
    }

    #[test]
    fn test_policy_is_configurable() {
        let request = StartRequest {
            name: "show".to_string(),
            input: InputChoice::Catalog {
                source_name: "Plex 1".to_string(),
                locator: "rtmp://ingest/live/a".to_string(),
            },
            destination: DestinationChoice::Platform("x".to_string()),
            stream_key: String::new(),
        };
        assert!(request.validate(&CredentialPolicy::default()).is_ok());
        assert!(request.validate(&CredentialPolicy::new(["x"])).is_err());

        let command = request.validate(&CredentialPolicy::default()).unwrap();
        assert_eq!(command.source_name, "Plex 1");
    }

    #[test]
    fn test_missing_name_rejected() {
        let mut request = custom_request("rtmp://ingest/live/a", "rtmp://cdn/app");
        request.name = " ".to_string();
        assert_eq!(
            request.validate(&CredentialPolicy::default()),
            Err(ValidationError::MissingName)
        );
    }
}
