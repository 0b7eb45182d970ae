//! Error types for the ePO DXL client

use thiserror::Error;

use crate::fabric::FabricError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving or invoking ePO commands
#[derive(Debug, Error)]
pub enum Error {
    /// Service registry query failed or returned an unreadable body
    #[error("service registry query failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// No ePO service of either variant is registered
    #[error("No ePO DXL services are registered with the DXL fabric")]
    NoService,

    /// More than one ePO server is registered and none was named
    #[error(
        "Multiple ePO DXL services are registered with the DXL fabric ({}). A specific ePO unique identifier must be specified.",
        .0.join(", ")
    )]
    AmbiguousService(Vec<String>),

    /// The explicitly named ePO server is not registered
    #[error("No ePO DXL services are registered with the DXL fabric for id: {0}")]
    NotFound(String),

    /// Unrecognized argument value (e.g. output format)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport failure while sending a command request
    #[error(transparent)]
    Transport(#[from] FabricError),

    /// Response payload could not be decoded as requested
    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// Request payload could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Underlying cause of a failed service registry query
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The registry request itself failed
    #[error(transparent)]
    Fabric(#[from] FabricError),

    /// The registry answered with a body that is not valid JSON
    #[error("malformed registry response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_lists_every_candidate() {
        let err = Error::AmbiguousService(vec!["epoA".to_string(), "epoB".to_string()]);
        assert_eq!(
            err.to_string(),
            "Multiple ePO DXL services are registered with the DXL fabric (epoA, epoB). \
             A specific ePO unique identifier must be specified."
        );
    }

    #[test]
    fn not_found_names_the_id() {
        let err = Error::NotFound("epoX".to_string());
        assert_eq!(
            err.to_string(),
            "No ePO DXL services are registered with the DXL fabric for id: epoX"
        );
    }

    #[test]
    fn transport_error_is_passed_through() {
        let err = Error::from(FabricError::Disconnected);
        assert_eq!(err.to_string(), FabricError::Disconnected.to_string());
    }
}
