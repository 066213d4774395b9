use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while bridging the amplifier
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A send was attempted while the device link is down
    #[error("Not connected to NEETS amp")]
    NotConnected,

    /// A response token carried a value that could not be parsed
    #[error("Malformed response token {token}")]
    MalformedResponse {
        /// The offending `KEY=VALUE` token
        token: String,
    },

    /// The device answered with an explicit error record
    #[error("Device reported an error: {record}")]
    DeviceError {
        /// The raw record as received
        record: String,
    },

    /// Socket-level failure
    #[error("Connection failed: {0}")]
    ConnectionFailure(#[from] std::io::Error),

    /// Connect attempt did not complete in time
    #[error("Connection timeout")]
    Timeout,

    /// Automatic reconnection gave up; a manual connect is required
    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted {
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// Caller submitted an out-of-range or unusable parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A subscription feed was closed by unsubscribe or shutdown
    #[error("Subscription closed")]
    Closed,

    /// Configuration could not be loaded
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
