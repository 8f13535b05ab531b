use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the gateway mesh node
#[derive(Debug)]
pub enum GatewayError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Bad input to a store operation
    InvalidArgument(String),

    /// Identifier collision; the id generator handed out a duplicate
    AlreadyExists(String),

    /// Missing dependency or broken wiring, e.g. deriving a key without its master key
    IllegalState(String),

    /// Credential or master key absent
    NotFound(String),

    /// Signature generation or verification errors
    Auth(AuthError),

    /// Mesh RPC errors
    Mesh(MeshError),

    /// Persistence layer errors
    Storage(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),
}

/// Gateway-internal authentication errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No auth token on the request
    Missing,

    /// Token present but not `{type} {accessId}:{signature}`
    Malformed(String),

    /// Named credential unknown or marked invalid
    UnknownCredential(String),

    /// This gateway has no internal credential configured
    NoInternalCredential,

    /// Digest mismatch
    AuthFail,

    /// Digest computation failed
    Digest(String),
}

/// Mesh RPC errors
#[derive(Debug)]
pub enum MeshError {
    /// Connection, timeout or HTTP-level failure
    Network(String),

    /// Peer answered with a non-zero application code
    Remote { code: i32, msg: String },

    /// Sibling has no usable URL
    NoEndpoint(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Config(msg) => write!(f, "Configuration error: {}", msg),
            GatewayError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            GatewayError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            GatewayError::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            GatewayError::NotFound(msg) => write!(f, "Not found: {}", msg),
            GatewayError::Auth(err) => write!(f, "Auth error: {}", err),
            GatewayError::Mesh(err) => write!(f, "Mesh error: {}", err),
            GatewayError::Storage(msg) => write!(f, "Storage error: {}", msg),
            GatewayError::Io(err) => write!(f, "I/O error: {}", err),
            GatewayError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Missing => write!(f, "AUTH_MISSING"),
            AuthError::Malformed(msg) => write!(f, "AUTH_MALFORMED: {}", msg),
            AuthError::UnknownCredential(id) => write!(f, "AUTH_UNKNOWN_ACCESS: {}", id),
            AuthError::NoInternalCredential => write!(f, "AUTH_NO_INTERNAL_ACCESS"),
            AuthError::AuthFail => write!(f, "AUTH_FAIL"),
            AuthError::Digest(msg) => write!(f, "AUTH_DIGEST: {}", msg),
        }
    }
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::Network(msg) => write!(f, "Network: {}", msg),
            MeshError::Remote { code, msg } => write!(f, "Remote code {}: {}", code, msg),
            MeshError::NoEndpoint(node) => write!(f, "No endpoint for node {}", node),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Io(err) => Some(err),
            GatewayError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for AuthError {}
impl std::error::Error for MeshError {}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, GatewayError>;

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl GatewayError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::BAD_REQUEST,
            GatewayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GatewayError::AlreadyExists(_) => StatusCode::CONFLICT,
            GatewayError::IllegalState(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Mesh(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Serialization(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "configuration_error",
            GatewayError::InvalidArgument(_) => "invalid_argument",
            GatewayError::AlreadyExists(_) => "already_exists",
            GatewayError::IllegalState(_) => "illegal_state",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Auth(_) => "auth_error",
            GatewayError::Mesh(_) => "mesh_error",
            GatewayError::Storage(_) => "storage_error",
            GatewayError::Io(_) => "io_error",
            GatewayError::Serialization(_) => "serialization_error",
        }
    }

    /// Numeric code carried in mesh `SyncResponse`s
    pub fn mesh_code(&self) -> i32 {
        match self {
            GatewayError::Auth(_) => 401,
            GatewayError::InvalidArgument(_) | GatewayError::Serialization(_) => 400,
            GatewayError::NotFound(_) => 404,
            GatewayError::AlreadyExists(_) => 409,
            _ => 500,
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(err)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err)
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        GatewayError::Auth(err)
    }
}

impl From<MeshError> for GatewayError {
    fn from(err: MeshError) -> Self {
        GatewayError::Mesh(err)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Mesh(MeshError::Network(err.to_string()))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::GatewayError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GatewayError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! invalid_argument {
    ($msg:expr) => {
        $crate::error::GatewayError::InvalidArgument($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GatewayError::InvalidArgument(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! illegal_state {
    ($msg:expr) => {
        $crate::error::GatewayError::IllegalState($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GatewayError::IllegalState(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::error::GatewayError::Storage($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GatewayError::Storage(format!($fmt, $($arg)*))
    };
}
