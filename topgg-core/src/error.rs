use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Top.gg API error: {0}")]
    Api(#[from] ApiError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Rate limited. Retry after {:.2} seconds", retry_after.as_secs_f64())]
    Ratelimited { retry_after: Duration },

    #[error("Bad request: {details}")]
    BadRequest { details: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("Unexpected response status: {status_code}")]
    UnexpectedStatus { status_code: u16 },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Malformed vote payload: {details}")]
    MalformedPayload { details: String },

    #[error("Unauthorized webhook request on {path}")]
    Unauthorized { path: String },

    #[error("Vote handler on {path} failed: {message}")]
    HandlerFailed { path: String, message: String },

    #[error("Failed to bind webhook server to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Webhook server error: {reason}")]
    Server { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Malformed API token")]
    MalformedToken,

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
