use crate::error::*;
use std::time::Duration;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Api(e) => {
                error!("Top.gg API error details: {:?}", e);
            }
            CoreError::Webhook(e) => {
                error!("Webhook error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Api(e) => e.is_retryable(),
            CoreError::Webhook(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Api(e) => e.retry_after(),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Api(e) => e.user_friendly_message(),
            CoreError::Webhook(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { message } => format!("Invalid input: {}", message),
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Api(_) => "TOPGG_API".to_string(),
            CoreError::Webhook(_) => "WEBHOOK".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Cancelled => "CANCELLED".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for ApiError {
    fn log_error(&self) -> &Self {
        error!("ApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ApiError (warning): {}", self);
        self
    }

    // Only quota exhaustion resolves itself by waiting. Server errors are left
    // to the caller's next scheduled attempt.
    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Ratelimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Ratelimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ApiError::Unauthorized { .. } => {
                "Top.gg rejected the API token. Please check your credentials.".to_string()
            }
            ApiError::Forbidden { resource } => {
                format!("Access denied to {}.", resource)
            }
            ApiError::NotFound { resource } => format!("Could not find: {}", resource),
            ApiError::Ratelimited { retry_after } => format!(
                "Too many requests. Please wait {} seconds before trying again.",
                retry_after.as_secs().max(1)
            ),
            ApiError::ServerError { .. } => {
                "Top.gg is having trouble right now. Please try again later.".to_string()
            }
            ApiError::RequestTimeout => {
                "Request to Top.gg timed out. Please try again.".to_string()
            }
            _ => "Top.gg API error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            ApiError::Unauthorized { .. } => "TOPGG_UNAUTHORIZED".to_string(),
            ApiError::Forbidden { .. } => "TOPGG_FORBIDDEN".to_string(),
            ApiError::NotFound { .. } => "TOPGG_NOT_FOUND".to_string(),
            ApiError::Ratelimited { .. } => "TOPGG_RATELIMITED".to_string(),
            ApiError::BadRequest { .. } => "TOPGG_BAD_REQUEST".to_string(),
            ApiError::ServerError { .. } => "TOPGG_SERVER_ERROR".to_string(),
            ApiError::UnexpectedStatus { .. } => "TOPGG_UNEXPECTED_STATUS".to_string(),
            ApiError::RequestTimeout => "TOPGG_TIMEOUT".to_string(),
            ApiError::InvalidResponse { .. } => "TOPGG_INVALID_RESPONSE".to_string(),
        }
    }
}

impl ErrorExt for WebhookError {
    fn log_error(&self) -> &Self {
        error!("WebhookError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("WebhookError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            WebhookError::MalformedPayload { .. } => {
                "Received a vote notification that could not be understood.".to_string()
            }
            WebhookError::Unauthorized { path } => {
                format!("Rejected an unauthenticated vote notification on {}.", path)
            }
            WebhookError::HandlerFailed { path, .. } => {
                format!("The vote handler for {} failed.", path)
            }
            WebhookError::Bind { address, .. } => {
                format!("Could not listen on {}. Is the port already in use?", address)
            }
            WebhookError::Server { .. } => "The webhook server stopped unexpectedly.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            WebhookError::MalformedPayload { .. } => "WEBHOOK_MALFORMED_PAYLOAD".to_string(),
            WebhookError::Unauthorized { .. } => "WEBHOOK_UNAUTHORIZED".to_string(),
            WebhookError::HandlerFailed { .. } => "WEBHOOK_HANDLER_FAILED".to_string(),
            WebhookError::Bind { .. } => "WEBHOOK_BIND_FAILED".to_string(),
            WebhookError::Server { .. } => "WEBHOOK_SERVER".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => {
                "Configuration file not found. Please check the path.".to_string()
            }
            ConfigError::MissingField { field } => {
                format!("Required configuration field '{}' is missing.", field)
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            ConfigError::MissingEnvironmentVariable { var_name } => format!(
                "Environment variable '{}' is required but not set.",
                var_name
            ),
            ConfigError::MalformedToken => {
                "The Top.gg API token is malformed. Copy it again from your bot's webhooks page."
                    .to_string()
            }
            ConfigError::Parse(_) => {
                "Configuration file format is invalid. Please check the settings.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR".to_string(),
            ConfigError::MalformedToken => "CONFIG_MALFORMED_TOKEN".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}
