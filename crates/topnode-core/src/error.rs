//! Error handling for topnode
//!
//! Provides a unified error type and result type shared by the core model,
//! the accounting engine and the command-line front end.

/// Result type alias for topnode operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for topnode
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The cluster state provider could not answer
    #[error("Cluster state provider error: {0}")]
    Provider(String),

    /// GPU telemetry errors
    #[error("GPU telemetry error: {0}")]
    GpuTelemetry(String),

    /// A resource quantity could not be parsed
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a GPU telemetry error
    pub fn gpu_telemetry(msg: impl Into<String>) -> Self {
        Self::GpuTelemetry(msg.into())
    }

    /// Create an invalid quantity error
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    /// Errors that only degrade a single node's report instead of failing the listing
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::GpuTelemetry(_) | Error::NotFound(_))
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "configuration",
            Error::NotFound(_) => "not_found",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Provider(_) => "provider",
            Error::GpuTelemetry(_) => "gpu_telemetry",
            Error::InvalidQuantity(_) => "quantity",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}

/// Extension trait for adding context to Results
pub trait ErrorContext<T> {
    /// Add context to an error
    fn with_context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let original_error = e.into();
            Error::Other(anyhow::anyhow!("{}: {}", context.into(), original_error))
        })
    }

    fn with_context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let original_error = e.into();
            Error::Other(anyhow::anyhow!("{}: {}", f(), original_error))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::not_found("node gpu-node-7");
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.to_string(), "Resource not found: node gpu-node-7");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::config("test").category(), "configuration");
        assert_eq!(Error::provider("test").category(), "provider");
        assert_eq!(Error::invalid_quantity("1Zi").category(), "quantity");
    }

    #[test]
    fn test_error_classification() {
        assert!(!Error::invalid_request("empty node name").is_degradable());
        assert!(!Error::provider("snapshot unreadable").is_degradable());
        assert!(Error::gpu_telemetry("exporter unreachable").is_degradable());
        assert!(Error::not_found("topology descriptor").is_degradable());
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "snapshot missing",
        ));

        let err = result.with_context("failed to read cluster snapshot").unwrap_err();
        assert!(matches!(err, Error::Other(_)));
        assert!(err.to_string().contains("failed to read cluster snapshot"));
        assert!(err.to_string().contains("snapshot missing"));
    }

    #[test]
    fn test_error_context_fn() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "bad bytes",
        ));

        let err = result
            .with_context_fn(|| format!("decoding {}", "nodes.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("decoding nodes.yaml"));
        assert!(err.to_string().contains("bad bytes"));
    }
}
