//! Error taxonomy for the query pipeline.
//!
//! Each stage of the pipeline has its own error type so that failures can be
//! reported precisely and mapped to a distinct process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// The invocation could not be turned into a query.
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("No query provided. Usage: ai [file_path] <query> [--s|--p|--r|--deep]")]
    EmptyQuery,
    #[error("{0}")]
    Invalid(String),
}

/// The attachment could not be ingested.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error(
        "File size ({:.2}MB) exceeds maximum allowed size of {limit_mb}MB",
        megabytes(.size_bytes)
    )]
    TooLarge { size_bytes: u64, limit_mb: u64 },
    #[error("{} is a binary file that cannot be read as text", .0.display())]
    BinaryUnreadable(PathBuf),
    #[error("{} has no text layer to extract (scanned PDFs are not supported)", .0.display())]
    PdfNoTextLayer(PathBuf),
    #[error("Failed to read PDF {}: {reason}", .path.display())]
    PdfUnreadable { path: PathBuf, reason: String },
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The completion service call failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("PERPLEXITY_API_KEY is not set")]
    AuthMissing,
    #[error("Authentication failed with status {status}. Please check your API key.")]
    AuthRejected { status: u16 },
    #[error("{}", network_message(.status, .message))]
    Network { status: Option<u16>, message: String },
    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimited,
    #[error("Unexpected API response: {0}")]
    MalformedResponse(String),
}

fn megabytes(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

fn network_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("API request failed with status {}: {}", status, message),
        None => format!("Network error: {}", message),
    }
}

impl ProviderError {
    /// Short machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::AuthMissing => "auth-missing",
            ProviderError::AuthRejected { .. } => "auth-rejected",
            ProviderError::Network { .. } => "network",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::RateLimited => "rate-limited",
            ProviderError::MalformedResponse(_) => "malformed-response",
        }
    }
}

/// Configuration could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Provider '{0}' is not supported. Available providers: perplexity")]
    UnsupportedProvider(String),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Top-level pipeline failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Operation cancelled by user.")]
    Cancelled,
}

impl Error {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Argument(_) => 1,
            Error::File(FileError::NotFound(_)) => 2,
            Error::File(FileError::TooLarge { .. }) => 4,
            Error::File(_) => 3,
            Error::Provider(_) => 5,
            Error::Config(_) => 6,
            Error::Cancelled => 130,
        }
    }

    /// Follow-up advice printed under the error line, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Provider(ProviderError::AuthMissing) => Some(
                "Get a key from https://www.perplexity.ai/settings/api, then either\n  \
                 export PERPLEXITY_API_KEY='your-api-key-here'\n  \
                 or put PERPLEXITY_API_KEY=your-api-key-here in ~/.smart_term/.env",
            ),
            Error::Provider(ProviderError::Network { status: None, .. }) => {
                Some("Please check your internet connection.")
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::from(ArgumentError::EmptyQuery).exit_code(), 1);
        assert_eq!(
            Error::from(FileError::NotFound(PathBuf::from("x"))).exit_code(),
            2
        );
        assert_eq!(
            Error::from(FileError::BinaryUnreadable(PathBuf::from("x"))).exit_code(),
            3
        );
        assert_eq!(
            Error::from(FileError::TooLarge {
                size_bytes: 1,
                limit_mb: 1
            })
            .exit_code(),
            4
        );
        assert_eq!(Error::from(ProviderError::RateLimited).exit_code(), 5);
        assert_eq!(Error::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_too_large_message() {
        let err = FileError::TooLarge {
            size_bytes: 15 * 1024 * 1024,
            limit_mb: 10,
        };
        assert_eq!(
            err.to_string(),
            "File size (15.00MB) exceeds maximum allowed size of 10MB"
        );
    }

    #[test]
    fn test_network_message_with_status() {
        let err = ProviderError::Network {
            status: Some(500),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "API request failed with status 500: boom");
        assert_eq!(err.kind(), "network");
    }
}
