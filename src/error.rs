use std::{fmt, io};

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use suppaftp::FtpError;
use thiserror::Error;
use tokio::{sync::AcquireError, task::JoinError};
use url::ParseError as UrlParseError;
use zip::result::ZipError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum BuildonomyError {
    #[error("Xref archive error: {0}")]
    Archive(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Download failed: {0}")]
    Download(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Operation cancelled")]
    OperationCancelled,
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl BuildonomyError {
    /// True for errors that only make a single xref source unavailable (transport failures,
    /// missing files, malformed payloads, cancellation), as opposed to configuration or
    /// archive structure errors that point at a caller mistake.
    pub fn is_fetch_error(&self) -> bool {
        match self {
            BuildonomyError::Download(_)
            | BuildonomyError::Io(_)
            | BuildonomyError::NotFound(_)
            | BuildonomyError::OperationCancelled
            | BuildonomyError::PermissionDenied
            | BuildonomyError::Serialization(_) => true,
            BuildonomyError::Archive(_)
            | BuildonomyError::Config(_)
            | BuildonomyError::Custom(_) => false,
        }
    }
}

impl From<toml::de::Error> for BuildonomyError {
    fn from(src: toml::de::Error) -> BuildonomyError {
        BuildonomyError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for BuildonomyError {
    fn from(src: toml::ser::Error) -> BuildonomyError {
        BuildonomyError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<YamlError> for BuildonomyError {
    fn from(src: YamlError) -> BuildonomyError {
        BuildonomyError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<JsonError> for BuildonomyError {
    fn from(src: JsonError) -> BuildonomyError {
        BuildonomyError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<UrlParseError> for BuildonomyError {
    fn from(src: UrlParseError) -> BuildonomyError {
        BuildonomyError::Config(format!("Invalid URL: {src}"))
    }
}

impl From<io::Error> for BuildonomyError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => BuildonomyError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => BuildonomyError::PermissionDenied,
            _ => BuildonomyError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for BuildonomyError {
    fn from(x: fmt::Error) -> Self {
        BuildonomyError::Custom(format!("{x}"))
    }
}

impl From<ZipError> for BuildonomyError {
    fn from(x: ZipError) -> Self {
        match x {
            ZipError::Io(io_error) => BuildonomyError::from(io_error),
            ZipError::FileNotFound => {
                BuildonomyError::NotFound("Archive entry not found".to_string())
            }
            other => BuildonomyError::Serialization(format!("Zip archive error: {other}")),
        }
    }
}

impl From<reqwest::Error> for BuildonomyError {
    fn from(x: reqwest::Error) -> Self {
        match (x.status(), x.url()) {
            (Some(status), Some(url)) => {
                BuildonomyError::Download(format!("{url} responded with status {status}"))
            }
            (None, Some(url)) => BuildonomyError::Download(format!("{url}: {x}")),
            _ => BuildonomyError::Download(format!("{x}")),
        }
    }
}

impl From<FtpError> for BuildonomyError {
    fn from(x: FtpError) -> Self {
        BuildonomyError::Download(format!("FTP error: {x}"))
    }
}

impl From<AcquireError> for BuildonomyError {
    fn from(_: AcquireError) -> Self {
        BuildonomyError::OperationCancelled
    }
}

impl From<JoinError> for BuildonomyError {
    fn from(x: JoinError) -> Self {
        if x.is_cancelled() {
            BuildonomyError::OperationCancelled
        } else {
            BuildonomyError::Custom(format!("Background task panicked: {x}"))
        }
    }
}
