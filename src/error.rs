// Error types shared by the library modules. The binary wraps these in
// `anyhow` for context; inside the crate every fallible call returns one
// of the two enums below.

use std::path::PathBuf;
use std::time::Duration;

/// Failures talking to the remote object store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Timeouts, dropped connections, HTTP 429 and 5xx. Worth retrying.
    #[error("transient store error: {message}")]
    Transient { message: String },

    /// The store answered with a non-success status that retrying won't fix.
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The store answered, but not in a shape we understand.
    #[error("unexpected store response: {0}")]
    Protocol(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. } | StoreError::Timeout(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return StoreError::Transient {
                message: format!("timed out: {err}"),
            };
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return StoreError::Transient {
                message: err.to_string(),
            };
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 || status.is_server_error() {
                return StoreError::Transient {
                    message: err.to_string(),
                };
            }
            return StoreError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        StoreError::Protocol(err.to_string())
    }
}

/// Crate-level error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication with credentials {} failed: {reason}", credentials.display())]
    Auth { credentials: PathBuf, reason: String },

    #[error("cannot read local file {}: {source}", path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Fatal errors abort the whole run instead of a single category.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Auth { .. })
    }

    pub(crate) fn local_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::LocalFile {
            path: path.into(),
            source,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_and_auth_are_fatal() {
        assert!(Error::Config("missing parent_folder_id".into()).is_fatal());
        assert!(Error::Auth {
            credentials: "service_account.json".into(),
            reason: "invalid_grant".into(),
        }
        .is_fatal());

        let store = Error::Store(StoreError::Rejected {
            status: 404,
            message: "File not found".into(),
        });
        assert!(!store.is_fatal());

        let local = Error::local_file(
            "/opt/backup/site_db/a.tar.gz",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(!local.is_fatal());
    }

    #[test]
    fn auth_error_names_the_credentials_file() {
        let err = Error::Auth {
            credentials: "/etc/drive-backup/sa.json".into(),
            reason: "file not found".into(),
        };
        assert!(err.to_string().contains("/etc/drive-backup/sa.json"));
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::Transient {
            message: "connection reset".into()
        }
        .is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!StoreError::Protocol("missing id".into()).is_transient());
        assert!(!StoreError::Rejected {
            status: 403,
            message: "insufficient permissions".into()
        }
        .is_transient());
    }
}
