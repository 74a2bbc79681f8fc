/// Error types shared across the router.
///
/// Only `ConfigError` is fatal: it aborts startup. `ConnectError` and
/// `QueryError` are recovered locally by the metadata fetcher's fallback
/// loop; `MetadataError` is what the fetcher surfaces once it has exhausted
/// every candidate node, and causes the refresh cycle's result to be
/// discarded while the previous snapshot stays in effect.
use thiserror::Error;

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Invalid(String),
}

/// TCP-level or handshake failure against a single node.
#[derive(Debug, Error)]
#[error("error connecting to server at {host}:{port}: {reason}")]
pub struct ConnectError {
    pub host: String,
    pub port: u16,
    pub reason: String,
}

/// The session was usable but the query itself broke.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("not connected")]
    NotConnected,

    #[error("error executing query: {0}")]
    Failed(String),
}

/// The metadata fetcher exhausted its options for a replica set.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MetadataError(pub String);

impl From<QueryError> for MetadataError {
    fn from(err: QueryError) -> Self {
        MetadataError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_names_the_node() {
        let err = ConnectError {
            host: "db-1".to_string(),
            port: 3306,
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "error connecting to server at db-1:3306: connection refused"
        );
    }

    #[test]
    fn query_error_repackages_into_metadata_error() {
        let err: MetadataError = QueryError::Failed("some error (42)".to_string()).into();
        assert_eq!(err.to_string(), "error executing query: some error (42)");
    }
}
