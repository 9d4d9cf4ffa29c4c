use thiserror::Error;

/// Failures reported by a `MapStore` to the cache runtime.
///
/// "Key not found" and "write on a read-only adapter" are outcomes rather than
/// errors and therefore have no variant here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing resource bound to a map does not exist. Fatal for that map.
    #[error("No backing resource [{resource}] found for map [{map}]")]
    ResourceNotFound { map: String, resource: String },

    /// A required connection property was not declared for the map.
    #[error("Map [{map}] requires a [{property}] property in its store configuration")]
    MissingProperty { map: String, property: String },

    /// A property was declared with a value the adapter cannot use.
    #[error("Invalid value [{value}] for property [{property}] of map [{map}]")]
    InvalidProperty {
        map: String,
        property: String,
        value: String,
    },

    /// `initialize` was called on an adapter that is already bound.
    #[error("Store for map [{map}] is already bound to [{resource}]")]
    AlreadyInitialized { map: String, resource: String },

    /// The factory was shut down, no more adapters are handed out.
    #[error("Store factory is shut down, map [{map}] cannot be opened")]
    FactoryClosed { map: String },

    /// Network, authentication or protocol failure talking to the backing store.
    #[error("Backing store [{resource}] failed: {source}")]
    Transient {
        resource: String,
        #[source]
        source: ClientError,
    },

    /// One or more entries of a batch mutation failed. Every other entry was attempted.
    #[error("{op} on [{resource}] failed for {} key(s), first: {}", .failures.len(), first_failure(.failures))]
    Batch {
        op: &'static str,
        resource: String,
        failures: Vec<(String, String)>,
    },
}

impl StoreError {
    /// True for errors that must abort startup of the affected map.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StoreError::ResourceNotFound { .. }
                | StoreError::MissingProperty { .. }
                | StoreError::InvalidProperty { .. }
                | StoreError::AlreadyInitialized { .. }
        )
    }

    /// Keys that failed in a batch mutation, empty for every other variant.
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            StoreError::Batch { failures, .. } => {
                failures.iter().map(|(key, _)| key.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn first_failure(failures: &[(String, String)]) -> String {
    failures
        .first()
        .map(|(key, message)| format!("[{}] {}", key, message))
        .unwrap_or_default()
}

/// Errors produced by backing-store clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The named table/domain does not exist.
    #[error("resource [{0}] not found")]
    ResourceNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}
