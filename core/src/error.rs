use thiserror::Error;

/// Failure to render a submission in the browser. Fatal to one scan only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("ERR_NAME_NOT_RESOLVED")]
    NameNotResolved,
    #[error("ERR_CONNECTION_REFUSED")]
    ConnectionRefused,
    #[error("navigation timed out after {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Driver(String),
}

impl NavigationError {
    /// Short code recorded in the report's error list and used to group engine-log errors.
    pub fn code(&self) -> String {
        match self {
            NavigationError::NameNotResolved => "ERR_NAME_NOT_RESOLVED".into(),
            NavigationError::ConnectionRefused => "ERR_CONNECTION_REFUSED".into(),
            NavigationError::Timeout(_) => "ERR_TIMED_OUT".into(),
            NavigationError::Driver(msg) => msg.clone(),
        }
    }

    /// Classify a raw driver message the way browser automation reports network errors.
    pub fn from_driver_message(msg: &str) -> Self {
        if msg.contains("net::ERR_NAME_NOT_RESOLVED") {
            NavigationError::NameNotResolved
        } else if msg.contains("net::ERR_CONNECTION_REFUSED") {
            NavigationError::ConnectionRefused
        } else {
            NavigationError::Driver(msg.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict on {index}/{id}")]
    Conflict { index: String, id: String },
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnrichmentError {
    #[error("Domain does not exist")]
    NotFound,
    #[error("lookup timed out")]
    Timeout,
    #[error("lookup failed: {0}")]
    Lookup(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid API key - unauthorized")]
    Unauthorized,
    #[error("community api rejected request: {0}")]
    Rejected(String),
    #[error("community api transport error: {0}")]
    Transport(String),
    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
