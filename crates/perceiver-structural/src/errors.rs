use cdp_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceiverError {
    /// The raw accessibility tree could not be retrieved. Observation cannot proceed.
    #[error("accessibility tree fetch failed: {0}")]
    AxFetch(#[source] AdapterError),
    #[error("page command failed: {0}")]
    Page(#[from] AdapterError),
    #[error("dom script injection failed: {0}")]
    Injection(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PerceiverError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn injection(msg: impl Into<String>) -> Self {
        Self::Injection(msg.into())
    }
}
