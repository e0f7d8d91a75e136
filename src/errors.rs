use cdp_adapter::AdapterError;
use perceiver_structural::PerceiverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObserveError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Perceiver(#[from] PerceiverError),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ObserveError {
    /// Whether retrying the same observation may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            ObserveError::Adapter(err) => err.retriable,
            ObserveError::Perceiver(PerceiverError::AxFetch(err))
            | ObserveError::Perceiver(PerceiverError::Page(err)) => err.retriable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::AdapterErrorKind;

    #[test]
    fn retriable_follows_the_adapter_flag() {
        let io = AdapterError::new(AdapterErrorKind::CdpIo).retriable(true);
        assert!(ObserveError::from(io.clone()).is_retriable());
        assert!(ObserveError::from(PerceiverError::AxFetch(io)).is_retriable());

        let protocol = AdapterError::new(AdapterErrorKind::Protocol);
        assert!(!ObserveError::from(protocol).is_retriable());
        assert!(!ObserveError::from(PerceiverError::internal("boom")).is_retriable());
    }
}
