//! Retrieval service: reads the most recently relayed value.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::instrument;

use crate::application::ports::{CacheError, CacheStore};

const METRIC_RETRIEVE_TOTAL: &str = "ingest_relay_retrieve_total";

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("no value has been relayed under `{key}` yet")]
    Empty { key: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub struct RetrieveService {
    cache: Arc<dyn CacheStore>,
    key: String,
}

impl RetrieveService {
    pub fn new(cache: Arc<dyn CacheStore>, key: impl Into<String>) -> Self {
        Self {
            cache,
            key: key.into(),
        }
    }

    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn latest(&self) -> Result<Bytes, RetrieveError> {
        let outcome = self.cache.get(&self.key).await;
        let label = match &outcome {
            Ok(Some(_)) => "hit",
            Ok(None) => "empty",
            Err(_) => "error",
        };
        counter!(METRIC_RETRIEVE_TOTAL, "outcome" => label).increment(1);

        match outcome? {
            Some(value) => Ok(value),
            None => Err(RetrieveError::Empty {
                key: self.key.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryCache;

    #[tokio::test]
    async fn latest_reports_empty_before_first_write() {
        let service = RetrieveService::new(Arc::new(MemoryCache::new()), "latest");

        let err = service.latest().await.expect_err("nothing cached");
        assert!(matches!(err, RetrieveError::Empty { ref key } if key == "latest"));
    }

    #[tokio::test]
    async fn latest_returns_cached_bytes() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set("latest", Bytes::from_static(b"\x00\xffraw"), None)
            .await
            .expect("set");
        let service = RetrieveService::new(cache, "latest");

        assert_eq!(
            service.latest().await.expect("value"),
            Bytes::from_static(b"\x00\xffraw")
        );
    }
}
