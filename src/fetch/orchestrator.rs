//! API execution orchestrator.
//!
//! Each [`QuerySpec`] is checked against the cache by signature; misses are
//! fetched with retry on a bounded worker pool (one rayon thread per allowed
//! concurrent request) and successful bodies are written back. Results are
//! collected into a slot per input position, so output order always matches
//! input order. One request's failure never affects its siblings.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use super::retry::{RetryPolicy, fetch_with_retry};
use super::{FetchError, Table};
use crate::cache::ResultCache;
use crate::error::EngineError;
use crate::http::Transport;
use crate::query::QuerySpec;

/// Where a successful result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOrigin {
    Cache,
    Network,
}

/// Outcome of one spec.
#[derive(Debug)]
pub struct ExecutedQuery {
    pub spec: QuerySpec,
    pub result: Result<Table, FetchError>,
    /// `Some` only on success.
    pub origin: Option<ResultOrigin>,
    /// Network attempts consumed (zero for a cache hit).
    pub attempts: u32,
}

impl ExecutedQuery {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    cache: Arc<ResultCache>,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    pool: rayon::ThreadPool,
    max_concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<ResultCache>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        retry: RetryPolicy,
        max_concurrency: usize,
    ) -> Result<Self, EngineError> {
        let max_concurrency = max_concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_concurrency)
            .thread_name(|i| format!("geoquery-fetch-{i}"))
            .build()
            .map_err(|e| EngineError::WorkerPool {
                message: e.to_string(),
            })?;
        Ok(Self {
            transport,
            cache,
            base_url: base_url.into(),
            api_key,
            retry,
            pool,
            max_concurrency,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Execute `specs` with no deadline.
    pub fn execute(&self, specs: Vec<QuerySpec>) -> Vec<ExecutedQuery> {
        self.execute_with_deadline(specs, None)
    }

    /// Execute `specs`, reporting any request not completed by `deadline`
    /// as [`FetchError::Timeout`].
    pub fn execute_with_deadline(
        &self,
        specs: Vec<QuerySpec>,
        deadline: Option<Instant>,
    ) -> Vec<ExecutedQuery> {
        let total = specs.len();
        let mut slots: Vec<ExecutedQuery> = Vec::with_capacity(total);
        self.pool.install(|| {
            specs
                .into_par_iter()
                .map(|spec| self.execute_one(spec, deadline))
                .collect_into_vec(&mut slots);
        });

        let hits = slots
            .iter()
            .filter(|q| q.origin == Some(ResultOrigin::Cache))
            .count();
        let failed = slots.iter().filter(|q| q.result.is_err()).count();
        if failed > 0 {
            tracing::warn!(total, hits, failed, "execution finished with failures");
        } else {
            tracing::info!(total, hits, "execution finished");
        }
        slots
    }

    fn execute_one(&self, spec: QuerySpec, deadline: Option<Instant>) -> ExecutedQuery {
        if let Some(payload) = self.cache.get(spec.signature()) {
            match std::str::from_utf8(&payload)
                .map_err(|e| FetchError::InvalidResponse {
                    message: e.to_string(),
                })
                .and_then(Table::parse)
            {
                Ok(table) => {
                    return ExecutedQuery {
                        spec,
                        result: Ok(table),
                        origin: Some(ResultOrigin::Cache),
                        attempts: 0,
                    };
                }
                Err(e) => {
                    tracing::warn!(query = %spec, error = %e, "cached payload unreadable, refetching");
                }
            }
        }

        let url = spec.endpoint(&self.base_url);
        let params = spec.params(self.api_key.as_deref());
        let outcome = fetch_with_retry(self.transport.as_ref(), &url, &params, &self.retry, deadline);

        let result = outcome.result.and_then(|response| {
            let table = Table::parse(&response.body)?;
            if let Err(e) = self.cache.put(spec.signature(), response.body.as_bytes()) {
                tracing::warn!(query = %spec, error = %e, "failed to cache result");
            }
            Ok(table)
        });

        if let Err(e) = &result {
            tracing::warn!(query = %spec, kind = %e.kind(), error = %e, "query failed");
        }
        let origin = result.as_ref().ok().map(|_| ResultOrigin::Network);
        ExecutedQuery {
            spec,
            result,
            origin,
            attempts: outcome.attempts,
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("base_url", &self.base_url)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}
