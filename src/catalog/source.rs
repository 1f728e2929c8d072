//! Where catalogs come from.

use std::sync::Arc;

use super::{CatalogError, GeographySupport, VariableCatalog};
use crate::fetch::retry::{RetryPolicy, fetch_with_retry};
use crate::fetch::FetchError;
use crate::http::Transport;
use crate::query::{Dataset, dataset_url};

/// Fetches per-dataset/year metadata documents.
pub trait CatalogSource: Send + Sync {
    fn variables(&self, dataset: &Dataset, year: u16) -> Result<VariableCatalog, CatalogError>;
    fn geography(&self, dataset: &Dataset, year: u16) -> Result<GeographySupport, CatalogError>;
}

/// Catalogs served by the remote API next to the data endpoints.
pub struct RemoteCatalogSource {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl RemoteCatalogSource {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            api_key,
            retry,
        }
    }

    fn fetch(
        &self,
        what: &'static str,
        document: &str,
        dataset: &Dataset,
        year: u16,
    ) -> Result<String, CatalogError> {
        let url = format!("{}/{document}", dataset_url(&self.base_url, dataset, year));
        let params: Vec<(String, String)> = self
            .api_key
            .iter()
            .map(|k| ("key".to_string(), k.clone()))
            .collect();
        tracing::info!(dataset = %dataset, year, document, "fetching catalog");

        let outcome = fetch_with_retry(self.transport.as_ref(), &url, &params, &self.retry, None);
        match outcome.result {
            Ok(response) => Ok(response.body),
            Err(FetchError::Client { status: 404, .. }) => Err(CatalogError::NotFound {
                what,
                dataset: dataset.clone(),
                year,
            }),
            Err(e) => Err(CatalogError::Unavailable {
                what,
                dataset: dataset.clone(),
                year,
                message: e.to_string(),
            }),
        }
    }
}

impl CatalogSource for RemoteCatalogSource {
    fn variables(&self, dataset: &Dataset, year: u16) -> Result<VariableCatalog, CatalogError> {
        let body = self.fetch("variable", "variables.json", dataset, year)?;
        let catalog = VariableCatalog::parse(dataset.clone(), year, &body)?;
        tracing::info!(dataset = %dataset, year, variables = catalog.len(), "variable catalog loaded");
        Ok(catalog)
    }

    fn geography(&self, dataset: &Dataset, year: u16) -> Result<GeographySupport, CatalogError> {
        let body = self.fetch("geography", "geography.json", dataset, year)?;
        GeographySupport::parse(&body)
    }
}
