//! Engine facade: the consumer-facing API of geoquery.
//!
//! The `Engine` owns every subsystem (store, result cache, geography
//! registry and resolver, catalog validator, orchestrator) and exposes the
//! three operations callers need: resolve a place, plan queries for a set
//! of years, and execute them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cache::ResultCache;
use crate::catalog::{CatalogSource, RemoteCatalogSource, VariableValidator};
use crate::config::EngineConfig;
use crate::error::{EngineError, GeoResult, QueryError};
use crate::fetch::{ExecutedQuery, FailureKind, Orchestrator, Table};
use crate::geo::source::{GeographySource, RemoteGeographySource};
use crate::geo::{
    GeographyCode, GeographyLevel, GeographyReference, GeographyRegistry, GeographyResolver,
    ResolutionResult,
};
use crate::http::{Transport, UreqTransport};
use crate::query::{Dataset, QuerySpec, builder};
use crate::store::Store;

/// Something that kept a year out of a plan, or trimmed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlanIssue {
    /// Variables absent from the year's catalog; the year still runs with
    /// the rest.
    InvalidVariables {
        year: u16,
        variables: BTreeSet<String>,
    },
    /// No requested variable exists for the year.
    NoValidVariables { year: u16 },
    UnsupportedGeography { year: u16, detail: String },
    CatalogUnavailable { year: u16, detail: String },
    MalformedQuery { year: u16, detail: String },
}

impl PlanIssue {
    pub fn year(&self) -> u16 {
        match self {
            PlanIssue::InvalidVariables { year, .. }
            | PlanIssue::NoValidVariables { year }
            | PlanIssue::UnsupportedGeography { year, .. }
            | PlanIssue::CatalogUnavailable { year, .. }
            | PlanIssue::MalformedQuery { year, .. } => *year,
        }
    }

    /// The failure this issue causes for its year, or `None` when the year
    /// is still planned.
    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            PlanIssue::InvalidVariables { .. } => None,
            PlanIssue::NoValidVariables { .. } => Some(FailureKind::InvalidVariable),
            PlanIssue::UnsupportedGeography { .. } => Some(FailureKind::UnsupportedGeography),
            PlanIssue::CatalogUnavailable { .. } => Some(FailureKind::CatalogUnavailable),
            PlanIssue::MalformedQuery { .. } => Some(FailureKind::MalformedQuery),
        }
    }
}

impl fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanIssue::InvalidVariables { year, variables } => {
                let list: Vec<&str> = variables.iter().map(String::as_str).collect();
                write!(f, "{year}: unknown variables {}", list.join(", "))
            }
            PlanIssue::NoValidVariables { year } => {
                write!(f, "{year}: none of the requested variables exist")
            }
            PlanIssue::UnsupportedGeography { year, detail } => write!(f, "{year}: {detail}"),
            PlanIssue::CatalogUnavailable { year, detail } => {
                write!(f, "{year}: catalog unavailable: {detail}")
            }
            PlanIssue::MalformedQuery { year, detail } => {
                write!(f, "{year}: malformed query: {detail}")
            }
        }
    }
}

/// Specs ready to execute, plus what planning dropped.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    pub specs: Vec<QuerySpec>,
    pub issues: Vec<PlanIssue>,
}

/// Why one year of a series has no data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// Per-year outcome of [`Engine::fetch_series`].
#[derive(Debug, Default)]
pub struct SeriesResult {
    pub succeeded: BTreeMap<u16, Table>,
    pub failed: BTreeMap<u16, YearFailure>,
    pub issues: Vec<PlanIssue>,
}

impl SeriesResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn years(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// The geoquery engine.
pub struct Engine {
    config: EngineConfig,
    store: Arc<Store>,
    resolver: GeographyResolver,
    validator: VariableValidator,
    orchestrator: Orchestrator,
}

impl Engine {
    /// Create an engine talking to the configured remote service.
    pub fn new(config: EngineConfig) -> GeoResult<Self> {
        let transport = Arc::new(UreqTransport::new(config.fetch.request_timeout()));
        Self::with_transport(config, transport)
    }

    /// Create an engine whose remote calls all go through `transport`.
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn Transport>) -> GeoResult<Self> {
        let retry = config.fetch.retry_policy();
        let geography = Arc::new(RemoteGeographySource::new(
            Arc::clone(&transport),
            config.base_url.clone(),
            config.api_key.clone(),
            config.reference_dataset()?,
            config.reference_year,
            retry.clone(),
        ));
        let catalogs = Arc::new(RemoteCatalogSource::new(
            Arc::clone(&transport),
            config.base_url.clone(),
            config.api_key.clone(),
            retry,
        ));
        Self::with_sources(config, transport, geography, catalogs)
    }

    /// Create an engine with explicit geography and catalog sources.
    pub fn with_sources(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        geography: Arc<dyn GeographySource>,
        catalogs: Arc<dyn CatalogSource>,
    ) -> GeoResult<Self> {
        config.validate()?;
        tracing::info!(
            base_url = %config.base_url,
            durable = config.data_dir.is_some(),
            max_concurrency = config.fetch.max_concurrency,
            "initializing geoquery engine"
        );

        let store = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|_| EngineError::DataDir {
                    path: dir.display().to_string(),
                })?;
                Arc::new(Store::open(dir)?)
            }
            None => Arc::new(Store::memory_only()),
        };

        let cache = Arc::new(ResultCache::open(Arc::clone(&store), config.cache.clone())?);

        let mut registry = GeographyRegistry::new(geography).with_ttl_days(config.registry_ttl_days);
        let mut validator = VariableValidator::new(catalogs).with_ttl_days(config.catalog_ttl_days);
        if store.is_durable() {
            registry = registry.with_store(Arc::clone(&store));
            validator = validator.with_store(Arc::clone(&store));
        }
        let resolver = GeographyResolver::new(Arc::new(registry), config.resolver.clone());

        let orchestrator = Orchestrator::new(
            transport,
            cache,
            config.base_url.clone(),
            config.api_key.clone(),
            config.fetch.retry_policy(),
            config.fetch.max_concurrency,
        )?;

        Ok(Self {
            config,
            store,
            resolver,
            validator,
            orchestrator,
        })
    }

    /// Resolve free text such as `"Cook County, IL"`.
    ///
    /// An explicit `level_hint` or `parent` overrides whatever the text
    /// itself implies.
    pub fn resolve_geography(
        &self,
        text: &str,
        level_hint: Option<GeographyLevel>,
        parent: Option<GeographyReference>,
    ) -> GeoResult<ResolutionResult> {
        let mut reference = GeographyReference::parse(text);
        if level_hint.is_some() {
            reference.level = level_hint;
        }
        if let Some(parent) = parent {
            reference.parent = Some(Box::new(parent));
        }
        self.resolve(&reference)
    }

    pub fn resolve(&self, reference: &GeographyReference) -> GeoResult<ResolutionResult> {
        self.resolver.resolve(reference)
    }

    /// One spec per year that can be requested.
    ///
    /// Each year is checked against its own catalogs: unknown variables are
    /// dropped for that year only, and a year with nothing left, an
    /// unsupported geography, or no catalog at all is reported in
    /// [`QueryPlan::issues`] instead of failing the plan.
    pub fn plan_queries<I, S>(
        &self,
        geography: Arc<GeographyCode>,
        variables: I,
        dataset: &Dataset,
        years: &[u16],
    ) -> GeoResult<QueryPlan>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requested: BTreeSet<String> = variables
            .into_iter()
            .map(|v| {
                let v: String = v.into();
                v.trim().to_string()
            })
            .filter(|v| !v.is_empty())
            .collect();
        if requested.is_empty() {
            return Err(QueryError::EmptyVariables.into());
        }

        let mut plan = QueryPlan::default();
        let mut seen = BTreeSet::new();
        for &year in years {
            if !seen.insert(year) {
                continue;
            }
            match self.plan_year(&geography, &requested, dataset, year) {
                Ok((spec, issue)) => {
                    plan.specs.push(spec);
                    plan.issues.extend(issue);
                }
                Err(issue) => plan.issues.push(issue),
            }
        }
        for issue in &plan.issues {
            tracing::warn!(dataset = %dataset, issue = %issue, "planning issue");
        }
        Ok(plan)
    }

    fn plan_year(
        &self,
        geography: &Arc<GeographyCode>,
        requested: &BTreeSet<String>,
        dataset: &Dataset,
        year: u16,
    ) -> Result<(QuerySpec, Option<PlanIssue>), PlanIssue> {
        match self.validator.geography_support(dataset, year) {
            Ok(support) if !support.hierarchies().is_empty() => {
                support
                    .check(geography)
                    .map_err(|issue| PlanIssue::UnsupportedGeography {
                        year,
                        detail: issue.to_string(),
                    })?;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(dataset = %dataset, year, error = %e, "geography support unknown, skipping check");
            }
        }

        let validation = self
            .validator
            .validate(requested, dataset, year)
            .map_err(|e| PlanIssue::CatalogUnavailable {
                year,
                detail: e.to_string(),
            })?;
        if validation.valid.is_empty() {
            return Err(PlanIssue::NoValidVariables { year });
        }
        let dropped = (!validation.invalid.is_empty()).then(|| PlanIssue::InvalidVariables {
            year,
            variables: validation.invalid.clone(),
        });

        let spec = builder::build(Arc::clone(geography), validation.valid, dataset, year).map_err(|e| {
            PlanIssue::MalformedQuery {
                year,
                detail: e.to_string(),
            }
        })?;
        Ok((spec, dropped))
    }

    /// Execute `specs`; output order matches input order.
    pub fn execute(&self, specs: Vec<QuerySpec>) -> Vec<ExecutedQuery> {
        self.orchestrator.execute(specs)
    }

    pub fn execute_with_deadline(&self, specs: Vec<QuerySpec>, deadline: Option<Instant>) -> Vec<ExecutedQuery> {
        self.orchestrator.execute_with_deadline(specs, deadline)
    }

    /// Plan and execute a multi-year series, keeping whatever years succeed.
    pub fn fetch_series<I, S>(
        &self,
        geography: Arc<GeographyCode>,
        variables: I,
        dataset: &Dataset,
        years: &[u16],
        deadline: Option<Instant>,
    ) -> GeoResult<SeriesResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let plan = self.plan_queries(geography, variables, dataset, years)?;
        let mut series = SeriesResult::default();
        for issue in &plan.issues {
            if let Some(kind) = issue.failure() {
                series.failed.insert(
                    issue.year(),
                    YearFailure {
                        kind,
                        detail: issue.to_string(),
                    },
                );
            }
        }
        series.issues = plan.issues;

        for executed in self.execute_with_deadline(plan.specs, deadline) {
            let year = executed.spec.year();
            match executed.result {
                Ok(table) => {
                    series.succeeded.insert(year, table);
                }
                Err(e) => {
                    series.failed.insert(
                        year,
                        YearFailure {
                            kind: e.kind(),
                            detail: e.to_string(),
                        },
                    );
                }
            }
        }
        tracing::info!(
            dataset = %dataset,
            succeeded = series.succeeded.len(),
            failed = series.failed.len(),
            "series fetched"
        );
        Ok(series)
    }

    /// Flush cache bookkeeping to the durable store.
    pub fn persist(&self) -> GeoResult<()> {
        self.orchestrator.cache().flush()?;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        self.orchestrator.cache()
    }

    pub fn registry(&self) -> &Arc<GeographyRegistry> {
        self.resolver.registry()
    }

    pub fn resolver(&self) -> &GeographyResolver {
        &self.resolver
    }

    pub fn validator(&self) -> &VariableValidator {
        &self.validator
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("base_url", &self.config.base_url)
            .field("durable", &self.store.is_durable())
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}
