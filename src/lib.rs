// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # geoquery
//!
//! Geography and query resolution for a Census-style statistical API.
//!
//! ## Architecture
//!
//! - **Geography** (`geo`): levels, canonical codes, the hierarchy ordering
//!   table, a name registry and a scored resolver
//! - **Queries** (`query`): hierarchy-respecting `for`/`in` parameters and
//!   content signatures
//! - **Catalogs** (`catalog`): per dataset/year variable and geography
//!   catalogs, cached and validated in bulk
//! - **Cache** (`cache`): signature-keyed results with retention and LRU
//!   eviction over a redb-backed store (`store`)
//! - **Execution** (`fetch`, `http`): retry with backoff on a bounded worker
//!   pool, results in input order
//!
//! ## Library usage
//!
//! ```no_run
//! use geoquery::config::EngineConfig;
//! use geoquery::engine::Engine;
//! use geoquery::query::Dataset;
//!
//! let engine = Engine::new(EngineConfig::default().with_env()).unwrap();
//! let resolved = engine.resolve_geography("Cook County, IL", None, None).unwrap();
//! let cook = resolved.geography().cloned().unwrap();
//! let dataset = Dataset::new("acs/acs5").unwrap();
//! let series = engine
//!     .fetch_series(cook, ["B01003_001E"], &dataset, &[2019, 2020, 2021], None)
//!     .unwrap();
//! for (year, table) in &series.succeeded {
//!     println!("{year}: {:?}", table.value(0, "B01003_001E"));
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod http;
pub mod paths;
pub mod query;
pub mod store;
