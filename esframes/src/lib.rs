//! Elasticsearch aggregation compiler and response-to-frame decoder
//!
//! This crate turns a declarative, UI-authored query model (bucket and metric
//! aggregation lists) into Elasticsearch's nested aggregation DSL, and turns
//! the multi-search response back into typed data frames.
//!
//! # Pipeline
//!
//! - [`model`] - the query model (`Query`, `BucketAgg`, `MetricAgg`)
//! - [`builder`] - query model to aggregation tree and search body
//! - [`parser`] - raw hand-written aggregation DSL back to the query model
//! - [`dsl`] - aggregation nodes, search bodies and multi-search NDJSON encoding
//! - [`decoder`] - streaming multi-search response decoder
//! - [`processor`] - decoded responses to frames, with [`naming`] for series names
//! - [`executor`] - runs a batch through a [`executor::MultiSearchClient`]
//!
//! # Supported aggregations
//!
//! Buckets:
//! - `date_histogram` / `histogram`
//! - `terms` / `filters`
//! - `nested` / `geohash_grid`
//!
//! Metrics:
//! - `count` / `avg` / `sum` / `min` / `max` / `cardinality` / `rate`
//! - `percentiles` / `extended_stats` / `top_metrics`
//! - pipelines: `moving_avg`, `moving_fn`, `derivative`, `cumulative_sum`, `serial_diff`, `bucket_script`
//! - documents: `raw_document`, `raw_data`, `logs`

pub mod builder;
pub mod config;
pub mod decoder;
pub mod dsl;
pub mod error;
pub mod executor;
pub mod frame;
pub mod model;
pub mod naming;
pub mod parser;
pub mod processor;

pub use config::{ConfiguredFields, DataSourceConfig};
pub use error::EsFramesError;
pub use executor::{DataQueryExecutor, DataResponse, MultiSearchClient, QueryDataResponse, ResponseBody};
pub use frame::Frame;
pub use model::{BucketAgg, MetricAgg, Query};

/// Result type for esframes operations
pub type Result<T> = std::result::Result<T, EsFramesError>;
