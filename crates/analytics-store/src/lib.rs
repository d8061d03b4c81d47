//! # Analytics Store
//!
//! The time-series store gateway (C2): a thin, typed layer over a
//! TimescaleDB/PostgreSQL connection pool. Owns the four persisted tables
//! (`events`, `hourly_aggregations`, `daily_aggregations`, `error_summary`),
//! the natural-key UPSERT statements the worker drives, the parameterized
//! aggregate reads the stats API drives, and the retention sweep.
//!
//! This crate depends on `analytics-core` for the event schema and the pure
//! aggregation types it persists, but does no aggregation itself — grouping
//! and percentile computation live in `analytics_core::aggregator`.

pub mod error;
pub mod gateway;
pub mod pool;
pub mod queries;

pub use error::StoreError;
pub use gateway::{RetentionPolicy, StoreGateway};
pub use pool::{connect, run_migrations, StoreConfig};
pub use queries::{ErrorStatsRow, OverviewRow, PerformanceRow, TimelinePoint, ToolStatsRow};
