//! chatkpi-core: Chat transcript analytics engine
//!
//! This crate provides the core functionality for ingesting chat
//! transcripts from CSV/JSON uploads, normalizing heterogeneous input
//! schemas into canonical records, grouping records into conversations,
//! and computing KPI reports over date/client scopes.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod kpi;
pub mod models;
pub mod schema;
pub mod service;

pub use config::Config;
pub use db::Database;
pub use error::Error;
pub use error::Result;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "chatkpi";
