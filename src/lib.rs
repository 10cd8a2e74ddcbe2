//! Lead import engine.
//!
//! Turns uploaded spreadsheets of companies (CNPJ, phone, address) into
//! deduplicated leads. Rows are normalized, validated, matched against stored
//! leads by a cascading deduplication key and either inserted or merged
//! (missing fields only). Every import produces a report and an audit entry.
//!
//! # Modules
//!
//! - `api`: HTTP-facing modules.
//! - `core`: Import pipeline and shared models.
//! - `data`: Storage backends.
//! - `circuit_breaker`: Circuit breaker around the lead store.
//! - `config`: Configuration management.
//! - `db`: Database connection pool and schema bootstrap.
//! - `db_storage`: PostgreSQL lead store and audit log.
//! - `dedup`: Deduplication keys.
//! - `error_export`: CSV export of row errors.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `importer`: Import orchestration.
//! - `memory_store`: In-memory lead store and audit log.
//! - `merge`: Fill-if-empty merge of incoming rows into stored leads.
//! - `models`: Core data models.
//! - `normalize`: Field normalizers.
//! - `spreadsheet`: CSV and workbook reader.
//! - `store`: Storage traits.
//! - `validator`: Row validation into normalized leads.

pub mod api;
pub mod core;
pub mod data;

// Re-export primary modules for shared use in tests and other binaries
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dedup;
pub mod error_export;
pub mod errors;
pub mod handlers;
pub mod importer;
pub mod memory_store;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod spreadsheet;
pub mod store;
pub mod validator;
