#![doc = "archive-ingest-core: core pipeline library for archive-ingest."]

//! This crate holds the storage-agnostic parts of archive ingestion: discovering scanned
//! material on disk, inspecting it, caching the storage credential, and uploading items
//! with bounded concurrency and retries. Concrete cloud clients live in the CLI crate
//! and plug in through the traits in [`contract`].
//!
//! # Usage
//! Build an [`ingest::Orchestrator`] from an [`config::IngestConfig`], a
//! [`secrets::SecretProvider`] and an [`contract::ObjectStore`], then call
//! [`ingest::Orchestrator::run`] with a source root and a cancellation token.

pub mod config;
pub mod contract;
pub mod discover;
pub mod error;
pub mod ingest;
pub mod inspect;
pub mod report;
pub mod retry;
pub mod secrets;
pub mod upload;
