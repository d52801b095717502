//! Bulk import of company data files into the relational store.
//!
//! Each source file is read by one pipeline: a producer decodes and filters
//! records, maps them to insert statements and groups those into batches,
//! which a single apply worker executes in order. Pipelines of one flow run
//! concurrently under one coordinator and share its cancellation signal.

mod batch;
mod coordinator;
mod error;
mod flow;
mod importer;
mod importers;
mod keys;
mod nullable;
mod pipeline;
mod source;
mod statement;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::ImportSummary;
pub use error::ImportError;
pub use flow::{run_flow, Flow, FlowError};
pub use pipeline::{CommitGranularity, PipelineSettings};
pub use store::{PgStore, Store};
