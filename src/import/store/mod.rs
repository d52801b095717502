use super::batch::Batch;
use super::error::ImportError;
use super::statement::Table;

mod postgres;

pub use postgres::PgStore;

/// Set-based work run in a pipeline's last scope, after its final batch and
/// before commit, so derived tables change together with their source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derivation {
    /// Replaces `entreprise_diane` with one row per company and closing date
    /// of `entreprise_bce`, amounts in thousands of euros.
    DianeFromBce,
    /// Publishes the staged score list to `score` for every head office of a
    /// scored company, and records the list in `liste`.
    PublishScores { algo: String },
}

/// A unit of store-level atomicity, owned by exactly one apply worker.
#[async_trait::async_trait]
pub trait TransactionScope: Send {
    async fn truncate(&mut self, tables: &[Table]) -> Result<(), ImportError>;

    /// Applies every statement of the batch, in order.
    async fn execute(&mut self, batch: &Batch) -> Result<(), ImportError>;

    async fn derive(&mut self, derivation: &Derivation) -> Result<(), ImportError>;

    async fn commit(self: Box<Self>) -> Result<(), ImportError>;

    async fn rollback(self: Box<Self>) -> Result<(), ImportError>;
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>, ImportError>;

    /// Truncates outside of any scope; used before per-chunk imports.
    async fn truncate(&self, tables: &[Table]) -> Result<(), ImportError>;

    /// Reclaims space left behind by a bulk replace.
    async fn reclaim_space(&self) -> Result<(), ImportError>;
}
