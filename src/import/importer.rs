use std::path::Path;

use futures::stream::BoxStream;

use super::error::ImportError;
use super::importers::{
    bce::BalanceSheet, entreprise::Entreprise, etablissement::Etablissement,
    geo_sirene::GeoEtablissement, score::ScoreEntry, sirene_ul::LegalUnit,
};
use super::statement::{Statement, Table};
use super::store::Derivation;

/// One validated record decoded from a source file.
#[derive(Debug)]
pub enum DomainRecord {
    Entreprise(Entreprise),
    Etablissement(Etablissement),
    LegalUnit(LegalUnit),
    GeoEtablissement(GeoEtablissement),
    BalanceSheet(BalanceSheet),
    Score(ScoreEntry),
}

impl DomainRecord {
    /// Maps the record and its nested collections to insert statements,
    /// parent rows first.
    pub fn into_statements(self) -> Vec<Statement> {
        match self {
            DomainRecord::Entreprise(record) => record.into_statements(),
            DomainRecord::Etablissement(record) => record.into_statements(),
            DomainRecord::LegalUnit(record) => record.into_statements(),
            DomainRecord::GeoEtablissement(record) => record.into_statements(),
            DomainRecord::BalanceSheet(record) => record.into_statements(),
            DomainRecord::Score(record) => record.into_statements(),
        }
    }
}

/// Records decoded from one file. `Ok(None)` marks a record that failed its
/// validity filter.
pub type RecordStream = BoxStream<'static, Result<Option<DomainRecord>, ImportError>>;

#[async_trait::async_trait]
pub trait Importer: Send + Sync {
    fn get_name(&self) -> &str;

    /// Every table this importer writes to. They are truncated before a run.
    fn get_tables(&self) -> &'static [Table];

    async fn open(&self, path: &Path) -> Result<RecordStream, ImportError>;

    /// Run after the last batch, in the same scope when the whole file is
    /// committed at once.
    fn derivation(&self) -> Option<Derivation> {
        None
    }
}
