use std::collections::BTreeMap;
use std::path::Path;

use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

use crate::import::error::ImportError;
use crate::import::importer::{DomainRecord, Importer, RecordStream};
use crate::import::keys::Siren;
use crate::import::source::{json_array_records, open_file};
use crate::import::statement::{stmt, Statement, Table};
use crate::import::store::Derivation;

const MONTHS: [&str; 12] = [
    "Janvier",
    "Février",
    "Mars",
    "Avril",
    "Mai",
    "Juin",
    "Juillet",
    "Août",
    "Septembre",
    "Octobre",
    "Novembre",
    "Décembre",
];

/// One element of a published score list.
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreLine {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    siren: String,
    score: Option<f64>,
    diff: Option<f64>,
    alert: Option<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    batch: String,
    algo: Option<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    expl_selection: ExplSelection,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    macro_radar: BTreeMap<String, f64>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    redressements: Vec<String>,
    alert_pre_redressements: Option<String>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplSelection {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    select_concerning: Vec<Vec<String>>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    select_reassuring: Vec<Vec<String>>,
}

/// Display name of the list a batch belongs to: batch `2103` is `Mars 2021`.
pub fn libelle(batch: &str) -> Option<String> {
    let year = batch.get(0..2)?;
    let month: usize = batch.get(2..4)?.parse().ok()?;
    if !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let name = MONTHS.get(month.checked_sub(1)?)?;
    Some(format!("{} 20{}", name, year))
}

#[derive(Debug)]
pub struct ScoreEntry {
    siren: Siren,
    libelle: String,
    line: ScoreLine,
}

impl ScoreEntry {
    fn validate(line: ScoreLine) -> Option<DomainRecord> {
        let siren = Siren::parse_strict(&line.siren)?;
        let libelle = libelle(&line.batch)?;
        Some(DomainRecord::Score(ScoreEntry {
            siren,
            libelle,
            line,
        }))
    }

    pub fn into_statements(self) -> Vec<Statement> {
        let ScoreEntry {
            siren,
            libelle,
            line,
        } = self;
        vec![stmt!(
            Table::ScoreStaging,
            &siren,
            libelle,
            line.batch,
            line.algo,
            line.score,
            line.diff,
            line.alert,
            serde_json::Value::from(line.expl_selection.select_concerning),
            serde_json::Value::from(line.expl_selection.select_reassuring),
            line.macro_radar.into_iter().collect::<serde_json::Value>(),
            line.alert_pre_redressements,
            line.redressements,
        )]
    }
}

/// Imports the score list of one algorithm and publishes it on commit.
pub struct ScoreImporter {
    algo: String,
}

impl ScoreImporter {
    pub fn new(algo: impl Into<String>) -> Self {
        ScoreImporter { algo: algo.into() }
    }
}

#[async_trait::async_trait]
impl Importer for ScoreImporter {
    fn get_name(&self) -> &str {
        "listes"
    }

    fn get_tables(&self) -> &'static [Table] {
        &[Table::ScoreStaging]
    }

    async fn open(&self, path: &Path) -> Result<RecordStream, ImportError> {
        let reader = open_file(path).await?;
        Ok(json_array_records::<ScoreLine, _>(reader, path.to_path_buf())
            .map_ok(ScoreEntry::validate)
            .boxed())
    }

    fn derivation(&self) -> Option<Derivation> {
        Some(Derivation::PublishScores {
            algo: self.algo.clone(),
        })
    }
}
