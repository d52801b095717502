use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::coordinator::{ImportCoordinator, ImportJob, ImportSummary};
use super::error::ImportError;
use super::importers::{
    BceImporter, EntrepriseImporter, EtablissementImporter, GeoSireneImporter, ScoreImporter,
    SireneUlImporter,
};
use super::store::Store;
use crate::config::{GranularityKind, ImportConfig};

/// A named set of source files imported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Company and establishment documents.
    EntreprisesEtablissements,
    /// Legal-unit and geolocated establishment registries.
    Sirene,
    /// Published balance-sheet ratios.
    Bce,
    /// The score list of one algorithm.
    Listes(String),
    /// `EntreprisesEtablissements` then `Sirene`, then the score list of the
    /// algorithm when one is named.
    Full(Option<String>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("unknown import flow {0:?}")]
    Unknown(String),
    #[error("the {0} flow requires an algorithm name")]
    MissingAlgo(&'static str),
    #[error("the {0} flow does not take an algorithm name")]
    UnexpectedAlgo(&'static str),
}

impl Flow {
    /// Resolves a flow from its name and the optional algorithm segment of
    /// the trigger path.
    pub fn new(name: &str, algo: Option<&str>) -> Result<Self, FlowError> {
        let algo = algo.map(str::trim).filter(|algo| !algo.is_empty());
        match (name, algo) {
            ("listes", Some(algo)) => Ok(Flow::Listes(algo.to_string())),
            ("listes", None) => Err(FlowError::MissingAlgo("listes")),
            ("full", algo) => Ok(Flow::Full(algo.map(str::to_string))),
            ("ee", None) => Ok(Flow::EntreprisesEtablissements),
            ("sirene", None) => Ok(Flow::Sirene),
            ("bce", None) => Ok(Flow::Bce),
            ("ee", Some(_)) => Err(FlowError::UnexpectedAlgo("ee")),
            ("sirene", Some(_)) => Err(FlowError::UnexpectedAlgo("sirene")),
            ("bce", Some(_)) => Err(FlowError::UnexpectedAlgo("bce")),
            (other, _) => Err(FlowError::Unknown(other.to_string())),
        }
    }
}

impl FromStr for Flow {
    type Err = FlowError;

    /// Accepts `name` or `name/algo`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((name, algo)) => Flow::new(name, Some(algo)),
            None => Flow::new(s, None),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::EntreprisesEtablissements => f.write_str("ee"),
            Flow::Sirene => f.write_str("sirene"),
            Flow::Bce => f.write_str("bce"),
            Flow::Listes(algo) => write!(f, "listes/{}", algo),
            Flow::Full(None) => f.write_str("full"),
            Flow::Full(Some(algo)) => write!(f, "full/{}", algo),
        }
    }
}

struct Step {
    flow: Flow,
    commit: GranularityKind,
    jobs: Vec<ImportJob>,
}

fn required(path: &Option<PathBuf>, variable: &str, flow: &Flow) -> Result<PathBuf, ImportError> {
    path.clone().ok_or_else(|| {
        ImportError::Configuration(format!("{} import requires {} to be set", flow, variable))
    })
}

fn step(flow: Flow, config: &ImportConfig) -> Result<Step, ImportError> {
    let sources = &config.sources;
    let (commit, jobs) = match &flow {
        Flow::EntreprisesEtablissements => (
            config.ee_commit,
            vec![
                ImportJob::new(
                    EntrepriseImporter,
                    required(&sources.entreprise, "SOURCE_ENTREPRISE", &flow)?,
                ),
                ImportJob::new(
                    EtablissementImporter,
                    required(&sources.etablissement, "SOURCE_ETABLISSEMENT", &flow)?,
                ),
            ],
        ),
        Flow::Sirene => (
            config.sirene_commit,
            vec![
                ImportJob::new(
                    SireneUlImporter,
                    required(&sources.sirene_ul, "SIRENE_UL_PATH", &flow)?,
                ),
                ImportJob::new(
                    GeoSireneImporter,
                    required(&sources.geo_sirene, "GEO_SIRENE_PATH", &flow)?,
                ),
            ],
        ),
        Flow::Bce => (
            config.bce_commit,
            vec![ImportJob::new(
                BceImporter,
                required(&sources.bce, "BCE_SOURCE_PATH", &flow)?,
            )],
        ),
        // a list is staged and published in a single scope
        Flow::Listes(algo) => (
            GranularityKind::WholeFile,
            vec![ImportJob::new(
                ScoreImporter::new(algo.as_str()),
                required(&sources.liste, "SOURCE_LISTE", &flow)?,
            )],
        ),
        Flow::Full(_) => {
            return Err(ImportError::Configuration(
                "full is a sequence of flows".to_string(),
            ))
        }
    };
    Ok(Step { flow, commit, jobs })
}

/// Resolves every step up front so a flow with missing sources is refused
/// before anything is truncated.
fn plan(flow: Flow, config: &ImportConfig) -> Result<Vec<Step>, ImportError> {
    match flow {
        Flow::Full(algo) => [Flow::EntreprisesEtablissements, Flow::Sirene]
            .into_iter()
            .chain(algo.map(Flow::Listes))
            .map(|flow| step(flow, config))
            .collect(),
        flow => Ok(vec![step(flow, config)?]),
    }
}

/// Runs a flow to completion. Steps of `full` run one after the other and
/// the first failing step ends the flow.
pub async fn run_flow(
    flow: Flow,
    config: &ImportConfig,
    store: Arc<dyn Store>,
    cancel: &CancellationToken,
) -> Result<ImportSummary, ImportError> {
    let steps = plan(flow, config)?;
    let mut summary = ImportSummary::default();
    for step in steps {
        info!(
            flow = %step.flow,
            sources = ?source_paths(&step.flow, config),
            "starting import flow"
        );
        let coordinator = ImportCoordinator::new(store.clone(), config.settings(step.commit));
        summary.merge(coordinator.run(step.jobs, cancel).await?);
        info!(flow = %step.flow, "import flow complete");
    }
    Ok(summary)
}

/// Paths of a flow's sources, for logging and error messages.
pub fn source_paths<'a>(flow: &Flow, config: &'a ImportConfig) -> Vec<&'a Path> {
    let sources = &config.sources;
    let paths = match flow {
        Flow::EntreprisesEtablissements => vec![&sources.entreprise, &sources.etablissement],
        Flow::Sirene => vec![&sources.sirene_ul, &sources.geo_sirene],
        Flow::Bce => vec![&sources.bce],
        Flow::Listes(_) => vec![&sources.liste],
        Flow::Full(algo) => {
            let mut paths = vec![
                &sources.entreprise,
                &sources.etablissement,
                &sources.sirene_ul,
                &sources.geo_sirene,
            ];
            if algo.is_some() {
                paths.push(&sources.liste);
            }
            paths
        }
    };
    paths.into_iter().flatten().map(PathBuf::as_path).collect()
}
