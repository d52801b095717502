use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::ImportError;
use super::importer::Importer;
use super::pipeline::{run_pipeline, CommitGranularity, PipelineReport, PipelineSettings};
use super::store::Store;

/// One source file and the importer that reads it.
pub struct ImportJob {
    pub importer: Arc<dyn Importer>,
    pub path: PathBuf,
}

impl ImportJob {
    pub fn new(importer: impl Importer + 'static, path: PathBuf) -> Self {
        ImportJob {
            importer: Arc::new(importer),
            path,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub pipelines: Vec<PipelineReport>,
    /// Space reclamation runs after the data is committed, so its failure
    /// is reported without failing the import.
    pub maintenance_error: Option<String>,
}

impl ImportSummary {
    pub fn merge(&mut self, other: ImportSummary) {
        self.pipelines.extend(other.pipelines);
        if self.maintenance_error.is_none() {
            self.maintenance_error = other.maintenance_error;
        }
    }
}

/// Runs the pipelines of one invocation concurrently, sharing a single
/// cancellation signal between them.
pub struct ImportCoordinator {
    store: Arc<dyn Store>,
    settings: PipelineSettings,
}

impl ImportCoordinator {
    pub fn new(store: Arc<dyn Store>, settings: PipelineSettings) -> Self {
        ImportCoordinator { store, settings }
    }

    /// Waits for every pipeline to stop before returning. The first error
    /// that is not a cancellation wins; `Cancelled` is returned only when no
    /// pipeline failed on its own.
    pub async fn run(
        &self,
        jobs: Vec<ImportJob>,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary, ImportError> {
        let token = cancel.child_token();

        if let CommitGranularity::PerChunk(_) = self.settings.granularity {
            // chunks commit independently, so the old rows must go first
            let tables = jobs
                .iter()
                .flat_map(|job| job.importer.get_tables().iter().copied())
                .unique()
                .collect_vec();
            info!(tables = tables.len(), "truncating before per-chunk import");
            self.store.truncate(&tables).await?;
        }

        let mut set = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let store = self.store.clone();
            let settings = self.settings.clone();
            let token = token.clone();
            set.spawn(async move {
                let result = run_pipeline(job.importer, job.path, store, settings, token).await;
                (index, result)
            });
        }

        let mut reports = Vec::new();
        let mut failure: Option<ImportError> = None;
        while let Some(joined) = set.join_next().await {
            let result = match joined {
                Ok((index, result)) => result.map(|report| (index, report)),
                Err(e) => Err(ImportError::from(e)),
            };
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    token.cancel();
                    failure = match failure {
                        Some(first) if !first.is_cancelled() || e.is_cancelled() => Some(first),
                        _ => Some(e),
                    };
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let mut summary = ImportSummary {
            pipelines: reports
                .into_iter()
                .sorted_by_key(|(index, _)| *index)
                .map(|(_, report)| report)
                .collect(),
            maintenance_error: None,
        };

        if self.settings.granularity == CommitGranularity::WholeFile {
            if let Err(e) = self.store.reclaim_space().await {
                warn!("space reclamation failed after import: {}", e);
                summary.maintenance_error = Some(e.to_string());
            }
        }
        Ok(summary)
    }
}
