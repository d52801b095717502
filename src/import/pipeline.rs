use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch::{Batch, BatchAccumulator};
use super::error::ImportError;
use super::importer::Importer;
use super::statement::Table;
use super::store::{Derivation, Store, TransactionScope};

/// When the apply worker makes its writes durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitGranularity {
    /// One scope for the whole file, committed after the last batch.
    WholeFile,
    /// A scope per this many consecutive batches.
    PerChunk(usize),
}

impl CommitGranularity {
    /// Chunks are configured in records and applied in whole batches.
    pub fn per_chunk_records(chunk_records: usize, batch_size: usize) -> Self {
        CommitGranularity::PerChunk(chunk_records.div_ceil(batch_size.max(1)).max(1))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub max_batch_statements: usize,
    pub channel_capacity: usize,
    pub granularity: CommitGranularity,
    pub progress_interval: Duration,
}

/// Counters of one finished pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub name: String,
    pub records: u64,
    pub skipped: u64,
    pub statements: u64,
    pub batches: u64,
    pub chunks: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy)]
enum PipelineState {
    Decoding,
    Draining,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Decoding => "decoding",
            PipelineState::Draining => "draining",
            PipelineState::Committing => "committing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct Counters {
    records: AtomicU64,
    skipped: AtomicU64,
    statements: AtomicU64,
    batches: AtomicU64,
    chunks: AtomicU64,
}

impl Counters {
    fn report(&self, name: &str, elapsed: Duration) -> PipelineReport {
        PipelineReport {
            name: name.to_string(),
            records: self.records.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            statements: self.statements.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Imports one file: a producer task decodes, filters and batches records
/// while this task applies the batches in order.
///
/// `cancel` is shared with sibling pipelines. It is observed between records
/// and while waiting on the channel, and is signalled by this pipeline when
/// it fails.
pub async fn run_pipeline(
    importer: Arc<dyn Importer>,
    path: PathBuf,
    store: Arc<dyn Store>,
    settings: PipelineSettings,
    cancel: CancellationToken,
) -> Result<PipelineReport, ImportError> {
    let start = Instant::now();
    let name = importer.get_name().to_string();
    let counters = Arc::new(Counters::default());
    info!(
        pipeline = %name,
        path = %path.display(),
        batch_size = settings.batch_size,
        granularity = ?settings.granularity,
        "starting import"
    );

    let (tx, rx) = mpsc::channel(settings.channel_capacity.max(1));
    let tables = importer.get_tables();
    let derivation = importer.derivation();
    let producer = Producer {
        name: name.clone(),
        importer,
        path,
        settings: settings.clone(),
        counters: counters.clone(),
        cancel: cancel.clone(),
    };
    let producer = tokio::spawn(producer.run(tx));

    let mut worker = ApplyWorker {
        name: name.clone(),
        store,
        tables,
        granularity: settings.granularity,
        scope: None,
        batches_in_scope: 0,
        counters: counters.clone(),
        cancel: cancel.clone(),
    };
    let applied = worker.consume(rx).await;
    let produced = match producer.await {
        Ok(produced) => produced,
        Err(e) => {
            cancel.cancel();
            Err(ImportError::from(e))
        }
    };

    let outcome = match (applied, produced) {
        (Err(e), _) if !e.is_cancelled() => Err(e),
        (_, Err(e)) if !e.is_cancelled() => Err(e),
        (Err(e), _) | (_, Err(e)) => Err(e),
        (Ok(()), Ok(())) if cancel.is_cancelled() => Err(ImportError::Cancelled),
        (Ok(()), Ok(())) => Ok(()),
    };

    let outcome = match outcome {
        Ok(()) => {
            debug!(pipeline = %name, state = %PipelineState::Committing);
            worker.finish(derivation).await
        }
        Err(e) => {
            worker.rollback_open_scope().await;
            Err(e)
        }
    };

    let report = counters.report(&name, start.elapsed());
    match outcome {
        Ok(()) => {
            debug!(pipeline = %name, state = %PipelineState::Done);
            info!(
                pipeline = %name,
                records = report.records,
                skipped = report.skipped,
                batches = report.batches,
                chunks = report.chunks,
                "imported in {:?}",
                report.elapsed
            );
            Ok(report)
        }
        Err(e) => {
            debug!(pipeline = %name, state = %PipelineState::Failed);
            if e.is_cancelled() {
                warn!(pipeline = %name, records = report.records, "import cancelled");
            } else {
                error!(pipeline = %name, records = report.records, "import failed: {}", e);
            }
            Err(e)
        }
    }
}

struct Producer {
    name: String,
    importer: Arc<dyn Importer>,
    path: PathBuf,
    settings: PipelineSettings,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl Producer {
    async fn run(self, tx: mpsc::Sender<Batch>) -> Result<(), ImportError> {
        let result = self.produce(&tx).await;
        if let Err(e) = &result {
            if !e.is_cancelled() {
                self.cancel.cancel();
            }
        }
        result
    }

    async fn produce(&self, tx: &mpsc::Sender<Batch>) -> Result<(), ImportError> {
        debug!(pipeline = %self.name, state = %PipelineState::Decoding);
        let mut records = self.importer.open(&self.path).await?;
        let mut accumulator =
            BatchAccumulator::new(self.settings.batch_size, self.settings.max_batch_statements);
        let mut last_log = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ImportError::Cancelled),
                next = records.next() => next,
            };
            let Some(record) = next else {
                break;
            };

            match record? {
                Some(record) => {
                    self.counters.records.fetch_add(1, Ordering::Relaxed);
                    let statements = record.into_statements();
                    self.counters
                        .statements
                        .fetch_add(statements.len() as u64, Ordering::Relaxed);
                    for batch in accumulator.push(statements) {
                        self.dispatch(tx, batch).await?;
                    }
                }
                None => {
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }

            if last_log.elapsed() > self.settings.progress_interval {
                info!(
                    pipeline = %self.name,
                    records = self.counters.records.load(Ordering::Relaxed),
                    skipped = self.counters.skipped.load(Ordering::Relaxed),
                    batches = self.counters.batches.load(Ordering::Relaxed),
                    "import progress"
                );
                last_log = Instant::now();
            }
        }

        if let Some(batch) = accumulator.finish() {
            self.dispatch(tx, batch).await?;
        }
        debug!(pipeline = %self.name, state = %PipelineState::Draining);
        Ok(())
    }

    /// Blocks while the channel is full.
    async fn dispatch(&self, tx: &mpsc::Sender<Batch>, batch: Batch) -> Result<(), ImportError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ImportError::Cancelled),
            sent = tx.send(batch) => sent.map_err(|_| ImportError::ChannelClosed),
        }
    }
}

/// The single consumer of a pipeline's batches.
struct ApplyWorker {
    name: String,
    store: Arc<dyn Store>,
    tables: &'static [Table],
    granularity: CommitGranularity,
    scope: Option<Box<dyn TransactionScope>>,
    batches_in_scope: usize,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl ApplyWorker {
    /// Applies batches until the channel closes. After a failure, or once
    /// cancelled, remaining batches are received and discarded so the
    /// producer never blocks on a dead consumer.
    async fn consume(&mut self, mut rx: mpsc::Receiver<Batch>) -> Result<(), ImportError> {
        let mut result = match self.granularity {
            CommitGranularity::WholeFile => self.open_whole_file_scope().await,
            CommitGranularity::PerChunk(_) => Ok(()),
        };
        if result.is_err() {
            self.cancel.cancel();
        }

        while let Some(batch) = rx.recv().await {
            if result.is_err() || self.cancel.is_cancelled() {
                continue;
            }
            if let Err(e) = self.apply(batch).await {
                self.cancel.cancel();
                result = Err(e);
            }
        }
        result
    }

    /// The target tables are emptied inside the scope so readers keep the
    /// previous data until commit.
    async fn open_whole_file_scope(&mut self) -> Result<(), ImportError> {
        let mut scope = self.store.begin().await?;
        if let Err(e) = scope.truncate(self.tables).await {
            rollback(&self.name, scope).await;
            return Err(e);
        }
        self.scope = Some(scope);
        Ok(())
    }

    async fn apply(&mut self, batch: Batch) -> Result<(), ImportError> {
        let mut scope = match self.scope.take() {
            Some(scope) => scope,
            None => self.store.begin().await?,
        };

        if let Err(e) = scope.execute(&batch).await {
            rollback(&self.name, scope).await;
            return Err(e);
        }
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.batches_in_scope += 1;

        let granularity = self.granularity;
        match granularity {
            CommitGranularity::PerChunk(n) if self.batches_in_scope >= n => self.commit(scope).await,
            _ => {
                self.scope = Some(scope);
                Ok(())
            }
        }
    }

    async fn commit(&mut self, scope: Box<dyn TransactionScope>) -> Result<(), ImportError> {
        scope.commit().await?;
        let chunks = self.counters.chunks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            pipeline = %self.name,
            chunk = chunks,
            batches = self.batches_in_scope,
            "committed chunk"
        );
        self.batches_in_scope = 0;
        Ok(())
    }

    /// Commits the open scope, running the importer's derivation in it
    /// first. Per-chunk imports may have no scope left open, in which case
    /// the derivation gets a scope of its own.
    async fn finish(&mut self, derivation: Option<Derivation>) -> Result<(), ImportError> {
        let Some(derivation) = derivation else {
            return match self.scope.take() {
                Some(scope) => self.commit(scope).await,
                None => Ok(()),
            };
        };

        let mut scope = match self.scope.take() {
            Some(scope) => scope,
            None => self.store.begin().await?,
        };
        if let Err(e) = scope.derive(&derivation).await {
            rollback(&self.name, scope).await;
            return Err(e);
        }
        info!(pipeline = %self.name, derivation = ?derivation, "derived tables");
        self.commit(scope).await
    }

    async fn rollback_open_scope(&mut self) {
        if let Some(scope) = self.scope.take() {
            rollback(&self.name, scope).await;
        }
    }
}

async fn rollback(name: &str, scope: Box<dyn TransactionScope>) {
    if let Err(e) = scope.rollback().await {
        warn!(pipeline = %name, "rollback failed: {}", e);
    }
}
