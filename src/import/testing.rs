//! In-memory store and synthetic sources for pipeline tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Datelike, Months, NaiveDate};
use futures::{stream, StreamExt};
use tokio::sync::Semaphore;

use super::batch::Batch;
use super::error::ImportError;
use super::importer::{DomainRecord, Importer, RecordStream};
use super::importers::sirene_ul::LegalUnit;
use super::keys::Siren;
use super::statement::{Statement, Table, Value};
use super::store::{Derivation, Store, TransactionScope};

#[derive(Default)]
struct MemoryState {
    tables: HashMap<Table, Vec<Vec<Value>>>,
    batch_sizes: Vec<usize>,
    executes: usize,
    commits: usize,
    rollbacks: usize,
    reclaims: usize,
    observed_at_failure: Option<usize>,
}

/// Rows become visible only when their scope commits.
#[derive(Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_on_execute: Option<usize>,
    observe_on_failure: Option<Arc<AtomicUsize>>,
    fail_reclaim: bool,
    gate: Option<Arc<Semaphore>>,
}

impl MemoryStore {
    /// Fails the `n`th execute across all scopes, counting from one.
    pub fn fail_on_execute(mut self, n: usize) -> Self {
        self.fail_on_execute = Some(n);
        self
    }

    /// Reads `counter` when the injected execute failure fires.
    pub fn observe_on_failure(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.observe_on_failure = Some(counter);
        self
    }

    /// Value of the observed counter when the injected failure fired.
    pub fn observed_at_failure(&self) -> Option<usize> {
        self.state.lock().unwrap().observed_at_failure
    }

    pub fn fail_reclaim(mut self) -> Self {
        self.fail_reclaim = true;
        self
    }

    /// Blocks every execute until [`MemoryStore::open_gate`] is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Adds a committed row, as if imported earlier.
    pub fn seed_row(&self, table: Table, values: Vec<Value>) {
        let mut state = self.state.lock().unwrap();
        state.tables.entry(table).or_default().push(values);
    }

    /// Every committed row of `table`, in insertion order.
    pub fn rows(&self, table: Table) -> Vec<Vec<Value>> {
        let state = self.state.lock().unwrap();
        state.tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn seed(&self, table: Table, key: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .entry(table)
            .or_default()
            .push(vec![Value::from(key)]);
    }

    /// First column of every committed row, in insertion order.
    pub fn keys(&self, table: Table) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| match row.first() {
                        Some(Value::Text(Some(key))) => Some(key.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Statement count of every successfully executed batch.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().batch_sizes.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }

    pub fn reclaims(&self) -> usize {
        self.state.lock().unwrap().reclaims
    }
}

fn injected() -> ImportError {
    ImportError::Store(sqlx::Error::Protocol("injected failure".to_string()))
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>, ImportError> {
        Ok(Box::new(MemoryScope {
            state: self.state.clone(),
            fail_on_execute: self.fail_on_execute,
            observe_on_failure: self.observe_on_failure.clone(),
            gate: self.gate.clone(),
            truncated: Vec::new(),
            pending: Vec::new(),
            derivations: Vec::new(),
        }))
    }

    async fn truncate(&self, tables: &[Table]) -> Result<(), ImportError> {
        let mut state = self.state.lock().unwrap();
        for table in tables {
            state.tables.remove(table);
        }
        Ok(())
    }

    async fn reclaim_space(&self) -> Result<(), ImportError> {
        if self.fail_reclaim {
            return Err(injected());
        }
        self.state.lock().unwrap().reclaims += 1;
        Ok(())
    }
}

struct MemoryScope {
    state: Arc<Mutex<MemoryState>>,
    fail_on_execute: Option<usize>,
    observe_on_failure: Option<Arc<AtomicUsize>>,
    gate: Option<Arc<Semaphore>>,
    truncated: Vec<Table>,
    pending: Vec<Statement>,
    derivations: Vec<Derivation>,
}

#[async_trait::async_trait]
impl TransactionScope for MemoryScope {
    async fn truncate(&mut self, tables: &[Table]) -> Result<(), ImportError> {
        self.truncated.extend_from_slice(tables);
        self.pending.retain(|s| !tables.contains(&s.table()));
        Ok(())
    }

    async fn execute(&mut self, batch: &Batch) -> Result<(), ImportError> {
        if let Some(gate) = &self.gate {
            drop(gate.acquire().await.unwrap());
        }
        let mut state = self.state.lock().unwrap();
        state.executes += 1;
        if Some(state.executes) == self.fail_on_execute {
            state.observed_at_failure = self
                .observe_on_failure
                .as_ref()
                .map(|counter| counter.load(Ordering::SeqCst));
            return Err(injected());
        }
        state.batch_sizes.push(batch.len());
        self.pending.extend_from_slice(batch.statements());
        Ok(())
    }

    async fn derive(&mut self, derivation: &Derivation) -> Result<(), ImportError> {
        self.derivations.push(derivation.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ImportError> {
        let mut state = self.state.lock().unwrap();
        for table in &self.truncated {
            state.tables.remove(table);
        }
        for statement in self.pending {
            state
                .tables
                .entry(statement.table())
                .or_default()
                .push(statement.values().to_vec());
        }
        for derivation in &self.derivations {
            match derivation {
                Derivation::DianeFromBce => diane_from_bce(&mut state.tables),
                Derivation::PublishScores { algo } => publish_scores(&mut state.tables, algo),
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ImportError> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

fn column(table: Table, name: &str) -> usize {
    table
        .columns()
        .iter()
        .position(|c| *c == name)
        .unwrap_or_else(|| panic!("{} has no column {}", table.name(), name))
}

fn text(value: &Value) -> Option<&str> {
    match value {
        Value::Text(Some(s)) => Some(s),
        _ => None,
    }
}

fn diane_from_bce(tables: &mut HashMap<Table, Vec<Vec<Value>>>) {
    let bce = Table::EntrepriseBce;
    let (siren, closing, type_bilan) = (
        column(bce, "siren"),
        column(bce, "date_cloture_exercice"),
        column(bce, "type_bilan"),
    );

    let mut groups: BTreeMap<(String, NaiveDate), Vec<&Vec<Value>>> = BTreeMap::new();
    for row in tables.get(&bce).into_iter().flatten() {
        if let (Some(s), Value::Date(Some(d))) = (text(&row[siren]), &row[closing]) {
            groups.entry((s.to_string(), *d)).or_default().push(row);
        }
    }

    let diane = Table::EntrepriseDiane;
    let mut rows = Vec::new();
    for ((s, date), mut sheets) in groups {
        // consolidated first, then other types, then untyped
        sheets.sort_by_key(|row| match text(&row[type_bilan]) {
            Some("K") => 0,
            Some(_) => 1,
            None => 2,
        });
        let first = |name: &str| {
            let i = column(bce, name);
            sheets.iter().find_map(|row| match row[i] {
                Value::Int(Some(v)) => Some((v as f64 / 1000.0).round()),
                _ => None,
            })
        };

        let mut values = vec![Value::Float(None); diane.columns().len()];
        values[column(diane, "siren")] = Value::from(s.as_str());
        values[column(diane, "arrete_bilan_diane")] = Value::from(date);
        values[column(diane, "exercice_diane")] = Value::Float(
            date.checked_sub_months(Months::new(6))
                .map(|d| f64::from(d.year())),
        );
        values[column(diane, "chiffre_affaire")] = Value::Float(first("chiffre_d_affaires"));
        values[column(diane, "resultat_expl")] = Value::Float(first("ebit"));
        values[column(diane, "excedent_brut_d_exploitation")] = Value::Float(first("ebe"));
        values[column(diane, "benefice_ou_perte")] = Value::Float(first("resultat_net"));
        values[column(diane, "procedure_collective")] = Value::Bool(None);
        values[column(diane, "statut_juridique")] = Value::Text(None);
        rows.push(values);
    }
    tables.insert(diane, rows);
}

fn publish_scores(tables: &mut HashMap<Table, Vec<Vec<Value>>>, algo: &str) {
    let etablissement = Table::Etablissement;
    let (siret, siren, siege) = (
        column(etablissement, "siret"),
        column(etablissement, "siren"),
        column(etablissement, "siege"),
    );
    let head_offices: Vec<(String, String)> = tables
        .get(&etablissement)
        .into_iter()
        .flatten()
        .filter(|row| row[siege] == Value::Bool(Some(true)))
        .filter_map(|row| Some((text(&row[siren])?.to_string(), text(&row[siret])?.to_string())))
        .collect();

    let staging = Table::ScoreStaging;
    let staged = tables.get(&staging).cloned().unwrap_or_default();
    let get = |row: &Vec<Value>, name: &str| row[column(staging, name)].clone();
    let batches: Vec<Value> = staged.iter().map(|row| get(row, "batch")).collect();

    let score = Table::Score;
    let scores = tables.entry(score).or_default();
    scores.retain(|row| {
        text(&row[column(score, "algo")]) != Some(algo)
            || !batches.contains(&row[column(score, "batch")])
    });
    for row in &staged {
        let matches = head_offices
            .iter()
            .filter(|(s, _)| Some(s.as_str()) == text(&get(row, "siren")));
        for (_, head_office) in matches {
            scores.push(vec![
                Value::from(head_office.as_str()),
                get(row, "siren"),
                get(row, "libelle_liste"),
                get(row, "batch"),
                Value::from(algo),
                Value::Date(Some(chrono::Local::now().date_naive())),
                get(row, "score"),
                get(row, "diff"),
                get(row, "alert"),
                get(row, "expl_selection_concerning"),
                get(row, "expl_selection_reassuring"),
                get(row, "macro_radar"),
                get(row, "redressements"),
                get(row, "alert_pre_redressements"),
            ]);
        }
    }

    let listes = tables.entry(Table::Liste).or_default();
    for row in &staged {
        let liste = vec![get(row, "libelle_liste"), get(row, "batch"), Value::from(algo)];
        if !listes.contains(&liste) {
            listes.push(liste);
        }
    }
}

/// Yields `count` legal units with sequential identifiers, optionally
/// counting how many were pulled by the pipeline.
pub struct SyntheticImporter {
    count: usize,
    pulled: Arc<AtomicUsize>,
}

impl SyntheticImporter {
    pub fn new(count: usize) -> Self {
        SyntheticImporter {
            count,
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counting(mut self, pulled: Arc<AtomicUsize>) -> Self {
        self.pulled = pulled;
        self
    }
}

#[async_trait::async_trait]
impl Importer for SyntheticImporter {
    fn get_name(&self) -> &str {
        "synthetic"
    }

    fn get_tables(&self) -> &'static [Table] {
        &[Table::Entreprise]
    }

    async fn open(&self, _path: &Path) -> Result<RecordStream, ImportError> {
        let pulled = self.pulled.clone();
        Ok(stream::iter(0..self.count)
            .then(move |i| {
                let pulled = pulled.clone();
                async move {
                    // let sibling tasks run as a real decoder would
                    if i % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                    pulled.fetch_add(1, Ordering::SeqCst);
                    let siren = Siren::new(&format!("{:09}", i));
                    Ok::<_, ImportError>(
                        siren.map(|siren| DomainRecord::LegalUnit(LegalUnit::with_siren(siren))),
                    )
                }
            })
            .boxed())
    }
}
