use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

use super::{Derivation, Store, TransactionScope};
use crate::import::batch::Batch;
use crate::import::error::ImportError;
use crate::import::statement::{Statement, Table, Value};

static MAX_BIND_VALUES: usize = 65535;
static MAX_ROWS_PER_QUERY: usize = 10000;

// K (consolidated) balance sheets win over the others for the same closing date
const DIANE_FROM_BCE: &str = r#"
INSERT INTO entreprise_diane (siren, arrete_bilan_diane, exercice_diane, chiffre_affaire,
    resultat_expl, excedent_brut_d_exploitation, benefice_ou_perte)
SELECT siren,
    date_cloture_exercice,
    extract(year FROM date_cloture_exercice - interval '6 months'),
    round((array_agg(chiffre_d_affaires ORDER BY type_bilan != 'K')
        FILTER (WHERE chiffre_d_affaires IS NOT NULL))[1] / 1000.0),
    round((array_agg(ebit ORDER BY type_bilan != 'K')
        FILTER (WHERE ebit IS NOT NULL))[1] / 1000.0),
    round((array_agg(ebe ORDER BY type_bilan != 'K')
        FILTER (WHERE ebe IS NOT NULL))[1] / 1000.0),
    round((array_agg(resultat_net ORDER BY type_bilan != 'K')
        FILTER (WHERE resultat_net IS NOT NULL))[1] / 1000.0)
FROM entreprise_bce
GROUP BY siren, date_cloture_exercice
"#;

const UNPUBLISH_SCORES: &str = r#"
DELETE FROM score
WHERE algo = $1 AND batch IN (SELECT DISTINCT batch FROM score_staging)
"#;

const PUBLISH_SCORES: &str = r#"
INSERT INTO score (siret, siren, libelle_liste, batch, algo, periode, score, diff, alert,
    expl_selection_concerning, expl_selection_reassuring, macro_radar, redressements,
    alert_pre_redressements)
SELECT e.siret, t.siren, t.libelle_liste, t.batch, $1, current_date, t.score, t.diff, t.alert,
    t.expl_selection_concerning, t.expl_selection_reassuring, t.macro_radar, t.redressements,
    t.alert_pre_redressements
FROM score_staging t
INNER JOIN etablissement e ON e.siren = t.siren AND e.siege
"#;

const PUBLISH_LISTE: &str = r#"
INSERT INTO liste (libelle, batch, algo)
SELECT DISTINCT libelle_liste, batch, $1 FROM score_staging
ON CONFLICT DO NOTHING
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>, ImportError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgScope { tx }))
    }

    async fn truncate(&self, tables: &[Table]) -> Result<(), ImportError> {
        if let Some(sql) = truncate_sql(tables) {
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn reclaim_space(&self) -> Result<(), ImportError> {
        // VACUUM refuses to run inside a transaction block
        sqlx::raw_sql("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl TransactionScope for PgScope {
    async fn truncate(&mut self, tables: &[Table]) -> Result<(), ImportError> {
        if let Some(sql) = truncate_sql(tables) {
            sqlx::query(&sql).execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, batch: &Batch) -> Result<(), ImportError> {
        // consecutive statements on the same table become one multi-row insert
        for run in batch
            .statements()
            .chunk_by(|a, b| a.table() == b.table())
        {
            let table = run[0].table();
            let rows_per_query = (MAX_BIND_VALUES / table.columns().len()).min(MAX_ROWS_PER_QUERY);
            for rows in run.chunks(rows_per_query) {
                let mut qb = insert_query(table, rows);
                qb.build().execute(&mut *self.tx).await?;
            }
        }
        debug!(
            seq = batch.seq(),
            records = batch.records(),
            statements = batch.len(),
            "applied batch"
        );
        Ok(())
    }

    async fn derive(&mut self, derivation: &Derivation) -> Result<(), ImportError> {
        match derivation {
            Derivation::DianeFromBce => {
                if let Some(sql) = truncate_sql(&[Table::EntrepriseDiane]) {
                    sqlx::query(&sql).execute(&mut *self.tx).await?;
                }
                let rows = sqlx::query(DIANE_FROM_BCE).execute(&mut *self.tx).await?;
                debug!(rows = rows.rows_affected(), "rebuilt entreprise_diane");
            }
            Derivation::PublishScores { algo } => {
                for sql in [UNPUBLISH_SCORES, PUBLISH_SCORES, PUBLISH_LISTE] {
                    sqlx::query(sql).bind(algo.as_str()).execute(&mut *self.tx).await?;
                }
                debug!(algo = %algo, "published score list");
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ImportError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ImportError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn truncate_sql(tables: &[Table]) -> Option<String> {
    if tables.is_empty() {
        return None;
    }
    let names: Vec<&str> = tables.iter().map(Table::name).collect();
    Some(format!("TRUNCATE TABLE {}", names.join(", ")))
}

fn insert_query(table: Table, rows: &[Statement]) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        table.name(),
        table.columns().join(", ")
    ));
    qb.push_values(rows, |mut b, statement| {
        for value in statement.values() {
            match value {
                Value::Text(v) => b.push_bind(v.clone()),
                Value::Int(v) => b.push_bind(*v),
                Value::Float(v) => b.push_bind(*v),
                Value::Bool(v) => b.push_bind(*v),
                Value::Date(v) => b.push_bind(*v),
                Value::Json(v) => b.push_bind(v.clone()),
                Value::TextArray(v) => b.push_bind(v.clone()),
            };
        }
    });
    qb
}
