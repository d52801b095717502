use std::path::Path;

use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;

use crate::import::error::ImportError;
use crate::import::importer::{DomainRecord, Importer, RecordStream};
use crate::import::keys::Siren;
use crate::import::nullable::{compact_date, nullable, nullable_decimal};
use crate::import::source::{csv_records, open_file, CsvRow};
use crate::import::statement::{stmt, Statement, Table};
use crate::import::store::Derivation;

/// A row of the published balance-sheet ratios. Headers carry the target
/// column names; amounts are whole euros, ratios may use a decimal comma.
#[derive(Debug, Deserialize)]
struct BceRow {
    #[serde(default)]
    siren: String,
    #[serde(deserialize_with = "compact_date")]
    date_cloture_exercice: NaiveDate,
    #[serde(default, deserialize_with = "nullable")]
    chiffre_d_affaires: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    marge_brute: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    ebe: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    ebit: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    resultat_net: Option<i64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    taux_d_endettement: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    ratio_de_liquidite: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    ratio_de_vetuste: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    autonomie_financiere: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    poids_bfr_exploitation_sur_ca: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    couverture_des_interets: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    caf_sur_ca: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    capacite_de_remboursement: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    marge_ebe: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    resultat_courant_avant_impots_sur_ca: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    poids_bfr_exploitation_sur_ca_jours: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    rotation_des_stocks_jours: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    credit_clients_jours: Option<f64>,
    #[serde(default, deserialize_with = "nullable_decimal")]
    credit_fournisseurs_jours: Option<f64>,
    #[serde(default, deserialize_with = "nullable")]
    type_bilan: Option<String>,
}

#[derive(Debug)]
pub struct BalanceSheet {
    siren: Siren,
    row: BceRow,
}

impl BalanceSheet {
    fn validate((row, headers): CsvRow) -> Option<DomainRecord> {
        let row: BceRow = row.deserialize(Some(headers.as_ref())).ok()?;
        let siren = Siren::new(&row.siren)?;
        Some(DomainRecord::BalanceSheet(BalanceSheet { siren, row }))
    }

    pub fn into_statements(self) -> Vec<Statement> {
        let BalanceSheet { siren, row } = self;
        vec![stmt!(
            Table::EntrepriseBce,
            &siren,
            row.date_cloture_exercice,
            row.chiffre_d_affaires,
            row.marge_brute,
            row.ebe,
            row.ebit,
            row.resultat_net,
            row.taux_d_endettement,
            row.ratio_de_liquidite,
            row.ratio_de_vetuste,
            row.autonomie_financiere,
            row.poids_bfr_exploitation_sur_ca,
            row.couverture_des_interets,
            row.caf_sur_ca,
            row.capacite_de_remboursement,
            row.marge_ebe,
            row.resultat_courant_avant_impots_sur_ca,
            row.poids_bfr_exploitation_sur_ca_jours,
            row.rotation_des_stocks_jours,
            row.credit_clients_jours,
            row.credit_fournisseurs_jours,
            row.type_bilan,
        )]
    }
}

pub struct BceImporter;

#[async_trait::async_trait]
impl Importer for BceImporter {
    fn get_name(&self) -> &str {
        "bce"
    }

    fn get_tables(&self) -> &'static [Table] {
        &[Table::EntrepriseBce]
    }

    async fn open(&self, path: &Path) -> Result<RecordStream, ImportError> {
        let reader = open_file(path).await?;
        Ok(csv_records(reader, path.to_path_buf(), b';')
            .await?
            .map_ok(BalanceSheet::validate)
            .boxed())
    }

    fn derivation(&self) -> Option<Derivation> {
        Some(Derivation::DianeFromBce)
    }
}
