use std::path::Path;

use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;

use crate::import::error::ImportError;
use crate::import::importer::{DomainRecord, Importer, RecordStream};
use crate::import::keys::Siren;
use crate::import::nullable::{flag, nullable};
use crate::import::source::{csv_records, open_file, CsvRow};
use crate::import::statement::{stmt, Statement, Table};

/// A row of the legal-unit registry stock file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegalUnitRow {
    #[serde(default)]
    siren: String,
    #[serde(default, deserialize_with = "nullable")]
    nic_siege_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    denomination_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    prenom1_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    prenom2_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    prenom3_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    prenom4_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    nom_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    nom_usage_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    categorie_juridique_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    date_creation_unite_legale: Option<NaiveDate>,
    #[serde(default, deserialize_with = "nullable")]
    sigle_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    identifiant_association_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    tranche_effectifs_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    annee_effectifs_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    categorie_entreprise: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    annee_categorie_entreprise: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    etat_administratif_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    economie_sociale_solidaire_unite_legale: Option<bool>,
    #[serde(default, deserialize_with = "flag")]
    caractere_employeur_unite_legale: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    activite_principale_unite_legale: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    nomenclature_activite_principale_unite_legale: Option<String>,
}

/// A legal unit with a well-formed SIREN.
#[derive(Debug)]
pub struct LegalUnit {
    siren: Siren,
    row: LegalUnitRow,
}

impl LegalUnit {
    fn validate((row, headers): CsvRow) -> Option<DomainRecord> {
        let row: LegalUnitRow = row.deserialize(Some(headers.as_ref())).ok()?;
        let siren = Siren::parse_strict(&row.siren)?;
        Some(DomainRecord::LegalUnit(LegalUnit { siren, row }))
    }

    #[cfg(test)]
    pub fn with_siren(siren: Siren) -> Self {
        LegalUnit {
            siren,
            row: LegalUnitRow::default(),
        }
    }

    /// The denomination for legal persons; natural persons are named after
    /// their usage (or birth) name followed by their first given name.
    fn raison_sociale(&self) -> Option<String> {
        let row = &self.row;
        if let Some(denomination) = &row.denomination_unite_legale {
            return Some(denomination.clone());
        }
        let nom = row
            .nom_usage_unite_legale
            .as_ref()
            .or(row.nom_unite_legale.as_ref());
        match (nom, &row.prenom1_unite_legale) {
            (Some(nom), Some(prenom)) => Some(format!("{} {}", nom, prenom)),
            (Some(nom), None) => Some(nom.clone()),
            (None, Some(prenom)) => Some(prenom.clone()),
            (None, None) => None,
        }
    }

    pub fn into_statements(self) -> Vec<Statement> {
        let raison_sociale = self.raison_sociale();
        let siret_siege = self
            .row
            .nic_siege_unite_legale
            .as_ref()
            .map(|nic| format!("{}{}", self.siren, nic));
        let LegalUnit { siren, row } = self;
        let code_activite = row
            .activite_principale_unite_legale
            .map(|code| code.replace('.', ""));

        vec![stmt!(
            Table::Entreprise,
            &siren,
            siret_siege,
            raison_sociale,
            row.prenom1_unite_legale,
            row.prenom2_unite_legale,
            row.prenom3_unite_legale,
            row.prenom4_unite_legale,
            row.nom_unite_legale,
            row.nom_usage_unite_legale,
            row.categorie_juridique_unite_legale,
            row.date_creation_unite_legale,
            row.sigle_unite_legale,
            row.identifiant_association_unite_legale,
            row.tranche_effectifs_unite_legale,
            row.annee_effectifs_unite_legale,
            row.categorie_entreprise,
            row.annee_categorie_entreprise,
            row.etat_administratif_unite_legale,
            row.economie_sociale_solidaire_unite_legale,
            row.caractere_employeur_unite_legale,
            code_activite,
            row.nomenclature_activite_principale_unite_legale,
        )]
    }
}

pub struct SireneUlImporter;

#[async_trait::async_trait]
impl Importer for SireneUlImporter {
    fn get_name(&self) -> &str {
        "sirene_ul"
    }

    fn get_tables(&self) -> &'static [Table] {
        &[Table::Entreprise]
    }

    async fn open(&self, path: &Path) -> Result<RecordStream, ImportError> {
        let reader = open_file(path).await?;
        Ok(csv_records(reader, path.to_path_buf(), b',')
            .await?
            .map_ok(LegalUnit::validate)
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::statement::Value;
    use csv_async::StringRecord;
    use std::sync::Arc;

    const HEADERS: &[&str] = &[
        "siren",
        "nicSiegeUniteLegale",
        "denominationUniteLegale",
        "nomUniteLegale",
        "nomUsageUniteLegale",
        "prenom1UniteLegale",
        "dateCreationUniteLegale",
        "activitePrincipaleUniteLegale",
        "economieSocialeSolidaireUniteLegale",
        "caractereEmployeurUniteLegale",
    ];

    fn row(fields: &[&str]) -> Option<DomainRecord> {
        let headers = Arc::new(StringRecord::from(HEADERS.to_vec()));
        LegalUnit::validate((StringRecord::from(fields.to_vec()), headers))
    }

    fn statement(fields: &[&str]) -> Statement {
        match row(fields) {
            Some(record) => record.into_statements().remove(0),
            None => panic!("row was filtered"),
        }
    }

    #[test]
    fn siren_must_have_nine_digits() {
        assert!(row(&["12345678", "", "ACME", "", "", "", "", "", "", ""]).is_none());
        assert!(row(&["", "", "ACME", "", "", "", "", "", "", ""]).is_none());
        assert!(row(&["123456789", "", "ACME", "", "", "", "", "", "", ""]).is_some());
    }

    #[test]
    fn malformed_field_skips_the_row() {
        assert!(row(&["123456789", "", "ACME", "", "", "", "not-a-date", "", "", ""]).is_none());
        assert!(row(&["123456789", "", "ACME", "", "", "", "", "", "X", ""]).is_none());
    }

    #[test]
    fn legal_person_is_named_by_denomination() {
        let s = statement(&[
            "123456789",
            "00012",
            "ACME",
            "",
            "",
            "",
            "2001-03-15",
            "62.01Z",
            "N",
            "O",
        ]);
        let values = s.values();
        assert_eq!(values[1], Value::Text(Some("12345678900012".into())));
        assert_eq!(values[2], Value::Text(Some("ACME".into())));
        assert_eq!(values[3], Value::Text(None));
        assert_eq!(values[10], Value::Date(NaiveDate::from_ymd_opt(2001, 3, 15)));
        assert_eq!(values[18], Value::Bool(Some(false)));
        assert_eq!(values[19], Value::Bool(Some(true)));
        assert_eq!(values[20], Value::Text(Some("6201Z".into())));
    }

    #[test]
    fn natural_person_is_named_by_usage_name_and_first_name() {
        let s = statement(&["123456789", "", "", "MARTIN", "DUPONT", "JEANNE", "", "", "", ""]);
        assert_eq!(s.values()[1], Value::Text(None));
        assert_eq!(s.values()[2], Value::Text(Some("DUPONT JEANNE".into())));

        let s = statement(&["123456789", "", "", "MARTIN", "", "JEANNE", "", "", "", ""]);
        assert_eq!(s.values()[2], Value::Text(Some("MARTIN JEANNE".into())));
    }
}
