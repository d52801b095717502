use std::path::Path;

use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;

use crate::import::error::ImportError;
use crate::import::importer::{DomainRecord, Importer, RecordStream};
use crate::import::keys::{Siren, Siret};
use crate::import::nullable::{flag, nullable};
use crate::import::source::{csv_records, open_file, CsvRow};
use crate::import::statement::{stmt, Statement, Table};

/// A row of the geolocated establishment registry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeoRow {
    #[serde(default)]
    siret: String,
    #[serde(default, deserialize_with = "flag")]
    etablissement_siege: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    date_creation_etablissement: Option<NaiveDate>,
    #[serde(default, deserialize_with = "nullable")]
    complement_adresse_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    numero_voie_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    indice_repetition_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    type_voie_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    libelle_voie_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    libelle_commune_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    libelle_commune_etranger_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    distribution_speciale_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    code_commune_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    code_cedex_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    libelle_cedex_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    code_pays_etranger_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    libelle_pays_etranger_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    code_postal_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    activite_principale_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    nomenclature_activite_principale_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "nullable")]
    longitude: Option<f64>,
    #[serde(default, deserialize_with = "nullable")]
    tranche_effectifs_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    annee_effectifs_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    activite_principale_registre_metiers_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    etat_administratif_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    enseigne1_etablissement: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    denomination_usuelle_etablissement: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    caractere_employeur_etablissement: Option<bool>,
}

/// Department of a commune: its first two characters, or three for the
/// overseas codes starting with 97 or 98.
fn departement(code_commune: &str) -> Option<&str> {
    let width = if code_commune.starts_with("97") || code_commune.starts_with("98") {
        3
    } else {
        2
    };
    code_commune.get(..width)
}

/// An establishment of the registry, located in a known department.
#[derive(Debug)]
pub struct GeoEtablissement {
    siret: Siret,
    siren: Siren,
    departement: String,
    row: GeoRow,
}

impl GeoEtablissement {
    fn validate((row, headers): CsvRow) -> Option<DomainRecord> {
        let row: GeoRow = row.deserialize(Some(headers.as_ref())).ok()?;
        let siret = Siret::parse_strict(&row.siret)?;
        let departement = departement(row.code_commune_etablissement.as_deref()?)?.to_string();
        Some(DomainRecord::GeoEtablissement(GeoEtablissement {
            siren: siret.siren(),
            siret,
            departement,
            row,
        }))
    }

    pub fn into_statements(self) -> Vec<Statement> {
        let GeoEtablissement {
            siret,
            siren,
            departement,
            row,
        } = self;
        let code_activite = row
            .activite_principale_etablissement
            .map(|code| code.replace('.', ""));

        vec![stmt!(
            Table::Etablissement,
            &siret,
            &siren,
            row.etablissement_siege,
            row.date_creation_etablissement,
            row.complement_adresse_etablissement,
            row.numero_voie_etablissement,
            row.indice_repetition_etablissement,
            row.type_voie_etablissement,
            row.libelle_voie_etablissement,
            row.libelle_commune_etablissement,
            row.libelle_commune_etranger_etablissement,
            row.distribution_speciale_etablissement,
            row.code_commune_etablissement,
            row.code_cedex_etablissement,
            row.libelle_cedex_etablissement,
            row.code_pays_etranger_etablissement,
            row.libelle_pays_etranger_etablissement,
            row.code_postal_etablissement,
            departement,
            code_activite,
            row.nomenclature_activite_principale_etablissement,
            row.latitude,
            row.longitude,
            row.tranche_effectifs_etablissement,
            row.annee_effectifs_etablissement,
            row.activite_principale_registre_metiers_etablissement,
            row.etat_administratif_etablissement,
            row.enseigne1_etablissement,
            row.denomination_usuelle_etablissement,
            row.caractere_employeur_etablissement,
        )]
    }
}

pub struct GeoSireneImporter;

#[async_trait::async_trait]
impl Importer for GeoSireneImporter {
    fn get_name(&self) -> &str {
        "geo_sirene"
    }

    fn get_tables(&self) -> &'static [Table] {
        &[Table::Etablissement]
    }

    async fn open(&self, path: &Path) -> Result<RecordStream, ImportError> {
        let reader = open_file(path).await?;
        Ok(csv_records(reader, path.to_path_buf(), b',')
            .await?
            .map_ok(GeoEtablissement::validate)
            .boxed())
    }
}
