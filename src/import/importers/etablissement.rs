use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

use crate::import::error::ImportError;
use crate::import::importer::{DomainRecord, Importer, RecordStream};
use crate::import::keys::{Siren, Siret};
use crate::import::nullable::nullable_date;
use crate::import::source::{json_records, open_file};
use crate::import::statement::{stmt, Statement, Table};

#[serde_as]
#[derive(Debug, Deserialize)]
struct EtablissementDocument {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "_id", default)]
    id: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    value: EtablissementValue,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct EtablissementValue {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    sirene: EtablissementSirene,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    apconso: Vec<ApConso>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    apdemande: Vec<ApDemande>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    periodes: Vec<Option<DateTime<FixedOffset>>>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    effectif: Vec<Option<i64>>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    cotisation: Vec<Option<f64>>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    debit_part_patronale: Vec<Option<f64>>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    debit_part_ouvriere: Vec<Option<f64>>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    debit_montant_majorations: Vec<Option<f64>>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    delai: Vec<Delai>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    procol: Vec<Procol>,
}

#[derive(Debug, Default, Deserialize)]
struct EtablissementSirene {
    departement: Option<String>,
}

/// Consumed partial-activity hours.
#[derive(Debug, Deserialize)]
struct ApConso {
    id_conso: Option<String>,
    heure_consomme: Option<f64>,
    montant: Option<f64>,
    effectif: Option<i64>,
    #[serde(default, deserialize_with = "nullable_date")]
    periode: Option<NaiveDate>,
}

/// Partial-activity authorisation request.
#[serde_as]
#[derive(Debug, Deserialize)]
struct ApDemande {
    id_demande: Option<String>,
    effectif_entreprise: Option<i64>,
    effectif: Option<i64>,
    #[serde(default, deserialize_with = "nullable_date")]
    date_statut: Option<NaiveDate>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    periode: ApPeriode,
    hta: Option<f64>,
    mta: Option<f64>,
    effectif_autorise: Option<i64>,
    motif_recours_se: Option<i64>,
    #[serde(rename = "heure_consommee")]
    heure_consomme: Option<f64>,
    #[serde(rename = "montant_consommee")]
    montant_consomme: Option<f64>,
    effectif_consomme: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApPeriode {
    #[serde(default, deserialize_with = "nullable_date")]
    start: Option<NaiveDate>,
    #[serde(default, deserialize_with = "nullable_date")]
    end: Option<NaiveDate>,
}

/// Payment-delay agreement with the social contribution collector.
#[derive(Debug, Deserialize)]
struct Delai {
    action: Option<String>,
    #[serde(rename = "anne_creation", alias = "annee_creation")]
    annee_creation: Option<i64>,
    #[serde(default, deserialize_with = "nullable_date")]
    date_creation: Option<NaiveDate>,
    #[serde(default, deserialize_with = "nullable_date")]
    date_echeance: Option<NaiveDate>,
    denomination: Option<String>,
    duree_delai: Option<i64>,
    indic_6m: Option<String>,
    #[serde(rename = "montant_echeancier", alias = "MontantEcheancier")]
    montant_echeancier: Option<f64>,
    numero_compte: Option<String>,
    numero_contentieux: Option<String>,
    stade: Option<String>,
}

/// Insolvency procedure event.
#[derive(Debug, Deserialize)]
struct Procol {
    #[serde(default, deserialize_with = "nullable_date")]
    date_effet: Option<NaiveDate>,
    #[serde(rename = "action_procol")]
    action: Option<String>,
    #[serde(rename = "stade_procol")]
    stade: Option<String>,
}

/// One month of social contribution data, zipped from the parallel arrays
/// of the document.
#[derive(Debug, PartialEq)]
struct UrssafPeriod {
    periode: NaiveDate,
    effectif: Option<i64>,
    cotisation: Option<f64>,
    part_patronale: Option<f64>,
    part_salariale: Option<f64>,
    montant_majorations: Option<f64>,
}

/// Periods up to this date are history the scoring queries never read.
fn periodes_origine() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or(NaiveDate::MIN)
}

impl UrssafPeriod {
    /// A period is kept when it carries a debt or a headcount, and is
    /// strictly after [`periodes_origine`].
    fn is_reported(&self) -> bool {
        let has_amount = [
            self.cotisation,
            self.part_patronale,
            self.part_salariale,
            self.montant_majorations,
        ]
        .iter()
        .any(|amount| amount.is_some_and(|a| a != 0.0));

        (has_amount || self.effectif.is_some()) && self.periode > periodes_origine()
    }
}

/// An establishment document that passed validation.
#[derive(Debug)]
pub struct Etablissement {
    siret: Siret,
    siren: Siren,
    value: EtablissementValue,
}

impl Etablissement {
    fn validate(document: EtablissementDocument) -> Option<DomainRecord> {
        let siret = Siret::from_composite_id(&document.id)?;
        document.value.sirene.departement.as_ref()?;
        Some(DomainRecord::Etablissement(Etablissement {
            siren: siret.siren(),
            siret,
            value: document.value,
        }))
    }

    /// Positions whose period is null are dropped; the other arrays keep
    /// their alignment with `periodes`.
    fn urssaf_periods(value: &mut EtablissementValue) -> Vec<UrssafPeriod> {
        let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();
        std::mem::take(&mut value.periodes)
            .into_iter()
            .enumerate()
            .filter_map(|(i, periode)| Some((i, periode?)))
            .map(|(i, periode)| UrssafPeriod {
                periode: periode.date_naive(),
                effectif: value.effectif.get(i).copied().flatten(),
                cotisation: at(&value.cotisation, i),
                part_patronale: at(&value.debit_part_patronale, i),
                part_salariale: at(&value.debit_part_ouvriere, i),
                montant_majorations: at(&value.debit_montant_majorations, i),
            })
            .collect()
    }

    pub fn into_statements(self) -> Vec<Statement> {
        let Etablissement {
            siret,
            siren,
            mut value,
        } = self;
        let periods = Self::urssaf_periods(&mut value);
        let mut statements = Vec::with_capacity(
            value.apconso.len()
                + value.apdemande.len()
                + periods.len()
                + value.delai.len()
                + value.procol.len(),
        );

        for a in value.apconso {
            statements.push(stmt!(
                Table::EtablissementApconso,
                &siret,
                &siren,
                a.id_conso,
                a.heure_consomme,
                a.montant,
                a.effectif,
                a.periode,
            ));
        }

        for a in value.apdemande {
            statements.push(stmt!(
                Table::EtablissementApdemande,
                &siret,
                &siren,
                a.id_demande,
                a.effectif_entreprise,
                a.effectif,
                a.date_statut,
                a.periode.start,
                a.periode.end,
                a.hta,
                a.mta,
                a.effectif_autorise,
                a.motif_recours_se,
                a.heure_consomme,
                a.montant_consomme,
                a.effectif_consomme,
            ));
        }

        for p in periods.into_iter().filter(UrssafPeriod::is_reported) {
            statements.push(stmt!(
                Table::EtablissementPeriodeUrssaf,
                &siret,
                &siren,
                p.periode,
                p.cotisation,
                p.part_patronale,
                p.part_salariale,
                p.montant_majorations,
                p.effectif,
            ));
        }

        for d in value.delai {
            statements.push(stmt!(
                Table::EtablissementDelai,
                &siret,
                &siren,
                d.action,
                d.annee_creation,
                d.date_creation,
                d.date_echeance,
                d.denomination,
                d.duree_delai,
                d.indic_6m,
                d.montant_echeancier,
                d.numero_compte,
                d.numero_contentieux,
                d.stade,
            ));
        }

        for p in value.procol {
            statements.push(stmt!(
                Table::EtablissementProcol,
                &siret,
                &siren,
                p.date_effet,
                p.action,
                p.stade,
            ));
        }

        statements
    }
}

pub struct EtablissementImporter;

#[async_trait::async_trait]
impl Importer for EtablissementImporter {
    fn get_name(&self) -> &str {
        "etablissement"
    }

    fn get_tables(&self) -> &'static [Table] {
        &[
            Table::EtablissementApconso,
            Table::EtablissementApdemande,
            Table::EtablissementPeriodeUrssaf,
            Table::EtablissementDelai,
            Table::EtablissementProcol,
        ]
    }

    async fn open(&self, path: &Path) -> Result<RecordStream, ImportError> {
        let reader = open_file(path).await?;
        Ok(
            json_records::<EtablissementDocument, _>(reader, path.to_path_buf())
                .map_ok(Etablissement::validate)
                .boxed(),
        )
    }
}
