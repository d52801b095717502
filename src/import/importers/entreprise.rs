use std::path::Path;

use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

use crate::import::error::ImportError;
use crate::import::importer::{DomainRecord, Importer, RecordStream};
use crate::import::keys::Siren;
use crate::import::nullable::nullable_date;
use crate::import::source::{json_records, open_file};
use crate::import::statement::{stmt, Statement, Table};

#[serde_as]
#[derive(Debug, Deserialize)]
struct EntrepriseDocument {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    value: EntrepriseValue,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct EntrepriseValue {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    sirene_ul: SireneUl,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    bdf: Vec<Bdf>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    diane: Vec<Diane>,
    ellisphere: Option<Ellisphere>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    paydex: Vec<Paydex>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct SireneUl {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    siren: String,
}

/// Central bank ratios for one closing.
#[derive(Debug, Deserialize)]
struct Bdf {
    #[serde(rename = "arrete_bilan_bdf", default, deserialize_with = "nullable_date")]
    arrete_bilan: Option<NaiveDate>,
    #[serde(rename = "annee_bdf")]
    annee: Option<i64>,
    delai_fournisseur: Option<f64>,
    financier_court_terme: Option<f64>,
    poids_frng: Option<f64>,
    dette_fiscale: Option<f64>,
    #[serde(rename = "FraisFinancier", alias = "frais_financier")]
    frais_financier: Option<f64>,
    taux_marge: Option<f64>,
}

/// One financial period from the commercial balance-sheet database. Fields
/// follow the column order of `entreprise_diane`.
#[serde_as]
#[derive(Debug, Deserialize)]
struct Diane {
    #[serde(rename = "arrete_bilan_diane", default, deserialize_with = "nullable_date")]
    arrete_bilan: Option<NaiveDate>,
    achat_marchandises: Option<f64>,
    achat_matieres_premieres: Option<f64>,
    autonomie_financiere: Option<f64>,
    autres_achats_charges_externes: Option<f64>,
    autres_produits_charges_reprises: Option<f64>,
    benefice_ou_perte: Option<f64>,
    ca_exportation: Option<f64>,
    capacite_autofinancement: Option<f64>,
    capacite_remboursement: Option<f64>,
    ca_par_effectif: Option<f64>,
    charge_exceptionnelle: Option<f64>,
    charge_personnel: Option<f64>,
    charges_financieres: Option<f64>,
    #[serde(rename = "ca")]
    chiffre_affaire: Option<f64>,
    conces_brev_et_droits_sim: Option<f64>,
    concours_bancaire_courant: Option<f64>,
    consommation: Option<f64>,
    couverture_ca_besoin_fdr: Option<f64>,
    couverture_ca_fdr: Option<f64>,
    credit_client: Option<f64>,
    credit_fournisseur: Option<f64>,
    degre_immo_corporelle: Option<f64>,
    dette_fiscale_et_sociale: Option<f64>,
    dotation_amortissement: Option<f64>,
    effectif_consolide: Option<i64>,
    efficacite_economique: Option<f64>,
    endettement: Option<f64>,
    endettement_global: Option<f64>,
    equilibre_financier: Option<f64>,
    excedent_brut_d_exploitation: Option<f64>,
    exercice_diane: Option<f64>,
    exportation: Option<f64>,
    financement_actif_circulant: Option<f64>,
    #[serde(rename = "frais_de_RetD")]
    frais_de_retd: Option<f64>,
    impot_benefice: Option<f64>,
    impots_taxes: Option<f64>,
    independance_financiere: Option<f64>,
    interets: Option<f64>,
    liquidite_generale: Option<f64>,
    liquidite_reduite: Option<f64>,
    marge_commerciale: Option<f64>,
    nombre_etab_secondaire: Option<i64>,
    nombre_filiale: Option<i64>,
    nombre_mois: Option<i64>,
    operations_commun: Option<f64>,
    part_autofinancement: Option<f64>,
    part_etat: Option<f64>,
    part_preteur: Option<f64>,
    part_salaries: Option<f64>,
    participation_salaries: Option<f64>,
    performance: Option<f64>,
    poids_bfr_exploitation: Option<f64>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    procedure_collective: bool,
    production: Option<f64>,
    productivite_capital_financier: Option<f64>,
    productivite_capital_investi: Option<f64>,
    productivite_potentiel_production: Option<f64>,
    produit_exceptionnel: Option<f64>,
    produits_financiers: Option<f64>,
    rendement_brut_fonds_propres: Option<f64>,
    rendement_capitaux_propres: Option<f64>,
    rendement_ressources_durables: Option<f64>,
    rentabilite_economique: Option<f64>,
    rentabilite_nette: Option<f64>,
    resultat_avant_impot: Option<f64>,
    resultat_expl: Option<f64>,
    rotation_stocks: Option<f64>,
    statut_juridique: Option<String>,
    subventions_d_exploitation: Option<f64>,
    taille_compo_groupe: Option<i64>,
    taux_d_investissement_productif: Option<f64>,
    taux_endettement: Option<f64>,
    taux_interet_financier: Option<f64>,
    taux_interet_sur_ca: Option<f64>,
    taux_marge_commerciale: Option<f64>,
    taux_valeur_ajoutee: Option<f64>,
    valeur_ajoutee: Option<f64>,
}

/// Group membership of the company.
#[derive(Debug, Deserialize)]
struct Ellisphere {
    code_groupe: Option<String>,
    refid_groupe: Option<String>,
    raison_sociale_groupe: Option<String>,
    adresse_groupe: Option<String>,
    personne_pou_m_groupe: Option<String>,
    niveau_detention: Option<i64>,
    part_financiere: Option<f64>,
    code_filiere: Option<String>,
    refid_filiere: Option<String>,
    personne_pou_m_filiere: Option<String>,
}

/// Supplier payment delay observation.
#[derive(Debug, Deserialize)]
struct Paydex {
    #[serde(default, deserialize_with = "nullable_date")]
    date_valeur: Option<NaiveDate>,
    nb_jours: Option<i64>,
}

/// A company document that passed validation.
#[derive(Debug)]
pub struct Entreprise {
    siren: Siren,
    value: EntrepriseValue,
}

impl Entreprise {
    fn validate(document: EntrepriseDocument) -> Option<DomainRecord> {
        let siren = Siren::new(&document.value.sirene_ul.siren)?;
        Some(DomainRecord::Entreprise(Entreprise {
            siren,
            value: document.value,
        }))
    }

    pub fn into_statements(self) -> Vec<Statement> {
        let Entreprise { siren, value } = self;
        let mut statements = Vec::with_capacity(
            value.bdf.len() + value.diane.len() + value.paydex.len() + 1,
        );

        for b in value.bdf {
            statements.push(stmt!(
                Table::EntrepriseBdf,
                &siren,
                b.arrete_bilan,
                b.annee,
                b.delai_fournisseur,
                b.financier_court_terme,
                b.poids_frng,
                b.dette_fiscale,
                b.frais_financier,
                b.taux_marge,
            ));
        }

        // periods without a closing date cannot be placed on a timeline
        for d in value.diane {
            let Some(arrete_bilan) = d.arrete_bilan else {
                continue;
            };
            statements.push(stmt!(
                Table::EntrepriseDiane,
                &siren,
                arrete_bilan,
                d.achat_marchandises,
                d.achat_matieres_premieres,
                d.autonomie_financiere,
                d.autres_achats_charges_externes,
                d.autres_produits_charges_reprises,
                d.benefice_ou_perte,
                d.ca_exportation,
                d.capacite_autofinancement,
                d.capacite_remboursement,
                d.ca_par_effectif,
                d.charge_exceptionnelle,
                d.charge_personnel,
                d.charges_financieres,
                d.chiffre_affaire,
                d.conces_brev_et_droits_sim,
                d.concours_bancaire_courant,
                d.consommation,
                d.couverture_ca_besoin_fdr,
                d.couverture_ca_fdr,
                d.credit_client,
                d.credit_fournisseur,
                d.degre_immo_corporelle,
                d.dette_fiscale_et_sociale,
                d.dotation_amortissement,
                d.effectif_consolide,
                d.efficacite_economique,
                d.endettement,
                d.endettement_global,
                d.equilibre_financier,
                d.excedent_brut_d_exploitation,
                d.exercice_diane,
                d.exportation,
                d.financement_actif_circulant,
                d.frais_de_retd,
                d.impot_benefice,
                d.impots_taxes,
                d.independance_financiere,
                d.interets,
                d.liquidite_generale,
                d.liquidite_reduite,
                d.marge_commerciale,
                d.nombre_etab_secondaire,
                d.nombre_filiale,
                d.nombre_mois,
                d.operations_commun,
                d.part_autofinancement,
                d.part_etat,
                d.part_preteur,
                d.part_salaries,
                d.participation_salaries,
                d.performance,
                d.poids_bfr_exploitation,
                d.procedure_collective,
                d.production,
                d.productivite_capital_financier,
                d.productivite_capital_investi,
                d.productivite_potentiel_production,
                d.produit_exceptionnel,
                d.produits_financiers,
                d.rendement_brut_fonds_propres,
                d.rendement_capitaux_propres,
                d.rendement_ressources_durables,
                d.rentabilite_economique,
                d.rentabilite_nette,
                d.resultat_avant_impot,
                d.resultat_expl,
                d.rotation_stocks,
                d.statut_juridique,
                d.subventions_d_exploitation,
                d.taille_compo_groupe,
                d.taux_d_investissement_productif,
                d.taux_endettement,
                d.taux_interet_financier,
                d.taux_interet_sur_ca,
                d.taux_marge_commerciale,
                d.taux_valeur_ajoutee,
                d.valeur_ajoutee,
            ));
        }

        if let Some(e) = value.ellisphere {
            statements.push(stmt!(
                Table::EntrepriseEllisphere,
                &siren,
                e.code_groupe,
                e.refid_groupe,
                e.raison_sociale_groupe,
                e.adresse_groupe,
                e.personne_pou_m_groupe,
                e.niveau_detention,
                e.part_financiere,
                e.code_filiere,
                e.refid_filiere,
                e.personne_pou_m_filiere,
            ));
        }

        for p in value.paydex {
            statements.push(stmt!(
                Table::EntreprisePaydex,
                &siren,
                p.date_valeur,
                p.nb_jours,
            ));
        }

        statements
    }
}

pub struct EntrepriseImporter;

#[async_trait::async_trait]
impl Importer for EntrepriseImporter {
    fn get_name(&self) -> &str {
        "entreprise"
    }

    fn get_tables(&self) -> &'static [Table] {
        &[
            Table::EntrepriseBdf,
            Table::EntrepriseDiane,
            Table::EntrepriseEllisphere,
            Table::EntreprisePaydex,
        ]
    }

    async fn open(&self, path: &Path) -> Result<RecordStream, ImportError> {
        let reader = open_file(path).await?;
        Ok(json_records::<EntrepriseDocument, _>(reader, path.to_path_buf())
            .map_ok(Entreprise::validate)
            .boxed())
    }
}
