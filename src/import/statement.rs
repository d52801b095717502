use chrono::NaiveDate;

/// Every table the import pipelines write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Entreprise,
    Etablissement,
    EntrepriseBdf,
    EntrepriseDiane,
    EntrepriseEllisphere,
    EntreprisePaydex,
    EtablissementApconso,
    EtablissementApdemande,
    EtablissementPeriodeUrssaf,
    EtablissementDelai,
    EtablissementProcol,
    EntrepriseBce,
    ScoreStaging,
    Score,
    Liste,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Entreprise => "entreprise",
            Table::Etablissement => "etablissement",
            Table::EntrepriseBdf => "entreprise_bdf",
            Table::EntrepriseDiane => "entreprise_diane",
            Table::EntrepriseEllisphere => "entreprise_ellisphere",
            Table::EntreprisePaydex => "entreprise_paydex",
            Table::EtablissementApconso => "etablissement_apconso",
            Table::EtablissementApdemande => "etablissement_apdemande",
            Table::EtablissementPeriodeUrssaf => "etablissement_periode_urssaf",
            Table::EtablissementDelai => "etablissement_delai",
            Table::EtablissementProcol => "etablissement_procol",
            Table::EntrepriseBce => "entreprise_bce",
            Table::ScoreStaging => "score_staging",
            Table::Score => "score",
            Table::Liste => "liste",
        }
    }

    /// Column order used by both the statement builders and the store.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Entreprise => &[
                "siren",
                "siret_siege",
                "raison_sociale",
                "prenom1",
                "prenom2",
                "prenom3",
                "prenom4",
                "nom",
                "nom_usage",
                "statut_juridique",
                "creation",
                "sigle",
                "identifiant_association",
                "tranche_effectif",
                "annee_effectif",
                "categorie",
                "annee_categorie",
                "etat_administratif",
                "economie_sociale_solidaire",
                "caractere_employeur",
                "code_activite",
                "nomen_activite",
            ],
            Table::Etablissement => &[
                "siret",
                "siren",
                "siege",
                "creation",
                "complement_adresse",
                "numero_voie",
                "indice_repetition",
                "type_voie",
                "voie",
                "commune",
                "commune_etranger",
                "distribution_speciale",
                "code_commune",
                "code_cedex",
                "cedex",
                "code_pays_etranger",
                "pays_etranger",
                "code_postal",
                "departement",
                "code_activite",
                "nomen_activite",
                "latitude",
                "longitude",
                "tranche_effectif",
                "annee_effectif",
                "code_activite_registre_metiers",
                "etat_administratif",
                "enseigne",
                "denomination_usuelle",
                "caractere_employeur",
            ],
            Table::EntrepriseBdf => &[
                "siren",
                "arrete_bilan_bdf",
                "annee_bdf",
                "delai_fournisseur",
                "financier_court_terme",
                "poids_frng",
                "dette_fiscale",
                "frais_financier",
                "taux_marge",
            ],
            Table::EntrepriseDiane => &[
                "siren",
                "arrete_bilan_diane",
                "achat_marchandises",
                "achat_matieres_premieres",
                "autonomie_financiere",
                "autres_achats_charges_externes",
                "autres_produits_charges_reprises",
                "benefice_ou_perte",
                "ca_exportation",
                "capacite_autofinancement",
                "capacite_remboursement",
                "ca_par_effectif",
                "charge_exceptionnelle",
                "charge_personnel",
                "charges_financieres",
                "chiffre_affaire",
                "conces_brev_et_droits_sim",
                "concours_bancaire_courant",
                "consommation",
                "couverture_ca_besoin_fdr",
                "couverture_ca_fdr",
                "credit_client",
                "credit_fournisseur",
                "degre_immo_corporelle",
                "dette_fiscale_et_sociale",
                "dotation_amortissement",
                "effectif_consolide",
                "efficacite_economique",
                "endettement",
                "endettement_global",
                "equilibre_financier",
                "excedent_brut_d_exploitation",
                "exercice_diane",
                "exportation",
                "financement_actif_circulant",
                "frais_de_retd",
                "impot_benefice",
                "impots_taxes",
                "independance_financiere",
                "interets",
                "liquidite_generale",
                "liquidite_reduite",
                "marge_commerciale",
                "nombre_etab_secondaire",
                "nombre_filiale",
                "nombre_mois",
                "operations_commun",
                "part_autofinancement",
                "part_etat",
                "part_preteur",
                "part_salaries",
                "participation_salaries",
                "performance",
                "poids_bfr_exploitation",
                "procedure_collective",
                "production",
                "productivite_capital_financier",
                "productivite_capital_investi",
                "productivite_potentiel_production",
                "produit_exceptionnel",
                "produits_financiers",
                "rendement_brut_fonds_propres",
                "rendement_capitaux_propres",
                "rendement_ressources_durables",
                "rentabilite_economique",
                "rentabilite_nette",
                "resultat_avant_impot",
                "resultat_expl",
                "rotation_stocks",
                "statut_juridique",
                "subventions_d_exploitation",
                "taille_compo_groupe",
                "taux_d_investissement_productif",
                "taux_endettement",
                "taux_interet_financier",
                "taux_interet_sur_ca",
                "taux_marge_commerciale",
                "taux_valeur_ajoutee",
                "valeur_ajoutee",
            ],
            Table::EntrepriseEllisphere => &[
                "siren",
                "code",
                "refid",
                "raison_sociale",
                "adresse",
                "personne_pou_m",
                "niveau_detention",
                "part_financiere",
                "code_filiere",
                "refid_filiere",
                "personne_pou_m_filiere",
            ],
            Table::EntreprisePaydex => &["siren", "date_valeur", "nb_jours"],
            Table::EtablissementApconso => &[
                "siret",
                "siren",
                "id_conso",
                "heure_consomme",
                "montant",
                "effectif",
                "periode",
            ],
            Table::EtablissementApdemande => &[
                "siret",
                "siren",
                "id_demande",
                "effectif_entreprise",
                "effectif",
                "date_statut",
                "periode_start",
                "periode_end",
                "hta",
                "mta",
                "effectif_autorise",
                "motif_recours_se",
                "heure_consomme",
                "montant_consomme",
                "effectif_consomme",
            ],
            Table::EtablissementPeriodeUrssaf => &[
                "siret",
                "siren",
                "periode",
                "cotisation",
                "part_patronale",
                "part_salariale",
                "montant_majorations",
                "effectif",
            ],
            Table::EtablissementDelai => &[
                "siret",
                "siren",
                "action",
                "annee_creation",
                "date_creation",
                "date_echeance",
                "denomination",
                "duree_delai",
                "indic_6m",
                "montant_echeancier",
                "numero_compte",
                "numero_contentieux",
                "stade",
            ],
            Table::EtablissementProcol => &[
                "siret",
                "siren",
                "date_effet",
                "action_procol",
                "stade_procol",
            ],
            Table::EntrepriseBce => &[
                "siren",
                "date_cloture_exercice",
                "chiffre_d_affaires",
                "marge_brute",
                "ebe",
                "ebit",
                "resultat_net",
                "taux_d_endettement",
                "ratio_de_liquidite",
                "ratio_de_vetuste",
                "autonomie_financiere",
                "poids_bfr_exploitation_sur_ca",
                "couverture_des_interets",
                "caf_sur_ca",
                "capacite_de_remboursement",
                "marge_ebe",
                "resultat_courant_avant_impots_sur_ca",
                "poids_bfr_exploitation_sur_ca_jours",
                "rotation_des_stocks_jours",
                "credit_clients_jours",
                "credit_fournisseurs_jours",
                "type_bilan",
            ],
            Table::ScoreStaging => &[
                "siren",
                "libelle_liste",
                "batch",
                "algo",
                "score",
                "diff",
                "alert",
                "expl_selection_concerning",
                "expl_selection_reassuring",
                "macro_radar",
                "alert_pre_redressements",
                "redressements",
            ],
            // filled from the staging table when a list is published
            Table::Score => &[
                "siret",
                "siren",
                "libelle_liste",
                "batch",
                "algo",
                "periode",
                "score",
                "diff",
                "alert",
                "expl_selection_concerning",
                "expl_selection_reassuring",
                "macro_radar",
                "redressements",
                "alert_pre_redressements",
            ],
            Table::Liste => &["libelle", "batch", "algo"],
        }
    }
}

/// A bound parameter. `None` binds SQL NULL of the variant's type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(Option<String>),
    Int(Option<i64>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Date(Option<NaiveDate>),
    Json(Option<serde_json::Value>),
    TextArray(Option<Vec<String>>),
}

macro_rules! value_from {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(Some(value.into()))
            }
        }

        impl From<Option<$ty>> for Value {
            fn from(value: Option<$ty>) -> Self {
                Value::$variant(value.map(Into::into))
            }
        }
    };
}

value_from!(Text, String);
value_from!(Text, &str);
value_from!(Int, i64);
value_from!(Int, i32);
value_from!(Float, f64);
value_from!(Bool, bool);
value_from!(Date, NaiveDate);
value_from!(Json, serde_json::Value);
value_from!(TextArray, Vec<String>);

/// One parameterized insert into a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    table: Table,
    values: Vec<Value>,
}

impl Statement {
    pub fn new(table: Table, values: Vec<Value>) -> Self {
        debug_assert_eq!(
            values.len(),
            table.columns().len(),
            "column count mismatch for {}",
            table.name()
        );
        Statement { table, values }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Builds a [`Statement`] from a table and its column values, in column order.
macro_rules! stmt {
    ($table:expr, $($value:expr),+ $(,)?) => {
        $crate::import::statement::Statement::new(
            $table,
            vec![$($crate::import::statement::Value::from($value)),+],
        )
    };
}

pub(crate) use stmt;
