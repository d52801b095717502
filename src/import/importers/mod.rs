pub mod bce;
pub mod entreprise;
pub mod etablissement;
pub mod geo_sirene;
pub mod score;
pub mod sirene_ul;

pub use bce::BceImporter;
pub use entreprise::EntrepriseImporter;
pub use etablissement::EtablissementImporter;
pub use geo_sirene::GeoSireneImporter;
pub use score::ScoreImporter;
pub use sirene_ul::SireneUlImporter;
