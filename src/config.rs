use std::fmt::Display;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::import::{CommitGranularity, PipelineSettings};

/// Commit policy name as written in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranularityKind {
    WholeFile,
    PerChunk,
}

impl FromStr for GranularityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whole-file" | "whole_file" | "wholefile" => Ok(GranularityKind::WholeFile),
            "per-chunk" | "per_chunk" | "perchunk" => Ok(GranularityKind::PerChunk),
            other => Err(format!(
                "unknown commit granularity {:?}, expected whole-file or per-chunk",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourcePaths {
    pub entreprise: Option<PathBuf>,
    pub etablissement: Option<PathBuf>,
    pub sirene_ul: Option<PathBuf>,
    pub geo_sirene: Option<PathBuf>,
    pub bce: Option<PathBuf>,
    /// Score list published for the `listes` flow.
    pub liste: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub max_batch_statements: usize,
    pub channel_capacity: usize,
    pub progress_interval: Duration,
    pub chunk_size: usize,
    pub ee_commit: GranularityKind,
    pub sirene_commit: GranularityKind,
    pub bce_commit: GranularityKind,
    pub sources: SourcePaths,
}

impl ImportConfig {
    pub fn settings(&self, kind: GranularityKind) -> PipelineSettings {
        let granularity = match kind {
            GranularityKind::WholeFile => CommitGranularity::WholeFile,
            GranularityKind::PerChunk => {
                CommitGranularity::per_chunk_records(self.chunk_size, self.batch_size)
            }
        };
        PipelineSettings {
            batch_size: self.batch_size,
            max_batch_statements: self.max_batch_statements,
            channel_capacity: self.channel_capacity,
            granularity,
            progress_interval: self.progress_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub allowlist: Vec<IpAddr>,
    pub import: ImportConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let path = |key: &str| get(key).map(PathBuf::from);

        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;
        let allowlist = match get("IMPORT_ALLOWLIST") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(|ip| {
                    ip.parse::<IpAddr>()
                        .with_context(|| format!("invalid address {:?} in IMPORT_ALLOWLIST", ip))
                })
                .collect::<Result<Vec<_>>>()?,
            None => vec![IpAddr::from([127, 0, 0, 1]), IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1])],
        };

        let import = ImportConfig {
            batch_size: positive(parse_or(&get, "IMPORT_BATCH_SIZE", 1000)?, "IMPORT_BATCH_SIZE")?,
            max_batch_statements: positive(
                parse_or(&get, "IMPORT_MAX_BATCH_STATEMENTS", 50_000)?,
                "IMPORT_MAX_BATCH_STATEMENTS",
            )?,
            channel_capacity: positive(
                parse_or(&get, "IMPORT_CHANNEL_CAPACITY", 4)?,
                "IMPORT_CHANNEL_CAPACITY",
            )?,
            progress_interval: Duration::from_secs(parse_or(&get, "IMPORT_PROGRESS_SECS", 5)?),
            chunk_size: positive(
                parse_or(&get, "SIRENE_CHUNK_SIZE", 100_000)?,
                "SIRENE_CHUNK_SIZE",
            )?,
            ee_commit: parse_or(&get, "EE_COMMIT", GranularityKind::WholeFile)?,
            sirene_commit: parse_or(&get, "SIRENE_COMMIT", GranularityKind::PerChunk)?,
            bce_commit: parse_or(&get, "BCE_COMMIT", GranularityKind::WholeFile)?,
            sources: SourcePaths {
                entreprise: path("SOURCE_ENTREPRISE"),
                etablissement: path("SOURCE_ETABLISSEMENT"),
                sirene_ul: path("SIRENE_UL_PATH"),
                geo_sirene: path("GEO_SIRENE_PATH"),
                bce: path("BCE_SOURCE_PATH"),
                liste: path("SOURCE_LISTE"),
            },
        };

        Ok(Config {
            database_url,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 8)?,
            host: get("IMPORT_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "IMPORT_PORT", 8000)?,
            allowlist,
            import,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid value {:?} for {}: {}", value, key, e)),
        None => Ok(default),
    }
}

fn positive(value: usize, key: &str) -> Result<usize> {
    if value == 0 {
        return Err(anyhow!("{} must be greater than zero", key));
    }
    Ok(value)
}
