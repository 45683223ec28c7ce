// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Args;
use serde::Deserialize;
use sheetql::{
    Dataset, DatasetId, EngineConfig, MemoryCatalog, OwnerId, PreviewEngine, TabularSource,
};

/// Where the dataset for a command comes from
#[derive(Args, Clone, Debug, Default)]
pub struct SourceArgs {
    /// YAML configuration with engine settings and a dataset catalog
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Spreadsheet or delimited file to query directly
    #[arg(short, long, conflicts_with = "dataset")]
    pub file: Option<PathBuf>,

    /// Dataset id from the configured catalog
    #[arg(short, long, requires = "owner")]
    pub dataset: Option<String>,

    /// Caller identity the dataset must belong to
    #[arg(short, long)]
    pub owner: Option<String>,
}

/// One catalog entry in the configuration file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetEntry {
    pub id: String,
    pub owner: String,
    pub path: PathBuf,
}

/// Configuration file layout
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub datasets: Vec<DatasetEntry>,
}

impl CliConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(text).map_err(|e| anyhow!("Invalid configuration: {}", e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_yaml_str(&text)
    }
}

/// Caller identity for ad-hoc files: the login name, or "local"
pub fn local_owner() -> OwnerId {
    let name = env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "local".to_string());
    OwnerId::new(name)
}

/// An engine plus the dataset and caller a command acts on
pub struct Session {
    pub engine: PreviewEngine,
    pub owner: OwnerId,
    pub dataset: DatasetId,
}

impl Session {
    /// Build the catalog from the config file, register `--file` when given,
    /// and start the engine
    pub async fn open(args: &SourceArgs) -> Result<Self> {
        let config = match &args.config {
            Some(path) => CliConfig::load(path)?,
            None => CliConfig::default(),
        };

        let catalog = MemoryCatalog::new();
        for entry in &config.datasets {
            let id: DatasetId = entry
                .id
                .parse()
                .map_err(|e| anyhow!("Invalid dataset id {}: {}", entry.id, e))?;
            catalog
                .insert(Dataset {
                    id,
                    owner: OwnerId::new(entry.owner.clone()),
                    source: TabularSource::from_path(&entry.path),
                })
                .await;
        }

        let (owner, dataset) = match (&args.file, &args.dataset) {
            (Some(path), _) => {
                if !path.exists() {
                    return Err(anyhow!("File not found: {}", path.display()));
                }
                let owner = local_owner();
                let dataset = catalog
                    .register(owner.clone(), TabularSource::from_path(path))
                    .await;
                (owner, dataset)
            }
            (None, Some(id)) => {
                let dataset: DatasetId = id
                    .parse()
                    .map_err(|e| anyhow!("Invalid dataset id {}: {}", id, e))?;
                let owner = args
                    .owner
                    .as_deref()
                    .map(OwnerId::from)
                    .ok_or_else(|| anyhow!("--dataset requires --owner"))?;
                (owner, dataset)
            }
            (None, None) => return Err(anyhow!("Either --file or --dataset is required")),
        };

        let engine = PreviewEngine::new(Arc::new(catalog), config.engine);
        Ok(Self {
            engine,
            owner,
            dataset,
        })
    }
}
