// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Dataset identity and the lookup collaborator that resolves a dataset id
//! to a readable tabular source.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::ingest::RawSheet;

/// Identifier of a caller-owned dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(uuid7::Uuid);

impl DatasetId {
    pub fn new() -> Self {
        Self(uuid7::uuid7())
    }

    pub fn nil() -> Self {
        Self(uuid7::Uuid::NIL)
    }

    /// The nil id is what a request carries when no dataset was chosen
    pub fn is_nil(&self) -> bool {
        self.0 == uuid7::Uuid::NIL
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = uuid7::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<uuid7::Uuid>().map(Self)
    }
}

impl From<uuid7::Uuid> for DatasetId {
    fn from(id: uuid7::Uuid) -> Self {
        Self(id)
    }
}

/// Opaque caller identity supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Where the raw tabular content of a dataset lives
#[derive(Debug, Clone, PartialEq)]
pub enum TabularSource {
    /// Spreadsheet workbook (xlsx, xlsm, xlsb, xls, ods), one table per sheet
    Workbook(PathBuf),
    /// Delimited text file, a single sheet named after the file stem
    Csv(PathBuf),
    /// Already-parsed sheets, header row first
    Inline(Arc<Vec<RawSheet>>),
}

impl TabularSource {
    /// Pick the reader from the file extension. Anything that is not a
    /// delimited text file is handed to the workbook reader.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("csv") | Some("tsv") | Some("txt") => TabularSource::Csv(path.to_path_buf()),
            _ => TabularSource::Workbook(path.to_path_buf()),
        }
    }

    pub fn inline(sheets: Vec<RawSheet>) -> Self {
        TabularSource::Inline(Arc::new(sheets))
    }

    pub fn describe(&self) -> String {
        match self {
            TabularSource::Workbook(p) | TabularSource::Csv(p) => p.display().to_string(),
            TabularSource::Inline(sheets) => format!("inline({} sheets)", sheets.len()),
        }
    }
}

/// A dataset record as owned by the external catalog
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: DatasetId,
    pub owner: OwnerId,
    pub source: TabularSource,
}

/// Resolves a dataset id, scoped to a caller, to its tabular source.
///
/// `None` covers both "does not exist" and "exists but belongs to someone
/// else"; callers cannot tell the two apart.
#[async_trait]
pub trait DatasetLookup: Send + Sync {
    async fn locate(&self, owner: &OwnerId, dataset: &DatasetId) -> Option<TabularSource>;
}

/// In-process dataset catalog
#[derive(Debug, Default, Clone)]
pub struct MemoryCatalog {
    datasets: Arc<RwLock<HashMap<DatasetId, Dataset>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new dataset and return its generated id
    pub async fn register(&self, owner: OwnerId, source: TabularSource) -> DatasetId {
        let id = DatasetId::new();
        self.insert(Dataset { id, owner, source }).await;
        id
    }

    pub async fn insert(&self, dataset: Dataset) {
        let mut datasets = self.datasets.write().await;
        datasets.insert(dataset.id, dataset);
    }

    pub async fn len(&self) -> usize {
        self.datasets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.datasets.read().await.is_empty()
    }
}

#[async_trait]
impl DatasetLookup for MemoryCatalog {
    async fn locate(&self, owner: &OwnerId, dataset: &DatasetId) -> Option<TabularSource> {
        let datasets = self.datasets.read().await;
        datasets
            .get(dataset)
            .filter(|d| &d.owner == owner)
            .map(|d| d.source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_extension() {
        assert_eq!(
            TabularSource::from_path("/data/sales.CSV"),
            TabularSource::Csv(PathBuf::from("/data/sales.CSV"))
        );
        assert_eq!(
            TabularSource::from_path("/data/sales.xlsx"),
            TabularSource::Workbook(PathBuf::from("/data/sales.xlsx"))
        );
    }

    #[test]
    fn test_dataset_id_parse_and_nil() {
        let id = DatasetId::new();
        assert!(!id.is_nil());
        let parsed: DatasetId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
        assert!(DatasetId::default().is_nil());
        assert!("not-a-uuid".parse::<DatasetId>().is_err());
    }

    #[test]
    fn test_lookup_outside_a_runtime() {
        let catalog = MemoryCatalog::new();
        let owner = OwnerId::from("alice");
        let id = tokio_test::block_on(catalog.register(owner.clone(), TabularSource::inline(vec![])));
        let found = tokio_test::block_on(catalog.locate(&owner, &id));
        assert_eq!(found, Some(TabularSource::inline(vec![])));
    }

    #[tokio::test]
    async fn test_catalog_is_scoped_to_owner() {
        let catalog = MemoryCatalog::new();
        let alice = OwnerId::from("alice");
        let id = catalog
            .register(alice.clone(), TabularSource::inline(vec![]))
            .await;

        assert!(catalog.locate(&alice, &id).await.is_some());
        assert!(catalog.locate(&OwnerId::from("bob"), &id).await.is_none());
        assert!(catalog.locate(&alice, &DatasetId::new()).await.is_none());
        assert_eq!(catalog.len().await, 1);
    }
}
