//! Blob storage
//!
//! Opaque byte payloads (serialized sample buffers, analyzer HTML reports)
//! owned by exactly one record via an `(owner model, owner id)` reference.
//! The store is an external collaborator behind [`BlobStore`];
//! [`MemoryBlobStore`] is the in-process reference implementation.
//!
//! Names are not deduplicated — callers embed a timestamp for uniqueness.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use spyglass_common::{Result, SpyglassError};

use crate::records::{SampleId, SessionId};

/// Record kinds that may own blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OwnerModel {
    Session,
    RequestSample,
}

/// Reference to the record owning a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub model: OwnerModel,
    pub id: uuid::Uuid,
}

impl OwnerRef {
    pub fn session(id: SessionId) -> Self {
        Self {
            model: OwnerModel::Session,
            id: id.0,
        }
    }

    pub fn sample(id: SampleId) -> Self {
        Self {
            model: OwnerModel::RequestSample,
            id: id.0,
        }
    }
}

/// Unique blob identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(pub uuid::Uuid);

impl BlobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blob metadata handed back by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRef {
    pub id: BlobId,
    pub owner: OwnerRef,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// External blob-store collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` as a new blob owned by `owner`.
    async fn create(
        &self,
        owner: OwnerRef,
        name: &str,
        bytes: Vec<u8>,
        description: &str,
    ) -> Result<BlobRef>;

    /// Read a blob's payload back.
    async fn read(&self, id: BlobId) -> Result<Vec<u8>>;

    /// All blobs owned by `owner`.
    async fn list(&self, owner: OwnerRef) -> Result<Vec<BlobRef>>;

    /// Delete the given blobs. Unknown ids are ignored.
    async fn delete(&self, ids: &[BlobId]) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredBlob {
    meta: BlobRef,
    data: Vec<u8>,
}

/// In-process blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<BlobId, StoredBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create(
        &self,
        owner: OwnerRef,
        name: &str,
        bytes: Vec<u8>,
        description: &str,
    ) -> Result<BlobRef> {
        let meta = BlobRef {
            id: BlobId::new(),
            owner,
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.blobs.insert(
            meta.id,
            StoredBlob {
                meta: meta.clone(),
                data: bytes,
            },
        );
        Ok(meta)
    }

    async fn read(&self, id: BlobId) -> Result<Vec<u8>> {
        self.blobs
            .get(&id)
            .map(|entry| entry.value().data.clone())
            .ok_or_else(|| SpyglassError::Store(format!("blob not found: {}", id)))
    }

    async fn list(&self, owner: OwnerRef) -> Result<Vec<BlobRef>> {
        Ok(self
            .blobs
            .iter()
            .filter(|entry| entry.value().meta.owner == owner)
            .map(|entry| entry.value().meta.clone())
            .collect())
    }

    async fn delete(&self, ids: &[BlobId]) -> Result<()> {
        for id in ids {
            self.blobs.remove(id);
        }
        Ok(())
    }
}
