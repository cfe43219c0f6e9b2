//! In-memory registry of live volumes, mirrored to durable storage.
//!
//! [`VolumeStore`] owns every [`VolumeRecord`]: creation, lookup, deletion,
//! and the materialization of share content into each pod's private bind
//! directory. The registry is mirrored wholesale to a [`StateBackend`] so a
//! restarted process can rebuild its view of what the orchestrator believes
//! is mounted.
//!
//! # On-disk layout
//!
//! ```text
//! <data_root>/
//!   anchors/<volume-id>/            # canonical, synchronized share content
//!   binds/<volume-id>/<pod-uid>/    # per-pod copy, tmpfs-backed at publish
//! <state_file>                      # JSON map of all live volume records
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::DriverError;
use crate::share::ResolvedShare;
use crate::types::{POD_UID_KEY, VolumeAccessType, VolumeId};

// ---------------------------------------------------------------------------
// Volume record
// ---------------------------------------------------------------------------

/// One active ephemeral mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Caller-supplied identifier, unique per active mount.
    pub volume_id: VolumeId,
    /// Path the orchestrator sees the mount at.
    pub target_path: PathBuf,
    /// Effective read-only flag the volume was published with.
    pub read_only: bool,
    /// The request's volume attributes, kept for diagnosis and re-derivation.
    pub attributes: HashMap<String, String>,
    /// The share this volume materializes.
    pub share: ResolvedShare,
    /// Nominal capacity recorded for the volume.
    pub capacity_bytes: u64,
    /// Access-type tag; always mount for this driver.
    pub access: VolumeAccessType,
    /// Backing location holding the synchronized canonical share content.
    pub anchor_dir: PathBuf,
    /// Per-pod staging location the target path is bound to.
    pub bind_dir: PathBuf,
}

/// Result of [`VolumeStore::create`]: a republish of a live volume is
/// tolerated, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Result of [`VolumeStore::delete`]: deleting an absent record is tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

// ---------------------------------------------------------------------------
// Durable state backend
// ---------------------------------------------------------------------------

/// Durable storage for the volume map, injected so registry logic and
/// restart reconciliation can be tested independently of a real disk.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the persisted volume map. An absent map loads as empty.
    async fn load(&self) -> Result<HashMap<VolumeId, VolumeRecord>, DriverError>;

    /// Replace the persisted volume map with `volumes`.
    async fn save(&self, volumes: &HashMap<VolumeId, VolumeRecord>) -> Result<(), DriverError>;
}

/// [`StateBackend`] writing the whole map as one JSON document.
pub struct FileStateBackend {
    path: PathBuf,
}

impl FileStateBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    async fn load(&self) -> Result<HashMap<VolumeId, VolumeRecord>, DriverError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(DriverError::StateStore(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&json).map_err(|e| {
            DriverError::StateStore(format!("parse {}: {e}", self.path.display()))
        })
    }

    async fn save(&self, volumes: &HashMap<VolumeId, VolumeRecord>) -> Result<(), DriverError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DriverError::StateStore(format!("create {}: {e}", parent.display())))?;
        }

        let json = serde_json::to_vec_pretty(volumes).map_err(DriverError::state)?;

        // Write-then-rename so a crash mid-write never leaves a torn map
        // behind: readers see either the old document or the new one.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| DriverError::StateStore(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DriverError::StateStore(format!("rename {}: {e}", self.path.display())))
    }
}

// ---------------------------------------------------------------------------
// Volume store
// ---------------------------------------------------------------------------

/// Registry of live volumes.
///
/// # Thread safety
///
/// The registry is a [`DashMap`], giving per-volume-identifier mutual
/// exclusion; concurrent RPCs for distinct volumes never contend.
pub struct VolumeStore {
    data_root: PathBuf,
    volumes: DashMap<VolumeId, VolumeRecord>,
    backend: Arc<dyn StateBackend>,
}

impl VolumeStore {
    pub fn new(data_root: impl Into<PathBuf>, backend: Arc<dyn StateBackend>) -> Self {
        Self {
            data_root: data_root.into(),
            volumes: DashMap::new(),
            backend,
        }
    }

    /// Backing directory holding the synchronized canonical content for a
    /// volume.
    pub fn anchor_dir(&self, volume_id: &VolumeId) -> PathBuf {
        self.data_root.join("anchors").join(&volume_id.0)
    }

    /// Per-pod staging directory, keyed by the pod UID so pods sharing a
    /// share never share a filesystem view.
    pub fn bind_dir(&self, volume_id: &VolumeId, pod_uid: &str) -> PathBuf {
        self.data_root.join("binds").join(&volume_id.0).join(pod_uid)
    }

    /// Rebuild the in-memory registry from durable storage. Called once at
    /// process start, before the service accepts requests.
    pub async fn recover(&self) -> Result<usize, DriverError> {
        let persisted = self.backend.load().await?;
        let count = persisted.len();
        for (id, record) in persisted {
            self.volumes.insert(id, record);
        }
        info!(count, "volume state recovered");
        Ok(count)
    }

    /// Register a volume, creating its anchor and bind directories.
    ///
    /// A record that already exists under `volume_id` is returned unchanged
    /// with [`CreateOutcome::AlreadyExists`] so republish retries are safe.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(volume_id = %volume_id))]
    pub async fn create(
        &self,
        volume_id: &VolumeId,
        target_path: &Path,
        read_only: bool,
        attributes: &HashMap<String, String>,
        share: ResolvedShare,
        capacity_bytes: u64,
        access: VolumeAccessType,
    ) -> Result<(VolumeRecord, CreateOutcome), DriverError> {
        let pod_uid = attributes.get(POD_UID_KEY).cloned().unwrap_or_default();
        let anchor_dir = self.anchor_dir(volume_id);
        let bind_dir = self.bind_dir(volume_id, &pod_uid);

        for dir in [&anchor_dir, &bind_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DriverError::StateStore(format!("create {}: {e}", dir.display())))?;
        }

        let record = VolumeRecord {
            volume_id: volume_id.clone(),
            target_path: target_path.to_path_buf(),
            read_only,
            attributes: attributes.clone(),
            share,
            capacity_bytes,
            access,
            anchor_dir,
            bind_dir,
        };

        match self.volumes.entry(volume_id.clone()) {
            Entry::Occupied(existing) => {
                debug!("volume already registered, tolerating republish");
                Ok((existing.get().clone(), CreateOutcome::AlreadyExists))
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok((record, CreateOutcome::Created))
            }
        }
    }

    /// Look a volume up by identifier.
    pub fn get(&self, volume_id: &VolumeId) -> Option<VolumeRecord> {
        self.volumes.get(volume_id).map(|r| r.clone())
    }

    /// Remove a volume record and flush the map. An absent record is
    /// reported, not an error, so unpublish retries stay safe.
    #[instrument(skip(self), fields(volume_id = %volume_id))]
    pub async fn delete(&self, volume_id: &VolumeId) -> Result<DeleteOutcome, DriverError> {
        if self.volumes.remove(volume_id).is_none() {
            return Ok(DeleteOutcome::NotFound);
        }
        // Flush so a restart cannot resurrect the deleted volume.
        self.persist().await?;
        info!("volume record deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Materialize the share content for one pod: copy the anchor directory
    /// into the volume's bind directory.
    ///
    /// This is a copy, never a bind of the anchor, so each pod's view is
    /// independently mutable and immune to anchor updates racing its reads.
    #[instrument(skip_all, fields(volume_id = %record.volume_id))]
    pub async fn map_to_pod(&self, record: &VolumeRecord) -> Result<(), DriverError> {
        copy_dir_recursive(&record.anchor_dir, &record.bind_dir)
            .await
            .map_err(|e| {
                DriverError::Internal(format!(
                    "copy {} to {}: {e}",
                    record.anchor_dir.display(),
                    record.bind_dir.display()
                ))
            })?;
        debug!("share content mapped to pod");
        Ok(())
    }

    /// Serialize the full registry to durable storage.
    pub async fn persist(&self) -> Result<(), DriverError> {
        let snapshot: HashMap<VolumeId, VolumeRecord> = self
            .volumes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.backend.save(&snapshot).await
    }
}

/// Copy `src` into `dst`, preserving directory structure and symlinks.
/// Existing files in `dst` are overwritten; files only present in `dst`
/// (pod-written, when the mount is writable) are left alone.
async fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let ty = entry.file_type().await?;
            let target = to.join(entry.file_name());
            if ty.is_dir() {
                pending.push((entry.path(), target));
            } else if ty.is_symlink() {
                // ConfigMap/Secret payloads use `..data` symlink indirection;
                // recreate the link rather than chasing it.
                let link = tokio::fs::read_link(entry.path()).await?;
                match tokio::fs::remove_file(&target).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                tokio::fs::symlink(link, &target).await?;
            } else {
                tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::{ResourceRef, SharedConfigMap};

    fn share() -> ResolvedShare {
        ResolvedShare::ConfigMap(SharedConfigMap {
            name: "cm-share".into(),
            config_map_ref: ResourceRef {
                namespace: "ns1".into(),
                name: "cm1".into(),
            },
        })
    }

    fn attributes() -> HashMap<String, String> {
        HashMap::from([(POD_UID_KEY.to_string(), "uid-1".to_string())])
    }

    fn store(root: &Path) -> VolumeStore {
        let backend = Arc::new(FileStateBackend::new(root.join("volumes.json")));
        VolumeStore::new(root.join("data"), backend)
    }

    async fn create_v1(store: &VolumeStore) -> (VolumeRecord, CreateOutcome) {
        store
            .create(
                &VolumeId::from("v1"),
                Path::new("/var/lib/kubelet/pods/uid-1/volumes/v1"),
                false,
                &attributes(),
                share(),
                1 << 30,
                VolumeAccessType::Mount,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_get_delete_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let (record, outcome) = create_v1(&store).await;
        assert_eq!(outcome, CreateOutcome::Created);
        assert!(record.anchor_dir.is_dir());
        assert!(record.bind_dir.is_dir());
        assert!(record.bind_dir.ends_with("binds/v1/uid-1"));

        let fetched = store.get(&VolumeId::from("v1")).expect("record");
        assert_eq!(fetched.volume_id, record.volume_id);
        assert!(!fetched.read_only);

        assert_eq!(
            store.delete(&VolumeId::from("v1")).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(store.get(&VolumeId::from("v1")).is_none());
    }

    #[tokio::test]
    async fn create_tolerates_existing_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let (first, _) = create_v1(&store).await;
        let (second, outcome) = create_v1(&store).await;
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
        assert_eq!(second.target_path, first.target_path);
    }

    #[tokio::test]
    async fn delete_tolerates_missing_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        assert_eq!(
            store.delete(&VolumeId::from("never-there")).await.unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn map_to_pod_copies_anchor_content() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let (record, _) = create_v1(&store).await;

        std::fs::create_dir_all(record.anchor_dir.join("nested")).unwrap();
        std::fs::write(record.anchor_dir.join("ca.crt"), b"pem").unwrap();
        std::fs::write(record.anchor_dir.join("nested/key"), b"val").unwrap();

        store.map_to_pod(&record).await.unwrap();

        assert_eq!(
            std::fs::read(record.bind_dir.join("ca.crt")).unwrap(),
            b"pem"
        );
        assert_eq!(
            std::fs::read(record.bind_dir.join("nested/key")).unwrap(),
            b"val"
        );
    }

    #[tokio::test]
    async fn map_to_pod_preserves_pod_written_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let (record, _) = create_v1(&store).await;

        std::fs::write(record.anchor_dir.join("ca.crt"), b"pem").unwrap();
        std::fs::write(record.bind_dir.join("scratch"), b"pod-owned").unwrap();

        store.map_to_pod(&record).await.unwrap();

        assert!(record.bind_dir.join("ca.crt").exists());
        assert_eq!(
            std::fs::read(record.bind_dir.join("scratch")).unwrap(),
            b"pod-owned"
        );
    }

    #[tokio::test]
    async fn persist_and_recover_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();

        {
            let store = store(tmp.path());
            create_v1(&store).await;
            store.persist().await.unwrap();
        }

        // A fresh store over the same state file must see the volume after
        // recovery, and nothing before it.
        let fresh = store(tmp.path());
        assert!(fresh.get(&VolumeId::from("v1")).is_none());
        assert_eq!(fresh.recover().await.unwrap(), 1);

        let record = fresh.get(&VolumeId::from("v1")).expect("recovered");
        assert_eq!(record.share.share_name(), "cm-share");
    }

    #[tokio::test]
    async fn file_backend_missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileStateBackend::new(tmp.path().join("absent.json"));
        assert!(backend.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_backend_rejects_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("volumes.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let backend = FileStateBackend::new(path);
        assert!(backend.load().await.is_err());
    }
}
