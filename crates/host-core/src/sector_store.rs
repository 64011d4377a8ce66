//! Content-addressed, reference-counted sector storage across storage
//! folders, plus the storage-folder admin API and a consistency sweep.

use std::path::PathBuf;
use std::sync::Arc;

use storage_host_chain::BlockHeight;
use storage_host_common::constants::SECTOR_SIZE;
use storage_host_common::{HostErrorKind, Hash256, Kinded};
use tokio::sync::RwLock;

use crate::db::{DBError, ObligationDB};
use crate::obligation::{SectorUsage, StorageFolder};

#[derive(Debug, thiserror::Error)]
pub enum SectorStoreError {
    #[error("no storage folder has room for a new sector")]
    DiskTrouble,
    #[error("sector not found")]
    SectorNotFound,
    #[error("sector data must be exactly {SECTOR_SIZE} bytes")]
    BadSectorSize,
    #[error("no storage folder with uid {0:x?}")]
    UnknownFolder([u8; 16]),
    #[error("storage folder still holds {0} bytes of sectors")]
    FolderNotEmpty(u64),
    #[error(transparent)]
    Db(#[from] DBError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Kinded for SectorStoreError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Internal
    }
}

pub struct SectorStore {
    db: Arc<ObligationDB>,
    folders: RwLock<Vec<StorageFolder>>,
}

impl SectorStore {
    pub fn new(db: Arc<ObligationDB>, folders: Vec<StorageFolder>) -> Self {
        Self {
            db,
            folders: RwLock::new(folders),
        }
    }

    fn sector_path(folder_path: &std::path::Path, root: Hash256) -> PathBuf {
        folder_path.join(hex::encode(root))
    }

    /// Adds a folder to the pool.
    pub async fn add_folder(&self, path: PathBuf, size: u64) -> Result<[u8; 16], SectorStoreError> {
        tokio::fs::create_dir_all(&path).await?;
        let folder = StorageFolder::new(path, size);
        let uid = folder.uid;
        self.folders.write().await.push(folder);
        Ok(uid)
    }

    /// Resizes an existing folder, adjusting `size_remaining` by the delta.
    pub async fn resize_folder(&self, uid: [u8; 16], new_size: u64) -> Result<(), SectorStoreError> {
        let mut folders = self.folders.write().await;
        let folder = folders
            .iter_mut()
            .find(|f| f.uid == uid)
            .ok_or(SectorStoreError::UnknownFolder(uid))?;
        let used = folder.size - folder.size_remaining;
        if new_size < used {
            return Err(SectorStoreError::FolderNotEmpty(used));
        }
        folder.size = new_size;
        folder.size_remaining = new_size - used;
        Ok(())
    }

    /// Removes a folder; refuses if it still holds sectors.
    pub async fn remove_folder(&self, uid: [u8; 16]) -> Result<(), SectorStoreError> {
        let mut folders = self.folders.write().await;
        let index = folders
            .iter()
            .position(|f| f.uid == uid)
            .ok_or(SectorStoreError::UnknownFolder(uid))?;
        let used = folders[index].size - folders[index].size_remaining;
        if used != 0 {
            return Err(SectorStoreError::FolderNotEmpty(used));
        }
        folders.remove(index);
        Ok(())
    }

    /// Picks the folder with the most free space (even-distribution
    /// placement heuristic).
    async fn pick_folder_for_write(&self) -> Option<[u8; 16]> {
        self.folders
            .read()
            .await
            .iter()
            .filter(|f| f.size_remaining >= SECTOR_SIZE && f.is_usable())
            .max_by_key(|f| f.size_remaining)
            .map(|f| f.uid)
    }

    async fn folder_path(&self, uid: [u8; 16]) -> Option<PathBuf> {
        self.folders
            .read()
            .await
            .iter()
            .find(|f| f.uid == uid)
            .map(|f| f.path.clone())
    }

    /// Writes a new sector, or grows the reference count of an existing
    /// (virtual) one.
    pub async fn add(
        &self,
        root: Hash256,
        expiration: BlockHeight,
        data: &[u8],
    ) -> Result<(), SectorStoreError> {
        if data.len() as u64 != SECTOR_SIZE {
            return Err(SectorStoreError::BadSectorSize);
        }

        if let Some(mut usage) = self.db.get_sector_usage(root)? {
            usage.expirations.push(expiration);
            self.db.put_sector_usage(root, &usage)?;
            return Ok(());
        }

        let uid = self
            .pick_folder_for_write()
            .await
            .ok_or(SectorStoreError::DiskTrouble)?;
        let path = self
            .folder_path(uid)
            .await
            .ok_or(SectorStoreError::DiskTrouble)?;

        tokio::fs::write(Self::sector_path(&path, root), data).await?;

        let mut folders = self.folders.write().await;
        if let Some(folder) = folders.iter_mut().find(|f| f.uid == uid) {
            folder.size_remaining = folder.size_remaining.saturating_sub(SECTOR_SIZE);
        }
        drop(folders);

        self.db.put_sector_usage(
            root,
            &SectorUsage {
                expirations: vec![expiration],
                storage_folder_uid: uid,
                corrupted: false,
            },
        )?;
        Ok(())
    }

    /// Grows the reference count of sectors that must already exist
    /// (contract renewal).
    pub async fn add_batch(
        &self,
        roots: &[Hash256],
        expiration: BlockHeight,
    ) -> Result<(), SectorStoreError> {
        for &root in roots {
            let mut usage = self
                .db
                .get_sector_usage(root)?
                .ok_or(SectorStoreError::SectorNotFound)?;
            usage.expirations.push(expiration);
            self.db.put_sector_usage(root, &usage)?;
        }
        Ok(())
    }

    pub async fn read(&self, root: Hash256) -> Result<Vec<u8>, SectorStoreError> {
        let usage = self
            .db
            .get_sector_usage(root)?
            .ok_or(SectorStoreError::SectorNotFound)?;
        let path = self
            .folder_path(usage.storage_folder_uid)
            .await
            .ok_or(SectorStoreError::UnknownFolder(usage.storage_folder_uid))?;
        let file_path = Self::sector_path(&path, root);

        match tokio::fs::read(&file_path).await {
            Ok(data) => Ok(data),
            Err(err) => {
                self.bump_folder_counter(usage.storage_folder_uid, true).await;
                Err(err.into())
            }
        }
    }

    /// Removes one reference; physically deletes the file once the
    /// refcount drops to zero.
    pub async fn remove(&self, root: Hash256, expiration: BlockHeight) -> Result<(), SectorStoreError> {
        let Some(mut usage) = self.db.get_sector_usage(root)? else {
            return Ok(());
        };

        if let Some(index) = usage.expirations.iter().position(|&e| e == expiration) {
            usage.expirations.remove(index);
        }

        if !usage.expirations.is_empty() {
            self.db.put_sector_usage(root, &usage)?;
            return Ok(());
        }

        let Some(path) = self.folder_path(usage.storage_folder_uid).await else {
            self.db.delete_sector_usage(root)?;
            return Ok(());
        };
        let file_path = Self::sector_path(&path, root);

        match tokio::fs::remove_file(&file_path).await {
            Ok(()) => {
                self.db.delete_sector_usage(root)?;
                let mut folders = self.folders.write().await;
                if let Some(folder) = folders
                    .iter_mut()
                    .find(|f| f.uid == usage.storage_folder_uid)
                {
                    folder.size_remaining =
                        (folder.size_remaining + SECTOR_SIZE).min(folder.size);
                }
                Ok(())
            }
            Err(err) => {
                self.bump_folder_counter(usage.storage_folder_uid, false).await;
                // Leave the usage row in place on I/O failure; the
                // consistency sweep reconciles it later.
                usage.corrupted = false;
                self.db.put_sector_usage(root, &usage)?;
                Err(err.into())
            }
        }
    }

    pub async fn remove_batch(
        &self,
        roots: &[Hash256],
        expiration: BlockHeight,
    ) -> Result<(), SectorStoreError> {
        for &root in roots {
            self.remove(root, expiration).await?;
        }
        Ok(())
    }

    async fn bump_folder_counter(&self, uid: [u8; 16], is_read: bool) {
        let mut folders = self.folders.write().await;
        if let Some(folder) = folders.iter_mut().find(|f| f.uid == uid) {
            if is_read {
                folder.failed_reads += 1;
            } else {
                folder.failed_writes += 1;
            }
        }
    }

    /// Recomputes every folder's `size_remaining` from on-disk reality and
    /// clears `corrupted` flags whose file turns out to be present.
    pub async fn sweep(&self) -> Result<(), SectorStoreError> {
        let mut folders = self.folders.write().await;
        for folder in folders.iter_mut() {
            let mut used = 0u64;
            let mut entries = tokio::fs::read_dir(&folder.path).await?;
            while let Some(entry) = entries.next_entry().await? {
                if let Ok(metadata) = entry.metadata().await {
                    used += metadata.len();
                }
            }
            folder.size_remaining = folder.size.saturating_sub(used);
        }
        Ok(())
    }

    pub async fn folders(&self) -> Vec<StorageFolder> {
        self.folders.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector(byte: u8) -> Vec<u8> {
        vec![byte; SECTOR_SIZE as usize]
    }

    async fn store_with_one_folder() -> (tempfile::TempDir, SectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ObligationDB::open(dir.path().join("db")).unwrap());
        let folder = StorageFolder::new(dir.path().join("folder0"), SECTOR_SIZE * 4);
        tokio::fs::create_dir_all(&folder.path).await.unwrap();
        let store = SectorStore::new(db, vec![folder]);
        (dir, store)
    }

    #[tokio::test]
    async fn add_then_read_round_trips() {
        let (_dir, store) = store_with_one_folder().await;
        let root = [1u8; 32];
        store.add(root, 100, &sector(5)).await.unwrap();
        let data = store.read(root).await.unwrap();
        assert_eq!(data, sector(5));
    }

    #[tokio::test]
    async fn virtual_sector_does_not_rewrite_data() {
        let (_dir, store) = store_with_one_folder().await;
        let root = [2u8; 32];
        store.add(root, 100, &sector(1)).await.unwrap();
        store.add(root, 200, &sector(1)).await.unwrap();
        let usage = store.db.get_sector_usage(root).unwrap().unwrap();
        assert_eq!(usage.expirations, vec![100, 200]);
    }

    #[tokio::test]
    async fn remove_deletes_file_when_refcount_hits_zero() {
        let (_dir, store) = store_with_one_folder().await;
        let root = [3u8; 32];
        store.add(root, 100, &sector(9)).await.unwrap();
        store.remove(root, 100).await.unwrap();
        assert!(store.db.get_sector_usage(root).unwrap().is_none());
        assert!(store.read(root).await.is_err());
    }

    #[tokio::test]
    async fn remove_keeps_sector_while_refs_remain() {
        let (_dir, store) = store_with_one_folder().await;
        let root = [4u8; 32];
        store.add(root, 100, &sector(2)).await.unwrap();
        store.add(root, 200, &sector(2)).await.unwrap();
        store.remove(root, 100).await.unwrap();
        assert!(store.read(root).await.is_ok());
    }

    #[tokio::test]
    async fn add_batch_requires_existing_sectors() {
        let (_dir, store) = store_with_one_folder().await;
        let err = store.add_batch(&[[5u8; 32]], 100).await.unwrap_err();
        assert!(matches!(err, SectorStoreError::SectorNotFound));
    }

    #[tokio::test]
    async fn disk_trouble_when_no_folder_has_room() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ObligationDB::open(dir.path().join("db")).unwrap());
        let folder = StorageFolder::new(dir.path().join("folder0"), SECTOR_SIZE - 1);
        tokio::fs::create_dir_all(&folder.path).await.unwrap();
        let store = SectorStore::new(db, vec![folder]);
        let err = store.add([6u8; 32], 100, &sector(1)).await.unwrap_err();
        assert!(matches!(err, SectorStoreError::DiskTrouble));
    }

    #[tokio::test]
    async fn cannot_remove_nonempty_folder() {
        let (_dir, store) = store_with_one_folder().await;
        store.add([7u8; 32], 100, &sector(1)).await.unwrap();
        let uid = store.folders().await[0].uid;
        let err = store.remove_folder(uid).await.unwrap_err();
        assert!(matches!(err, SectorStoreError::FolderNotEmpty(_)));
    }

    #[tokio::test]
    async fn a_folder_past_the_failure_threshold_is_excluded_from_placement() {
        let (_dir, store) = store_with_one_folder().await;
        {
            let mut folders = store.folders.write().await;
            folders[0].failed_writes = storage_host_common::constants::MAX_STORAGE_FOLDER_FAILURES;
        }
        let err = store.add([8u8; 32], 100, &sector(1)).await.unwrap_err();
        assert!(matches!(err, SectorStoreError::DiskTrouble));
    }
}
