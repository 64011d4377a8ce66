//! The Obligation DB: transactional persistence for obligations, sector
//! usage and the height-indexed action queue.

use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options as DBOptions, DB as RocksDB};
use serde::{Deserialize, Serialize};
use storage_host_chain::BlockHeight;
use storage_host_common::{HostErrorKind, Hash256, Kinded};

use crate::obligation::{SectorUsage, StorageObligation};

#[derive(Debug, thiserror::Error)]
pub enum DBError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    RocksDB(#[from] rocksdb::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("database was created with schema version {found}, this host expects {expected}")]
    SchemaMismatch { expected: u32, found: u32 },
}

impl Kinded for DBError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Internal
    }
}

const SCHEMA_VERSION: u32 = 1;
const METADATA_CF: &str = "metadata";
const METADATA_KEY: &[u8] = b"header";
const RECENT_CHANGE_KEY: &[u8] = b"recent_change";
const STORAGE_OBLIGATIONS_CF: &str = "storage_obligations";
const SECTOR_USAGE_CF: &str = "sector_usage";
const ACTION_ITEMS_CF: &str = "action_items";

const COLUMN_FAMILIES: [&str; 4] = [
    METADATA_CF,
    STORAGE_OBLIGATIONS_CF,
    SECTOR_USAGE_CF,
    ACTION_ITEMS_CF,
];

#[derive(Debug, Serialize, Deserialize)]
struct DBHeader {
    identifier: String,
    version: u32,
}

/// The on-disk key-value store backing the host's obligations, sector
/// usage records and action queue (persisted as `host.db`).
pub struct ObligationDB {
    database: RocksDB,
}

impl ObligationDB {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DBError> {
        let mut opts = DBOptions::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = COLUMN_FAMILIES
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, DBOptions::default()));

        let database = RocksDB::open_cf_descriptors(&opts, path, cfs)?;
        let db = Self { database };
        db.check_or_write_header()?;
        Ok(db)
    }

    fn check_or_write_header(&self) -> Result<(), DBError> {
        let cf = self.cf_handle(METADATA_CF);
        match self.database.get_pinned_cf(cf, METADATA_KEY)? {
            Some(bytes) => {
                let header: DBHeader = serde_json::from_slice(bytes.as_ref())?;
                if header.version != SCHEMA_VERSION {
                    return Err(DBError::SchemaMismatch {
                        expected: SCHEMA_VERSION,
                        found: header.version,
                    });
                }
                Ok(())
            }
            None => {
                let header = DBHeader {
                    identifier: "Sia Host DB".to_string(),
                    version: SCHEMA_VERSION,
                };
                self.database
                    .put_cf(cf, METADATA_KEY, serde_json::to_vec(&header)?)?;
                Ok(())
            }
        }
    }

    fn cf_handle(&self, name: &str) -> &ColumnFamily {
        self.database
            .cf_handle(name)
            .expect("column family should have been initialized on database startup")
    }

    fn action_key(height: BlockHeight) -> [u8; 8] {
        height.to_be_bytes()
    }

    // -- consensus subscription cursor --

    /// The `id` of the last consensus change applied, so a restarted host
    /// resumes its subscription from where it left off instead of
    /// replaying the whole chain.
    pub fn get_recent_change(&self) -> Result<Option<Hash256>, DBError> {
        let cf = self.cf_handle(METADATA_CF);
        let Some(bytes) = self.database.get_pinned_cf(cf, RECENT_CHANGE_KEY)? else {
            return Ok(None);
        };
        let id: Hash256 = bytes
            .as_ref()
            .try_into()
            .expect("recent change id is always stored as 32 bytes");
        Ok(Some(id))
    }

    pub fn put_recent_change(&self, id: Hash256) -> Result<(), DBError> {
        let cf = self.cf_handle(METADATA_CF);
        self.database.put_cf(cf, RECENT_CHANGE_KEY, id)?;
        Ok(())
    }

    // -- obligations --

    pub fn get_obligation(&self, id: Hash256) -> Result<Option<StorageObligation>, DBError> {
        let cf = self.cf_handle(STORAGE_OBLIGATIONS_CF);
        let Some(bytes) = self.database.get_pinned_cf(cf, id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(bytes.as_ref())?))
    }

    pub fn put_obligation(&self, obligation: &StorageObligation) -> Result<(), DBError> {
        let cf = self.cf_handle(STORAGE_OBLIGATIONS_CF);
        self.database
            .put_cf(cf, obligation.id, serde_json::to_vec(obligation)?)?;
        Ok(())
    }

    // -- sector usage --

    pub fn get_sector_usage(&self, root: Hash256) -> Result<Option<SectorUsage>, DBError> {
        let cf = self.cf_handle(SECTOR_USAGE_CF);
        let Some(bytes) = self.database.get_pinned_cf(cf, root)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(bytes.as_ref())?))
    }

    pub fn put_sector_usage(&self, root: Hash256, usage: &SectorUsage) -> Result<(), DBError> {
        let cf = self.cf_handle(SECTOR_USAGE_CF);
        self.database.put_cf(cf, root, serde_json::to_vec(usage)?)?;
        Ok(())
    }

    pub fn delete_sector_usage(&self, root: Hash256) -> Result<(), DBError> {
        let cf = self.cf_handle(SECTOR_USAGE_CF);
        self.database.delete_cf(cf, root)?;
        Ok(())
    }

    // -- action items --

    /// Appends `obligation_id` to the list due at `height`.
    pub fn enqueue_action(&self, height: BlockHeight, obligation_id: Hash256) -> Result<(), DBError> {
        let cf = self.cf_handle(ACTION_ITEMS_CF);
        let key = Self::action_key(height);
        let mut ids = match self.database.get_pinned_cf(cf, key)? {
            Some(bytes) => decode_id_list(bytes.as_ref()),
            None => Vec::new(),
        };
        ids.push(obligation_id);
        self.database.put_cf(cf, key, encode_id_list(&ids))?;
        Ok(())
    }

    /// Drains and removes every action-item bucket at a height `<= height`,
    /// returning the concatenated obligation ids in height order.
    pub fn drain_actions_up_to(&self, height: BlockHeight) -> Result<Vec<Hash256>, DBError> {
        let cf = self.cf_handle(ACTION_ITEMS_CF);
        let mut drained = Vec::new();
        let mut to_delete = Vec::new();

        let iter = self.database.iterator_cf(cf, rocksdb::IteratorMode::Start);
        for item in iter {
            let (key, value) = item?;
            if key.len() != 8 {
                continue;
            }
            let item_height = BlockHeight::from_be_bytes(key.as_ref().try_into().unwrap());
            if item_height > height {
                break;
            }
            drained.extend(decode_id_list(&value));
            to_delete.push(key.to_vec());
        }

        for key in to_delete {
            self.database.delete_cf(cf, key)?;
        }

        Ok(drained)
    }
}

fn encode_id_list(ids: &[Hash256]) -> Vec<u8> {
    ids.iter().flatten().copied().collect()
}

fn decode_id_list(bytes: &[u8]) -> Vec<Hash256> {
    bytes
        .chunks_exact(32)
        .map(|chunk| chunk.try_into().expect("chunk is exactly 32 bytes"))
        .collect()
}
