//! `HostInternalSettings` and the `host.json` persisted record that
//! carries it alongside financial metrics and the host's signing
//! identity, loaded and validated by a `ServerArguments`/
//! `ServerConfiguration` pair.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use storage_host_chain::Currency;
use storage_host_common::constants::{DEFAULT_MAX_DURATION, DEFAULT_WINDOW_SIZE};
use storage_host_common::{HostErrorKind, Kinded};
use storage_host_core::financial::FinancialMetrics;
use storage_host_core::identity::HostIdentity;

const SETTINGS_IDENTIFIER: &str = "Sia Host";
const SETTINGS_VERSION: u32 = 1;
const SETTINGS_FILE_NAME: &str = "host.json";

/// The negotiable terms a host advertises and enforces. Every
/// `min_*` field doubles as the price this host actually charges: the host
/// fully controls its own settings, so there is no separate "current price"
/// distinct from the floor it is willing to accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInternalSettings {
    pub accepting_contracts: bool,
    pub max_download_batch_size: u64,
    pub max_duration: u64,
    pub max_revise_batch_size: u64,
    pub window_size: u64,
    pub collateral: Currency,
    pub collateral_budget: Currency,
    pub max_collateral: Currency,
    pub min_contract_price: Currency,
    pub min_download_bandwidth_price: Currency,
    pub min_storage_price: Currency,
    pub min_upload_bandwidth_price: Currency,
    pub net_address: String,
}

impl Default for HostInternalSettings {
    fn default() -> Self {
        Self {
            accepting_contracts: true,
            max_download_batch_size: 4 * storage_host_common::constants::SECTOR_SIZE,
            max_duration: DEFAULT_MAX_DURATION,
            max_revise_batch_size: 4 * storage_host_common::constants::SECTOR_SIZE,
            window_size: DEFAULT_WINDOW_SIZE,
            collateral: 0,
            collateral_budget: 0,
            max_collateral: 0,
            min_contract_price: 1,
            min_download_bandwidth_price: 1,
            min_storage_price: 1,
            min_upload_bandwidth_price: 0,
            net_address: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsHeader {
    identifier: String,
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedHost {
    header: SettingsHeader,
    settings: HostInternalSettings,
    financial: FinancialMetrics,
    identity_key: [u8; 32],
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("host.json was created with schema version {found}, this host expects {expected}")]
    SchemaMismatch { expected: u32, found: u32 },
}

impl Kinded for SettingsError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Internal
    }
}

/// Loads `<persist_dir>/host.json`, creating it (with a freshly generated
/// identity) if absent.
pub fn load_or_init(
    persist_dir: &Path,
) -> Result<(HostInternalSettings, FinancialMetrics, HostIdentity), SettingsError> {
    let path = persist_dir.join(SETTINGS_FILE_NAME);
    if !path.exists() {
        let settings = HostInternalSettings::default();
        let financial = FinancialMetrics::default();
        let identity = HostIdentity::generate();
        save(persist_dir, &settings, &financial, &identity)?;
        return Ok((settings, financial, identity));
    }

    let bytes = std::fs::read(&path)?;
    let persisted: PersistedHost = serde_json::from_slice(&bytes)?;
    if persisted.header.version != SETTINGS_VERSION {
        return Err(SettingsError::SchemaMismatch {
            expected: SETTINGS_VERSION,
            found: persisted.header.version,
        });
    }
    let identity = HostIdentity::from_bytes(persisted.identity_key);
    Ok((persisted.settings, persisted.financial, identity))
}

/// Rewrites `host.json` in full. Called on every settings mutation, since
/// financial metrics are mirrored in the persisted settings file.
pub fn save(
    persist_dir: &Path,
    settings: &HostInternalSettings,
    financial: &FinancialMetrics,
    identity: &HostIdentity,
) -> Result<(), SettingsError> {
    let persisted = PersistedHost {
        header: SettingsHeader {
            identifier: SETTINGS_IDENTIFIER.to_string(),
            version: SETTINGS_VERSION,
        },
        settings: settings.clone(),
        financial: financial.clone(),
        identity_key: identity.to_bytes(),
    };
    let path = persist_dir.join(SETTINGS_FILE_NAME);
    std::fs::write(path, serde_json::to_vec_pretty(&persisted)?)?;
    Ok(())
}

/// Process-level arguments, unvalidated.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct ServerArguments {
    /// Address the negotiation engine listens on.
    #[arg(long, default_value = "127.0.0.1:9982")]
    pub listen_address: SocketAddr,

    /// Directory holding `host.db`, `host.json` and `host.log`.
    #[arg(long, default_value = "./host-data")]
    pub persist_dir: PathBuf,

    /// Size, in bytes, of the single storage folder bootstrapped on first
    /// run. Additional folders are managed afterwards through the storage
    /// folder admin API.
    #[arg(long, default_value_t = 64 * storage_host_common::constants::SECTOR_SIZE)]
    pub storage_folder_size: u64,

    /// Starting block height handed to the bundled placeholder chain
    /// backend (`storage_host_chain::mock::MockChain`). The consensus set,
    /// transaction pool and wallet are external collaborators outside this
    /// crate's scope; this binary wires the mock in their place so the
    /// daemon is runnable end to end, and a real deployment swaps it for a
    /// genuine chain client satisfying the same traits.
    #[arg(long, default_value_t = 0)]
    pub starting_height: u64,
}

/// A valid, ready-to-run configuration, produced via
/// `TryFrom<ServerArguments>`.
pub struct ServerConfiguration {
    pub listen_address: SocketAddr,
    pub persist_dir: PathBuf,
    pub storage_folder_size: u64,
    pub starting_height: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("storage_folder_size must be at least one sector ({sector_size} bytes)")]
    FolderTooSmall { sector_size: u64 },
}

impl TryFrom<ServerArguments> for ServerConfiguration {
    type Error = ConfigurationError;

    fn try_from(value: ServerArguments) -> Result<Self, Self::Error> {
        if value.storage_folder_size < storage_host_common::constants::SECTOR_SIZE {
            return Err(ConfigurationError::FolderTooSmall {
                sector_size: storage_host_common::constants::SECTOR_SIZE,
            });
        }
        std::fs::create_dir_all(&value.persist_dir)?;
        Ok(Self {
            listen_address: value.listen_address,
            persist_dir: value.persist_dir,
            storage_folder_size: value.storage_folder_size,
            starting_height: value.starting_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_creates_a_settings_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, financial, _identity) = load_or_init(dir.path()).unwrap();
        assert!(settings.accepting_contracts);
        assert_eq!(financial.contract_count, 0);
        assert!(dir.path().join(SETTINGS_FILE_NAME).exists());
    }

    #[test]
    fn reopening_restores_the_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (_settings, _financial, identity) = load_or_init(dir.path()).unwrap();
        let (_settings2, _financial2, identity2) = load_or_init(dir.path()).unwrap();
        assert_eq!(identity.public_key(), identity2.public_key());
    }

    #[test]
    fn mismatched_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        let bogus = serde_json::json!({
            "header": {"identifier": "Sia Host", "version": 99},
            "settings": HostInternalSettings::default(),
            "financial": FinancialMetrics::default(),
            "identity_key": [0u8; 32],
        });
        std::fs::write(&path, serde_json::to_vec(&bogus).unwrap()).unwrap();
        let err = load_or_init(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::SchemaMismatch { expected: 1, found: 99 }
        ));
    }

    #[test]
    fn rejects_undersized_storage_folder() {
        let args = ServerArguments {
            listen_address: "127.0.0.1:0".parse().unwrap(),
            persist_dir: tempfile::tempdir().unwrap().into_path(),
            storage_folder_size: 10,
            starting_height: 0,
        };
        let err = ServerConfiguration::try_from(args).unwrap_err();
        assert!(matches!(err, ConfigurationError::FolderTooSmall { .. }));
    }
}
