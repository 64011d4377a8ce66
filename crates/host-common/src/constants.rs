//! Release-tuned protocol constants shared across every storage-host
//! crate.

use std::time::Duration;

/// Size of a stored sector.
pub const SECTOR_SIZE: u64 = 4 * 1024 * 1024;

/// Size of the leaf a storage proof challenges.
pub const SEGMENT_SIZE: u64 = 64;

/// Leaves per sector; `SECTOR_SIZE` is always an exact multiple of
/// `SEGMENT_SIZE`.
pub const SEGMENTS_PER_SECTOR: u64 = SECTOR_SIZE / SEGMENT_SIZE;

pub const REVISION_SUBMISSION_BUFFER: u64 = 144;
pub const RESUBMISSION_TIMEOUT: u64 = 3;
pub const STORAGE_PROOF_CONFIRMATIONS: u64 = 12;
pub const DEFAULT_WINDOW_SIZE: u64 = 144;
pub const DEFAULT_MAX_DURATION: u64 = 144 * 30 * 6;

/// Minimum normalized Shannon entropy a newly-uploaded sector must clear:
/// a cheap anti-upload-grief filter, not a security bound.
pub const SECTOR_ENTROPY_FLOOR: f64 = 0.5;

/// A storage folder with at least this many combined failed reads/writes
/// is excluded from new-sector placement; existing sectors on it are left
/// alone (§4.9: "repeated failures mark a folder unusable but do not kill
/// the host").
pub const MAX_STORAGE_FOLDER_FAILURES: u64 = 10;

pub const OBLIGATION_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
pub const ITERATED_CONNECTION_TIME: Duration = Duration::from_secs(1200);

/// Per-phase negotiation read/write deadlines.
pub const SETTINGS_DEADLINE: Duration = Duration::from_secs(60);
pub const FORM_CONTRACT_DEADLINE: Duration = Duration::from_secs(360);
pub const REVISE_CONTRACT_DEADLINE: Duration = Duration::from_secs(600);
pub const DOWNLOAD_ITERATION_DEADLINE: Duration = Duration::from_secs(600);
pub const RECENT_REVISION_DEADLINE: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_divides_evenly_into_segments() {
        assert_eq!(SECTOR_SIZE % SEGMENT_SIZE, 0);
        assert_eq!(SEGMENTS_PER_SECTOR, 65536);
    }
}
