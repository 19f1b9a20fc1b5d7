use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WalConfigError {
    #[error("{reason} when parsing {invalid:?}")]
    InvalidNumber { invalid: String, reason: String },

    #[error("segment_size must be > 0")]
    SegmentSizeIs0,
}

/// Parse number with unit such as 64MiB
fn parse_bytes_with_unit(src: &str) -> Result<u64, WalConfigError> {
    let res = byte_unit::Byte::from_str(src).map_err(|e| WalConfigError::InvalidNumber {
        invalid: src.to_string(),
        reason: e.to_string(),
    })?;

    Ok(res.get_bytes() as u64)
}

/// Where and how the write-ahead log is stored.
#[derive(Clone, Debug, Serialize, Deserialize, Parser)]
pub struct WalConfig {
    /// The directory holding the log segments, the hard state and the snapshots
    #[clap(long, env = "WAL_DIR", default_value = "./_wal")]
    pub dir: PathBuf,

    /// A segment file is closed and a new one started once it grows beyond this size
    #[clap(long, env = "WAL_SEGMENT_SIZE", default_value = "64MiB", parse(try_from_str=parse_bytes_with_unit))]
    pub segment_size: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        <Self as Parser>::parse_from(&Vec::<&'static str>::new())
    }
}

impl WalConfig {
    pub fn build(args: &[&str]) -> Result<WalConfig, WalConfigError> {
        let config = <Self as Parser>::parse_from(args);
        config.validate()
    }

    pub fn validate(self) -> Result<WalConfig, WalConfigError> {
        if self.segment_size == 0 {
            return Err(WalConfigError::SegmentSizeIs0);
        }
        Ok(self)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.join("log")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.join("snapshot")
    }
}
