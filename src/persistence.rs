//! Write-temp-then-rename MsgPack persistence for `history.mp`/`validator.mp`,
//! per §6 and §7 ("State persistence — torn write prevention via
//! temp+rename; failure logged and alerted, not fatal").
//!
//! Grounded on the `anyhow::{Context, Result}`-threaded I/O idiom used
//! throughout this codebase; the atomic-rename itself mirrors the
//! write-ahead discipline `backtest_v2/l2_storage.rs` applies at the SQLite
//! layer, adapted here to a flat-file MsgPack dump since the core no longer
//! carries a database.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Serialize `value` as MsgPack and write it to `path` via a sibling
/// temp file + atomic rename, so a crash mid-write never leaves a torn file.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = rmp_serde::to_vec_named(value).context("encoding state to MsgPack")?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp_path = dir.to_path_buf();
    let tmp_name = format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    );
    tmp_path.push(tmp_name);

    std::fs::write(&tmp_path, &bytes)
        .with_context(|| format!("writing temp file {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "renaming {} into place at {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Load and decode a MsgPack dump written by `save_atomic`.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    rmp_serde::from_slice(&bytes).context("decoding MsgPack state")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Fixture {
        step: u64,
        scores: Vec<f64>,
    }

    #[test]
    fn round_trip_via_temp_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validator.mp");
        let value = Fixture {
            step: 42,
            scores: vec![0.1, 0.5, 0.9],
        };

        save_atomic(&path, &value).unwrap();
        assert!(path.exists());
        // no leftover temp file after a successful rename
        assert!(!dir.path().join(".validator.mp.tmp").exists());

        let loaded: Fixture = load(&path).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn overwrite_replaces_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.mp");
        save_atomic(
            &path,
            &Fixture {
                step: 1,
                scores: vec![],
            },
        )
        .unwrap();
        save_atomic(
            &path,
            &Fixture {
                step: 2,
                scores: vec![1.0],
            },
        )
        .unwrap();

        let loaded: Fixture = load(&path).unwrap();
        assert_eq!(loaded.step, 2);
    }
}
