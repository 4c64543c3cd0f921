//! Whole-file JSON snapshots, replaced atomically on every write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::{ResultExt as _, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PersistError {
    #[snafu(display("failed to read `{}`: {source}", path.display()))]
    Read { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to write `{}`: {source}", path.display()))]
    Write { path: PathBuf, source: std::io::Error },

    #[snafu(display("`{}` does not contain valid data: {source}", path.display()))]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("failed to encode data for `{}`: {source}", path.display()))]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Read a snapshot, `None` when the file does not exist yet.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(source).context(ReadSnafu { path }),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .context(DecodeSnafu { path })
}

/// Write a snapshot next to `path` and rename it over the old one.
pub fn store<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value).context(EncodeSnafu { path })?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context(WriteSnafu { path })?;
    }

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    std::fs::write(&staging, bytes).context(WriteSnafu { path: &staging })?;
    std::fs::rename(&staging, path).context(WriteSnafu { path })?;

    Ok(())
}
