//! Binary snapshot of the whole registry.
//!
//! ## Layout
//!
//! ```text
//! "707" | version: u8 | kind mask: u32 LE | layout block | kind block ...
//! ```
//!
//! Every block is a `u64` LE length followed by a bincode payload. The layout
//! block lists every map and section. One kind block follows for each bit set
//! in the mask, in [`Kind::ALL`] order, holding the settings of that kind.

use crate::accounts::UserId;
use crate::error::PersistError;
use crate::setting::SettingSnapshot;
use crate::value::Kind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File marker.
pub const MAGIC: &[u8; 3] = b"707";

/// Increment when the block encoding changes.
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1 + 4;

/// One map or section. `path` is empty for a program's main map and holds
/// the chain of section keys otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    pub user: UserId,
    pub program: String,
    pub path: Vec<String>,
    pub name: String,
    pub is_main: bool,
    pub version: String,
}

/// One setting. The last element of `path` is the key in its parent map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRecord {
    pub user: UserId,
    pub program: String,
    pub path: Vec<String>,
    pub state: SettingSnapshot,
}

/// In-memory form of a snapshot file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub maps: Vec<MapRecord>,
    pub settings: Vec<SettingRecord>,
}

impl RegistrySnapshot {
    /// Bit set of the kinds present among the settings.
    pub fn kind_mask(&self) -> u32 {
        self.settings
            .iter()
            .fold(0, |mask, record| mask | record.state.kind.bit())
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistError> {
        let mask = self.kind_mask();
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&mask.to_le_bytes());

        write_block(&mut out, &self.maps)?;
        for kind in Kind::ALL {
            if mask & kind.bit() == 0 {
                continue;
            }
            let records: Vec<&SettingRecord> = self
                .settings
                .iter()
                .filter(|r| r.state.kind == kind)
                .collect();
            write_block(&mut out, &records)?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PersistError> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(PersistError::BadHeader);
        }
        let version = bytes[MAGIC.len()];
        if version != FORMAT_VERSION {
            return Err(PersistError::UnsupportedVersion(version));
        }
        let mut mask_bytes = [0u8; 4];
        mask_bytes.copy_from_slice(&bytes[MAGIC.len() + 1..HEADER_LEN]);
        let mask = u32::from_le_bytes(mask_bytes);
        let known = Kind::ALL.iter().fold(0, |m, k| m | k.bit());
        if mask & !known != 0 {
            return Err(PersistError::UnknownKinds(mask & !known));
        }

        let mut reader = BlockReader {
            bytes,
            pos: HEADER_LEN,
        };
        let maps: Vec<MapRecord> = reader.block()?;
        let mut settings = Vec::new();
        for kind in Kind::ALL {
            if mask & kind.bit() == 0 {
                continue;
            }
            let records: Vec<SettingRecord> = reader.block()?;
            if let Some(stray) = records.iter().find(|r| r.state.kind != kind) {
                return Err(PersistError::Corrupt(format!(
                    "{} setting stored in the {} block",
                    stray.state.kind, kind
                )));
            }
            settings.extend(records);
        }
        if reader.pos != bytes.len() {
            return Err(PersistError::Corrupt(format!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }
        Ok(Self { maps, settings })
    }
}

fn write_block<T: Serialize + ?Sized>(out: &mut Vec<u8>, value: &T) -> Result<(), PersistError> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| PersistError::Encode(e.to_string()))?;
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

struct BlockReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl BlockReader<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], PersistError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| PersistError::Corrupt("truncated block".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn block<T: DeserializeOwned>(&mut self) -> Result<T, PersistError> {
        let mut len = [0u8; 8];
        len.copy_from_slice(self.take(8)?);
        let len = usize::try_from(u64::from_le_bytes(len))
            .map_err(|_| PersistError::Corrupt("block length overflow".to_string()))?;
        let payload = self.take(len)?;
        let (value, used) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| PersistError::Decode(e.to_string()))?;
        if used != payload.len() {
            return Err(PersistError::Corrupt("block has unread bytes".to_string()));
        }
        Ok(value)
    }
}

/// Snapshot file on local disk.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot atomically: sibling temp file, then rename.
    pub async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), PersistError> {
        let bytes = snapshot.encode()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }

    /// Read the last snapshot, `None` if none was ever written.
    pub async fn load(&self) -> Result<Option<RegistrySnapshot>, PersistError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot yet, starting empty");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        RegistrySnapshot::decode(&bytes).map(Some)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
