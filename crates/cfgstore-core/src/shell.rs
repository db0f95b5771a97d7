//! Shell variable files: `KEY=value` lines grouped under `#` comments.
//!
//! The first comment group documents the file. Every later group documents
//! the keys that follow it up to the next comment. Blank lines carry no
//! meaning. A value wrapped in double quotes is stored without them.

use crate::error::ShellError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A comment block and the keys assigned after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentGroup {
    pub text: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Default)]
struct ShellData {
    groups: Vec<CommentGroup>,
    values: HashMap<String, String>,
}

/// A parsed shell variable file that can rewrite single values in place.
#[derive(Debug)]
pub struct ShellConfig {
    path: PathBuf,
    data: RwLock<ShellData>,
}

impl ShellConfig {
    /// Read and parse the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ShellError> {
        let path = path.as_ref().to_path_buf();
        let src = std::fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
        let data = parse(&src)?;
        debug!(path = %path.display(), keys = data.values.len(), "Parsed shell file");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw value of `key`.
    pub fn string(&self, key: &str) -> Option<String> {
        self.data.read().values.get(key).cloned()
    }

    /// Accepts `1 t T TRUE true True` and their false counterparts.
    pub fn bool(&self, key: &str) -> Result<bool, ShellError> {
        self.typed(key, "bool", |raw| match raw {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
            _ => None,
        })
    }

    pub fn int(&self, key: &str) -> Result<i64, ShellError> {
        self.typed(key, "int", |raw| raw.parse().ok())
    }

    pub fn float(&self, key: &str) -> Result<f64, ShellError> {
        self.typed(key, "float", |raw| raw.parse().ok())
    }

    /// Comment documenting the whole file, if it opens with one.
    pub fn header(&self) -> Option<String> {
        self.data
            .read()
            .groups
            .first()
            .filter(|g| !g.text.is_empty())
            .map(|g| g.text.clone())
    }

    /// Comment block the key was assigned under.
    pub fn comment(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .groups
            .iter()
            .find(|g| g.keys.iter().any(|k| k == key))
            .filter(|g| !g.text.is_empty())
            .map(|g| g.text.clone())
    }

    pub fn groups(&self) -> Vec<CommentGroup> {
        self.data.read().groups.clone()
    }

    /// Replace the value of an existing key, both in the file and in memory.
    ///
    /// Only the assignment line changes. The write lock is held across the
    /// file rewrite so readers never see a value the file does not hold.
    pub fn write_value(&self, key: &str, value: &str) -> Result<(), ShellError> {
        let mut data = self.data.write();
        if !data.values.contains_key(key) {
            return Err(ShellError::UnknownKey(key.to_string()));
        }

        let src = std::fs::read_to_string(&self.path).map_err(|e| io_error(&self.path, e))?;
        let prefix = format!("{}=", key);
        let mut out = String::with_capacity(src.len() + value.len());
        for line in src.split_inclusive('\n') {
            let body = line.trim_end_matches(['\n', '\r']);
            if body.starts_with(&prefix) {
                out.push_str(&prefix);
                out.push_str(value);
                out.push_str(&line[body.len()..]);
            } else {
                out.push_str(line);
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, out).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, e))?;

        data.values.insert(key.to_string(), value.to_string());
        debug!(path = %self.path.display(), key, "Rewrote shell value");
        Ok(())
    }

    fn typed<T>(
        &self,
        key: &str,
        expected: &'static str,
        convert: impl FnOnce(&str) -> Option<T>,
    ) -> Result<T, ShellError> {
        let data = self.data.read();
        let raw = data
            .values
            .get(key)
            .ok_or_else(|| ShellError::UnknownKey(key.to_string()))?;
        convert(raw).ok_or_else(|| ShellError::Invalid {
            key: key.to_string(),
            expected,
            value: raw.clone(),
        })
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ShellError {
    ShellError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse(src: &str) -> Result<ShellData, ShellError> {
    let mut data = ShellData::default();
    let mut comment = String::new();

    for (idx, line) in src.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        if let Some(text) = line.strip_prefix('#') {
            comment.push_str(text.trim_start_matches('#').trim_start());
            comment.push('\n');
            continue;
        }
        if !comment.is_empty() || data.groups.is_empty() {
            data.groups.push(CommentGroup {
                text: std::mem::take(&mut comment),
                keys: Vec::new(),
            });
        }

        let (key, value) = line
            .split_once('=')
            .ok_or(ShellError::Syntax { line: idx + 1 })?;
        let value = if value.starts_with('"') {
            value.trim_matches('"')
        } else {
            value
        };

        if let Some(group) = data.groups.last_mut() {
            group.keys.push(key.to_string());
        }
        data.values.insert(key.to_string(), value.to_string());
    }

    Ok(data)
}
