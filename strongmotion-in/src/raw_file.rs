//! This submodule maps a raw data file into memory so that format sniffing
//! and parsing never pay for repeated reads.
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};

use strongmotion_core::errors::SmError;

/// A memory-mapped raw strong-motion file awaiting format dispatch.
#[derive(Debug)]
pub struct RawFile {
    path: PathBuf,
    map: Mmap,
    _file: File,
}

impl RawFile {
    /// Map the file. Empty files are rejected up front; no format has an
    /// empty representation and mapping zero bytes is platform-dependent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SmError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| SmError::MalformedInput {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
        let len = file
            .metadata()
            .map_err(|e| SmError::MalformedInput {
                path: path.display().to_string(),
                msg: e.to_string(),
            })?
            .len();
        if len == 0 {
            return Err(SmError::MalformedInput {
                path: path.display().to_string(),
                msg: "file is empty".to_string(),
            });
        }
        // Safety: the map is read-only and the file handle is held for the
        // lifetime of the map.
        let map = unsafe {
            MmapOptions::new()
                .map(&file)
                .map_err(|e| SmError::MalformedInput {
                    path: path.display().to_string(),
                    msg: e.to_string(),
                })?
        };
        Ok(Self {
            path,
            map,
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The leading bytes as lossy text, the usual material for `is_format`
    /// sniffing of the many fixed-layout text headers in this domain.
    pub fn header_text(&self, n: usize) -> String {
        let n = n.min(self.map.len());
        String::from_utf8_lossy(&self.map[..n]).to_string()
    }

    /// The whole file as lossy text, for line-oriented formats.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.map).to_string()
    }
}
