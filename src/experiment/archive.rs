//! Compressed per-rank archives (`AR_k={k}.json.zst` / `.json.lz4`)

use crate::{Error, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Compression algorithm for rank archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// LZ4 - Fast compression
    Lz4,
    /// ZSTD - Better ratio, slower (default)
    #[default]
    Zstd,
}

impl Compression {
    /// Get algorithm name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// File extension appended after `.json`
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zst",
        }
    }

    /// Compress data using this algorithm
    ///
    /// # Errors
    /// Returns error if compression fails (e.g., ZSTD internal error)
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::Compression(format!("ZSTD compression failed: {e}"))),
        }
    }

    /// Decompress data using this algorithm
    ///
    /// # Errors
    /// Returns error if decompression fails (e.g., corrupted data)
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::Compression(format!("LZ4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::Compression(format!("ZSTD decompression failed: {e}"))),
        }
    }

    /// Algorithm implied by an archive path's extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "lz4" => Some(Self::Lz4),
            "zst" => Some(Self::Zstd),
            _ => None,
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::config(format!(
                "unknown compression '{other}'; choose from: lz4, zstd"
            ))),
        }
    }
}

/// Consensus factors and scores of one rank as persisted on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankArchive {
    /// Rank
    pub k: usize,
    /// Consensus entity factor
    #[serde(rename = "A")]
    pub a: Array2<f64>,
    /// Regressed relation cores
    #[serde(rename = "R")]
    pub r: Vec<Array2<f64>>,
    /// Silhouettes `(k, P)`
    pub sils_all: Array2<f64>,
    /// Consensus reconstruction error
    pub error: f64,
    /// Per-trial errors
    pub errors: Array1<f64>,
}

impl RankArchive {
    /// Archive file name for rank `k`
    #[must_use]
    pub fn file_name(k: usize, compression: Compression) -> String {
        format!("AR_k={k}.json.{}", compression.extension())
    }

    /// Write the archive into `dir`, returning its path
    ///
    /// # Errors
    /// Returns error if serialization, compression or the write fails
    pub fn write(&self, dir: &Path, compression: Compression) -> Result<PathBuf> {
        let path = dir.join(Self::file_name(self.k, compression));
        let json = serde_json::to_vec(self)?;
        fs::write(&path, compression.compress(&json)?)?;
        Ok(path)
    }

    /// Read an archive written by [`RankArchive::write`]
    ///
    /// # Errors
    /// Returns error if the file is missing, has an unknown extension or is
    /// corrupted
    pub fn read(path: &Path) -> Result<Self> {
        let compression = Compression::from_path(path).ok_or_else(|| {
            Error::Compression(format!("unrecognized archive extension: {}", path.display()))
        })?;
        let bytes = compression.decompress(&fs::read(path)?)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn archive() -> RankArchive {
        RankArchive {
            k: 2,
            a: array![[0.5, 0.1], [0.2, 0.9]],
            r: vec![array![[1.0, 0.0], [0.3, 0.7]]],
            sils_all: array![[0.9, 0.95], [0.8, 0.85]],
            error: 0.12,
            errors: array![0.1, 0.14],
        }
    }

    #[test]
    fn test_compression_names() {
        assert_eq!(Compression::Lz4.as_str(), "lz4");
        assert_eq!(Compression::Zstd.as_str(), "zstd");
        assert_eq!(Compression::default(), Compression::Zstd);
        assert_eq!("lz4".parse::<Compression>().unwrap(), Compression::Lz4);
        assert!("gzip".parse::<Compression>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_empty_or_truncated_archive_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for compression in [Compression::Lz4, Compression::Zstd] {
            let path = archive().write(dir.path(), compression).unwrap();
            let bytes = fs::read(&path).unwrap();

            fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
            assert!(RankArchive::read(&path).is_err(), "truncated {compression:?}");

            fs::write(&path, b"").unwrap();
            assert!(RankArchive::read(&path).is_err(), "empty {compression:?}");
        }
    }

    #[test]
    fn test_zstd_compresses_repeated_data() {
        let data = vec![0u8; 10000];
        let compressed = Compression::Zstd.compress(&data).unwrap();
        assert!(compressed.len() < data.len() / 10);
    }

    #[test]
    fn test_corrupted_lz4_rejected() {
        let err = Compression::Lz4.decompress(&[9, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, Error::Compression(_)));
    }

    #[test]
    fn test_archive_file_names() {
        assert_eq!(RankArchive::file_name(4, Compression::Zstd), "AR_k=4.json.zst");
        assert_eq!(RankArchive::file_name(4, Compression::Lz4), "AR_k=4.json.lz4");
    }

    #[test]
    fn test_archive_write_read() {
        let dir = tempfile::tempdir().unwrap();
        for compression in [Compression::Lz4, Compression::Zstd] {
            let path = archive().write(dir.path(), compression).unwrap();
            assert_eq!(RankArchive::read(&path).unwrap(), archive());
        }
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AR_k=2.json");
        fs::write(&path, b"{}").unwrap();
        assert!(matches!(RankArchive::read(&path), Err(Error::Compression(_))));
    }
}
