//! File I/O for phasegrid.
//!
//! This crate provides:
//!
//! - **Volumes**: [`NiftiVolumeIo`] reads and writes 3-D/4-D NIfTI-1 files
//!   (`.nii` or `.nii.gz`) behind the [`VolumeReader`] / [`VolumeWriter`] traits
//! - **Recordings**: [`read_column`] and [`write_column`] for whitespace text
//!   columns ([`read_columns`] / [`write_columns`] for several at once), plus
//!   BIDS physiological `.json` + `.tsv[.gz]` pairs
//! - **Slice timing**: [`read_slice_times`] from text or a BIDS sidecar
//!
//! Volume samples are stored voxel-major (`[voxel, time]`), with the voxel
//! index running x fastest, then y, then z.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use phasegrid_io::{NiftiVolumeIo, VolumeReader, VolumeWriter, read_column, ColumnSpec};
//!
//! let io = NiftiVolumeIo::default();
//! let volume = io.read_volume("sub-01_bold.nii.gz")?;
//! println!("TR = {} s, {} timepoints", volume.header.tr_secs, volume.timepoints());
//!
//! let pleth = read_column("sub-01_physio.json", &ColumnSpec::name("cardiac"))?;
//! io.write_volume("mean.nii.gz", &volume.mean_image())?;
//! ```

mod columns;
mod slicetimes;
mod volume;

pub use columns::{
    ColumnSpec, Recording, read_column, read_columns, write_bids_columns, write_column, write_columns,
};
pub use slicetimes::read_slice_times;
pub use volume::{
    Geometry, NiftiVolumeIo, TimeUnits, Volume, VolumeHeader, VolumeReader, VolumeWriter, read_mask,
};

use std::path::PathBuf;

/// Error types for phasegrid file I/O.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file could not be opened, read or written.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The NIfTI reader rejected a file.
    #[error("NIfTI error in '{path}': {source}")]
    Nifti {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: nifti::NiftiError,
    },

    /// A JSON sidecar could not be parsed.
    #[error("JSON error in '{path}': {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A text file held something other than numbers where numbers belong.
    #[error("parse error in '{path}' line {line}: {reason}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// A requested column does not exist.
    #[error("no column {column} in '{path}'")]
    MissingColumn {
        /// File involved.
        path: PathBuf,
        /// Column name or index that was requested.
        column: String,
    },

    /// Dimensions that must agree do not.
    #[error("shape mismatch: {0}")]
    Shape(String),
}

impl Error {
    /// Create an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error for `path` at one-based `line`.
    pub fn parse(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

/// Convenience result type for phasegrid I/O.
pub type Result<T> = std::result::Result<T, Error>;

/// True when the first bytes carry the gzip magic number.
pub(crate) fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// True when `path` names a gzip-compressed file.
pub(crate) fn has_gz_extension(path: &std::path::Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn gzip_detection() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzip(&[0x00, 0x00, 0x00]));
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn gz_extension() {
        assert!(has_gz_extension(Path::new("bold.nii.gz")));
        assert!(has_gz_extension(Path::new("physio.tsv.GZ")));
        assert!(!has_gz_extension(Path::new("bold.nii")));
    }

    #[test]
    fn parse_error_message() {
        let err = Error::parse("slices.txt", 3, "not a number: 'x'");
        assert_eq!(
            err.to_string(),
            "parse error in 'slices.txt' line 3: not a number: 'x'"
        );
    }
}
