//! Output files named after a common root.
//!
//! Every product is written as `<root>_<suffix>` plus `.txt` for waveforms
//! and `.nii.gz` for volumes. Products tagged with a level above the
//! configured output level are skipped.

use anyhow::Context;
use phasegrid_io::{NiftiVolumeIo, Volume, VolumeHeader, VolumeWriter, write_column, write_columns};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Always written.
pub const ESSENTIAL: u8 = 0;
/// Intermediate waveforms and diagnostic maps.
pub const DETAIL: u8 = 1;
/// Large intermediate volumes.
pub const DEBUG: u8 = 2;

pub struct OutputSink {
    root: PathBuf,
    level: u8,
    like: VolumeHeader,
    io: NiftiVolumeIo,
}

impl OutputSink {
    /// Sink under `root`, creating its directory if needed. `like` supplies
    /// the voxel grid of volume outputs.
    pub fn new(root: &Path, level: u8, like: VolumeHeader) -> anyhow::Result<Self> {
        if let Some(parent) = root.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            level,
            like,
            io: NiftiVolumeIo::default(),
        })
    }

    /// Path of the product `suffix` with extension `ext` (including the dot).
    pub fn path(&self, suffix: &str, ext: &str) -> PathBuf {
        let mut name = OsString::from(self.root.as_os_str());
        name.push(format!("_{suffix}{ext}"));
        PathBuf::from(name)
    }

    /// Whether products of `level` are written.
    pub fn wants(&self, level: u8) -> bool {
        level <= self.level
    }

    /// One waveform, one value per line.
    pub fn column(&self, suffix: &str, samples: &[f32], level: u8) -> anyhow::Result<()> {
        if !self.wants(level) {
            return Ok(());
        }
        let path = self.path(suffix, ".txt");
        write_column(&path, samples).with_context(|| format!("writing {}", path.display()))
    }

    /// Per-sample flags written as 0/1.
    pub fn flag_column(&self, suffix: &str, flags: &[bool], level: u8) -> anyhow::Result<()> {
        let values: Vec<f32> = flags.iter().map(|&b| f32::from(u8::from(b))).collect();
        self.column(suffix, &values, level)
    }

    /// Several equal-length waveforms side by side.
    pub fn columns(&self, suffix: &str, columns: &[&[f32]], level: u8) -> anyhow::Result<()> {
        if !self.wants(level) {
            return Ok(());
        }
        let path = self.path(suffix, ".txt");
        write_columns(&path, columns).with_context(|| format!("writing {}", path.display()))
    }

    /// A 3-D map on the input grid.
    pub fn map(&self, suffix: &str, values: Vec<f32>, level: u8) -> anyhow::Result<()> {
        self.volume(suffix, self.like.spatial(), values, level)
    }

    /// A 3-D 0/1 mask on the input grid.
    pub fn mask(&self, suffix: &str, flags: &[bool], level: u8) -> anyhow::Result<()> {
        self.map(suffix, flags.iter().map(|&b| f32::from(u8::from(b))).collect(), level)
    }

    /// A 4-D series with the input grid and time axis.
    pub fn series(&self, suffix: &str, data: Vec<f32>, level: u8) -> anyhow::Result<()> {
        self.volume(suffix, self.like, data, level)
    }

    /// A volume with an explicit header.
    pub fn volume(&self, suffix: &str, header: VolumeHeader, data: Vec<f32>, level: u8) -> anyhow::Result<()> {
        if !self.wants(level) {
            return Ok(());
        }
        let path = self.path(suffix, ".nii.gz");
        let volume = Volume::new(header, data).with_context(|| format!("shaping {}", path.display()))?;
        self.io
            .write_volume(&path, &volume)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "wrote volume");
        Ok(())
    }
}
