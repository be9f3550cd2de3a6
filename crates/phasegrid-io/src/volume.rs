//! NIfTI-1 volume reading and writing.
//!
//! Reading goes through the `nifti` crate, which applies the header's
//! intensity scaling. Writing emits a single-file NIfTI-1 header by hand with
//! float32 samples, copying the input geometry so outputs overlay their
//! source.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};
use std::io::{Cursor, Write};
use std::path::Path;

use crate::{Error, Result, has_gz_extension, is_gzip};

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const DT_FLOAT32: i16 = 16;
const UNITS_MM: u8 = 2;
const UNITS_SEC: u8 = 8;

/// Time unit of the fourth pixel dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnits {
    /// Seconds.
    #[default]
    Seconds,
    /// Milliseconds.
    Milliseconds,
    /// Microseconds.
    Microseconds,
    /// Not stated; treated as seconds.
    Unknown,
}

impl TimeUnits {
    fn from_xyzt(xyzt_units: u8) -> Self {
        match xyzt_units & 0x38 {
            8 => TimeUnits::Seconds,
            16 => TimeUnits::Milliseconds,
            24 => TimeUnits::Microseconds,
            _ => TimeUnits::Unknown,
        }
    }

    /// Multiplier converting this unit to seconds.
    pub fn to_seconds(self) -> f32 {
        match self {
            TimeUnits::Milliseconds => 1e-3,
            TimeUnits::Microseconds => 1e-6,
            TimeUnits::Seconds | TimeUnits::Unknown => 1.0,
        }
    }
}

/// Spatial placement copied verbatim from the source header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// qform code.
    pub qform_code: i16,
    /// sform code.
    pub sform_code: i16,
    /// Quaternion b, c, d.
    pub quatern: [f32; 3],
    /// Quaternion offsets x, y, z.
    pub qoffset: [f32; 3],
    /// sform rows x, y, z.
    pub srow: [[f32; 4]; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            qform_code: 0,
            sform_code: 0,
            quatern: [0.0; 3],
            qoffset: [0.0; 3],
            srow: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
        }
    }
}

/// The parts of a NIfTI header phasegrid uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeHeader {
    /// Dimensions `[x, y, z, t]`; absent dimensions are 1.
    pub dims: [usize; 4],
    /// Voxel sizes in mm.
    pub voxel_sizes: [f32; 3],
    /// Repetition time in seconds (the fourth pixel dimension, converted).
    pub tr_secs: f32,
    /// Time of the first volume in seconds.
    pub toffset: f32,
    /// Time unit the file stated.
    pub units: TimeUnits,
    /// Spatial placement.
    pub geometry: Geometry,
}

impl VolumeHeader {
    /// A header for a `[x, y, z, t]` grid of 1 mm voxels sampled every
    /// `tr_secs`.
    pub fn new(dims: [usize; 4], tr_secs: f32) -> Self {
        Self {
            dims,
            voxel_sizes: [1.0; 3],
            tr_secs,
            toffset: 0.0,
            units: TimeUnits::Seconds,
            geometry: Geometry::default(),
        }
    }

    /// Number of slices (the z dimension).
    pub fn slice_count(&self) -> usize {
        self.dims[2]
    }

    /// Number of timepoints.
    pub fn timepoints(&self) -> usize {
        self.dims[3]
    }

    /// Voxels in one 3-D volume.
    pub fn spatial_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Voxels in one slice.
    pub fn slice_size(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    /// Same geometry with `timepoints` volumes, the fourth axis starting at
    /// `toffset` and stepping by `step`.
    pub fn with_time_axis(&self, timepoints: usize, toffset: f32, step: f32) -> Self {
        let mut header = *self;
        header.dims[3] = timepoints;
        header.toffset = toffset;
        header.tr_secs = step;
        header.units = TimeUnits::Seconds;
        header
    }

    /// Same geometry as a single 3-D volume.
    pub fn spatial(&self) -> Self {
        self.with_time_axis(1, 0.0, self.tr_secs)
    }

    /// Whether two headers describe the same voxel grid.
    pub fn same_grid(&self, other: &VolumeHeader) -> bool {
        self.dims[..3] == other.dims[..3]
    }

    fn from_nifti(header: &NiftiHeader, shape: &[usize]) -> Result<Self> {
        // 1-D and 2-D files are padded out to a single slice
        if shape.iter().skip(4).any(|&d| d > 1) {
            return Err(Error::Shape(format!("{}-D data is not supported", shape.len())));
        }
        let mut dims = [1usize; 4];
        for (dim, &extent) in dims.iter_mut().zip(shape) {
            *dim = extent;
        }
        let units = TimeUnits::from_xyzt(header.xyzt_units as u8);
        Ok(Self {
            dims,
            voxel_sizes: [header.pixdim[1], header.pixdim[2], header.pixdim[3]],
            tr_secs: header.pixdim[4] * units.to_seconds(),
            toffset: header.toffset * units.to_seconds(),
            units,
            geometry: Geometry {
                qform_code: header.qform_code as i16,
                sform_code: header.sform_code as i16,
                quatern: [header.quatern_b, header.quatern_c, header.quatern_d],
                qoffset: [header.quatern_x, header.quatern_y, header.quatern_z],
                srow: [header.srow_x, header.srow_y, header.srow_z],
            },
        })
    }

    /// Encode a NIfTI-1 single-file header for float32 data.
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let mut put = |offset: usize, field: &[u8]| bytes[offset..offset + field.len()].copy_from_slice(field);

        put(0, &(HEADER_SIZE as i32).to_le_bytes());
        put(38, b"r");
        let ndim: i16 = if self.dims[3] > 1 { 4 } else { 3 };
        let dim: [i16; 8] = [
            ndim,
            self.dims[0] as i16,
            self.dims[1] as i16,
            self.dims[2] as i16,
            self.dims[3] as i16,
            1,
            1,
            1,
        ];
        for (i, d) in dim.iter().enumerate() {
            put(40 + 2 * i, &d.to_le_bytes());
        }
        put(70, &DT_FLOAT32.to_le_bytes());
        put(72, &32i16.to_le_bytes());

        let qfac = 1.0f32;
        let pixdim: [f32; 8] = [
            qfac,
            self.voxel_sizes[0],
            self.voxel_sizes[1],
            self.voxel_sizes[2],
            self.tr_secs,
            1.0,
            1.0,
            1.0,
        ];
        for (i, p) in pixdim.iter().enumerate() {
            put(76 + 4 * i, &p.to_le_bytes());
        }
        put(108, &(VOX_OFFSET as f32).to_le_bytes());
        put(112, &1.0f32.to_le_bytes());
        put(123, &[UNITS_MM | UNITS_SEC]);
        put(136, &self.toffset.to_le_bytes());

        let geometry = &self.geometry;
        put(252, &geometry.qform_code.to_le_bytes());
        put(254, &geometry.sform_code.to_le_bytes());
        for (i, q) in geometry.quatern.iter().chain(&geometry.qoffset).enumerate() {
            put(256 + 4 * i, &q.to_le_bytes());
        }
        for (row, values) in geometry.srow.iter().enumerate() {
            for (i, v) in values.iter().enumerate() {
                put(280 + 16 * row + 4 * i, &v.to_le_bytes());
            }
        }
        put(344, b"n+1\0");
        bytes
    }
}

/// A 3-D or 4-D image with voxel-major samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    /// Grid and timing.
    pub header: VolumeHeader,
    data: Vec<f32>,
}

impl Volume {
    /// Wrap voxel-major samples (`data[voxel * timepoints + t]`).
    ///
    /// # Errors
    ///
    /// [`Error::Shape`] when `data` does not fill the header's grid.
    pub fn new(header: VolumeHeader, data: Vec<f32>) -> Result<Self> {
        let expected = header.spatial_count() * header.timepoints();
        if data.len() != expected {
            return Err(Error::Shape(format!(
                "{} samples for a {:?} grid (expected {expected})",
                data.len(),
                header.dims
            )));
        }
        Ok(Self { header, data })
    }

    /// Number of voxels in one volume.
    pub fn voxel_count(&self) -> usize {
        self.header.spatial_count()
    }

    /// Number of timepoints.
    pub fn timepoints(&self) -> usize {
        self.header.timepoints()
    }

    /// All samples, voxel-major.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consume the volume, returning its samples.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Time series of one voxel.
    pub fn voxel_series(&self, voxel: usize) -> &[f32] {
        let t = self.timepoints();
        &self.data[voxel * t..(voxel + 1) * t]
    }

    /// Slice index of every voxel.
    pub fn voxel_slices(&self) -> Vec<usize> {
        let per_slice = self.header.slice_size().max(1);
        (0..self.voxel_count()).map(|v| v / per_slice).collect()
    }

    /// Drop the first `count` timepoints, shifting the time offset to match.
    ///
    /// # Errors
    ///
    /// [`Error::Shape`] when nothing would remain.
    pub fn skip_leading(&mut self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let t = self.timepoints();
        if count >= t {
            return Err(Error::Shape(format!("cannot skip {count} of {t} timepoints")));
        }
        let kept = t - count;
        self.data = self
            .data
            .chunks_exact(t)
            .flat_map(|series| series[count..].iter().copied())
            .collect();
        self.header.dims[3] = kept;
        self.header.toffset += count as f32 * self.header.tr_secs;
        Ok(())
    }

    /// Temporal mean of every voxel as a 3-D volume.
    pub fn mean_image(&self) -> Volume {
        let t = self.timepoints().max(1);
        let data = self
            .data
            .chunks_exact(t)
            .map(|series| series.iter().sum::<f32>() / t as f32)
            .collect();
        Volume {
            header: self.header.spatial(),
            data,
        }
    }
}

/// Source of volumes.
pub trait VolumeReader {
    /// Read a 3-D or 4-D volume.
    fn read_volume(&self, path: &Path) -> Result<Volume>;
}

/// Sink for volumes.
pub trait VolumeWriter {
    /// Write a volume, replacing any existing file.
    fn write_volume(&self, path: &Path, volume: &Volume) -> Result<()>;
}

/// NIfTI-1 adapter for [`VolumeReader`] and [`VolumeWriter`].
///
/// Gzip is detected from the file contents when reading and chosen from a
/// `.gz` extension when writing.
#[derive(Debug, Clone, Copy)]
pub struct NiftiVolumeIo {
    compression: Compression,
}

impl Default for NiftiVolumeIo {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
        }
    }
}

impl NiftiVolumeIo {
    /// Use `level` (0-9) for gzip output.
    pub fn with_compression(level: u32) -> Self {
        Self {
            compression: Compression::new(level.min(9)),
        }
    }

    fn decode(path: &Path, bytes: Vec<u8>) -> Result<Volume> {
        let nifti_err = |source| Error::Nifti {
            path: path.to_path_buf(),
            source,
        };
        let object = if is_gzip(&bytes) {
            InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(nifti_err)?
        } else {
            InMemNiftiObject::from_reader(Cursor::new(bytes)).map_err(nifti_err)?
        };
        let nifti_header = object.header().clone();
        let array = object.into_volume().into_ndarray::<f32>().map_err(nifti_err)?;
        let header = VolumeHeader::from_nifti(&nifti_header, array.shape())?;

        // The reversed view iterates t slowest and x fastest.
        let voxels = header.spatial_count();
        let timepoints = header.timepoints();
        let mut data = vec![0.0f32; voxels * timepoints];
        for (i, &value) in array.t().iter().enumerate() {
            let (t, v) = (i / voxels, i % voxels);
            data[v * timepoints + t] = value;
        }
        Volume::new(header, data)
    }

    fn encode(volume: &Volume) -> Vec<u8> {
        let voxels = volume.voxel_count();
        let timepoints = volume.timepoints();
        let mut buffer = Vec::with_capacity(VOX_OFFSET + 4 * voxels * timepoints);
        buffer.extend_from_slice(&volume.header.to_bytes());
        buffer.extend_from_slice(&[0u8; VOX_OFFSET - HEADER_SIZE]);
        for t in 0..timepoints {
            for v in 0..voxels {
                buffer.extend_from_slice(&volume.data[v * timepoints + t].to_le_bytes());
            }
        }
        buffer
    }
}

impl VolumeReader for NiftiVolumeIo {
    fn read_volume(&self, path: &Path) -> Result<Volume> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let volume = Self::decode(path, bytes)?;
        tracing::debug!(
            path = %path.display(),
            dims = ?volume.header.dims,
            tr = volume.header.tr_secs,
            "read volume"
        );
        Ok(volume)
    }
}

impl VolumeWriter for NiftiVolumeIo {
    fn write_volume(&self, path: &Path, volume: &Volume) -> Result<()> {
        let raw = Self::encode(volume);
        let bytes = if has_gz_extension(path) {
            let mut encoder = GzEncoder::new(Vec::new(), self.compression);
            encoder.write_all(&raw).map_err(|e| Error::io(path, e))?;
            encoder.finish().map_err(|e| Error::io(path, e))?
        } else {
            raw
        };
        std::fs::write(path, bytes).map_err(|e| Error::io(path, e))?;
        tracing::debug!(path = %path.display(), dims = ?volume.header.dims, "wrote volume");
        Ok(())
    }
}

/// Read a 3-D mask that must share the grid of `like`; nonzero voxels are set.
///
/// # Errors
///
/// [`Error::Shape`] when the grid differs or the mask has more than one
/// timepoint.
pub fn read_mask(reader: &impl VolumeReader, path: &Path, like: &VolumeHeader) -> Result<Vec<bool>> {
    let mask = reader.read_volume(path)?;
    if !mask.header.same_grid(like) {
        return Err(Error::Shape(format!(
            "mask '{}' is {:?}, data is {:?}",
            path.display(),
            &mask.header.dims[..3],
            &like.dims[..3]
        )));
    }
    if mask.timepoints() > 1 {
        return Err(Error::Shape(format!(
            "mask '{}' has {} timepoints (expected 1)",
            path.display(),
            mask.timepoints()
        )));
    }
    Ok(mask.data.iter().map(|&x| x != 0.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dims: [usize; 4]) -> Volume {
        let header = VolumeHeader::new(dims, 2.0);
        let n = dims.iter().product();
        Volume::new(header, (0..n).map(|i| i as f32).collect()).unwrap()
    }

    #[test]
    fn header_layout() {
        let mut header = VolumeHeader::new([4, 3, 2, 5], 1.5);
        header.toffset = -0.25;
        let bytes = header.to_bytes();
        assert_eq!(i32::from_le_bytes(bytes[0..4].try_into().unwrap()), 348);
        assert_eq!(i16::from_le_bytes(bytes[40..42].try_into().unwrap()), 4);
        assert_eq!(i16::from_le_bytes(bytes[48..50].try_into().unwrap()), 5);
        assert_eq!(i16::from_le_bytes(bytes[70..72].try_into().unwrap()), DT_FLOAT32);
        assert_eq!(f32::from_le_bytes(bytes[92..96].try_into().unwrap()), 1.5);
        assert_eq!(f32::from_le_bytes(bytes[136..140].try_into().unwrap()), -0.25);
        assert_eq!(&bytes[344..348], b"n+1\0");
    }

    #[test]
    fn three_d_header_has_three_dims() {
        let bytes = VolumeHeader::new([2, 2, 2, 1], 1.0).to_bytes();
        assert_eq!(i16::from_le_bytes(bytes[40..42].try_into().unwrap()), 3);
    }

    #[test]
    fn time_units() {
        assert_eq!(TimeUnits::from_xyzt(2 | 16), TimeUnits::Milliseconds);
        assert_eq!(TimeUnits::from_xyzt(10), TimeUnits::Seconds);
        assert_eq!(TimeUnits::from_xyzt(0), TimeUnits::Unknown);
        assert_eq!(TimeUnits::Milliseconds.to_seconds(), 1e-3);
    }

    #[test]
    fn wrong_length_rejected() {
        let header = VolumeHeader::new([2, 2, 1, 3], 1.0);
        assert!(matches!(Volume::new(header, vec![0.0; 11]), Err(Error::Shape(_))));
    }

    #[test]
    fn voxel_slices_follow_z() {
        let volume = ramp([2, 3, 2, 1]);
        assert_eq!(volume.voxel_slices(), vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn skip_leading_drops_and_shifts() {
        let mut volume = ramp([2, 1, 1, 4]);
        volume.skip_leading(1).unwrap();
        assert_eq!(volume.timepoints(), 3);
        assert_eq!(volume.voxel_series(0), &[1.0, 2.0, 3.0]);
        assert_eq!(volume.voxel_series(1), &[5.0, 6.0, 7.0]);
        assert_eq!(volume.header.toffset, 2.0);
        assert!(volume.skip_leading(3).is_err());
    }

    #[test]
    fn mean_image_is_spatial() {
        let volume = ramp([2, 1, 1, 4]);
        let mean = volume.mean_image();
        assert_eq!(mean.timepoints(), 1);
        assert_eq!(mean.data(), &[1.5, 5.5]);
    }

    #[test]
    fn encode_is_volume_major() {
        let volume = ramp([2, 1, 1, 2]);
        let bytes = NiftiVolumeIo::encode(&volume);
        let samples: Vec<f32> = bytes[VOX_OFFSET..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
            .collect();
        // voxel 0 = [0, 1], voxel 1 = [2, 3]
        assert_eq!(samples, vec![0.0, 2.0, 1.0, 3.0]);
    }
}
