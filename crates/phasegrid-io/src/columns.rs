//! Waveform column files.
//!
//! Two layouts are read:
//!
//! - whitespace text, one row per sample, any number of columns; `#` starts
//!   a comment line
//! - a BIDS physiological recording: a `.json` sidecar carrying
//!   `SamplingFrequency`, `StartTime` and `Columns`, next to a headerless
//!   `.tsv` or `.tsv.gz` with the same stem
//!
//! Either file of a BIDS pair may be named.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result, has_gz_extension};

/// Which column of a multi-column file to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSpec {
    /// Zero-based column index.
    Index(usize),
    /// Column name from a BIDS sidecar.
    Name(String),
}

impl Default for ColumnSpec {
    fn default() -> Self {
        ColumnSpec::Index(0)
    }
}

impl ColumnSpec {
    /// Select a column by name.
    pub fn name(name: impl Into<String>) -> Self {
        ColumnSpec::Name(name.into())
    }
}

impl FromStr for ColumnSpec {
    type Err = std::convert::Infallible;

    /// Digits select by index, anything else by name.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().parse::<usize>() {
            Ok(index) => ColumnSpec::Index(index),
            Err(_) => ColumnSpec::Name(s.trim().to_string()),
        })
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSpec::Index(i) => write!(f, "{i}"),
            ColumnSpec::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// One column read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// Samples in file order.
    pub samples: Vec<f32>,
    /// Sample rate the file stated, if any.
    pub sample_rate: Option<f32>,
    /// Start time relative to the acquisition the file stated, if any.
    pub start_time: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BidsSidecar {
    #[serde(rename = "SamplingFrequency")]
    sampling_frequency: f32,
    #[serde(rename = "StartTime", default)]
    start_time: Option<f32>,
    #[serde(rename = "Columns")]
    columns: Vec<String>,
}

/// Split `path` into the BIDS stem and whether it names a sidecar or table.
fn bids_stem(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".json")
        .or_else(|| name.strip_suffix(".tsv.gz"))
        .or_else(|| name.strip_suffix(".tsv"))?;
    Some(path.with_file_name(stem))
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    if has_gz_extension(path) {
        let mut text = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut text)
            .map_err(|e| Error::io(path, e))?;
        Ok(text)
    } else {
        String::from_utf8(bytes).map_err(|e| Error::parse(path, 1, format!("not UTF-8 text: {e}")))
    }
}

/// Parse one column out of delimited text.
fn parse_column(path: &Path, text: &str, column: usize) -> Result<Vec<f32>> {
    let mut samples = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let field = line.split_whitespace().nth(column).ok_or_else(|| Error::MissingColumn {
            path: path.to_path_buf(),
            column: format!("{column} (line {})", line_no + 1),
        })?;
        let value = if field.eq_ignore_ascii_case("n/a") {
            f32::NAN
        } else {
            field
                .parse::<f32>()
                .map_err(|_| Error::parse(path, line_no + 1, format!("not a number: '{field}'")))?
        };
        samples.push(value);
    }
    Ok(samples)
}

/// Read one waveform column.
///
/// # Errors
///
/// File errors, malformed numbers, a missing column, or a column name used
/// on a plain text file.
pub fn read_column(path: impl AsRef<Path>, column: &ColumnSpec) -> Result<Recording> {
    let path = path.as_ref();
    if let Some(stem) = bids_stem(path) {
        let sidecar_path = with_suffix(&stem, ".json");
        if sidecar_path.exists() {
            return read_bids(&stem, &sidecar_path, column);
        }
    }

    let index = match column {
        ColumnSpec::Index(i) => *i,
        ColumnSpec::Name(_) => {
            return Err(Error::MissingColumn {
                path: path.to_path_buf(),
                column: format!("{column} (plain text has no column names)"),
            });
        }
    };
    let samples = parse_column(path, &read_text(path)?, index)?;
    tracing::debug!(path = %path.display(), samples = samples.len(), "read text column");
    Ok(Recording {
        samples,
        sample_rate: None,
        start_time: None,
    })
}

fn read_bids(stem: &Path, sidecar_path: &Path, column: &ColumnSpec) -> Result<Recording> {
    let sidecar: BidsSidecar = serde_json::from_str(&read_text(sidecar_path)?).map_err(|source| Error::Json {
        path: sidecar_path.to_path_buf(),
        source,
    })?;
    let index = match column {
        ColumnSpec::Index(i) if *i < sidecar.columns.len() => *i,
        ColumnSpec::Name(name) => sidecar
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::MissingColumn {
                path: sidecar_path.to_path_buf(),
                column: format!("{column} (have {})", sidecar.columns.join(", ")),
            })?,
        ColumnSpec::Index(_) => {
            return Err(Error::MissingColumn {
                path: sidecar_path.to_path_buf(),
                column: format!("{column} (have {} columns)", sidecar.columns.len()),
            });
        }
    };

    let table_path = [".tsv.gz", ".tsv"]
        .iter()
        .map(|suffix| with_suffix(stem, suffix))
        .find(|p| p.exists())
        .ok_or_else(|| {
            Error::io(
                with_suffix(stem, ".tsv[.gz]"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no data table next to sidecar"),
            )
        })?;
    let samples = parse_column(&table_path, &read_text(&table_path)?, index)?;
    tracing::debug!(
        path = %table_path.display(),
        column = %sidecar.columns[index],
        rate = sidecar.sampling_frequency,
        samples = samples.len(),
        "read BIDS column"
    );
    Ok(Recording {
        samples,
        sample_rate: Some(sidecar.sampling_frequency),
        start_time: sidecar.start_time,
    })
}

/// Write samples as text, one per line.
pub fn write_column(path: impl AsRef<Path>, samples: &[f32]) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for sample in samples {
        writeln!(writer, "{sample}").map_err(|e| Error::io(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))
}

/// Read the first `count` whitespace-separated columns of a text file.
///
/// Every data row must hold at least `count` fields.
///
/// # Errors
///
/// File errors, malformed numbers, or a short row.
pub fn read_columns(path: impl AsRef<Path>, count: usize) -> Result<Vec<Vec<f32>>> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let columns = (0..count)
        .map(|c| parse_column(path, &text, c))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(path = %path.display(), columns = count, "read text columns");
    Ok(columns)
}

/// Write equal-length columns as whitespace text, one row per sample.
///
/// # Errors
///
/// [`Error::Shape`] when the columns differ in length, plus file errors.
pub fn write_columns(path: impl AsRef<Path>, columns: &[&[f32]]) -> Result<()> {
    let path = path.as_ref();
    let rows = columns.first().map_or(0, |c| c.len());
    if columns.iter().any(|c| c.len() != rows) {
        return Err(Error::Shape(format!("columns for '{}' differ in length", path.display())));
    }
    let file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for row in 0..rows {
        let line: Vec<String> = columns.iter().map(|c| c[row].to_string()).collect();
        writeln!(writer, "{}", line.join("\t")).map_err(|e| Error::io(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))
}

/// Write equal-length named columns as a BIDS `<root>.json` + `<root>.tsv.gz`
/// pair.
///
/// # Errors
///
/// [`Error::Shape`] when the columns differ in length, plus file errors.
pub fn write_bids_columns(
    root: impl AsRef<Path>,
    sample_rate: f32,
    start_time: f32,
    columns: &[(&str, &[f32])],
) -> Result<()> {
    let root = root.as_ref();
    let rows = columns.first().map_or(0, |(_, c)| c.len());
    if let Some((name, _)) = columns.iter().find(|(_, c)| c.len() != rows) {
        return Err(Error::Shape(format!("column '{name}' length differs from {rows}")));
    }

    let sidecar = BidsSidecar {
        sampling_frequency: sample_rate,
        start_time: Some(start_time),
        columns: columns.iter().map(|(name, _)| (*name).to_string()).collect(),
    };
    let sidecar_path = with_suffix(root, ".json");
    let json = serde_json::to_string_pretty(&sidecar).map_err(|source| Error::Json {
        path: sidecar_path.clone(),
        source,
    })?;
    std::fs::write(&sidecar_path, json).map_err(|e| Error::io(&sidecar_path, e))?;

    let table_path = with_suffix(root, ".tsv.gz");
    let file = std::fs::File::create(&table_path).map_err(|e| Error::io(&table_path, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    for row in 0..rows {
        let line: Vec<String> = columns.iter().map(|(_, c)| c[row].to_string()).collect();
        writeln!(encoder, "{}", line.join("\t")).map_err(|e| Error::io(&table_path, e))?;
    }
    encoder
        .finish()
        .and_then(|mut w| w.flush())
        .map_err(|e| Error::io(&table_path, e))
}
