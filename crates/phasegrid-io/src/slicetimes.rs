//! Slice acquisition times.

use std::path::Path;

use crate::{Error, Result};

/// Read per-slice acquisition offsets in seconds.
///
/// A `.json` file is read as a BIDS sidecar and must carry a `SliceTiming`
/// array. Anything else is text holding one number per slice, separated by
/// any whitespace.
///
/// # Errors
///
/// File errors, malformed numbers, a sidecar without `SliceTiming`, or no
/// values at all.
pub fn read_slice_times(path: impl AsRef<Path>) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let times = if is_json {
        let value: serde_json::Value = serde_json::from_str(&text).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = value
            .get("SliceTiming")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| Error::parse(path, 1, "no SliceTiming array"))?;
        entries
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_f64()
                    .map(|t| t as f32)
                    .ok_or_else(|| Error::parse(path, 1, format!("SliceTiming[{i}] is not a number")))
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        let mut times = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            for field in line.split_whitespace() {
                let t = field
                    .parse::<f32>()
                    .map_err(|_| Error::parse(path, line_no + 1, format!("not a number: '{field}'")))?;
                times.push(t);
            }
        }
        times
    };

    if times.is_empty() {
        return Err(Error::parse(path, 1, "no slice times"));
    }
    tracing::debug!(path = %path.display(), slices = times.len(), "read slice times");
    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn text_one_per_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slicetimes.txt");
        std::fs::write(&path, "0.0\n0.5\n0.25\n0.75\n").unwrap();
        assert_eq!(read_slice_times(&path).unwrap(), vec![0.0, 0.5, 0.25, 0.75]);
    }

    #[test]
    fn text_on_one_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slicetimes.txt");
        std::fs::write(&path, "0 1 0.5").unwrap();
        assert_eq!(read_slice_times(&path).unwrap(), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn bids_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub-01_bold.json");
        std::fs::write(&path, r#"{"RepetitionTime": 2.0, "SliceTiming": [0.0, 1.0, 0.5, 1.5]}"#).unwrap();
        assert_eq!(read_slice_times(&path).unwrap(), vec![0.0, 1.0, 0.5, 1.5]);
    }

    #[test]
    fn sidecar_without_timing_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub-01_bold.json");
        std::fs::write(&path, r#"{"RepetitionTime": 2.0}"#).unwrap();
        assert!(matches!(read_slice_times(&path), Err(Error::Parse { .. })));
    }

    #[test]
    fn empty_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slicetimes.txt");
        std::fs::write(&path, "\n").unwrap();
        assert!(read_slice_times(&path).is_err());
    }
}
