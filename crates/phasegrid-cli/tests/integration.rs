//! Integration tests for the phasegrid binary.
//!
//! A small synthetic acquisition with a known cardiac rate is written to a
//! temporary directory and run through the command line.

use phasegrid_io::{NiftiVolumeIo, Volume, VolumeHeader, VolumeReader, VolumeWriter, write_column};
use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const DIMS: [usize; 4] = [4, 4, 4, 120];
const TR: f32 = 1.0;
const SLICE_TIMES: [f32; 4] = [0.0, 0.5, 0.25, 0.75];
const HEART_HZ: f32 = 1.1;

fn phasegrid_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_phasegrid"))
}

/// Every voxel carries a pulsation at `HEART_HZ` sampled at its slice's
/// acquisition time, plus a little noise.
fn write_acquisition(dir: &Path) -> (PathBuf, PathBuf) {
    let [nx, ny, nz, nt] = DIMS;
    let mut state = 17u32;
    let mut noise = move || {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (state >> 16) as f32 / 32_768.0 - 1.0
    };
    let mut data = Vec::with_capacity(nx * ny * nz * nt);
    for v in 0..nx * ny * nz {
        let slice = v / (nx * ny);
        let base = 800.0 + 20.0 * (v % 7) as f32;
        let gain = 5.0 + (v % 3) as f32;
        for t in 0..nt {
            let time = t as f32 * TR + SLICE_TIMES[slice];
            data.push(base + gain * (TAU * HEART_HZ * time).sin() + 0.5 * noise());
        }
    }
    let fmri = dir.join("bold.nii.gz");
    let volume = Volume::new(VolumeHeader::new(DIMS, TR), data).unwrap();
    NiftiVolumeIo::default().write_volume(&fmri, &volume).unwrap();

    let slice_times = dir.join("slicetimes.txt");
    write_column(&slice_times, &SLICE_TIMES).unwrap();
    (fmri, slice_times)
}

fn output_path(root: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}_{suffix}", root.display()))
}

#[test]
fn config_prints_defaults() {
    let output = phasegrid_bin().arg("config").output().expect("failed to run phasegrid config");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[projection]"), "missing projection section:\n{stdout}");
    assert!(stdout.contains("bin_count = 32"));
}

#[test]
fn config_check_rejects_bad_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[projection]\nkernel = \"bogus\"\n").unwrap();
    let output = phasegrid_bin()
        .args(["config", "--check"])
        .arg(&path)
        .output()
        .expect("failed to run phasegrid config --check");
    assert!(!output.status.success());
}

#[test]
fn run_projects_synthetic_series() {
    let dir = TempDir::new().unwrap();
    let (fmri, slice_times) = write_acquisition(dir.path());
    let root = dir.path().join("out").join("sub01");

    let output = phasegrid_bin()
        .arg("run")
        .args([&fmri, &slice_times, &root])
        .output()
        .expect("failed to run phasegrid run");
    assert!(
        output.status.success(),
        "run failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let app = NiftiVolumeIo::default()
        .read_volume(&output_path(&root, "app.nii.gz"))
        .unwrap();
    assert_eq!(app.header.dims, [4, 4, 4, 32]);
    assert!(output_path(&root, "vesselmap.nii.gz").exists());
    assert!(output_path(&root, "filtereddata.nii.gz").exists());
    assert!(output_path(&root, "cardfromfmri_sliceres.txt").exists());

    let info: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_path(&root, "info.json")).unwrap()).unwrap();
    assert_eq!(info["num_steps"], 4);
    assert_eq!(info["phase_source"], "fmri");
    let bpm = info["cardiac_bpm"].as_f64().unwrap();
    assert!((bpm - 66.0).abs() < 6.0, "estimated {bpm} BPM");
}

#[test]
fn cardiac_calc_only_skips_projection() {
    let dir = TempDir::new().unwrap();
    let (fmri, slice_times) = write_acquisition(dir.path());
    let root = dir.path().join("calc");

    let status = phasegrid_bin()
        .arg("run")
        .args([&fmri, &slice_times, &root])
        .args(["--cardiac-calc-only", "--forced-hr", "66"])
        .status()
        .expect("failed to run phasegrid run");
    assert!(status.success());
    assert!(output_path(&root, "cardcyclefromfmri.txt").exists());
    assert!(!output_path(&root, "app.nii.gz").exists());

    let info: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_path(&root, "info.json")).unwrap()).unwrap();
    assert_eq!(info["cardiac_calc_only"], true);
    assert!(info["projection"].is_null());
}

#[test]
fn unknown_kernel_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (fmri, slice_times) = write_acquisition(dir.path());
    let output = phasegrid_bin()
        .arg("run")
        .args([&fmri, &slice_times, &dir.path().join("k")])
        .args(["--kernel", "bogus"])
        .output()
        .expect("failed to run phasegrid run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("kernel"));
}

#[test]
fn short_recording_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (fmri, slice_times) = write_acquisition(dir.path());
    let pleth = dir.path().join("pleth.txt");
    // ten seconds at the default 32 Hz, far shorter than the 120 s run
    let samples: Vec<f32> = (0..320).map(|i| (TAU * HEART_HZ * i as f32 / 32.0).sin()).collect();
    write_column(&pleth, &samples).unwrap();

    let output = phasegrid_bin()
        .arg("run")
        .args([&fmri, &slice_times, &dir.path().join("p")])
        .arg("--cardiac-file")
        .arg(&pleth)
        .output()
        .expect("failed to run phasegrid run");
    assert!(!output.status.success());
}

#[test]
fn mismatched_slice_times_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (fmri, _) = write_acquisition(dir.path());
    let slice_times = dir.path().join("three.txt");
    write_column(&slice_times, &[0.0, 0.3, 0.6]).unwrap();
    let output = phasegrid_bin()
        .arg("run")
        .args([&fmri, &slice_times, &dir.path().join("s")])
        .output()
        .expect("failed to run phasegrid run");
    assert!(!output.status.success());
}
