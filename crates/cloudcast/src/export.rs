//! Writes capture artefacts: ASCII PLY clouds, JSON reports and PNG stills.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use image::RgbaImage;
use sampling::CaptureReport;

pub fn write_ply(path: &Path, points: &[[f32; 3]], colors: &[[f32; 3]]) -> Result<usize> {
    let count = points.len().min(colors.len());
    let mut out = BufWriter::new(create_file(path)?);

    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "comment cloudcast capture")?;
    writeln!(out, "element vertex {count}")?;
    for axis in ["x", "y", "z"] {
        writeln!(out, "property float {axis}")?;
    }
    for channel in ["red", "green", "blue"] {
        writeln!(out, "property uchar {channel}")?;
    }
    writeln!(out, "end_header")?;

    for (point, color) in points.iter().zip(colors) {
        let [r, g, b] = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        writeln!(out, "{} {} {} {r} {g} {b}", point[0], point[1], point[2])?;
    }
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(path = %path.display(), points = count, "wrote point cloud");
    Ok(count)
}

pub fn write_report(path: &Path, report: &CaptureReport) -> Result<()> {
    let out = BufWriter::new(create_file(path)?);
    serde_json::to_writer_pretty(out, report)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote capture report");
    Ok(())
}

pub fn save_still(path: &Path, image: &RgbaImage) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("failed to save still to {}", path.display()))?;
    tracing::info!(path = %path.display(), size = ?image.dimensions(), "exported still");
    Ok(())
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudconfig::MissedSeekPolicy;
    use glam::Mat4;
    use sampling::{MissedSeek, PoseSample, SkippedFrame};
    use tempfile::TempDir;

    #[test]
    fn ply_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("cloud.ply");

        let written = write_ply(
            &path,
            &[[0.0, 1.0, -2.5], [0.5, 0.25, 3.0]],
            &[[1.0, 0.0, 0.5], [2.0, -1.0, 0.0]],
        )
        .unwrap();
        assert_eq!(written, 2);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ply");
        assert!(lines.contains(&"element vertex 2"));
        let body = lines.iter().position(|l| *l == "end_header").unwrap() + 1;
        assert_eq!(lines[body], "0 1 -2.5 255 0 128");
        assert_eq!(lines[body + 1], "0.5 0.25 3 255 0 0");
        assert_eq!(lines.len(), body + 2);
    }

    #[test]
    fn ply_truncates_to_parallel_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cloud.ply");
        let written = write_ply(&path, &[[0.0; 3], [1.0; 3]], &[[0.0; 3]]).unwrap();
        assert_eq!(written, 1);
        assert!(fs::read_to_string(&path)
            .unwrap()
            .contains("element vertex 1"));
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let report = CaptureReport {
            requested: 2,
            tolerance: 0.1,
            policy: MissedSeekPolicy::Drop,
            poses: vec![PoseSample {
                requested: 0.0,
                achieved: 0.0,
                world: Mat4::IDENTITY,
            }],
            missed: vec![MissedSeek {
                requested: 5.0,
                achieved: 5.5,
                sampled: false,
            }],
            skipped: vec![SkippedFrame {
                requested: 2.5,
                achieved: 2.5,
            }],
            frames_sampled: 1,
            points_sampled: 42,
            total_points: 42,
        };

        write_report(&path, &report).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total_points"], 42);
        assert_eq!(value["missed"][0]["achieved"], 5.5);
        assert_eq!(value["skipped"][0]["requested"], 2.5);
        assert_eq!(value["poses"][0]["world"].as_array().map(Vec::len), Some(16));
    }

    #[test]
    fn still_round_trips_through_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stills").join("frame.png");
        let image = RgbaImage::from_pixel(4, 3, image::Rgba([10, 20, 30, 255]));

        save_still(&path, &image).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded, image);
    }
}
