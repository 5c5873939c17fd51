//! Contour Trial Records
//!
//! This crate turns the outcome of one tracing trial (the curve that was
//! shown and the samples the participant recorded) into artifacts an operator
//! can inspect afterwards.
//!
//! # Architecture
//!
//! - `TrialRecord`: the serializable pairing of curve and normalized samples
//! - `render_svg`: scatter plot of the curve with the trace coloured by
//!   arrival order
//! - `TrialWriter`: the production [`Visualizer`], writing both artifacts into
//!   an output directory under a content-addressed name

#![deny(unsafe_code)]

use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use contour_curve::{ControlPoint, CurvePath};
use contour_wire::{CurveMessage, NormalizedSample};
use plotters::prelude::*;
use plotters::style::colors::colormaps::{ColorMap, ViridisRGB};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Constants
// ============================================================================

/// Schema version written into every record.
pub const TRIAL_FORMAT_VERSION: u32 = 1;

/// Hex digits of the content digest used in artifact file names.
const FILE_DIGEST_LEN: usize = 12;

/// Plot window in curve coordinates; one unit of slack around `[0, 10]` so
/// traces that overshoot the drawing area stay visible.
const PLOT_MIN: f64 = -1.0;
const PLOT_MAX: f64 = 11.0;

const PLOT_SIZE_PX: u32 = 800;

// ============================================================================
// Errors
// ============================================================================

/// Failure while producing or reading trial artifacts.
#[derive(Debug, thiserror::Error)]
pub enum TrialError {
    #[error("trial artifact I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("trial record serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("trial plot rendering failed: {0}")]
    Plot(String),
}

// ============================================================================
// Trial Record
// ============================================================================

/// Curve and trace of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_format_version: u32,
    pub curve: CurveMessage,
    /// Knots the curve was drawn through, `[x, y]` pairs.
    #[serde(default)]
    pub knots: Vec<[f64; 2]>,
    pub samples: Vec<NormalizedSample>,
}

impl TrialRecord {
    pub fn new(curve: &CurvePath, knots: &[ControlPoint], samples: &[NormalizedSample]) -> Self {
        Self {
            trial_format_version: TRIAL_FORMAT_VERSION,
            curve: curve.into(),
            knots: knots.iter().map(|k| [k.x, k.y]).collect(),
            samples: samples.to_vec(),
        }
    }

    /// SHA-256 over the record's compact JSON encoding, hex encoded.
    pub fn digest(&self) -> Result<String, TrialError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }

    /// File stem shared by the record and its plot.
    pub fn file_stem(&self) -> Result<String, TrialError> {
        let digest = self.digest()?;
        Ok(format!("trial-{}", &digest[..FILE_DIGEST_LEN]))
    }
}

// ============================================================================
// SVG Plot
// ============================================================================

/// Position of the `i`-th of `n` trace samples along the colour ramp.
fn order_fraction(i: usize, n: usize) -> f64 {
    if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 }
}

fn is_finite_point(&[x, y]: &[f64; 2]) -> bool {
    x.is_finite() && y.is_finite()
}

/// Render the record as a standalone SVG document.
///
/// The curve is drawn as blue dots with its knots circled in red; trace
/// samples are drawn in arrival order along the viridis ramp. Non-finite
/// points are skipped.
pub fn render_svg(record: &TrialRecord) -> Result<String, TrialError> {
    let mut svg = String::new();
    draw_svg(record, &mut svg).map_err(|e| TrialError::Plot(e.to_string()))?;
    Ok(svg)
}

fn draw_svg(record: &TrialRecord, out: &mut String) -> Result<(), Box<dyn Error>> {
    let root = SVGBackend::with_string(out, (PLOT_SIZE_PX, PLOT_SIZE_PX)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Task Curve and Touch History", ("sans-serif", 20))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(PLOT_MIN..PLOT_MAX, PLOT_MIN..PLOT_MAX)?;

    chart
        .configure_mesh()
        .x_desc("Normalized X")
        .y_desc("Normalized Y")
        .x_labels(13)
        .y_labels(13)
        .draw()?;

    chart
        .draw_series(
            record
                .curve
                .points
                .iter()
                .filter(|p| is_finite_point(p))
                .map(|&[x, y]| Circle::new((x, y), 3, BLUE.mix(0.8).filled())),
        )?
        .label("Task Curve")
        .legend(|(x, y)| Circle::new((x, y), 4, BLUE.filled()));

    chart
        .draw_series(
            record
                .knots
                .iter()
                .filter(|p| is_finite_point(p))
                .map(|&[x, y]| Circle::new((x, y), 7, RED.stroke_width(2))),
        )?
        .label("Control Points")
        .legend(|(x, y)| Circle::new((x, y), 5, RED.stroke_width(2)));

    let n = record.samples.len();
    chart
        .draw_series(
            record
                .samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.x.is_finite() && s.y.is_finite())
                .map(|(i, s)| {
                    let colour = ViridisRGB.get_color(order_fraction(i, n));
                    Circle::new((s.x, s.y), 3, colour.mix(0.8).filled())
                }),
        )?
        .label(format!("Touch History ({n})"))
        .legend(|(x, y)| Circle::new((x, y), 4, ViridisRGB.get_color(0.0_f64).filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

// ============================================================================
// Visualizer
// ============================================================================

/// Consumer of a finished trial.
pub trait Visualizer: Send + Sync {
    fn render(
        &self,
        curve: &CurvePath,
        knots: &[ControlPoint],
        samples: &[NormalizedSample],
    ) -> Result<(), TrialError>;
}

/// Paths of the artifacts written for one trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPaths {
    pub record: PathBuf,
    pub plot: PathBuf,
}

/// Writes a JSON record and an SVG plot per trial into `output_dir`.
#[derive(Debug, Clone)]
pub struct TrialWriter {
    output_dir: PathBuf,
}

impl TrialWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write both artifacts for `record` and return their paths.
    pub fn write(&self, record: &TrialRecord) -> Result<TrialPaths, TrialError> {
        write_trial(record, &self.output_dir)
    }
}

impl Visualizer for TrialWriter {
    fn render(
        &self,
        curve: &CurvePath,
        knots: &[ControlPoint],
        samples: &[NormalizedSample],
    ) -> Result<(), TrialError> {
        self.write(&TrialRecord::new(curve, knots, samples)).map(|_| ())
    }
}

// ============================================================================
// Trial I/O
// ============================================================================

/// Write `record` and its plot into `dir`.
///
/// Names are derived from the record digest, so writing an identical trial
/// twice lands on the same files and leaves their content unchanged.
pub fn write_trial(record: &TrialRecord, dir: &Path) -> Result<TrialPaths, TrialError> {
    fs::create_dir_all(dir)?;

    let stem = record.file_stem()?;
    let paths = TrialPaths {
        record: dir.join(format!("{stem}.json")),
        plot: dir.join(format!("{stem}.svg")),
    };

    let json = serde_json::to_vec_pretty(record)?;
    fs::write(&paths.record, json)?;
    fs::write(&paths.plot, render_svg(record)?)?;

    Ok(paths)
}

/// Read a trial record from a file.
pub fn read_trial(path: &Path) -> Result<TrialRecord, TrialError> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

// ============================================================================
// Tests
// ============================================================================
