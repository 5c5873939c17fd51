//! Contour Curve Synthesis
//!
//! This crate produces the target curve a participant is asked to trace. A
//! curve is a densely sampled, piecewise cubic Hermite interpolation through a
//! handful of control points whose tangents are drawn at random.
//!
//! # Architecture Constraints
//!
//! The curve core MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Hold shared or global state
//! - Reach for ambient randomness on its own
//!
//! All randomness enters through a [`SlopeSource`] or an explicit `rand::Rng`
//! handed in by the caller, so tests can substitute a deterministic source and
//! assert the interpolation math on its own.

#![deny(unsafe_code)]

use std::ops::RangeInclusive;

use rand::Rng;

// ============================================================================
// Synthesis Parameters
// ============================================================================

/// Horizontal distance between consecutive samples inside one segment.
pub const X_STEP: f64 = 0.1;

/// Knot abscissae used by the `generate` command.
pub const DEFAULT_KNOT_XS: [f64; 6] = [0.0, 2.0, 4.0, 6.0, 8.0, 10.0];

/// Inclusive range of the integral knot ordinates.
pub const DEFAULT_Y_RANGE: RangeInclusive<i32> = 0..=10;

/// Probability that a knot receives a flat (zero) tangent.
pub const DEFAULT_EXTREME_PROB: f64 = 0.5;

/// Range random tangents are drawn from.
pub const DEFAULT_SLOPE_RANGE: SlopeRange = SlopeRange {
    min: -3.0,
    max: 3.0,
};

// ============================================================================
// Core Types
// ============================================================================

/// A knot the curve must pass through exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoint {
    pub x: f64,
    pub y: f64,
}

impl ControlPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for ControlPoint {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// One sample of a synthesized curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

/// A synthesized curve.
///
/// `points` is strictly increasing in `x`; no two samples share an abscissa.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurvePath {
    pub points: Vec<CurvePoint>,
}

impl CurvePath {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&CurvePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&CurvePoint> {
        self.points.last()
    }

    /// Find the sample at exactly `x`, if any.
    pub fn sample_at(&self, x: f64) -> Option<&CurvePoint> {
        self.points.iter().find(|p| p.x == x)
    }
}

/// Closed interval random tangents are drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlopeRange {
    pub min: f64,
    pub max: f64,
}

impl SlopeRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Precondition violation on the synthesis input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidInputError {
    #[error("at least 2 control points are required, got {count}")]
    TooFewPoints { count: usize },

    #[error("control point {index} has x = {x}, not greater than the previous x = {prev}")]
    NonIncreasingX { index: usize, prev: f64, x: f64 },

    #[error("control point {index} has a non-finite coordinate")]
    NonFinite { index: usize },

    #[error("extreme probability {0} is outside [0, 1]")]
    ExtremeProbOutOfRange(f64),

    #[error("slope range [{min}, {max}] is empty or non-finite")]
    InvalidSlopeRange { min: f64, max: f64 },

    #[error("knot ordinate range {start}..={end} is empty")]
    EmptyYRange { start: i32, end: i32 },
}

// ============================================================================
// Slope Sources
// ============================================================================

/// Supplies one tangent per control point.
pub trait SlopeSource {
    /// Draw a tangent: `0.0` with probability `extreme_prob`, otherwise a
    /// value from `range`.
    fn draw(&mut self, extreme_prob: f64, range: SlopeRange) -> f64;
}

/// Production slope source backed by a `rand::Rng`.
#[derive(Debug)]
pub struct RandomSlopes<R> {
    rng: R,
}

impl<R: Rng> RandomSlopes<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> SlopeSource for RandomSlopes<R> {
    fn draw(&mut self, extreme_prob: f64, range: SlopeRange) -> f64 {
        if self.rng.gen_bool(extreme_prob) {
            0.0
        } else if range.min < range.max {
            self.rng.gen_range(range.min..range.max)
        } else {
            range.min
        }
    }
}

// ============================================================================
// Hermite Interpolation
// ============================================================================

/// Evaluate the cubic Hermite segment `(x0, y0, m0)`–`(x1, y1, m1)` at `x`.
///
/// Basis:
/// - `h00(t) = 2t³ − 3t² + 1`
/// - `h10(t) = t³ − 2t² + t`
/// - `h01(t) = −2t³ + 3t²`
/// - `h11(t) = t³ − t²`
///
/// with `t = (x − x0) / (x1 − x0)`. At `t = 0` and `t = 1` the result is
/// exactly `y0` and `y1`.
pub fn hermite(x: f64, x0: f64, x1: f64, y0: f64, y1: f64, m0: f64, m1: f64) -> f64 {
    let h = x1 - x0;
    let t = (x - x0) / h;
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    h00 * y0 + h10 * h * m0 + h01 * y1 + h11 * h * m1
}

/// Abscissae for one segment: `x0, x0 + step, ...` strictly below `x1`,
/// followed by `x1` itself.
///
/// Steps that round onto an abscissa already taken (far from the origin the
/// float spacing exceeds [`X_STEP`]) are dropped, so the result is strictly
/// increasing.
fn segment_xs(x0: f64, x1: f64) -> Vec<f64> {
    let mut xs = vec![x0];
    let mut i = 1u32;
    loop {
        // Multiply rather than accumulate so rounding error does not drift.
        let x = x0 + f64::from(i) * X_STEP;
        if x >= x1 {
            break;
        }
        if xs.last().is_some_and(|&last| x > last) {
            xs.push(x);
        }
        i += 1;
    }
    xs.push(x1);
    xs
}

// ============================================================================
// Curve Generation
// ============================================================================

fn validate(
    control_points: &[ControlPoint],
    extreme_prob: f64,
    slope_range: SlopeRange,
) -> Result<(), InvalidInputError> {
    if control_points.len() < 2 {
        return Err(InvalidInputError::TooFewPoints {
            count: control_points.len(),
        });
    }

    for (index, p) in control_points.iter().enumerate() {
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err(InvalidInputError::NonFinite { index });
        }
    }

    for (index, pair) in control_points.windows(2).enumerate() {
        if pair[1].x <= pair[0].x {
            return Err(InvalidInputError::NonIncreasingX {
                index: index + 1,
                prev: pair[0].x,
                x: pair[1].x,
            });
        }
    }

    if !(0.0..=1.0).contains(&extreme_prob) {
        return Err(InvalidInputError::ExtremeProbOutOfRange(extreme_prob));
    }

    let SlopeRange { min, max } = slope_range;
    // A finite range whose width overflows cannot be sampled uniformly.
    if !min.is_finite() || !max.is_finite() || min > max || !(max - min).is_finite() {
        return Err(InvalidInputError::InvalidSlopeRange { min, max });
    }

    Ok(())
}

/// Interpolate a curve through `control_points`.
///
/// One tangent is drawn per control point from `slopes`; each consecutive pair
/// of knots is then sampled at [`X_STEP`] and evaluated with [`hermite`].
/// Segments are concatenated in knot order with the shared knot kept once.
///
/// # Errors
/// [`InvalidInputError`] when fewer than two knots are given, when `x` is not
/// strictly increasing, or when a parameter is out of range. Nothing is drawn
/// from `slopes` in that case.
pub fn generate<S>(
    control_points: &[ControlPoint],
    extreme_prob: f64,
    slope_range: SlopeRange,
    slopes: &mut S,
) -> Result<CurvePath, InvalidInputError>
where
    S: SlopeSource + ?Sized,
{
    validate(control_points, extreme_prob, slope_range)?;

    let tangents: Vec<f64> = control_points
        .iter()
        .map(|_| slopes.draw(extreme_prob, slope_range))
        .collect();

    let mut points = Vec::new();
    for (i, pair) in control_points.windows(2).enumerate() {
        let (k0, k1) = (pair[0], pair[1]);
        let (m0, m1) = (tangents[i], tangents[i + 1]);

        let xs = segment_xs(k0.x, k1.x);
        // The first sample of a later segment is the previous segment's last.
        let skip = usize::from(i > 0);

        points.extend(xs.into_iter().skip(skip).map(|x| CurvePoint {
            x,
            y: hermite(x, k0.x, k1.x, k0.y, k1.y, m0, m1),
        }));
    }

    Ok(CurvePath { points })
}

/// Pick one integral ordinate from `y_range` for every abscissa in `xs`.
///
/// # Errors
/// [`InvalidInputError::EmptyYRange`] when `y_range` holds no value.
pub fn random_control_points<R>(
    xs: &[f64],
    y_range: RangeInclusive<i32>,
    rng: &mut R,
) -> Result<Vec<ControlPoint>, InvalidInputError>
where
    R: Rng + ?Sized,
{
    if y_range.is_empty() {
        return Err(InvalidInputError::EmptyYRange {
            start: *y_range.start(),
            end: *y_range.end(),
        });
    }

    Ok(xs
        .iter()
        .map(|&x| ControlPoint::new(x, f64::from(rng.gen_range(y_range.clone()))))
        .collect())
}

/// Parameters for a randomized curve.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveParams {
    pub knot_xs: Vec<f64>,
    pub y_range: RangeInclusive<i32>,
    pub extreme_prob: f64,
    pub slope_range: SlopeRange,
}

impl Default for CurveParams {
    fn default() -> Self {
        Self {
            knot_xs: DEFAULT_KNOT_XS.to_vec(),
            y_range: DEFAULT_Y_RANGE,
            extreme_prob: DEFAULT_EXTREME_PROB,
            slope_range: DEFAULT_SLOPE_RANGE,
        }
    }
}

/// A randomized curve together with the knots it was drawn through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedCurve {
    pub knots: Vec<ControlPoint>,
    pub path: CurvePath,
}

/// Draw random knots per `params` and interpolate a curve through them.
pub fn generate_curve<R>(params: &CurveParams, rng: &mut R) -> Result<GeneratedCurve, InvalidInputError>
where
    R: Rng + ?Sized,
{
    let knots = random_control_points(&params.knot_xs, params.y_range.clone(), rng)?;
    let mut slopes = RandomSlopes::new(&mut *rng);
    let path = generate(&knots, params.extreme_prob, params.slope_range, &mut slopes)?;
    Ok(GeneratedCurve { knots, path })
}

// ============================================================================
// Tests
// ============================================================================
