//! Freshness classification against the active calibration profile.
//!
//! # Algorithm
//!
//! 1. Average the sampled region into one representative [`Color`].
//! 2. Measure its distance to each state's reference color.
//! 3. The nearest reference wins. Exact ties go to the fresher state.
//! 4. Confidence is `1 - d_min / (d_min + d_second)`: 1.0 when the sample
//!    sits exactly on the winning reference, 0.5 when two references are
//!    equally near.
//! 5. Remaining days are interpolated inside the winning state's day range
//!    from where the sample lies between the neighbouring references,
//!    clamped to that range.
//!
//! Classification is a pure function of the image, the region and the
//! profile snapshot taken at the start of the call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::calibration::CalibrationStore;
use crate::error::SensorError;
use crate::model::{
    AnalysisResult, CalibrationProfile, Color, DayRange, FreshnessState, Rect, StateDistance,
};
use crate::pixels::PixelBuffer;

/// How distances between colors are measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Squared Euclidean distance over the raw RGB channels.
    #[default]
    Rgb,

    /// Squared CIE76 ΔE, i.e. squared Euclidean distance in L*a*b* (D65).
    DeltaE76,
}

impl DistanceMetric {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rgb" => Some(DistanceMetric::Rgb),
            "delta-e" | "delta_e" | "deltae" | "cie76" => Some(DistanceMetric::DeltaE76),
            _ => None,
        }
    }

    /// Distance used for ranking. Squared, so no square root is taken.
    pub fn distance(self, a: &Color, b: &Color) -> f64 {
        match self {
            DistanceMetric::Rgb => f64::from(a.squared_distance(b)),
            DistanceMetric::DeltaE76 => {
                let (la, lb) = (to_lab(a), to_lab(b));
                la.iter().zip(lb.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
            }
        }
    }
}

/// sRGB → CIE L*a*b* under the D65 white point.
fn to_lab(color: &Color) -> [f64; 3] {
    fn linearize(c: f64) -> f64 {
        let c = c / 255.0;
        if c > 0.04045 {
            ((c + 0.055) / 1.055).powf(2.4)
        } else {
            c / 12.92
        }
    }

    fn f(t: f64) -> f64 {
        if t > 0.008856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    }

    let [r, g, b] = color.channels().map(linearize);

    let x = (r * 0.4124564 + g * 0.3575761 + b * 0.1804375) / 0.95047;
    let y = r * 0.2126729 + g * 0.7151522 + b * 0.0721750;
    let z = (r * 0.0193339 + g * 0.1191920 + b * 0.9503041) / 1.08883;

    let (fx, fy, fz) = (f(x), f(y), f(z));
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// Outcome of ranking one color against a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub state: FreshnessState,
    pub confidence: f64,
    pub estimated_days: u32,
    pub days_range: DayRange,
    /// In FRESH → EXPIRED order.
    pub distances: Vec<StateDistance>,
}

/// Rank `color` against every reference in `profile`.
pub fn classify_color(
    color: Color,
    profile: &CalibrationProfile,
    metric: DistanceMetric,
) -> Classification {
    let distances: Vec<StateDistance> = FreshnessState::ALL
        .into_iter()
        .map(|state| {
            let reference = profile.reference(state);
            StateDistance {
                state,
                reference,
                distance: metric.distance(&color, &reference),
            }
        })
        .collect();

    // Strict `<` while walking FRESH → EXPIRED keeps the fresher state on ties.
    let mut best = distances[0];
    for candidate in &distances[1..] {
        if candidate.distance < best.distance {
            best = *candidate;
        }
    }

    let runner_up = distances
        .iter()
        .filter(|d| d.state != best.state)
        .map(|d| d.distance)
        .fold(f64::INFINITY, f64::min);

    let confidence = confidence_score(best.distance, runner_up);
    let days_range = profile.day_range(best.state);
    let estimated_days = estimate_days(color, profile, best.state);

    Classification {
        state: best.state,
        confidence,
        estimated_days,
        days_range,
        distances,
    }
}

/// `1 - d_min / (d_min + d_second)`, clamped to `[0, 1]`.
///
/// Two references both exactly on the sample is the most ambiguous reading
/// possible and scores 0.5.
fn confidence_score(d_min: f64, d_second: f64) -> f64 {
    let total = d_min + d_second;
    if total <= 0.0 {
        return 0.5;
    }
    (1.0 - d_min / total).clamp(0.0, 1.0)
}

/// Remaining days for a sample matched to `state`.
///
/// The state's reference color maps to the middle of its day range. Moving
/// toward the fresher neighbour's reference raises the estimate toward the
/// range maximum (reached halfway, where the neighbour would start to win);
/// moving toward the staler neighbour lowers it toward the minimum. The
/// result never leaves the state's own range.
fn estimate_days(color: Color, profile: &CalibrationProfile, state: FreshnessState) -> u32 {
    let range = profile.day_range(state);
    if range.min == range.max {
        return range.min;
    }

    let anchor = profile.reference(state);
    let pull = |neighbour: Option<FreshnessState>| {
        neighbour
            .map(|n| (2.0 * segment_position(color, anchor, profile.reference(n))).min(1.0))
            .unwrap_or(0.0)
    };

    let up = pull(state.fresher());
    let down = pull(state.staler());

    let (min, max) = (f64::from(range.min), f64::from(range.max));
    let mid = range.midpoint();
    let days = mid + up * (max - mid) - down * (mid - min);

    days.round().clamp(min, max) as u32
}

/// Normalized projection of `c` onto the segment `from → to`, in `[0, 1]`.
fn segment_position(c: Color, from: Color, to: Color) -> f64 {
    let [cx, cy, cz] = c.channels();
    let [fx, fy, fz] = from.channels();
    let [tx, ty, tz] = to.channels();

    let (dx, dy, dz) = (tx - fx, ty - fy, tz - fz);
    let len2 = dx * dx + dy * dy + dz * dz;
    if len2 == 0.0 {
        return 0.0;
    }

    (((cx - fx) * dx + (cy - fy) * dy + (cz - fz) * dz) / len2).clamp(0.0, 1.0)
}

/// Representative color of `region` (or the default region) of `image`.
pub fn extract_color(
    image: &PixelBuffer,
    region: Option<Rect>,
) -> Result<(Color, Rect), SensorError> {
    let rect = image.region_or_default(region);
    let color = image.mean_color(rect)?;
    Ok((color, rect))
}

/// Classifies images against whatever profile the store has active.
#[derive(Clone)]
pub struct SensorClassifier {
    store: Arc<CalibrationStore>,
    metric: DistanceMetric,
}

impl SensorClassifier {
    pub fn new(store: Arc<CalibrationStore>) -> Self {
        Self {
            store,
            metric: DistanceMetric::default(),
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Classify `image`, sampling `region` or the central crop.
    ///
    /// `source_image` is recorded verbatim in the result; `now` becomes its
    /// timestamp. The caller decides whether to append the result to history.
    ///
    /// # Errors
    ///
    /// - [`SensorError::NoCalibration`] if no profile is active
    /// - [`SensorError::InvalidImage`] if the region is outside the image
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn classify(
        &self,
        image: &PixelBuffer,
        region: Option<Rect>,
        source_image: &str,
        now: DateTime<Utc>,
    ) -> Result<AnalysisResult, SensorError> {
        let profile = self.store.get_active().ok_or(SensorError::NoCalibration)?;
        let (color, rect) = extract_color(image, region)?;
        let outcome = classify_color(color, &profile, self.metric);

        debug!(
            color = %color,
            state = %outcome.state,
            confidence = outcome.confidence,
            days = outcome.estimated_days,
            "Sensor classified"
        );

        Ok(AnalysisResult {
            timestamp: now,
            source_image: source_image.to_string(),
            color,
            color_hex: color.to_hex(),
            region: rect,
            state: outcome.state,
            label: outcome.state.label().to_string(),
            confidence: outcome.confidence,
            estimated_days: outcome.estimated_days,
            days_range: outcome.days_range,
            distances: outcome.distances,
            profile_id: profile.id(),
            profile_name: profile.name().to_string(),
        })
    }
}
