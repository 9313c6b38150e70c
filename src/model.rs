//! Data models for TTIScan.
//!
//! # Value types
//!
//! Everything the classifier reads or produces is a plain value:
//!
//! - [`Color`]: an 8-bit RGB triple
//! - [`FreshnessState`]: the ordered four-state freshness scale
//! - [`CalibrationProfile`]: one reference color per state, plus metadata
//! - [`AnalysisResult`]: the immutable output of a single classification
//!
//! A [`CalibrationProfile`] can only be built with all four reference colors
//! present, so an incomplete profile is unrepresentable past deserialization.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SensorError;

/// An RGB color with 8-bit channels.
///
/// Serialized as a `[r, g, b]` array, the same shape calibration files use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Squared Euclidean distance in RGB space.
    pub fn squared_distance(&self, other: &Color) -> u32 {
        let dr = i32::from(self.r) - i32::from(other.r);
        let dg = i32::from(self.g) - i32::from(other.g);
        let db = i32::from(self.b) - i32::from(other.b);
        (dr * dr + dg * dg + db * db) as u32
    }

    /// Lowercase `#rrggbb` form.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub(crate) fn channels(&self) -> [f64; 3] {
        [f64::from(self.r), f64::from(self.g), f64::from(self.b)]
    }
}

impl From<[u8; 3]> for Color {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl From<Color> for [u8; 3] {
    fn from(color: Color) -> Self {
        [color.r, color.g, color.b]
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Freshness of the packaged food, from freshest to least fresh.
///
/// The derived ordering follows declaration order, so `Fresh < Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessState {
    /// Label still shows its initial color.
    Fresh,

    /// Noticeable shift, product well within shelf life.
    Good,

    /// Consume soon.
    Warning,

    /// Cumulative thermal exposure exceeded.
    Expired,
}

impl FreshnessState {
    /// All states in FRESH → EXPIRED order.
    pub const ALL: [FreshnessState; 4] = [
        FreshnessState::Fresh,
        FreshnessState::Good,
        FreshnessState::Warning,
        FreshnessState::Expired,
    ];

    /// Position in the FRESH → EXPIRED ordering.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The adjacent fresher state, if any.
    pub fn fresher(self) -> Option<FreshnessState> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// The adjacent less fresh state, if any.
    pub fn staler(self) -> Option<FreshnessState> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Upper-case display label.
    pub fn label(self) -> &'static str {
        match self {
            FreshnessState::Fresh => "FRESH",
            FreshnessState::Good => "GOOD",
            FreshnessState::Warning => "WARNING",
            FreshnessState::Expired => "EXPIRED",
        }
    }

    /// Builtin remaining-days range used when a profile carries no hint.
    pub fn default_days(self) -> DayRange {
        match self {
            FreshnessState::Fresh => DayRange::new(30, 40),
            FreshnessState::Good => DayRange::new(15, 30),
            FreshnessState::Warning => DayRange::new(5, 15),
            FreshnessState::Expired => DayRange::new(0, 0),
        }
    }

    /// Builtin reference color of the default profile.
    ///
    /// Green, light green, brown, red.
    pub fn default_color(self) -> Color {
        match self {
            FreshnessState::Fresh => Color::new(34, 139, 34),
            FreshnessState::Good => Color::new(144, 238, 144),
            FreshnessState::Warning => Color::new(139, 90, 43),
            FreshnessState::Expired => Color::new(178, 34, 34),
        }
    }
}

impl fmt::Display for FreshnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inclusive range of estimated remaining days.
///
/// Deserializing goes through [`DayRange::new`], so `min <= max` holds for
/// every range read from JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDayRange")]
pub struct DayRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Deserialize)]
struct RawDayRange {
    min: u32,
    max: u32,
}

impl From<RawDayRange> for DayRange {
    fn from(raw: RawDayRange) -> Self {
        DayRange::new(raw.min, raw.max)
    }
}

impl DayRange {
    /// Builds a range, swapping the bounds if given in reverse.
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn midpoint(&self) -> f64 {
        (f64::from(self.min) + f64::from(self.max)) / 2.0
    }

    pub fn contains(&self, days: u32) -> bool {
        (self.min..=self.max).contains(&days)
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Where a calibration profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    /// The builtin green / light-green / brown / red palette.
    Default,

    /// Built from user-selected image regions or imported from a file.
    User,
}

impl ProfileSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileSource::Default => "default",
            ProfileSource::User => "user",
        }
    }
}

/// A complete mapping from every freshness state to a reference color.
///
/// Profiles are immutable once built and shared behind an `Arc` by the
/// calibration store. Day-range hints are optional per state; missing hints
/// fall back to [`FreshnessState::default_days`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ProfileDocument", try_from = "ProfileDocument")]
pub struct CalibrationProfile {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    source: ProfileSource,
    references: [Color; 4],
    day_hints: [Option<DayRange>; 4],
}

impl CalibrationProfile {
    /// Build a profile from a state → color map.
    ///
    /// Fails with [`SensorError::IncompleteCalibration`] unless all four
    /// states have a reference color.
    pub fn new(
        name: impl Into<String>,
        source: ProfileSource,
        colors: &BTreeMap<FreshnessState, Color>,
        day_hints: &BTreeMap<FreshnessState, DayRange>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SensorError> {
        let missing: Vec<FreshnessState> = FreshnessState::ALL
            .into_iter()
            .filter(|state| !colors.contains_key(state))
            .collect();

        if !missing.is_empty() {
            return Err(SensorError::IncompleteCalibration { missing });
        }

        let references = FreshnessState::ALL.map(|state| colors[&state]);
        let day_hints = FreshnessState::ALL.map(|state| {
            day_hints
                .get(&state)
                .map(|range| DayRange::new(range.min, range.max))
        });

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at,
            source,
            references,
            day_hints,
        })
    }

    /// The builtin profile: fixed reference colors and day ranges.
    pub fn builtin_default(created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "Default Calibration".to_string(),
            created_at,
            source: ProfileSource::Default,
            references: FreshnessState::ALL.map(FreshnessState::default_color),
            day_hints: FreshnessState::ALL.map(|state| Some(state.default_days())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn source(&self) -> ProfileSource {
        self.source
    }

    /// Reference color for a state. Always present.
    pub fn reference(&self, state: FreshnessState) -> Color {
        self.references[state.index()]
    }

    /// Day range for a state: the profile's hint, or the builtin table.
    pub fn day_range(&self, state: FreshnessState) -> DayRange {
        self.day_hints[state.index()].unwrap_or_else(|| state.default_days())
    }
}

/// Serialized shape of a [`CalibrationProfile`].
///
/// This is the JSON stored in the database and accepted by the import
/// endpoint. `id`, `created_at` and `source` are optional on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub name: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "default_import_source")]
    pub source: ProfileSource,

    pub colors: BTreeMap<FreshnessState, Color>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub days: BTreeMap<FreshnessState, DayRange>,
}

fn default_import_source() -> ProfileSource {
    ProfileSource::User
}

impl From<CalibrationProfile> for ProfileDocument {
    fn from(profile: CalibrationProfile) -> Self {
        let colors = FreshnessState::ALL
            .into_iter()
            .map(|state| (state, profile.reference(state)))
            .collect();
        let days = FreshnessState::ALL
            .into_iter()
            .filter_map(|state| profile.day_hints[state.index()].map(|range| (state, range)))
            .collect();

        Self {
            id: profile.id,
            name: profile.name,
            created_at: profile.created_at,
            source: profile.source,
            colors,
            days,
        }
    }
}

impl TryFrom<ProfileDocument> for CalibrationProfile {
    type Error = SensorError;

    fn try_from(doc: ProfileDocument) -> Result<Self, Self::Error> {
        let mut profile =
            CalibrationProfile::new(doc.name, doc.source, &doc.colors, &doc.days, doc.created_at)?;
        profile.id = doc.id;
        Ok(profile)
    }
}

/// A rectangle in pixel coordinates.
///
/// Half-open: it covers pixels with `x0 <= x < x1` and `y0 <= y < y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub const fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// The whole frame of a `width` × `height` image.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// The default sampling region: the central half of each axis.
    ///
    /// Covers `[w/4, w/4 + max(w/2, 1))` horizontally and likewise
    /// vertically, so even a 1×1 image yields one pixel.
    pub fn central(width: u32, height: u32) -> Self {
        let x0 = width / 4;
        let y0 = height / 4;
        Self::new(x0, y0, x0 + (width / 2).max(1), y0 + (height / 2).max(1))
    }

    /// Check the rectangle is non-degenerate and inside a `width` × `height`
    /// image. Returns a human-readable reason on failure.
    pub fn check_bounds(&self, width: u32, height: u32) -> Result<(), String> {
        if self.x1 <= self.x0 || self.y1 <= self.y0 {
            return Err(format!(
                "degenerate rectangle ({}, {})-({}, {})",
                self.x0, self.y0, self.x1, self.y1
            ));
        }
        if self.x1 > width || self.y1 > height {
            return Err(format!(
                "rectangle ({}, {})-({}, {}) exceeds {}x{} image",
                self.x0, self.y0, self.x1, self.y1, width, height
            ));
        }
        Ok(())
    }
}

/// A user-selected rectangle labelled with the state it represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRegion {
    pub state: FreshnessState,

    #[serde(flatten)]
    pub rect: Rect,
}

/// Distance from the detected color to one reference color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateDistance {
    pub state: FreshnessState,
    pub reference: Color,
    pub distance: f64,
}

/// The outcome of classifying one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// When the classification was made (caller-supplied).
    pub timestamp: DateTime<Utc>,

    /// Reference to the analysed image, e.g. a stored upload name.
    pub source_image: String,

    /// Representative color of the sampled region.
    pub color: Color,

    pub color_hex: String,

    /// The region that was averaged.
    pub region: Rect,

    pub state: FreshnessState,

    pub label: String,

    /// Confidence in `[0, 1]`.
    pub confidence: f64,

    pub estimated_days: u32,

    pub days_range: DayRange,

    /// Distances to every reference, in FRESH → EXPIRED order.
    pub distances: Vec<StateDistance>,

    pub profile_id: Uuid,

    pub profile_name: String,
}

/// Whether classification is currently possible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationStatus {
    pub is_calibrated: bool,
    pub source: Option<ProfileSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<CalibrationProfile>,
}

/// A profile as listed by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub name: String,
    pub source: ProfileSource,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl ProfileSummary {
    pub fn of(profile: &CalibrationProfile, active: bool) -> Self {
        Self {
            id: profile.id(),
            name: profile.name().to_string(),
            source: profile.source(),
            created_at: profile.created_at(),
            active,
        }
    }
}

/// Request body for POST /api/analyze.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    /// Base64 image, optionally as a `data:` URL.
    #[serde(alias = "image_base64")]
    pub image: String,

    /// Region to sample; defaults to the central crop.
    #[serde(default)]
    pub region: Option<Rect>,

    /// Optional label recorded as the result's source image.
    #[serde(default)]
    pub source: Option<String>,
}

/// Request body for POST /api/calibrate.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrateRequest {
    #[serde(default = "default_profile_name")]
    pub name: String,

    pub image: String,

    pub regions: Vec<CalibrationRegion>,
}

fn default_profile_name() -> String {
    "Web Calibration".to_string()
}

/// Request body for POST /api/calibrate/extract-color.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractColorRequest {
    pub image: String,

    #[serde(default)]
    pub region: Option<Rect>,
}

/// Response for POST /api/calibrate/extract-color.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractColorResponse {
    pub color: Color,
    pub hex: String,
    pub region: Rect,
}

/// Query parameters for GET /api/history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Response for GET /api/history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    /// Most recent first.
    pub history: Vec<AnalysisResult>,

    /// Total number of recorded analyses.
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette() -> BTreeMap<FreshnessState, Color> {
        BTreeMap::from([
            (FreshnessState::Fresh, Color::new(0, 200, 0)),
            (FreshnessState::Good, Color::new(150, 200, 0)),
            (FreshnessState::Warning, Color::new(150, 100, 0)),
            (FreshnessState::Expired, Color::new(200, 0, 0)),
        ])
    }

    #[test]
    fn test_state_ordering() {
        assert!(FreshnessState::Fresh < FreshnessState::Good);
        assert!(FreshnessState::Warning < FreshnessState::Expired);
        assert_eq!(FreshnessState::Fresh.fresher(), None);
        assert_eq!(FreshnessState::Good.fresher(), Some(FreshnessState::Fresh));
        assert_eq!(FreshnessState::Expired.staler(), None);
        assert_eq!(FreshnessState::Warning.staler(), Some(FreshnessState::Expired));
    }

    #[test]
    fn test_squared_distance() {
        let a = Color::new(0, 180, 0);
        assert_eq!(a.squared_distance(&Color::new(0, 200, 0)), 400);
        assert_eq!(a.squared_distance(&Color::new(150, 200, 0)), 22_900);
        assert_eq!(a.squared_distance(&a), 0);
    }

    #[test]
    fn test_color_hex_and_serde() {
        let color = Color::new(34, 139, 34);
        assert_eq!(color.to_hex(), "#228b22");
        assert_eq!(serde_json::to_string(&color).unwrap(), "[34,139,34]");
        let parsed: Color = serde_json::from_str("[178,34,34]").unwrap();
        assert_eq!(parsed, Color::new(178, 34, 34));
    }

    #[test]
    fn test_profile_requires_all_states() {
        let mut colors = palette();
        colors.remove(&FreshnessState::Warning);

        let err = CalibrationProfile::new(
            "partial",
            ProfileSource::User,
            &colors,
            &BTreeMap::new(),
            Utc::now(),
        )
        .unwrap_err();

        match err {
            SensorError::IncompleteCalibration { missing } => {
                assert_eq!(missing, vec![FreshnessState::Warning]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_day_range_falls_back_to_builtin() {
        let hints = BTreeMap::from([(FreshnessState::Good, DayRange::new(10, 20))]);
        let profile =
            CalibrationProfile::new("p", ProfileSource::User, &palette(), &hints, Utc::now())
                .unwrap();

        assert_eq!(profile.day_range(FreshnessState::Good), DayRange::new(10, 20));
        assert_eq!(profile.day_range(FreshnessState::Fresh), DayRange::new(30, 40));
    }

    #[test]
    fn test_profile_document_roundtrip_keeps_identity() {
        let profile = CalibrationProfile::builtin_default(Utc::now());
        let json = serde_json::to_string(&profile).unwrap();
        let back: CalibrationProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_incomplete_document_is_rejected() {
        let json = r#"{"name":"x","colors":{"fresh":[0,200,0],"expired":[200,0,0]}}"#;
        assert!(serde_json::from_str::<CalibrationProfile>(json).is_err());
    }

    #[test]
    fn test_inverted_day_hint_is_reordered() {
        let json = r#"{
            "name": "inverted",
            "colors": {
                "fresh": [0, 200, 0],
                "good": [150, 200, 0],
                "warning": [150, 100, 0],
                "expired": [200, 0, 0]
            },
            "days": { "fresh": { "min": 40, "max": 30 } }
        }"#;
        let profile: CalibrationProfile = serde_json::from_str(json).unwrap();
        assert_eq!(
            profile.day_range(FreshnessState::Fresh),
            DayRange { min: 30, max: 40 }
        );

        // Struct literals bypass `DayRange::new`; the profile still orders them.
        let colors: BTreeMap<_, _> = FreshnessState::ALL
            .into_iter()
            .map(|s| (s, s.default_color()))
            .collect();
        let hints = BTreeMap::from([(FreshnessState::Good, DayRange { min: 25, max: 15 })]);
        let profile =
            CalibrationProfile::new("literal", ProfileSource::User, &colors, &hints, Utc::now())
                .unwrap();
        assert_eq!(
            profile.day_range(FreshnessState::Good),
            DayRange { min: 15, max: 25 }
        );
    }

    #[test]
    fn test_day_range_display() {
        assert_eq!(DayRange::new(40, 30).to_string(), "30-40");
        assert_eq!(DayRange::new(0, 0).to_string(), "0");
    }

    #[test]
    fn test_central_rect() {
        assert_eq!(Rect::central(100, 80), Rect::new(25, 20, 75, 60));
        assert_eq!(Rect::central(1, 1), Rect::new(0, 0, 1, 1));
        assert!(Rect::central(3, 2).check_bounds(3, 2).is_ok());
    }

    #[test]
    fn test_rect_bounds() {
        assert!(Rect::new(0, 0, 10, 10).check_bounds(10, 10).is_ok());
        assert!(Rect::new(5, 0, 5, 10).check_bounds(10, 10).is_err());
        assert!(Rect::new(6, 0, 5, 10).check_bounds(10, 10).is_err());
        assert!(Rect::new(0, 0, 11, 10).check_bounds(10, 10).is_err());
        assert!(Rect::new(0, 0, 10, 11).check_bounds(10, 10).is_err());
    }

    #[test]
    fn test_calibration_region_flattened() {
        let region: CalibrationRegion =
            serde_json::from_str(r#"{"state":"good","x0":1,"y0":2,"x1":3,"y1":4}"#).unwrap();
        assert_eq!(region.state, FreshnessState::Good);
        assert_eq!(region.rect, Rect::new(1, 2, 3, 4));
    }
}
