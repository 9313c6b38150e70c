//! Calibration profile store.
//!
//! The store owns every profile it has seen and a single "active" slot.
//! Profiles are built completely before the slot is touched, then swapped in
//! as an `Arc` under a short write lock, so a reader either sees the old
//! profile or the new one, never something in between. Classification only
//! ever clones the `Arc` out of the slot and never mutates a profile.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SensorError;
use crate::model::{
    CalibrationProfile, CalibrationRegion, CalibrationStatus, Color, FreshnessState,
    ProfileSource, ProfileSummary,
};
use crate::pixels::{ChannelSums, PixelBuffer};

#[derive(Default)]
struct Profiles {
    active: Option<Arc<CalibrationProfile>>,
    /// Oldest first. Superseded profiles are kept.
    known: Vec<Arc<CalibrationProfile>>,
}

impl Profiles {
    /// Record `profile`, replacing any known profile with the same id.
    fn remember(&mut self, profile: Arc<CalibrationProfile>) {
        match self.known.iter_mut().find(|p| p.id() == profile.id()) {
            Some(slot) => *slot = profile,
            None => self.known.push(profile),
        }
    }

    fn activate(&mut self, profile: Arc<CalibrationProfile>) {
        self.remember(Arc::clone(&profile));
        self.active = Some(profile);
    }
}

/// Owner of the active calibration profile.
#[derive(Default)]
pub struct CalibrationStore {
    profiles: RwLock<Profiles>,
}

impl CalibrationStore {
    /// An empty store: nothing is calibrated until a profile is saved,
    /// imported or the default is loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a profile from labelled regions of `image` and make it active.
    ///
    /// Each region's representative color is the rounded per-channel mean
    /// of its pixels. Regions sharing a label are pooled. All regions are
    /// validated before any averaging happens; on any error the active
    /// profile is left untouched.
    ///
    /// # Errors
    ///
    /// - [`SensorError::InvalidRegion`] for the first malformed region
    /// - [`SensorError::IncompleteCalibration`] if any state is uncovered
    pub fn save_profile(
        &self,
        name: &str,
        regions: &[CalibrationRegion],
        image: &PixelBuffer,
        now: DateTime<Utc>,
    ) -> Result<Arc<CalibrationProfile>, SensorError> {
        for (index, region) in regions.iter().enumerate() {
            region
                .rect
                .check_bounds(image.width(), image.height())
                .map_err(|reason| {
                    warn!(index, state = %region.state, %reason, "Rejected calibration region");
                    SensorError::InvalidRegion { index, reason }
                })?;
        }

        let mut sums: BTreeMap<FreshnessState, ChannelSums> = BTreeMap::new();
        for region in regions {
            sums.entry(region.state)
                .or_default()
                .merge(image.channel_sums(region.rect));
        }

        let colors: BTreeMap<FreshnessState, Color> = sums
            .into_iter()
            .filter_map(|(state, s)| s.mean().map(|color| (state, color)))
            .collect();

        let profile = CalibrationProfile::new(
            name,
            ProfileSource::User,
            &colors,
            &BTreeMap::new(),
            now,
        )
        .inspect_err(|e| warn!(error = %e, "Calibration rejected"))?;

        for state in FreshnessState::ALL {
            debug!(%state, color = %profile.reference(state), "Calibrated reference color");
        }

        Ok(self.install(profile))
    }

    /// Make the builtin profile active. Never fails.
    pub fn load_default(&self, now: DateTime<Utc>) -> Arc<CalibrationProfile> {
        self.install(CalibrationProfile::builtin_default(now))
    }

    /// Make an externally built profile active (file import, restore from
    /// storage). A profile reusing a known id replaces the stored content.
    pub fn import_profile(&self, profile: CalibrationProfile) -> Arc<CalibrationProfile> {
        self.install(profile)
    }

    /// Re-activate a retained profile by id. Returns `None` if unknown.
    pub fn activate(&self, id: Uuid) -> Option<Arc<CalibrationProfile>> {
        let mut guard = self.write();
        let profile = guard.known.iter().find(|p| p.id() == id).cloned()?;
        guard.active = Some(Arc::clone(&profile));
        info!(profile = %profile.name(), %id, "Calibration profile re-activated");
        Some(profile)
    }

    /// Register a profile without activating it.
    pub fn retain(&self, profile: CalibrationProfile) {
        self.write().remember(Arc::new(profile));
    }

    /// The active profile, if any calibration has been set.
    pub fn get_active(&self) -> Option<Arc<CalibrationProfile>> {
        self.read().active.clone()
    }

    pub fn status(&self) -> CalibrationStatus {
        let active = self.get_active();
        CalibrationStatus {
            is_calibrated: active.is_some(),
            source: active.as_ref().map(|p| p.source()),
            profile: active.map(|p| (*p).clone()),
        }
    }

    /// Every known profile, newest first.
    pub fn list_profiles(&self) -> Vec<ProfileSummary> {
        let guard = self.read();
        let active_id = guard.active.as_ref().map(|p| p.id());
        guard
            .known
            .iter()
            .rev()
            .map(|p| ProfileSummary::of(p, Some(p.id()) == active_id))
            .collect()
    }

    fn install(&self, profile: CalibrationProfile) -> Arc<CalibrationProfile> {
        let profile = Arc::new(profile);
        self.write().activate(Arc::clone(&profile));
        info!(
            profile = %profile.name(),
            id = %profile.id(),
            source = profile.source().as_str(),
            "Calibration profile activated"
        );
        profile
    }

    // The guarded value is only ever replaced wholesale, so a poisoned lock
    // still holds a consistent state.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Profiles> {
        self.profiles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Profiles> {
        self.profiles.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProfileDocument, Rect};

    /// A 40×10 strip with four 10×10 swatches, FRESH → EXPIRED left to right.
    fn swatch_image() -> PixelBuffer {
        let swatches = [[0, 200, 0], [150, 200, 0], [150, 100, 0], [200, 0, 0]];
        let mut pixels = Vec::with_capacity(400);
        for _y in 0..10 {
            for swatch in swatches {
                pixels.extend(std::iter::repeat_n(swatch, 10));
            }
        }
        PixelBuffer::new(40, 10, pixels).unwrap()
    }

    fn swatch_regions() -> Vec<CalibrationRegion> {
        FreshnessState::ALL
            .into_iter()
            .enumerate()
            .map(|(i, state)| CalibrationRegion {
                state,
                rect: Rect::new(i as u32 * 10 + 2, 2, i as u32 * 10 + 8, 8),
            })
            .collect()
    }

    #[test]
    fn test_empty_store_is_uncalibrated() {
        let store = CalibrationStore::new();
        assert!(store.get_active().is_none());
        let status = store.status();
        assert!(!status.is_calibrated);
        assert_eq!(status.source, None);
    }

    #[test]
    fn test_load_default() {
        let store = CalibrationStore::new();
        let profile = store.load_default(Utc::now());

        let status = store.status();
        assert!(status.is_calibrated);
        assert_eq!(status.source, Some(ProfileSource::Default));
        assert_eq!(
            profile.reference(FreshnessState::Fresh),
            Color::new(34, 139, 34)
        );
    }

    #[test]
    fn test_save_profile_averages_regions() {
        let store = CalibrationStore::new();
        let profile = store
            .save_profile("bench", &swatch_regions(), &swatch_image(), Utc::now())
            .unwrap();

        assert_eq!(profile.source(), ProfileSource::User);
        assert_eq!(profile.reference(FreshnessState::Fresh), Color::new(0, 200, 0));
        assert_eq!(profile.reference(FreshnessState::Good), Color::new(150, 200, 0));
        assert_eq!(
            profile.reference(FreshnessState::Warning),
            Color::new(150, 100, 0)
        );
        assert_eq!(profile.reference(FreshnessState::Expired), Color::new(200, 0, 0));

        assert_eq!(store.get_active().unwrap().id(), profile.id());
        assert_eq!(store.status().source, Some(ProfileSource::User));
    }

    #[test]
    fn test_incomplete_calibration_keeps_previous() {
        let store = CalibrationStore::new();
        let previous = store.load_default(Utc::now());

        let regions: Vec<_> = swatch_regions()
            .into_iter()
            .filter(|r| matches!(r.state, FreshnessState::Fresh | FreshnessState::Expired))
            .collect();

        let err = store
            .save_profile("partial", &regions, &swatch_image(), Utc::now())
            .unwrap_err();

        assert_eq!(
            err,
            SensorError::IncompleteCalibration {
                missing: vec![FreshnessState::Good, FreshnessState::Warning],
            }
        );
        assert_eq!(store.get_active().unwrap(), previous);
        assert_eq!(store.list_profiles().len(), 1);
    }

    #[test]
    fn test_three_states_is_incomplete() {
        let store = CalibrationStore::new();
        let regions = &swatch_regions()[..3];
        let err = store
            .save_profile("three", regions, &swatch_image(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, SensorError::IncompleteCalibration { .. }));
        assert!(store.get_active().is_none());
    }

    #[test]
    fn test_invalid_region_reports_index() {
        let store = CalibrationStore::new();
        let mut regions = swatch_regions();
        regions[2].rect = Rect::new(25, 2, 25, 8);

        let err = store
            .save_profile("bad", &regions, &swatch_image(), Utc::now())
            .unwrap_err();

        assert!(matches!(err, SensorError::InvalidRegion { index: 2, .. }));
        assert!(store.get_active().is_none());
    }

    #[test]
    fn test_out_of_bounds_region() {
        let store = CalibrationStore::new();
        let mut regions = swatch_regions();
        regions[3].rect = Rect::new(30, 0, 41, 10);

        let err = store
            .save_profile("bad", &regions, &swatch_image(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, SensorError::InvalidRegion { index: 3, .. }));
    }

    #[test]
    fn test_duplicate_labels_are_pooled() {
        let store = CalibrationStore::new();
        let mut regions = swatch_regions();
        // A second FRESH selection over the EXPIRED swatch, same size.
        regions.push(CalibrationRegion {
            state: FreshnessState::Fresh,
            rect: Rect::new(32, 2, 38, 8),
        });

        let profile = store
            .save_profile("pooled", &regions, &swatch_image(), Utc::now())
            .unwrap();

        assert_eq!(profile.reference(FreshnessState::Fresh), Color::new(100, 100, 0));
    }

    #[test]
    fn test_superseded_profiles_are_retained() {
        let store = CalibrationStore::new();
        let default = store.load_default(Utc::now());
        let user = store
            .save_profile("bench", &swatch_regions(), &swatch_image(), Utc::now())
            .unwrap();

        let listed = store.list_profiles();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, user.id());
        assert!(listed[0].active);
        assert_eq!(listed[1].id, default.id());
        assert!(!listed[1].active);

        let reactivated = store.activate(default.id()).unwrap();
        assert_eq!(reactivated.id(), default.id());
        assert_eq!(store.status().source, Some(ProfileSource::Default));
        assert!(store.activate(Uuid::new_v4()).is_none());
    }

    fn imported(id: Uuid, name: &str, fresh: Color) -> CalibrationProfile {
        let mut colors: BTreeMap<_, _> = FreshnessState::ALL
            .into_iter()
            .map(|s| (s, s.default_color()))
            .collect();
        colors.insert(FreshnessState::Fresh, fresh);
        let document = ProfileDocument {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
            source: ProfileSource::User,
            colors,
            days: BTreeMap::new(),
        };
        CalibrationProfile::try_from(document).unwrap()
    }

    #[test]
    fn test_reimport_with_same_id_replaces_content() {
        let store = CalibrationStore::new();
        let id = Uuid::new_v4();

        store.import_profile(imported(id, "v1", Color::new(0, 200, 0)));
        store.load_default(Utc::now());
        store.import_profile(imported(id, "v2", Color::new(1, 1, 1)));

        let names: Vec<String> = store.list_profiles().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["Default Calibration", "v2"]);

        store.load_default(Utc::now());
        let reactivated = store.activate(id).unwrap();
        assert_eq!(reactivated.name(), "v2");
        assert_eq!(reactivated.reference(FreshnessState::Fresh), Color::new(1, 1, 1));

        store.retain(imported(id, "v3", Color::new(2, 2, 2)));
        assert_eq!(store.list_profiles().len(), 3);
        assert_eq!(store.activate(id).unwrap().name(), "v3");
    }

    #[test]
    fn test_reader_snapshot_survives_swap() {
        let store = CalibrationStore::new();
        let before = store.load_default(Utc::now());
        let snapshot = store.get_active().unwrap();

        store
            .save_profile("bench", &swatch_regions(), &swatch_image(), Utc::now())
            .unwrap();

        assert_eq!(snapshot.id(), before.id());
        assert_ne!(store.get_active().unwrap().id(), before.id());
    }
}
