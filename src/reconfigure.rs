//! Detection of mid-stream layout and geometry changes

use crate::profile::{AcquisitionHeader, Geometry};
use log::debug;

/// What changed between the cached stream state and an incoming profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drift {
    pub samples_changed: bool,
    pub channels_changed: bool,
    pub geometry_changed: bool,
}

impl Drift {
    /// the host staging buffer no longer matches the frame layout
    pub fn invalidates_staging(&self) -> bool {
        self.samples_changed || self.channels_changed
    }

    pub fn is_none(&self) -> bool {
        *self == Drift::default()
    }
}

/// Cached channel count, samples per profile and last seen imaging plane
#[derive(Debug, Clone)]
pub struct ReconfigurationDetector {
    channels: usize,
    samples_per_profile: usize,
    geometry: Geometry,
}

impl ReconfigurationDetector {
    /// Starts from the layout announced in the stream header. The geometry snapshot starts
    /// zeroed, so the first positioned profile registers as a geometry change.
    pub fn new(channels: usize, samples_per_profile: usize) -> Self {
        Self { channels, samples_per_profile, geometry: Geometry::default() }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples_per_profile(&self) -> usize {
        self.samples_per_profile
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Compares `header` with the cached state and adopts its values
    pub fn observe(&mut self, header: &AcquisitionHeader) -> Drift {
        let mut drift = Drift::default();

        if header.samples() != self.samples_per_profile {
            debug!("adjusting samples per profile from {} to {}", self.samples_per_profile, header.samples());
            self.samples_per_profile = header.samples();
            drift.samples_changed = true;
        }

        if header.channels() != self.channels {
            debug!("adjusting channels from {} to {}", self.channels, header.channels());
            self.channels = header.channels();
            drift.channels_changed = true;
        }

        let geometry = header.geometry();
        if geometry != self.geometry {
            debug!("imaging plane changed to position {:?}, quaternion {:?}", geometry.position, geometry.quaternion);
            self.geometry = geometry;
            drift.geometry_changed = true;
        }

        drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(channels: u16, samples: u16, position: [f32; 3]) -> AcquisitionHeader {
        AcquisitionHeader {
            active_channels: channels,
            number_of_samples: samples,
            position,
            quaternion: [0., 0., 0., 1.],
            ..Default::default()
        }
    }

    #[test]
    fn unchanged_layout_is_idempotent() {
        let mut detector = ReconfigurationDetector::new(4, 128);
        let h = header(4, 128, [0., 0., 10.]);
        assert!(detector.observe(&h).geometry_changed);
        for _ in 0..5 {
            let drift = detector.observe(&h);
            assert!(drift.is_none());
            assert!(!drift.invalidates_staging());
        }
    }

    #[test]
    fn channel_change_is_reported_once() {
        let mut detector = ReconfigurationDetector::new(4, 128);
        detector.observe(&header(4, 128, [0.; 3]));
        let drift = detector.observe(&header(8, 128, [0.; 3]));
        assert!(drift.channels_changed);
        assert!(!drift.samples_changed);
        assert!(drift.invalidates_staging());
        assert_eq!(detector.channels(), 8);
        assert!(detector.observe(&header(8, 128, [0.; 3])).is_none());
    }

    #[test]
    fn sample_change_invalidates_staging_only() {
        let mut detector = ReconfigurationDetector::new(2, 128);
        let drift = detector.observe(&header(2, 256, [0.; 3]));
        assert!(drift.samples_changed);
        assert!(!drift.channels_changed);
        assert!(drift.invalidates_staging());
        assert_eq!(detector.samples_per_profile(), 256);
    }

    #[test]
    fn geometry_change_does_not_touch_layout() {
        let mut detector = ReconfigurationDetector::new(2, 64);
        detector.observe(&header(2, 64, [0., 0., 5.]));
        let drift = detector.observe(&header(2, 64, [0., 0., 6.]));
        assert!(drift.geometry_changed);
        assert!(!drift.invalidates_staging());
        assert_eq!(detector.geometry().position, [0., 0., 6.]);
    }
}
