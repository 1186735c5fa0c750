use crate::collaborators::FrameWindow;
use crate::error::{ReconError, Result};
use log::debug;
use num_complex::Complex32;
use rayon::prelude::*;

/// Reusable host memory the samples of a frame are marshalled into before upload.
///
/// Layout is channel major: channel `c` occupies `allocated_samples` consecutive entries,
/// within which profile `p` starts at `p * samples_per_profile`.
#[derive(Debug, Default)]
pub struct HostStagingBuffer {
    data: Vec<Complex32>,
    channels: usize,
    allocated_samples: usize,
}

impl HostStagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// per channel capacity of the current allocation, 0 when invalidated
    pub fn allocated_samples(&self) -> usize {
        self.allocated_samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Marks the allocation stale so the next [ensure](Self::ensure) reallocates
    pub fn invalidate(&mut self) {
        self.allocated_samples = 0;
    }

    /// Makes sure the buffer holds `channels * samples_needed` samples. Memory is only
    /// reallocated when that size changes or the buffer was invalidated. Returns true if a
    /// reallocation happened.
    pub fn ensure(&mut self, channels: usize, samples_needed: usize) -> Result<bool> {
        if samples_needed == self.allocated_samples && channels == self.channels {
            return Ok(false);
        }
        // release before acquiring the new block
        self.data = Vec::new();
        self.allocated_samples = 0;
        self.channels = 0;

        let len = channels
            .checked_mul(samples_needed)
            .ok_or_else(|| ReconError::Allocation { what: "host sample buffer", reason: "size overflow".to_string() })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| ReconError::Allocation {
            what: "host sample buffer",
            reason: e.to_string(),
        })?;
        data.resize(len, Complex32::ZERO);
        debug!("allocated host sample buffer for {channels} channels x {samples_needed} samples");

        self.data = data;
        self.channels = channels;
        self.allocated_samples = samples_needed;
        Ok(true)
    }

    fn offset(&self, profile: usize, channel: usize, samples_per_profile: usize) -> usize {
        channel * self.allocated_samples + profile * samples_per_profile
    }

    /// Copies one channel of one profile into slot `profile` of the window
    pub fn stage(&mut self, profile: usize, channel: usize, samples: &[Complex32]) -> Result<()> {
        let n = samples.len();
        if channel >= self.channels || (profile + 1) * n > self.allocated_samples {
            return Err(ReconError::StagingLayout {
                reason: format!(
                    "slot {profile} channel {channel} does not fit {} channels x {} samples",
                    self.channels, self.allocated_samples
                ),
            });
        }
        let offset = self.offset(profile, channel, n);
        self.data[offset..offset + n].copy_from_slice(samples);
        Ok(())
    }

    /// Reads back what [stage](Self::stage) wrote
    pub fn staged(&self, profile: usize, channel: usize, samples_per_profile: usize) -> Option<&[Complex32]> {
        if channel >= self.channels || (profile + 1) * samples_per_profile > self.allocated_samples {
            return None;
        }
        let offset = self.offset(profile, channel, samples_per_profile);
        Some(&self.data[offset..offset + samples_per_profile])
    }

    /// Stages every channel of every profile in `window`, slot `i` of the window going to
    /// profile position `i`. All profiles are checked against the active layout before
    /// anything is copied.
    pub fn stage_window(&mut self, window: &FrameWindow<'_>) -> Result<()> {
        let n = window.samples_per_profile();
        let channels = self.channels;
        if window.total_samples() > self.allocated_samples {
            return Err(ReconError::StagingLayout {
                reason: format!("{} samples per channel needed, {} allocated", window.total_samples(), self.allocated_samples),
            });
        }
        for profile in window.slots() {
            if profile.samples() != n || profile.channels() < channels {
                return Err(ReconError::PayloadShape {
                    scan_counter: profile.header.scan_counter,
                    reason: format!(
                        "{} channels x {} samples, frame needs {channels} x {n}",
                        profile.channels(),
                        profile.samples()
                    ),
                });
            }
            if profile.data().as_slice().is_none() {
                return Err(ReconError::PayloadShape {
                    scan_counter: profile.header.scan_counter,
                    reason: "payload is not contiguous".to_string(),
                });
            }
        }
        if channels == 0 || n == 0 || self.allocated_samples == 0 {
            return Ok(());
        }
        self.data.par_chunks_exact_mut(self.allocated_samples).enumerate().for_each(|(c, block)| {
            for (slot, profile) in window.slots().enumerate() {
                if let Some(src) = profile.channel(c) {
                    block[slot * n..(slot + 1) * n].copy_from_slice(src);
                }
            }
        });
        Ok(())
    }

    pub fn as_slice(&self) -> &[Complex32] {
        &self.data
    }
}
