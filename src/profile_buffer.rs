use crate::profile::AcquisitionProfile;
use std::collections::VecDeque;

/// FIFO of profiles waiting to be folded into frames. The buffer owns every queued profile
/// until it is drained.
#[derive(Debug, Default)]
pub struct ProfileBuffer {
    profiles: VecDeque<AcquisitionProfile>,
}

impl ProfileBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, profile: AcquisitionProfile) {
        self.profiles.push_back(profile);
    }

    /// Removes and frees the `n` oldest profiles, returning how many were removed
    pub fn drain_front(&mut self, n: usize) -> usize {
        let n = n.min(self.profiles.len());
        self.profiles.drain(..n);
        n
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// The newest `n` profiles, oldest first, along with the buffer index of the first one
    pub fn newest(&self, n: usize) -> (usize, impl DoubleEndedIterator<Item = &AcquisitionProfile>) {
        let start = self.profiles.len().saturating_sub(n);
        (start, self.profiles.range(start..))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &AcquisitionProfile> {
        self.profiles.iter()
    }

    pub fn back(&self) -> Option<&AcquisitionProfile> {
        self.profiles.back()
    }
}
