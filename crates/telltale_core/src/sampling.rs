//! Every-Nth sampling counter shared by the hub and the profiler.

/// Admits the 1st, (N+1)th, (2N+1)th ... offered occurrence.
///
/// `every == 1` admits everything. The counter only moves when
/// [`EveryNth::admit`] is called, so callers decide which occurrences count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EveryNth {
    every: u32,
    seen: u64,
}

impl EveryNth {
    /// Create a sampler; zero is clamped to one
    #[must_use]
    pub const fn new(every: u32) -> Self {
        Self {
            every: if every == 0 { 1 } else { every },
            seen: 0,
        }
    }

    /// Count one occurrence and report whether it is admitted
    pub fn admit(&mut self) -> bool {
        let admitted = self.seen % u64::from(self.every) == 0;
        self.seen += 1;
        admitted
    }

    /// Sampling rate
    #[must_use]
    pub const fn every(&self) -> u32 {
        self.every
    }

    /// Occurrences counted so far
    #[must_use]
    pub const fn seen(&self) -> u64 {
        self.seen
    }

    /// Restart counting from zero
    pub fn reset(&mut self) {
        self.seen = 0;
    }
}

impl Default for EveryNth {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsampled_admits_all() {
        let mut s = EveryNth::new(1);
        assert!((0..10).all(|_| s.admit()));
    }

    #[test]
    fn test_every_third() {
        let mut s = EveryNth::new(3);
        let pattern: Vec<bool> = (0..7).map(|_| s.admit()).collect();
        assert_eq!(pattern, vec![true, false, false, true, false, false, true]);
        assert_eq!(s.seen(), 7);
    }

    #[test]
    fn test_zero_clamped() {
        let s = EveryNth::new(0);
        assert_eq!(s.every(), 1);
    }

    #[test]
    fn test_reset() {
        let mut s = EveryNth::new(2);
        s.admit();
        s.reset();
        assert!(s.admit());
    }
}
