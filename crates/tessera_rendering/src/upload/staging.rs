//! The upload staging buffer.

/// CPU-side bytes the upload ops are written into before the commit.
///
/// Grows by doubling up to a hard cap. Growth never shrinks it back.
#[derive(Clone, Debug)]
pub struct StagingBuffer {
    bytes: Vec<u8>,
    max_size: usize,
    growths: u32,
}

impl StagingBuffer {
    /// Creates a zeroed staging buffer.
    #[must_use]
    pub fn new(initial_size: u64, max_size: u64) -> Self {
        let max_size = usize::try_from(max_size).unwrap_or(usize::MAX);
        let initial = usize::try_from(initial_size).unwrap_or(max_size).min(max_size);
        Self {
            bytes: vec![0; initial],
            max_size,
            growths: 0,
        }
    }

    /// Returns the current size.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the hard cap.
    #[inline]
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns how often the buffer grew.
    #[inline]
    #[must_use]
    pub const fn growths(&self) -> u32 {
        self.growths
    }

    /// Makes room for `needed` bytes.
    ///
    /// Returns false, after logging, if that exceeds the cap or the
    /// allocation fails; the previous contents stay usable.
    pub fn reserve(&mut self, needed: usize) -> bool {
        let current = self.bytes.len();
        if needed <= current {
            return true;
        }
        if needed > self.max_size {
            tracing::warn!(
                needed,
                max_size = self.max_size,
                "upload staging exceeds its cap, gpu data stays stale"
            );
            return false;
        }

        let mut new_size = current.max(1);
        while new_size < needed {
            new_size = new_size.saturating_mul(2).min(self.max_size);
        }
        if let Err(err) = self.bytes.try_reserve_exact(new_size - current) {
            tracing::warn!(%err, new_size, "upload staging growth failed, gpu data stays stale");
            return false;
        }
        self.bytes.resize(new_size, 0);
        self.growths += 1;
        tracing::info!(old_size = current, new_size, "upload staging grown");
        true
    }

    /// Returns the first `len` bytes.
    #[inline]
    #[must_use]
    pub fn bytes(&self, len: usize) -> &[u8] {
        &self.bytes[..len.min(self.bytes.len())]
    }

    /// Returns the first `len` bytes mutably.
    #[inline]
    pub fn bytes_mut(&mut self, len: usize) -> &mut [u8] {
        let len = len.min(self.bytes.len());
        &mut self.bytes[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_by_doubling_to_cap() {
        let mut staging = StagingBuffer::new(1024, 5000);
        assert!(staging.reserve(1000));
        assert_eq!(staging.size(), 1024);

        assert!(staging.reserve(3000));
        assert_eq!(staging.size(), 4096);

        assert!(staging.reserve(4500));
        assert_eq!(staging.size(), 5000);
        assert_eq!(staging.growths(), 2);
    }

    #[test]
    fn test_over_cap_is_refused() {
        let mut staging = StagingBuffer::new(64, 128);
        assert!(!staging.reserve(129));
        assert_eq!(staging.size(), 64);
        assert_eq!(staging.bytes_mut(1000).len(), 64);
    }
}
