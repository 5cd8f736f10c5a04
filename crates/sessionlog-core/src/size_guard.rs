//! Byte accounting for a single log file.

/// Rejection produced by [`SizeGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeExceeded {
    pub current: u64,
    pub batch: u64,
    pub limit: u64,
}

/// Tracks how many bytes a file holds and refuses batches that would
/// push it past its limit.
///
/// A rejected batch is rejected whole; the guard never splits one. The
/// `reserved` bytes are kept free for the closing footer so a file at the
/// limit can still be terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeGuard {
    limit: u64,
    current: u64,
    reserved: u64,
}

impl SizeGuard {
    /// A guard for a file that already holds `current` bytes. A `limit` of
    /// zero disables checking.
    pub fn new(limit: u64, current: u64) -> Self {
        Self {
            limit,
            current,
            reserved: 0,
        }
    }

    pub fn with_reserved(mut self, reserved: u64) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    /// Bytes that can still be accepted, `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        if self.is_unlimited() {
            return None;
        }
        Some(
            self.limit
                .saturating_sub(self.current)
                .saturating_sub(self.reserved),
        )
    }

    /// Whether a batch of `batch` bytes may be appended.
    pub fn check(&self, batch: u64) -> Result<(), SizeExceeded> {
        match self.remaining() {
            Some(remaining) if batch > remaining => Err(SizeExceeded {
                current: self.current,
                batch,
                limit: self.limit,
            }),
            _ => Ok(()),
        }
    }

    /// Account for bytes that were written.
    pub fn record(&mut self, written: u64) {
        self.current = self.current.saturating_add(written);
    }

    /// Set the byte count after the file changed underneath (reopen, rotation).
    pub fn reset(&mut self, current: u64) {
        self.current = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_batch_past_limit() {
        let guard = SizeGuard::new(1000, 950);
        assert_eq!(
            guard.check(80),
            Err(SizeExceeded {
                current: 950,
                batch: 80,
                limit: 1000
            })
        );
    }

    #[test]
    fn test_accepts_after_reset() {
        let mut guard = SizeGuard::new(1000, 950);
        assert!(guard.check(80).is_err());

        guard.reset(0);
        assert!(guard.check(40).is_ok());
        guard.record(40);
        assert_eq!(guard.current(), 40);
    }

    #[test]
    fn test_exact_fit_is_allowed() {
        let guard = SizeGuard::new(1000, 950);
        assert!(guard.check(50).is_ok());
        assert!(guard.check(51).is_err());
    }

    #[test]
    fn test_unlimited_accepts_anything() {
        let guard = SizeGuard::new(0, u64::MAX - 1);
        assert!(guard.check(u64::MAX).is_ok());
        assert_eq!(guard.remaining(), None);
    }

    #[test]
    fn test_reserved_bytes_shrink_capacity() {
        let guard = SizeGuard::new(100, 50).with_reserved(10);
        assert_eq!(guard.remaining(), Some(40));
        assert!(guard.check(40).is_ok());
        assert!(guard.check(41).is_err());
    }

    #[test]
    fn test_current_past_limit_rejects_everything() {
        let guard = SizeGuard::new(100, 150);
        assert_eq!(guard.remaining(), Some(0));
        assert!(guard.check(1).is_err());
        assert!(guard.check(0).is_ok());
    }
}
