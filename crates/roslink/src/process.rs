// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Vocabulary shared by every per-connection process.
//!
//! A step function performs one bounded unit of work and reports a
//! [`Flow`]. The dispatcher re-invokes it while it says `Continue`, up to
//! [`MAX_STEPS_PER_DISPATCH`], so all work available on one readiness
//! signal is done without jumping between states.

/// Transitions allowed per slot per dispatch.
pub const MAX_STEPS_PER_DISPATCH: usize = 8;

/// What a step function asks of the trampoline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// State advanced and more work may be possible right away
    Continue,
    /// Would block, or waiting on a timer
    Yield,
}

/// Readiness a process needs in its current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Watch {
    /// Not polled
    None,
    /// Readable
    Read,
    /// Writable
    Write,
    /// Polled only for error/hang-up (waiting on a timer)
    ErrorOnly,
    /// Must be stepped without waiting (e.g. start a connect)
    Immediate,
}

impl Watch {
    pub fn is_polled(self) -> bool {
        matches!(self, Watch::Read | Watch::Write | Watch::ErrorOnly)
    }
}

/// Elapsed-time check shared by the stall detector.
pub fn is_stalled(now: u64, last_change: u64, ceiling: u64) -> bool {
    now.saturating_sub(last_change) > ceiling
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_polled() {
        assert!(Watch::Read.is_polled());
        assert!(Watch::ErrorOnly.is_polled());
        assert!(!Watch::Immediate.is_polled());
        assert!(!Watch::None.is_polled());
    }

    #[test]
    fn test_stall_ceiling() {
        assert!(!is_stalled(1000, 0, 1000));
        assert!(is_stalled(1001, 0, 1000));
        assert!(!is_stalled(0, 10, 5));
    }
}
