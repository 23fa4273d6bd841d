use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Where a worker is in the termination protocol.
///
/// `Alive` -> anything else is the only transition that can race; it is a
/// single compare-and-swap so exactly one caller wins it. Later transitions
/// are only made by whoever won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum KillState {
    Alive = 0,
    /// Graceful stop requested, grace timer not yet armed.
    Terminating = 1,
    /// Grace timer armed; force kill pending unless the process exits.
    GracePeriod = 2,
    Dead = 3,
}

impl KillState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => KillState::Alive,
            1 => KillState::Terminating,
            2 => KillState::GracePeriod,
            _ => KillState::Dead,
        }
    }
}

impl fmt::Display for KillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillState::Alive => write!(f, "alive"),
            KillState::Terminating => write!(f, "terminating"),
            KillState::GracePeriod => write!(f, "grace_period"),
            KillState::Dead => write!(f, "dead"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(KillState::Alive as u8))
    }

    pub(crate) fn get(&self) -> KillState {
        KillState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Leave `Alive` for `next`. Returns false if someone already left it.
    pub(crate) fn begin(&self, next: KillState) -> bool {
        debug_assert_ne!(next, KillState::Alive);
        self.0
            .compare_exchange(
                KillState::Alive as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move forward within the protocol. Never returns to `Alive`.
    pub(crate) fn advance(&self, next: KillState) {
        debug_assert_ne!(next, KillState::Alive);
        self.0.fetch_max(next as u8, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_begin_is_one_shot() {
        let lc = Lifecycle::new();
        assert_eq!(lc.get(), KillState::Alive);
        assert!(lc.begin(KillState::Terminating));
        assert!(!lc.begin(KillState::Dead));
        assert_eq!(lc.get(), KillState::Terminating);
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let lc = Lifecycle::new();
        assert!(lc.begin(KillState::Dead));
        lc.advance(KillState::GracePeriod);
        assert_eq!(lc.get(), KillState::Dead);
    }

    #[test]
    fn test_concurrent_begin_has_one_winner() {
        let lc = Arc::new(Lifecycle::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lc = Arc::clone(&lc);
                std::thread::spawn(move || lc.begin(KillState::Terminating))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
