use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

/// Why a session stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StopReason {
    #[strum(to_string = "interrupt signal")]
    Interrupt = 1,
    #[strum(to_string = "quit key")]
    QuitKey = 2,
    #[strum(to_string = "stop requested")]
    Requested = 3,
}

/// Cooperative cancellation shared between stop sources and the session loop.
///
/// Clones observe the same state. The first `cancel` wins and its reason is
/// the one reported.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    state: Arc<AtomicU8>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: StopReason) {
        let _ = self
            .state
            .compare_exchange(0, reason.into(), Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) != 0
    }

    pub fn reason(&self) -> Option<StopReason> {
        StopReason::try_from(self.state.load(Ordering::SeqCst)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cancel_wins() {
        let token = StopToken::new();
        let observer = token.clone();
        assert_eq!(observer.reason(), None);

        token.cancel(StopReason::QuitKey);
        token.cancel(StopReason::Interrupt);

        assert!(observer.is_cancelled());
        assert_eq!(observer.reason(), Some(StopReason::QuitKey));
        assert_eq!(StopReason::QuitKey.to_string(), "quit key");
    }

    #[test]
    fn reason_codes_round_trip_through_the_token_state() {
        assert!(StopReason::try_from(0u8).is_err());
        assert_eq!(StopReason::try_from(3u8).ok(), Some(StopReason::Requested));
        assert_eq!(u8::from(StopReason::Interrupt), 1);
    }
}
