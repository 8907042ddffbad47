//! Session gate consulted before any approval may sign.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use std::sync::{Mutex, PoisonError};
use subtle::ConstantTimeEq;
use tokio::time::Instant;
use tracing::info;

use crate::error::ApprovalError;

#[derive(Debug, Default)]
struct GateState {
    unlocked: bool,
    expires_at: Option<Instant>,
}

/// Unlock state shared by every approval surface in a privileged context.
///
/// An expired or locked session blocks approval; reject stays available.
pub struct SessionGate {
    passphrase: SecretString,
    state: Mutex<GateState>,
}

impl SessionGate {
    pub fn new(passphrase: SecretString) -> Self {
        Self {
            passphrase,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Constant-time passphrase check; unlocks for `ttl` on a match.
    pub fn unlock(&self, attempt: &str, ttl: Duration) -> Result<(), ApprovalError> {
        let matched: bool = attempt
            .as_bytes()
            .ct_eq(self.passphrase.expose_secret().as_bytes())
            .into();
        if !matched {
            return Err(ApprovalError::UnlockFailed);
        }
        let mut state = self.guard();
        state.unlocked = true;
        state.expires_at = Some(Instant::now() + ttl);
        info!("session unlocked");
        Ok(())
    }

    pub fn lock(&self) {
        let mut state = self.guard();
        state.unlocked = false;
        state.expires_at = None;
    }

    pub fn is_unlocked(&self) -> bool {
        let mut state = self.guard();
        if state.unlocked
            && let Some(expires_at) = state.expires_at
            && Instant::now() >= expires_at
        {
            state.unlocked = false;
            state.expires_at = None;
        }
        state.unlocked
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SessionGate {
        SessionGate::new(SecretString::from("horse battery staple"))
    }

    #[tokio::test]
    async fn correct_passphrase_unlocks() {
        let gate = gate();
        assert!(!gate.is_unlocked());
        gate.unlock("horse battery staple", Duration::from_secs(300))
            .expect("unlock");
        assert!(gate.is_unlocked());

        gate.lock();
        assert!(!gate.is_unlocked());
    }

    #[tokio::test]
    async fn wrong_passphrase_is_rejected() {
        let gate = gate();
        match gate.unlock("horse battery stapl", Duration::from_secs(300)) {
            Err(ApprovalError::UnlockFailed) => {}
            other => panic!("Expected UnlockFailed, got {other:?}"),
        }
        assert!(!gate.is_unlocked());
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_expires_after_its_ttl() {
        let gate = gate();
        gate.unlock("horse battery staple", Duration::from_secs(300))
            .expect("unlock");
        assert!(gate.is_unlocked());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(gate.is_unlocked());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!gate.is_unlocked());
    }
}
