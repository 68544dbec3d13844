/// Time-boxed unlock session.
///
/// The session is `Locked` until a password is verified, then `Unlocked`
/// with the decrypted material for at most `unlock_duration_ms`. Freshness
/// is always computed against the clock; the stored state alone never
/// grants access.
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::crypto::sensitive::{SecretString, SensitiveBytes32};
use crate::error::{Result, WalletError};

/// Millisecond wall clock, injectable so expiry can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self(AtomicI64::new(start_ms))
    }

    pub fn set(&self, ms: i64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Secrets held while unlocked. Both fields wipe on drop.
#[derive(Debug)]
pub struct SessionMaterial {
    pub mnemonic: SecretString,
    /// Password-derived key, kept to encrypt records created during the session.
    pub key: SensitiveBytes32,
}

#[derive(Debug)]
enum SessionState {
    Locked,
    Unlocked {
        unlocked_at_ms: i64,
        material: SessionMaterial,
    },
}

#[derive(Debug)]
pub struct WalletSession {
    state: SessionState,
    unlock_duration_ms: i64,
}

impl WalletSession {
    pub fn new(unlock_duration_ms: i64) -> Self {
        Self {
            state: SessionState::Locked,
            unlock_duration_ms,
        }
    }

    pub fn unlock_duration_ms(&self) -> i64 {
        self.unlock_duration_ms
    }

    /// Stores verified material and restarts the unlock window at `now_ms`.
    pub fn unlock(&mut self, material: SessionMaterial, now_ms: i64) {
        self.state = SessionState::Unlocked {
            unlocked_at_ms: now_ms,
            material,
        };
    }

    pub fn is_unlocked(&self, now_ms: i64) -> bool {
        match &self.state {
            SessionState::Locked => false,
            SessionState::Unlocked { unlocked_at_ms, .. } => {
                now_ms - unlocked_at_ms < self.unlock_duration_ms
            }
        }
    }

    /// True while material is held, even if the window has lapsed.
    pub fn holds_material(&self) -> bool {
        matches!(self.state, SessionState::Unlocked { .. })
    }

    pub fn unlocked_at_ms(&self) -> Option<i64> {
        match &self.state {
            SessionState::Locked => None,
            SessionState::Unlocked { unlocked_at_ms, .. } => Some(*unlocked_at_ms),
        }
    }

    pub fn material(&self, now_ms: i64) -> Result<&SessionMaterial> {
        match &self.state {
            SessionState::Unlocked { material, .. } if self.is_unlocked(now_ms) => Ok(material),
            _ => Err(WalletError::WalletLocked),
        }
    }

    /// Swaps the session key after a password change without restarting
    /// the unlock window.
    pub fn replace_key(&mut self, key: SensitiveBytes32) -> bool {
        match &mut self.state {
            SessionState::Unlocked { material, .. } => {
                material.key = key;
                true
            }
            SessionState::Locked => false,
        }
    }

    /// Drops all material. Returns whether anything was held.
    pub fn lock(&mut self) -> bool {
        let was_unlocked = self.holds_material();
        self.state = SessionState::Locked;
        was_unlocked
    }

    /// Locks if the window has lapsed. Returns whether a transition happened.
    pub fn expire_if_due(&mut self, now_ms: i64) -> bool {
        if self.holds_material() && !self.is_unlocked(now_ms) {
            self.lock()
        } else {
            false
        }
    }
}
