//! Credential lifecycle tracking for remote providers
//!
//! Each provider's stored authentication material moves through a small
//! state machine: Unknown until the first authenticated call, Valid
//! after a success, Invalid after an authentication-class failure.
//! Invalid transitions surface as renewal notices on a broadcast
//! channel, throttled per provider so a burst of failing requests
//! produces one notice, not hundreds. Recovery is optimistic: the next
//! successful call flips the state back to Valid, with no background
//! polling and no automatic token refresh.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::warn;

use crate::errors::StorageError;
use crate::store::ProviderId;

/// Validity of a provider's stored credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialState {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Event asking a human (or an external OAuth flow) to re-authorize a
/// provider
#[derive(Debug, Clone)]
pub struct RenewalNotice {
    pub provider: ProviderId,
    pub message: String,
}

#[derive(Default)]
struct Entry {
    state: CredentialState,
    last_notice: Option<Instant>,
}

/// Tracks credential validity per provider and emits throttled renewal
/// notices
pub struct CredentialMonitor {
    entries: Mutex<HashMap<ProviderId, Entry>>,
    notices: broadcast::Sender<RenewalNotice>,
    throttle: Duration,
}

impl CredentialMonitor {
    /// Notices for the same provider are suppressed within this window.
    pub const NOTICE_THROTTLE: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self::with_throttle(Self::NOTICE_THROTTLE)
    }

    /// Custom throttle window; tests use short windows to exercise both
    /// sides of the suppression.
    pub fn with_throttle(throttle: Duration) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(HashMap::new()),
            notices,
            throttle,
        }
    }

    /// Subscribe to renewal notices. Slow subscribers may miss events;
    /// the channel is lossy by design.
    pub fn subscribe(&self) -> broadcast::Receiver<RenewalNotice> {
        self.notices.subscribe()
    }

    /// Current state for a provider
    pub fn state(&self, provider: ProviderId) -> CredentialState {
        self.entries
            .lock()
            .expect("credential state lock poisoned")
            .get(&provider)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    /// Record a successful authenticated call
    pub fn record_success(&self, provider: ProviderId) {
        let mut entries = self.entries.lock().expect("credential state lock poisoned");
        entries.entry(provider).or_default().state = CredentialState::Valid;
    }

    /// Route a failed call through the state machine.
    ///
    /// Only authentication-class failures transition the state; timeouts
    /// and other transient errors pass through untouched so they cannot
    /// mark healthy credentials invalid.
    pub fn record_failure(&self, provider: ProviderId, error: &StorageError) {
        if !error.is_authentication() {
            return;
        }

        let should_notify = {
            let mut entries = self.entries.lock().expect("credential state lock poisoned");
            let entry = entries.entry(provider).or_default();
            entry.state = CredentialState::Invalid;
            let due = entry
                .last_notice
                .map_or(true, |at| at.elapsed() >= self.throttle);
            if due {
                entry.last_notice = Some(Instant::now());
            }
            due
        };

        if should_notify {
            let notice = RenewalNotice {
                provider,
                message: error.to_string(),
            };
            warn!(provider = %provider, "Provider credentials need renewal");
            let provider_label = provider.to_string();
            crate::metrics::CREDENTIAL_NOTICES
                .with_label_values(&[provider_label.as_str()])
                .inc();
            // Send fails only when nobody is subscribed; that is fine.
            let _ = self.notices.send(notice);
        }
    }
}

impl Default for CredentialMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_error() -> StorageError {
        StorageError::Authentication {
            provider: ProviderId::Drive,
            message: "invalid_grant".to_string(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<RenewalNotice>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn test_initial_state_is_unknown() {
        let monitor = CredentialMonitor::new();
        assert_eq!(monitor.state(ProviderId::Drive), CredentialState::Unknown);
    }

    #[test]
    fn test_burst_of_failures_yields_single_notice() {
        let monitor = CredentialMonitor::new();
        let mut rx = monitor.subscribe();

        for _ in 0..100 {
            monitor.record_failure(ProviderId::Drive, &auth_error());
        }

        assert_eq!(monitor.state(ProviderId::Drive), CredentialState::Invalid);
        assert_eq!(drain(&mut rx), 1);
    }

    #[test]
    fn test_zero_throttle_notifies_every_failure() {
        let monitor = CredentialMonitor::with_throttle(Duration::ZERO);
        let mut rx = monitor.subscribe();

        for _ in 0..5 {
            monitor.record_failure(ProviderId::Drive, &auth_error());
        }
        assert_eq!(drain(&mut rx), 5);
    }

    #[test]
    fn test_throttle_is_per_provider() {
        let monitor = CredentialMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.record_failure(ProviderId::Drive, &auth_error());
        let s3_error = StorageError::Authentication {
            provider: ProviderId::S3,
            message: "SignatureDoesNotMatch".to_string(),
        };
        monitor.record_failure(ProviderId::S3, &s3_error);

        assert_eq!(drain(&mut rx), 2);
    }

    #[test]
    fn test_success_recovers_to_valid() {
        let monitor = CredentialMonitor::new();
        monitor.record_failure(ProviderId::Drive, &auth_error());
        assert_eq!(monitor.state(ProviderId::Drive), CredentialState::Invalid);

        monitor.record_success(ProviderId::Drive);
        assert_eq!(monitor.state(ProviderId::Drive), CredentialState::Valid);
    }

    #[test]
    fn test_transient_failures_do_not_invalidate() {
        let monitor = CredentialMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.record_success(ProviderId::S3);
        monitor.record_failure(ProviderId::S3, &StorageError::Transient("timeout".into()));

        assert_eq!(monitor.state(ProviderId::S3), CredentialState::Valid);
        assert_eq!(drain(&mut rx), 0);
    }
}
