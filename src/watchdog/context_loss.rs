// GPU context loss/restore handshake
//
// On context loss the recovery enters a staged-backoff retry loop. Each
// elapsed retry deadline without a restore counts as a failed attempt;
// exhausting the attempt budget escalates to a soft-restart broadcast,
// and if the loss still persists after a grace period the host is asked
// for a full reload as the guaranteed terminal recovery. A restore (the
// host's native event or a manual reacquisition) resets everything and
// broadcasts a rebuild request so renderers recreate GPU objects.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::events::GovernanceEvent;
use crate::host::HostActions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecoveryConfig {
    /// Staged retry delays; the final stage repeats once exceeded.
    pub backoff_ms: Vec<u64>,
    /// Failed attempts tolerated before the soft-restart escalation.
    pub max_attempts: u32,
    /// How long after the soft-restart request before the terminal
    /// full reload.
    pub reload_grace_ms: u64,
}

impl Default for ContextRecoveryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: vec![1_000, 2_000, 5_000],
            max_attempts: 3,
            reload_grace_ms: 4_000,
        }
    }
}

#[derive(Debug)]
pub struct ContextRecovery {
    config: ContextRecoveryConfig,
    is_recovering: bool,
    attempts: u32,
    next_retry_at: Option<u64>,
    reload_deadline: Option<u64>,
    soft_restart_sent: bool,
}

impl ContextRecovery {
    pub fn new(config: ContextRecoveryConfig) -> Self {
        Self {
            config,
            is_recovering: false,
            attempts: 0,
            next_retry_at: None,
            reload_deadline: None,
            soft_restart_sent: false,
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.is_recovering
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn backoff_for(&self, attempt: u32) -> u64 {
        let idx = (attempt as usize).min(self.config.backoff_ms.len().saturating_sub(1));
        self.config.backoff_ms.get(idx).copied().unwrap_or(1_000)
    }

    /// Host reported context loss. Default handling is assumed suppressed
    /// by the host so the context remains recoverable.
    pub fn on_context_lost(&mut self, now_ms: u64) {
        if self.is_recovering {
            return;
        }
        warn!("gpu context lost; entering staged recovery");
        self.is_recovering = true;
        self.attempts = 0;
        self.soft_restart_sent = false;
        self.reload_deadline = None;
        self.next_retry_at = Some(now_ms + self.backoff_for(0));
    }

    /// Host reported a restored (or manually reacquired) context.
    pub fn on_context_restored(&mut self, context_id: u64, bus: &EventBus) {
        if !self.is_recovering {
            return;
        }
        info!(context_id, "gpu context restored; requesting resource rebuild");
        self.is_recovering = false;
        self.attempts = 0;
        self.next_retry_at = None;
        self.reload_deadline = None;
        self.soft_restart_sent = false;
        bus.publish(GovernanceEvent::WebglRebuild { context_id });
    }

    /// Periodic escalation check.
    pub fn tick(&mut self, now_ms: u64, bus: &EventBus, host: &Arc<dyn HostActions>) {
        if !self.is_recovering {
            return;
        }

        if let Some(deadline) = self.reload_deadline {
            if now_ms >= deadline {
                warn!("gpu context still lost after soft restart; full reload");
                self.reload_deadline = None;
                host.request_reload();
            }
            return;
        }

        let retry_at = match self.next_retry_at {
            Some(t) => t,
            None => return,
        };
        if now_ms < retry_at {
            return;
        }

        // The retry deadline elapsed without a restore: failed attempt.
        self.attempts += 1;
        if self.attempts >= self.config.max_attempts {
            if !self.soft_restart_sent {
                warn!(
                    attempts = self.attempts,
                    "gpu recovery attempts exhausted; requesting soft restart"
                );
                self.soft_restart_sent = true;
                self.next_retry_at = None;
                self.reload_deadline = Some(now_ms + self.config.reload_grace_ms);
                bus.publish(GovernanceEvent::SoftRestart);
            }
        } else {
            self.next_retry_at = Some(now_ms + self.backoff_for(self.attempts));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn recovery() -> ContextRecovery {
        ContextRecovery::new(ContextRecoveryConfig::default())
    }

    fn host() -> (Arc<FakeHost>, Arc<dyn HostActions>) {
        let fake = Arc::new(FakeHost::new());
        let dyn_host: Arc<dyn HostActions> = Arc::clone(&fake) as Arc<dyn HostActions>;
        (fake, dyn_host)
    }

    #[test]
    fn test_restore_after_first_backoff_rebuilds_once() {
        let mut rec = recovery();
        let bus = EventBus::default();

        rec.on_context_lost(0);
        assert!(rec.is_recovering());

        // Manual reacquisition after the first backoff delay.
        rec.on_context_restored(7, &bus);
        assert!(!rec.is_recovering());
        assert_eq!(rec.attempts(), 0);
        assert_eq!(bus.topic_count("webgl:rebuild"), 1);

        // Duplicate restore notifications are a no-op.
        rec.on_context_restored(7, &bus);
        assert_eq!(bus.topic_count("webgl:rebuild"), 1);
    }

    #[test]
    fn test_staged_backoff_attempt_counting() {
        let mut rec = recovery();
        let bus = EventBus::default();
        let (_, dyn_host) = host();

        rec.on_context_lost(0);
        rec.tick(500, &bus, &dyn_host);
        assert_eq!(rec.attempts(), 0, "retry not yet due");

        rec.tick(1_000, &bus, &dyn_host);
        assert_eq!(rec.attempts(), 1);

        // Second stage: 2s after the first failure.
        rec.tick(3_000, &bus, &dyn_host);
        assert_eq!(rec.attempts(), 2);
        assert_eq!(bus.topic_count("app:soft-restart"), 0);

        // Third failed attempt exhausts the budget.
        rec.tick(8_000, &bus, &dyn_host);
        assert_eq!(rec.attempts(), 3);
        assert_eq!(bus.topic_count("app:soft-restart"), 1);
    }

    #[test]
    fn test_terminal_reload_after_grace() {
        let mut rec = recovery();
        let bus = EventBus::default();
        let (fake, dyn_host) = host();

        rec.on_context_lost(0);
        for t in [1_000, 3_000, 8_000] {
            rec.tick(t, &bus, &dyn_host);
        }
        assert_eq!(bus.topic_count("app:soft-restart"), 1);
        assert_eq!(fake.reload_count(), 0);

        // Still lost past the grace period: terminal reload.
        rec.tick(12_000, &bus, &dyn_host);
        assert_eq!(fake.reload_count(), 1);
    }

    #[test]
    fn test_restore_during_grace_cancels_reload() {
        let mut rec = recovery();
        let bus = EventBus::default();
        let (fake, dyn_host) = host();

        rec.on_context_lost(0);
        for t in [1_000, 3_000, 8_000] {
            rec.tick(t, &bus, &dyn_host);
        }
        rec.on_context_restored(1, &bus);
        rec.tick(20_000, &bus, &dyn_host);
        assert_eq!(fake.reload_count(), 0, "restore cancels the pending reload");
        assert_eq!(bus.topic_count("webgl:rebuild"), 1);
    }
}
