//! Provider selection with per-provider cooldowns.
//!
//! The manager counts failures per provider. A provider that fails with a
//! non-retryable error, or that reaches `max_attempts` failures, is put into
//! cooldown and skipped by selection until the cooldown expires. When every
//! provider for a mode is cooling down at once, the one that failed longest
//! ago is released early so callers always get something to try.
//!
//! State is shared by every request that goes through the same manager
//! instance, which gives circuit-breaker semantics across requests. Build one
//! manager per session for isolated accounting.

use crate::clock::{Clock, SystemClock};
use crate::error::{AiError, RelayError};
use crate::registry::ProviderRegistry;
use crate::types::{Mode, ProviderDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// How long a failing provider is excluded from selection.
    pub cooldown: Duration,
    /// Failures (retryable or not) after which a provider enters cooldown.
    pub max_attempts: u32,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Default)]
struct CooldownState {
    attempts: HashMap<String, u32>,
    cooldown_since: HashMap<String, Instant>,
}

/// Cooldown bookkeeping for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderHealth {
    pub attempts: u32,
    pub cooldown_remaining: Option<Duration>,
}

pub struct FallbackManager {
    registry: Arc<ProviderRegistry>,
    policy: FallbackPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<CooldownState>,
}

impl FallbackManager {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            policy: FallbackPolicy::default(),
            clock: Arc::new(SystemClock),
            state: Mutex::new(CooldownState::default()),
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, CooldownState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pick the provider to try next for `mode`.
    ///
    /// Without `last_error` this is the highest-priority eligible provider.
    /// With one, the failure is recorded first and the failing provider is
    /// avoided when any other eligible provider serves the mode.
    pub fn get_next_provider(
        &self,
        mode: Mode,
        last_error: Option<&AiError>,
    ) -> Result<ProviderDescriptor, RelayError> {
        let candidates = self.registry.list_for_mode(mode);
        if candidates.is_empty() {
            return Err(RelayError::NoProviders(mode));
        }

        let now = self.clock.now();
        let mut state = self.lock();
        if let Some(err) = last_error {
            self.record_failure_locked(&mut state, err, now);
        }
        let avoid = last_error.map(|e| e.provider.as_str());
        Ok(self.select_locked(&mut state, &candidates, avoid, now, mode))
    }

    /// Pick a provider without recording anything, skipping `avoid` when possible.
    pub fn select_provider(
        &self,
        mode: Mode,
        avoid: Option<&str>,
    ) -> Result<ProviderDescriptor, RelayError> {
        let candidates = self.registry.list_for_mode(mode);
        if candidates.is_empty() {
            return Err(RelayError::NoProviders(mode));
        }
        let now = self.clock.now();
        let mut state = self.lock();
        Ok(self.select_locked(&mut state, &candidates, avoid, now, mode))
    }

    /// Count a failure against `err.provider`. Cancellations are ignored.
    pub fn record_failure(&self, err: &AiError) {
        let now = self.clock.now();
        let mut state = self.lock();
        self.record_failure_locked(&mut state, err, now);
    }

    pub fn record_success(&self, provider: &str) {
        let mut state = self.lock();
        if state.attempts.remove(provider).is_some() {
            debug!(provider = %provider, "attempt counter cleared after success");
        }
    }

    pub fn is_cooling_down(&self, provider: &str) -> bool {
        self.health(provider).cooldown_remaining.is_some()
    }

    pub fn health(&self, provider: &str) -> ProviderHealth {
        let now = self.clock.now();
        let state = self.lock();
        let cooldown_remaining = state.cooldown_since.get(provider).and_then(|since| {
            let elapsed = now.saturating_duration_since(*since);
            self.policy.cooldown.checked_sub(elapsed).filter(|d| !d.is_zero())
        });
        ProviderHealth {
            attempts: state.attempts.get(provider).copied().unwrap_or(0),
            cooldown_remaining,
        }
    }

    /// Forget every failure and cooldown.
    pub fn reset_all_providers(&self) {
        let mut state = self.lock();
        state.attempts.clear();
        state.cooldown_since.clear();
        info!("all provider cooldowns reset");
    }

    fn record_failure_locked(&self, state: &mut CooldownState, err: &AiError, now: Instant) {
        if err.is_cancelled() {
            return;
        }
        let count = state.attempts.entry(err.provider.clone()).or_insert(0);
        *count += 1;
        let count = *count;

        if !err.retryable || count >= self.policy.max_attempts {
            state.attempts.remove(&err.provider);
            state.cooldown_since.insert(err.provider.clone(), now);
            warn!(
                provider = %err.provider,
                kind = %err.kind,
                attempts = count,
                cooldown_secs = self.policy.cooldown.as_secs(),
                "provider put into cooldown"
            );
        } else {
            debug!(provider = %err.provider, kind = %err.kind, attempts = count, "provider failure recorded");
        }
    }

    fn select_locked(
        &self,
        state: &mut CooldownState,
        candidates: &[ProviderDescriptor],
        avoid: Option<&str>,
        now: Instant,
        mode: Mode,
    ) -> ProviderDescriptor {
        let cooldown = self.policy.cooldown;
        state
            .cooldown_since
            .retain(|_, since| now.saturating_duration_since(*since) < cooldown);

        let eligible: Vec<&ProviderDescriptor> = candidates
            .iter()
            .filter(|p| !state.cooldown_since.contains_key(&p.name))
            .collect();

        if eligible.is_empty() {
            // Every candidate is cooling, so every candidate has an entry.
            // The provider that just failed is only released when it is the
            // sole candidate for the mode.
            let skip_avoided = candidates.iter().any(|p| Some(p.name.as_str()) != avoid);
            let oldest = candidates
                .iter()
                .filter(|p| !skip_avoided || Some(p.name.as_str()) != avoid)
                .filter_map(|p| state.cooldown_since.get(&p.name).map(|t| (p, *t)))
                .min_by_key(|(_, t)| *t)
                .map(|(p, _)| p)
                .unwrap_or(&candidates[0]);
            state.cooldown_since.remove(&oldest.name);
            warn!(
                provider = %oldest.name,
                mode = %mode,
                "all providers cooling down; releasing the oldest failure"
            );
            return oldest.clone();
        }

        let chosen = eligible
            .iter()
            .find(|p| Some(p.name.as_str()) != avoid)
            .or_else(|| eligible.first())
            .copied()
            .unwrap_or(&candidates[0]);
        debug!(provider = %chosen.name, mode = %mode, "selected provider");
        chosen.clone()
    }
}
