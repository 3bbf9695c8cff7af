//! Per-(user, command) sliding-window rate limiting.
//!
//! Each window is a list of call timestamps stored in SQLite. A check prunes
//! calls older than the window, compares what is left against the caller's
//! tier ceiling and, if admitted, appends `now`. The whole read-prune-append
//! runs inside one write transaction so two concurrent draws cannot both
//! slip under the ceiling.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use guidon_store::{DbHandle, StoreError};

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tier {
    pub max_calls: u32,
    pub window_secs: u64,
}

impl Tier {
    pub const fn new(max_calls: u32, window_secs: u64) -> Self {
        Self {
            max_calls,
            window_secs,
        }
    }

    fn window_ms(&self) -> i64 {
        (self.window_secs as i64).saturating_mul(1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TierPair {
    standard: Tier,
    premium: Tier,
}

/// Ceilings per command, with a fallback for anything unlisted.
#[derive(Debug, Clone)]
pub struct TierTable {
    fallback: TierPair,
    commands: HashMap<String, TierPair>,
}

impl TierTable {
    pub fn new(standard: Tier, premium: Tier) -> Self {
        Self {
            fallback: TierPair { standard, premium },
            commands: HashMap::new(),
        }
    }

    pub fn with_command(mut self, command: &str, standard: Tier, premium: Tier) -> Self {
        self.commands
            .insert(command.to_string(), TierPair { standard, premium });
        self
    }

    pub fn tier_for(&self, command: &str, premium: bool) -> Tier {
        let pair = self.commands.get(command).unwrap_or(&self.fallback);
        if premium {
            pair.premium
        } else {
            pair.standard
        }
    }

    /// Commands with a dedicated tier, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TierTable {
    fn default() -> Self {
        TierTable::new(Tier::new(30, 60), Tier::new(60, 60))
            .with_command("draw", Tier::new(10, 60), Tier::new(30, 60))
            .with_command("snapshot", Tier::new(5, 300), Tier::new(15, 300))
    }
}

// ---------------------------------------------------------------------------
// Window arithmetic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Whole seconds until the oldest counted call leaves the window.
    /// At least 1 on a denial, 0 for an empty window.
    pub reset_in: u64,
    pub max: u32,
    pub window: u64,
}

fn prune(calls: &mut Vec<i64>, tier: Tier, now_ms: i64) {
    let cutoff = now_ms - tier.window_ms();
    calls.retain(|&t| t > cutoff);
}

fn seconds_until_reset(calls: &[i64], tier: Tier, now_ms: i64) -> u64 {
    match calls.first() {
        Some(&oldest) => ((oldest + tier.window_ms() - now_ms).max(0) / 1000) as u64,
        None => 0,
    }
}

/// Admit or deny one call against `calls`, appending `now_ms` on admission.
pub fn admit(calls: &mut Vec<i64>, tier: Tier, now_ms: i64) -> RateDecision {
    prune(calls, tier, now_ms);

    if calls.len() as u64 >= tier.max_calls as u64 {
        return RateDecision {
            allowed: false,
            remaining: 0,
            reset_in: seconds_until_reset(calls, tier, now_ms).max(1),
            max: tier.max_calls,
            window: tier.window_secs,
        };
    }

    calls.push(now_ms);
    RateDecision {
        allowed: true,
        remaining: tier.max_calls.saturating_sub(calls.len() as u32),
        reset_in: seconds_until_reset(calls, tier, now_ms),
        max: tier.max_calls,
        window: tier.window_secs,
    }
}

/// What [`admit`] would decide, without recording anything.
pub fn inspect(calls: &[i64], tier: Tier, now_ms: i64) -> RateDecision {
    let mut live = calls.to_vec();
    prune(&mut live, tier, now_ms);

    let used = live.len() as u32;
    let allowed = used < tier.max_calls;
    let reset_in = seconds_until_reset(&live, tier, now_ms);
    RateDecision {
        allowed,
        remaining: tier.max_calls.saturating_sub(used),
        reset_in: if allowed { reset_in } else { reset_in.max(1) },
        max: tier.max_calls,
        window: tier.window_secs,
    }
}

// ---------------------------------------------------------------------------
// Limiter service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CommandLimit {
    pub command: String,
    #[serde(flatten)]
    pub decision: RateDecision,
}

#[derive(Clone)]
pub struct RateLimiter {
    db: DbHandle,
    tiers: Arc<TierTable>,
}

impl RateLimiter {
    pub fn new(db: DbHandle, tiers: TierTable) -> Self {
        Self {
            db,
            tiers: Arc::new(tiers),
        }
    }

    pub fn tier_for(&self, command: &str, premium: bool) -> Tier {
        self.tiers.tier_for(command, premium)
    }

    pub async fn check_and_record(
        &self,
        user_id: &str,
        command: &str,
        premium: bool,
    ) -> Result<RateDecision, StoreError> {
        self.check_and_record_at(user_id, command, premium, Utc::now())
            .await
    }

    pub async fn check_and_record_at(
        &self,
        user_id: &str,
        command: &str,
        premium: bool,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        let tier = self.tier_for(command, premium);
        let (user, cmd) = (user_id.to_string(), command.to_string());
        let now_ms = now.timestamp_millis();

        let decision = self
            .db
            .call(move |db| db.with_rate_window(&user, &cmd, now, |calls| admit(calls, tier, now_ms)))
            .await?;

        debug!(
            user_id,
            command,
            premium,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Rate limit checked"
        );
        Ok(decision)
    }

    pub async fn get_info(
        &self,
        user_id: &str,
        command: &str,
        premium: bool,
    ) -> Result<RateDecision, StoreError> {
        self.get_info_at(user_id, command, premium, Utc::now()).await
    }

    pub async fn get_info_at(
        &self,
        user_id: &str,
        command: &str,
        premium: bool,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        let tier = self.tier_for(command, premium);
        let (user, cmd) = (user_id.to_string(), command.to_string());
        let calls = self
            .db
            .call(move |db| db.get_rate_window(&user, &cmd))
            .await?;
        Ok(inspect(&calls, tier, now.timestamp_millis()))
    }

    /// Current standing for every tiered command plus anything else the
    /// user has a window for.
    pub async fn limits_info(
        &self,
        user_id: &str,
        premium: bool,
    ) -> Result<Vec<CommandLimit>, StoreError> {
        let user = user_id.to_string();
        let stored = self.db.call(move |db| db.list_rate_windows(&user)).await?;
        let now_ms = Utc::now().timestamp_millis();

        let mut commands: Vec<String> = self.tiers.commands().into_iter().map(String::from).collect();
        for (command, _) in &stored {
            if !commands.contains(command) {
                commands.push(command.clone());
            }
        }

        Ok(commands
            .into_iter()
            .map(|command| {
                let calls = stored
                    .iter()
                    .find(|(c, _)| *c == command)
                    .map(|(_, calls)| calls.as_slice())
                    .unwrap_or(&[]);
                let decision = inspect(calls, self.tier_for(&command, premium), now_ms);
                CommandLimit { command, decision }
            })
            .collect())
    }

    /// Administrative override: forget one command's window or all of them.
    pub async fn reset(&self, user_id: &str, command: Option<&str>) -> Result<usize, StoreError> {
        let user = user_id.to_string();
        let cmd = command.map(String::from);
        self.db
            .call(move |db| db.delete_rate_windows(&user, cmd.as_deref()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn limiter() -> RateLimiter {
        RateLimiter::new(DbHandle::open_in_memory().unwrap(), TierTable::default())
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_admit_and_deny() {
        let tier = Tier::new(3, 60);
        let mut calls = Vec::new();
        let now = 1_000_000;

        for expected_remaining in [2, 1, 0] {
            let d = admit(&mut calls, tier, now);
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }

        let denied = admit(&mut calls, tier, now + 15_000);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_in, 45);
        assert_eq!(calls.len(), 3, "denied calls are not recorded");
    }

    #[test]
    fn test_denied_reset_is_at_least_one_second() {
        let tier = Tier::new(1, 60);
        let mut calls = vec![0];
        let d = admit(&mut calls, tier, 59_500);
        assert!(!d.allowed);
        assert_eq!(d.reset_in, 1);
    }

    #[test]
    fn test_window_edge_expires_exactly_at_window() {
        let tier = Tier::new(1, 60);
        let mut calls = vec![0];
        assert!(!inspect(&calls, tier, 59_999).allowed);
        assert!(admit(&mut calls, tier, 60_000).allowed);
        assert_eq!(calls, vec![60_000]);
    }

    #[test]
    fn test_inspect_does_not_record() {
        let tier = Tier::new(2, 60);
        let calls = vec![1_000];
        let info = inspect(&calls, tier, 2_000);
        assert!(info.allowed);
        assert_eq!(info.remaining, 1);
        assert_eq!(info.reset_in, 59);
        assert_eq!(inspect(&[], tier, 0).reset_in, 0);
    }

    #[test]
    fn test_tier_table() {
        let tiers = TierTable::default();
        assert_eq!(tiers.tier_for("draw", false), Tier::new(10, 60));
        assert_eq!(tiers.tier_for("draw", true), Tier::new(30, 60));
        assert_eq!(tiers.tier_for("snapshot", false), Tier::new(5, 300));
        assert_eq!(tiers.tier_for("snapshot", true), Tier::new(15, 300));
        assert_eq!(tiers.tier_for("whatever", false), Tier::new(30, 60));
        assert_eq!(tiers.tier_for("whatever", true), Tier::new(60, 60));
        assert_eq!(tiers.commands(), vec!["draw", "snapshot"]);
    }

    #[tokio::test]
    async fn test_max_calls_then_denied_then_recovers() {
        let limiter = limiter();
        let start = t0();

        for i in 0..10 {
            let d = limiter
                .check_and_record_at("u1", "draw", false, start)
                .await
                .unwrap();
            assert!(d.allowed, "call {i} should be admitted");
            assert_eq!(d.remaining, 9 - i);
        }

        let denied = limiter
            .check_and_record_at("u1", "draw", false, start)
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_in, 60);

        let later = start + Duration::seconds(denied.reset_in as i64);
        let again = limiter
            .check_and_record_at("u1", "draw", false, later)
            .await
            .unwrap();
        assert!(again.allowed);
    }

    #[tokio::test]
    async fn test_premium_gets_more_admissions() {
        let limiter = limiter();
        let now = t0();

        let mut standard = 0;
        let mut premium = 0;
        for _ in 0..40 {
            if limiter.check_and_record_at("std", "draw", false, now).await.unwrap().allowed {
                standard += 1;
            }
            if limiter.check_and_record_at("vip", "draw", true, now).await.unwrap().allowed {
                premium += 1;
            }
        }
        assert_eq!(standard, 10);
        assert_eq!(premium, 30);
    }

    #[tokio::test]
    async fn test_get_info_and_reset() {
        let limiter = limiter();
        let now = t0();

        for _ in 0..5 {
            limiter.check_and_record_at("u", "snapshot", false, now).await.unwrap();
        }
        let info = limiter.get_info_at("u", "snapshot", false, now).await.unwrap();
        assert!(!info.allowed);
        assert_eq!(info.reset_in, 300);

        // Peeking twice changes nothing.
        let again = limiter.get_info_at("u", "snapshot", false, now).await.unwrap();
        assert_eq!(info, again);

        limiter.check_and_record_at("u", "draw", false, now).await.unwrap();
        assert_eq!(limiter.reset("u", Some("snapshot")).await.unwrap(), 1);
        assert!(limiter.get_info_at("u", "snapshot", false, now).await.unwrap().allowed);
        assert_eq!(limiter.reset("u", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_limits_info_lists_tiered_and_used_commands() {
        let limiter = limiter();
        limiter.check_and_record("u", "stats", false).await.unwrap();

        let info = limiter.limits_info("u", false).await.unwrap();
        let names: Vec<&str> = info.iter().map(|l| l.command.as_str()).collect();
        assert_eq!(names, vec!["draw", "snapshot", "stats"]);
        let stats = info.iter().find(|l| l.command == "stats").unwrap();
        assert_eq!(stats.decision.remaining, 29);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_over_admit() {
        let limiter = limiter();
        let now = t0();

        let mut tasks = Vec::new();
        for _ in 0..25 {
            let l = limiter.clone();
            tasks.push(tokio::spawn(async move {
                l.check_and_record_at("racer", "draw", false, now).await.unwrap().allowed
            }));
        }
        let mut admitted = 0;
        for t in tasks {
            if t.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
