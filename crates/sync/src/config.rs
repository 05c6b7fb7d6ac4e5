use std::str::FromStr;
use std::time::Duration;

/// Shortest lock expiry accepted from the environment.
pub const MIN_LOCK_TTL: Duration = Duration::from_secs(3);

/// Tuning for lock handling, webhook delivery and the background scheduler.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Expiry set on the process-type lock at acquisition and on every renewal.
    pub lock_ttl: Duration,
    /// How often a running batch renews its lock. `from_env` keeps it at or
    /// below a third of `lock_ttl`.
    pub lock_renew_interval: Duration,
    /// Timeout for a single webhook POST.
    pub webhook_timeout: Duration,
    /// Sleep before each retry; one initial attempt plus one per entry.
    pub retry_delays: Vec<Duration>,
    /// Maximum number of dealers contacted at once within a run.
    pub max_concurrent_dispatches: usize,
    /// Reject acknowledgments whose token differs from the computed one.
    pub verify_ack_token: bool,
    /// Period of the scheduler loop.
    pub scheduler_interval: Duration,
    /// A RUNNING attempt not updated for this long is considered abandoned.
    pub stale_run_after: Duration,
    /// Maximum PENDING attempts the scheduler inspects per tick.
    pub pending_batch_limit: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            lock_renew_interval: Duration::from_secs(60),
            webhook_timeout: Duration::from_secs(10),
            retry_delays: default_retry_delays(),
            max_concurrent_dispatches: 8,
            verify_ack_token: true,
            scheduler_interval: Duration::from_secs(30),
            stale_run_after: Duration::from_secs(15 * 60),
            pending_batch_limit: 50,
        }
    }
}

fn default_retry_delays() -> Vec<Duration> {
    [1, 2, 4].into_iter().map(Duration::from_secs).collect()
}

impl SyncConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Invalid values are logged and replaced by the default. Lock timings
    /// are then clamped by [`lock_timings`].
    ///
    /// | Env Var                          | Default  |
    /// |----------------------------------|----------|
    /// | `SYNC_LOCK_TTL_SECS`             | `300`    |
    /// | `SYNC_LOCK_RENEW_INTERVAL_SECS`  | `60`     |
    /// | `SYNC_WEBHOOK_TIMEOUT_SECS`      | `10`     |
    /// | `SYNC_RETRY_DELAYS_SECS`         | `1,2,4`  |
    /// | `SYNC_MAX_CONCURRENT_DISPATCHES` | `8`      |
    /// | `SYNC_VERIFY_ACK_TOKEN`          | `true`   |
    /// | `SYNC_SCHEDULER_INTERVAL_SECS`   | `30`     |
    /// | `SYNC_STALE_RUN_AFTER_SECS`      | `900`    |
    /// | `SYNC_PENDING_BATCH_LIMIT`       | `50`     |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let retry_delays = match std::env::var("SYNC_RETRY_DELAYS_SECS") {
            Ok(raw) => parse_delays(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Invalid SYNC_RETRY_DELAYS_SECS, using default");
                defaults.retry_delays.clone()
            }),
            Err(_) => defaults.retry_delays.clone(),
        };

        let (lock_ttl, lock_renew_interval) = lock_timings(
            env_secs("SYNC_LOCK_TTL_SECS", defaults.lock_ttl),
            env_secs("SYNC_LOCK_RENEW_INTERVAL_SECS", defaults.lock_renew_interval),
        );

        Self {
            lock_ttl,
            lock_renew_interval,
            webhook_timeout: env_secs("SYNC_WEBHOOK_TIMEOUT_SECS", defaults.webhook_timeout),
            retry_delays,
            max_concurrent_dispatches: env_or(
                "SYNC_MAX_CONCURRENT_DISPATCHES",
                defaults.max_concurrent_dispatches,
            )
            .max(1),
            verify_ack_token: env_or("SYNC_VERIFY_ACK_TOKEN", defaults.verify_ack_token),
            scheduler_interval: env_secs(
                "SYNC_SCHEDULER_INTERVAL_SECS",
                defaults.scheduler_interval,
            )
            .max(Duration::from_secs(1)),
            stale_run_after: env_secs("SYNC_STALE_RUN_AFTER_SECS", defaults.stale_run_after),
            pending_batch_limit: env_or("SYNC_PENDING_BATCH_LIMIT", defaults.pending_batch_limit),
        }
    }
}

/// Clamp the lock expiry to at least [`MIN_LOCK_TTL`] and the renewal
/// period to between one second and a third of the expiry, so a live run
/// renews at least twice before its lock could lapse.
pub fn lock_timings(ttl: Duration, renew_interval: Duration) -> (Duration, Duration) {
    let ttl = if ttl < MIN_LOCK_TTL {
        tracing::warn!(?ttl, min = ?MIN_LOCK_TTL, "Lock TTL too short, raising it");
        MIN_LOCK_TTL
    } else {
        ttl
    };
    let ceiling = ttl / 3;
    let renew = if renew_interval > ceiling {
        tracing::warn!(
            ?renew_interval,
            ?ttl,
            "Lock renew interval not well below the TTL, lowering it"
        );
        ceiling
    } else {
        renew_interval
    };
    (ttl, renew.max(Duration::from_secs(1)))
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

/// Parse a comma-separated list of whole seconds, e.g. `"1,2,4"`.
///
/// An empty string means "no retries". Returns `None` if any entry is not a
/// non-negative integer.
pub fn parse_delays(raw: &str) -> Option<Vec<Duration>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }
    raw.split(',')
        .map(|part| part.trim().parse::<u64>().ok().map(Duration::from_secs))
        .collect()
}
