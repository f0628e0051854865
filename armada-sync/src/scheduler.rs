//! Sync scheduling: when a published changeset should next be polled.
//!
//! Policy:
//! 1. No sync data (never synced, not prioritized) => unscheduled
//! 2. Priority request => `now + priority_delay`
//! 3. Change observed after the last sync => `last_change + min_delay`
//! 4. Otherwise linear backoff: `last_sync + clamp(last_sync - last_change)`
//!
//! Every result is clamped to `[now + 1s, now + max_delay]`, so the wait is
//! never zero or negative.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use armada_core::config::SyncConfig;
use armada_core::types::{ChangesetId, SyncData};

/// A changeset paired with its next sync time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledSync {
    pub changeset_id: ChangesetId,
    pub next_sync_at: DateTime<Utc>,
    pub priority: bool,
}

/// Next time `data` should be synced, or `None` when it is not eligible.
pub fn next_sync_at(
    data: &SyncData,
    config: &SyncConfig,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let min_wait = Duration::seconds(1);
    let min_delay = seconds(config.min_delay_secs);
    let max_delay = seconds(config.max_delay_secs).max(min_wait);
    let floor = now + min_wait;
    let ceiling = now + max_delay;

    if data.priority {
        let delay = seconds(config.priority_delay_secs).clamp(min_wait, max_delay);
        return Some(now + delay);
    }

    let last_sync = data.synced_at?;

    // Every sync rewrites event timestamps; events that land right next to
    // the sync are noise, so fall back to the host's update time.
    let last_change = match data.latest_event_at {
        Some(event) if event.max(last_sync) - event.min(last_sync) < min_delay => {
            data.external_updated_at
        }
        latest => later(data.external_updated_at, latest),
    };

    let next = match last_change {
        Some(change) if change > last_sync => change + min_delay,
        Some(change) => last_sync + (last_sync - change).max(min_delay).min(max_delay),
        None => last_sync + max_delay,
    };

    Some(next.clamp(floor, ceiling))
}

/// Scheduled syncs for every eligible changeset, soonest first.
pub fn schedule(data: &[SyncData], config: &SyncConfig, now: DateTime<Utc>) -> Vec<ScheduledSync> {
    let mut scheduled: Vec<ScheduledSync> = data
        .iter()
        .filter_map(|d| {
            next_sync_at(d, config, now).map(|next_sync_at| ScheduledSync {
                changeset_id: d.changeset_id,
                next_sync_at,
                priority: d.priority,
            })
        })
        .collect();
    scheduled.sort_by_key(|s| (s.next_sync_at, s.changeset_id));
    tracing::debug!(eligible = scheduled.len(), total = data.len(), "sync schedule computed");
    scheduled
}

/// Compact distance between two instants: `45s`, `3m`, `2h`, `4d`.
pub fn format_age(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let secs = to.signed_duration_since(from).num_seconds().unsigned_abs();
    format_seconds(secs)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

fn seconds(secs: u64) -> Duration {
    // A century is far beyond any sensible delay and keeps chrono arithmetic in range.
    const CAP: u64 = 100 * 365 * 24 * 60 * 60;
    Duration::seconds(secs.min(CAP) as i64)
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
