//! Runtime configuration, deserialised from `margin.toml` and `MARGIN__*`
//! environment variables.
//!
//! Every section has defaults matching the browser extension, so an empty
//! file (or no file at all) yields a working configuration.

use std::{path::PathBuf, time::Duration};

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, de};

/// 5 MiB, the size of the browser's local storage area.
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Upper bound on `retention.ttl_days`, so expiry timestamps stay in range.
pub const MAX_TTL_DAYS: i64 = 36_500;

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarginConfig {
  /// SQLite file backing the key-value store; `~` is expanded by the CLI.
  pub store_path:   PathBuf,
  /// Upper bound on persisted bytes; `None` or `0` disables the quota.
  pub quota_bytes:  Option<u64>,
  pub retention:    RetentionConfig,
  pub canonicalize: CanonicalizeConfig,
  pub anchor:       AnchorConfig,
  pub schedule:     ScheduleConfig,
}

impl Default for MarginConfig {
  fn default() -> Self {
    Self {
      store_path:   PathBuf::from("~/.local/share/margin/margin.db"),
      quota_bytes:  Some(DEFAULT_QUOTA_BYTES),
      retention:    RetentionConfig::default(),
      canonicalize: CanonicalizeConfig::default(),
      anchor:       AnchorConfig::default(),
      schedule:     ScheduleConfig::default(),
    }
  }
}

// ─── Retention ───────────────────────────────────────────────────────────────

/// Expiry and forced-eviction limits for the annotation store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
  /// Between 1 and [`MAX_TTL_DAYS`]; other values are rejected on load.
  #[serde(deserialize_with = "ttl_days")]
  pub ttl_days:       i64,
  /// Bookmarks kept by forced eviction, most recent first.
  pub max_bookmarks:  usize,
  /// Notes and comments longer than this are truncated by forced eviction.
  pub max_note_chars: usize,
}

impl Default for RetentionConfig {
  fn default() -> Self {
    Self {
      ttl_days:       DEFAULT_TTL_DAYS,
      max_bookmarks:  50,
      max_note_chars: 200,
    }
  }
}

impl RetentionConfig {
  /// Record lifetime. Out-of-range values set in code are clamped.
  pub fn ttl(&self) -> TimeDelta {
    TimeDelta::try_days(self.ttl_days.clamp(1, MAX_TTL_DAYS))
      .unwrap_or_else(|| TimeDelta::days(DEFAULT_TTL_DAYS))
  }
}

fn ttl_days<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
  let days = i64::deserialize(deserializer)?;
  match TimeDelta::try_days(days) {
    Some(_) if (1..=MAX_TTL_DAYS).contains(&days) => Ok(days),
    _ => Err(de::Error::custom(format!(
      "ttl_days must be between 1 and {MAX_TTL_DAYS}, got {days}"
    ))),
  }
}

// ─── Canonicalization ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CanonicalizeConfig {
  /// Leading characters compared to detect duplicate fragments.
  pub prefix_chars:      usize,
  /// How much longer a containing fragment must be to count as richer.
  pub containment_ratio: f64,
}

impl Default for CanonicalizeConfig {
  fn default() -> Self {
    Self {
      prefix_chars:      50,
      containment_ratio: 1.5,
    }
  }
}

// ─── Anchoring ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
  /// Selector list for the page regions holding assistant responses.
  pub region_selector: String,
  /// Text nodes must be longer than this (trimmed, in characters).
  pub min_node_chars:  usize,
  pub window_cap:      usize,
  pub window_fraction: f64,
  pub min_window:      usize,
}

impl Default for AnchorConfig {
  fn default() -> Self {
    Self {
      region_selector: r#"[class*="response"], [class*="model"], message-content"#
        .to_owned(),
      min_node_chars:  10,
      window_cap:      20,
      window_fraction: 0.5,
      min_window:      10,
    }
  }
}

// ─── Scheduling ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  /// Offsets from initial load at which full restoration passes run.
  pub delays_ms:    Vec<u64>,
  pub max_attempts: usize,
  /// Quiet period before a burst of content mutations triggers a pass.
  pub debounce_ms:  u64,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      delays_ms:    vec![1_000, 3_000, 6_000, 10_000],
      max_attempts: 4,
      debounce_ms:  500,
    }
  }
}

impl ScheduleConfig {
  pub fn delays(&self) -> Vec<Duration> {
    self.delays_ms.iter().copied().map(Duration::from_millis).collect()
  }

  pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }
}
