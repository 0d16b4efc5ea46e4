//! Watchdog timer for detecting stuck strands
//!
//! Periodically scans the strand registry and flags strands that have been
//! running longer than a threshold, which catches infinite loops and wedged
//! rendezvous. Piggybacks on the registry the diagnostics feature already
//! maintains; no extra tracking on the hot path.
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WEFT_WATCHDOG_SECS` | `0` (disabled) | Threshold in seconds for a "stuck" strand |
//! | `WEFT_WATCHDOG_INTERVAL` | `5` | Check frequency in seconds |
//! | `WEFT_WATCHDOG_ACTION` | `warn` | Action: `warn` (dump diagnostics) or `exit` (terminate) |

use crate::diagnostics::dump_diagnostics;
use crate::scheduler::strand_registry;
use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static WATCHDOG_INIT: Once = Once::new();
// Last strand flagged, to avoid re-reporting the same one every scan
static LAST_FLAGGED_STRAND: AtomicU64 = AtomicU64::new(0);

/// Watchdog configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Threshold in seconds for considering a strand "stuck" (0 = disabled)
    pub threshold_secs: u64,
    /// How often to check (in seconds)
    pub interval_secs: u64,
    /// Action to take when a stuck strand is detected
    pub action: WatchdogAction,
}

/// Action to take when the watchdog detects a stuck strand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Log a warning and dump diagnostics (default)
    Warn,
    /// Dump diagnostics and exit the process
    Exit,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 0, // Disabled by default
            interval_secs: 5,
            action: WatchdogAction::Warn,
        }
    }
}

impl WatchdogConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::parse(
            std::env::var("WEFT_WATCHDOG_SECS").ok(),
            std::env::var("WEFT_WATCHDOG_INTERVAL").ok(),
            std::env::var("WEFT_WATCHDOG_ACTION").ok(),
        )
    }

    fn parse(threshold: Option<String>, interval: Option<String>, action: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            threshold_secs: threshold
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.threshold_secs),
            interval_secs: interval
                .and_then(|s| s.parse().ok())
                .filter(|&v| v > 0)
                .unwrap_or(defaults.interval_secs),
            action: match action.as_deref() {
                Some("exit") => WatchdogAction::Exit,
                _ => WatchdogAction::Warn,
            },
        }
    }
}

/// Install the watchdog thread if `WEFT_WATCHDOG_SECS` enables it.
///
/// Called automatically by `scheduler::init`; idempotent.
pub fn install_watchdog() {
    WATCHDOG_INIT.call_once(|| {
        let config = WatchdogConfig::from_env();
        if config.threshold_secs == 0 {
            return;
        }
        std::thread::Builder::new()
            .name("weft-watchdog".to_string())
            .spawn(move || {
                loop {
                    std::thread::sleep(Duration::from_secs(config.interval_secs));
                    check_strands(&config);
                }
            })
            .ok(); // Silently fail if thread spawn fails
    });
}

fn check_strands(config: &WatchdogConfig) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    for (strand_id, spawn_time) in strand_registry().active_entries() {
        let age = now.saturating_sub(spawn_time);
        if age < config.threshold_secs {
            continue;
        }
        if LAST_FLAGGED_STRAND.swap(strand_id, Ordering::Relaxed) == strand_id {
            continue;
        }
        eprintln!(
            "Watchdog: strand {} has been running {}s (threshold {}s)",
            strand_id, age, config.threshold_secs
        );
        dump_diagnostics();
        if config.action == WatchdogAction::Exit {
            std::process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disabled() {
        let config = WatchdogConfig::default();
        assert_eq!(config.threshold_secs, 0);
        assert_eq!(config.action, WatchdogAction::Warn);
    }

    #[test]
    fn test_parse_full_configuration() {
        let config = WatchdogConfig::parse(
            Some("30".into()),
            Some("10".into()),
            Some("exit".into()),
        );
        assert_eq!(config.threshold_secs, 30);
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.action, WatchdogAction::Exit);
    }

    #[test]
    fn test_parse_invalid_values_fall_back() {
        let config = WatchdogConfig::parse(
            Some("soon".into()),
            Some("0".into()),
            Some("shrug".into()),
        );
        assert_eq!(config, WatchdogConfig::default());
    }

    #[test]
    fn test_install_watchdog_idempotent() {
        // Disabled by default, so this must return without spawning.
        install_watchdog();
        install_watchdog();
    }
}
