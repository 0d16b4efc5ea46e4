//! Runtime diagnostics for production debugging
//!
//! Provides a SIGQUIT (kill -3) handler that dumps runtime statistics to
//! stderr, similar to JVM thread dumps: strand lifecycle counters, channel
//! message totals, and the active strand registry. The process keeps
//! running after the dump.
//!
//! ## Signal Safety
//!
//! Signal handlers can only safely call async-signal-safe functions, and
//! `dump_diagnostics` does I/O. A dedicated thread therefore waits for
//! signals with signal-hook's iterator API and performs the dump from
//! ordinary thread context.

use crate::channel::{TOTAL_MESSAGES_RECEIVED, TOTAL_MESSAGES_SENT};
use crate::scheduler::{
    ACTIVE_STRANDS, PEAK_STRANDS, TOTAL_COMPLETED, TOTAL_SPAWNED, scheduler_elapsed,
    strand_registry,
};
use std::sync::Once;
use std::sync::atomic::Ordering;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Cap on individual strands listed in the dump, to keep the output
/// readable for programs with many strands.
const STRAND_DISPLAY_LIMIT: usize = 20;

/// Install the SIGQUIT signal handler for diagnostics.
///
/// Called automatically by `scheduler::init`; safe to call again
/// (idempotent). No-op on non-Unix platforms, where `dump_diagnostics` can
/// still be called directly.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(unix)]
        {
            use signal_hook::consts::SIGQUIT;
            use signal_hook::iterator::Signals;

            let mut signals = match Signals::new([SIGQUIT]) {
                Ok(s) => s,
                Err(_) => return, // Silently fail if we can't register
            };

            std::thread::Builder::new()
                .name("weft-diagnostics".to_string())
                .spawn(move || {
                    for sig in signals.forever() {
                        if sig == SIGQUIT {
                            dump_diagnostics();
                        }
                    }
                })
                .ok(); // Silently fail if thread spawn fails
        }
    });
}

/// Dump runtime diagnostics to stderr.
///
/// Callable directly from code or triggered via SIGQUIT. Output goes to
/// stderr to stay out of program output.
pub fn dump_diagnostics() {
    use std::io::Write;

    let mut out = std::io::stderr().lock();

    let _ = writeln!(out, "\n=== Weft Runtime Diagnostics ===");
    if let Some(elapsed) = scheduler_elapsed() {
        let _ = writeln!(out, "Uptime: {:.1}s", elapsed.as_secs_f64());
    }

    let active = ACTIVE_STRANDS.load(Ordering::Relaxed);
    let total_spawned = TOTAL_SPAWNED.load(Ordering::Relaxed);
    let total_completed = TOTAL_COMPLETED.load(Ordering::Relaxed);
    let peak = PEAK_STRANDS.load(Ordering::Relaxed);

    let _ = writeln!(out, "\n[Strands]");
    let _ = writeln!(out, "  Active:    {}", active);
    let _ = writeln!(out, "  Spawned:   {} (total)", total_spawned);
    let _ = writeln!(out, "  Completed: {} (total)", total_completed);
    let _ = writeln!(out, "  Peak:      {} (high-water mark)", peak);

    // Strands the counters lost track of (abort, never-exited thread).
    let expected_completed = total_spawned.saturating_sub(active as u64);
    if total_completed < expected_completed {
        let _ = writeln!(
            out,
            "  WARNING: {} strands may have been lost",
            expected_completed - total_completed
        );
    }

    let _ = writeln!(out, "\n[Channels]");
    let _ = writeln!(
        out,
        "  Sent:     {} (total messages)",
        TOTAL_MESSAGES_SENT.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "  Received: {} (total messages)",
        TOTAL_MESSAGES_RECEIVED.load(Ordering::Relaxed)
    );

    let registry = strand_registry();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let entries: Vec<(u64, u64)> = registry.active_entries().collect();
    let _ = writeln!(
        out,
        "\n[Registry] {} tracked / {} slots",
        entries.len(),
        registry.capacity()
    );
    for (strand_id, spawn_time) in entries.iter().take(STRAND_DISPLAY_LIMIT) {
        let age = now.saturating_sub(*spawn_time);
        let _ = writeln!(out, "  strand {:>6}  running {}s", strand_id, age);
    }
    if entries.len() > STRAND_DISPLAY_LIMIT {
        let _ = writeln!(
            out,
            "  ... and {} more",
            entries.len() - STRAND_DISPLAY_LIMIT
        );
    }
    let overflow = registry.overflow_count.load(Ordering::Relaxed);
    if overflow > 0 {
        let _ = writeln!(out, "  {} strands ran untracked (registry full)", overflow);
    }

    let _ = writeln!(out, "=== End Diagnostics ===\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_diagnostics_does_not_panic() {
        dump_diagnostics();
    }

    #[test]
    fn test_install_signal_handler_idempotent() {
        install_signal_handler();
        install_signal_handler();
    }
}
