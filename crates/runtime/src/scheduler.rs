//! Scheduler - strand lifecycle management
//!
//! A strand is an independent concurrent execution unit: a detached OS
//! thread with an explicit stack size (thread-per-task). Blocking on a
//! channel therefore parks the strand's own thread; nothing else shares it.
//!
//! ## Lifecycle tracking
//!
//! - `ACTIVE_STRANDS`: lock-free atomic counter for the hot path
//!   (spawn/complete). Every strand increments on spawn and decrements on
//!   exit, panic included.
//! - `SHUTDOWN_CONDVAR`/`SHUTDOWN_MUTEX`: event-driven synchronization for
//!   the cold path. Used only by `wait_all_strands`; no polling, no CPU
//!   waste while waiting for shutdown.
//!
//! Join handles are not stored: strands are fire-and-forget entities with
//! independent lifecycles, and the counter + condvar pair gives shutdown
//! synchronization without global mutable state on the hot path.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, Once, OnceLock};
use std::time::{Duration, Instant};
use tracing::debug;

static SCHEDULER_INIT: Once = Once::new();
static SCHEDULER_START_TIME: OnceLock<Instant> = OnceLock::new();

/// Strands currently running.
pub static ACTIVE_STRANDS: AtomicUsize = AtomicUsize::new(0);
pub(crate) static SHUTDOWN_CONDVAR: Condvar = Condvar::new();
pub(crate) static SHUTDOWN_MUTEX: Mutex<()> = Mutex::new(());

// Strand lifecycle statistics (for diagnostics and the at-exit report)
//
// All lock-free atomic increments/loads.
// - TOTAL_SPAWNED: monotonically increasing count of strands ever spawned
// - TOTAL_COMPLETED: monotonically increasing count of strands that exited
// - PEAK_STRANDS: high-water mark of concurrent strands
pub static TOTAL_SPAWNED: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_COMPLETED: AtomicU64 = AtomicU64::new(0);
pub static PEAK_STRANDS: AtomicUsize = AtomicUsize::new(0);

static NEXT_STRAND_ID: AtomicU64 = AtomicU64::new(1);

/// Default strand stack size: 128KB. Overridable via WEFT_STACK_SIZE.
const DEFAULT_STACK_SIZE: usize = 0x20000;

/// Parse a stack size from an optional env value.
///
/// Returns the parsed size, or `DEFAULT_STACK_SIZE` if the value is
/// missing, zero, or invalid. Warns to stderr for invalid values.
fn parse_stack_size(env_value: Option<String>) -> usize {
    match env_value {
        Some(val) => match val.parse::<usize>() {
            Ok(0) => {
                eprintln!(
                    "Warning: WEFT_STACK_SIZE=0 is invalid, using default {}",
                    DEFAULT_STACK_SIZE
                );
                DEFAULT_STACK_SIZE
            }
            Ok(size) => size,
            Err(_) => {
                eprintln!(
                    "Warning: WEFT_STACK_SIZE='{}' is not a valid number, using default {}",
                    val, DEFAULT_STACK_SIZE
                );
                DEFAULT_STACK_SIZE
            }
        },
        None => DEFAULT_STACK_SIZE,
    }
}

static STACK_SIZE: OnceLock<usize> = OnceLock::new();

fn stack_size() -> usize {
    *STACK_SIZE.get_or_init(|| parse_stack_size(std::env::var("WEFT_STACK_SIZE").ok()))
}

// =============================================================================
// Lock-Free Strand Registry (only when diagnostics feature is enabled)
// =============================================================================
//
// A fixed-size array of slots tracking active strands without locks, read by
// the SIGQUIT dump and the watchdog. A slot stores a strand id (0 = free)
// and the spawn timestamp. Registration claims a free slot with CAS; when
// the registry is full the strand still runs, it just isn't tracked.
//
// Strand ids are monotonically increasing u64 values, so slot reuse cannot
// confuse one strand with another (the ABA case would need 2^64 spawns).

#[cfg(feature = "diagnostics")]
/// Default strand registry size (number of trackable concurrent strands)
const DEFAULT_REGISTRY_SIZE: usize = 256;

#[cfg(feature = "diagnostics")]
/// A slot in the strand registry. Free when `strand_id == 0`.
pub struct StrandSlot {
    /// Strand id (0 = free, >0 = active strand)
    pub strand_id: AtomicU64,
    /// Spawn timestamp (seconds since UNIX epoch, for stuck-strand checks)
    pub spawn_time: AtomicU64,
}

#[cfg(feature = "diagnostics")]
impl StrandSlot {
    const fn new() -> Self {
        Self {
            strand_id: AtomicU64::new(0),
            spawn_time: AtomicU64::new(0),
        }
    }
}

#[cfg(feature = "diagnostics")]
/// Lock-free strand registry.
///
/// O(n) registration and unregistration over a bounded slot array; no
/// contention, just atomic ops. Registration and unregistration are rare
/// next to the work a strand does.
pub struct StrandRegistry {
    slots: Box<[StrandSlot]>,
    /// Registrations that found no free slot (strand ran untracked).
    pub overflow_count: AtomicU64,
}

#[cfg(feature = "diagnostics")]
impl StrandRegistry {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(StrandSlot::new());
        }
        Self {
            slots: slots.into_boxed_slice(),
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Claim a free slot for this strand; `None` when the registry is full.
    pub fn register(&self, strand_id: u64) -> Option<usize> {
        let spawn_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        for (idx, slot) in self.slots.iter().enumerate() {
            // Write the timestamp before claiming: a reader that sees
            // strand_id != 0 must never see spawn_time == 0. Losing the CAS
            // just means the slot's owner overwrites this value.
            slot.spawn_time.store(spawn_time, Ordering::Relaxed);
            if slot
                .strand_id
                .compare_exchange(0, strand_id, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(idx);
            }
        }

        self.overflow_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Clear the slot holding this strand id; false if it was not tracked.
    pub fn unregister(&self, strand_id: u64) -> bool {
        for slot in self.slots.iter() {
            if slot
                .strand_id
                .compare_exchange(strand_id, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.spawn_time.store(0, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Snapshot of (strand_id, spawn_time) for occupied slots. May be
    /// slightly inconsistent under concurrent updates.
    pub fn active_entries(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.slots.iter().filter_map(|slot| {
            let id = slot.strand_id.load(Ordering::Acquire);
            if id > 0 {
                Some((id, slot.spawn_time.load(Ordering::Relaxed)))
            } else {
                None
            }
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(feature = "diagnostics")]
static STRAND_REGISTRY: OnceLock<StrandRegistry> = OnceLock::new();

/// Get or initialize the global strand registry.
#[cfg(feature = "diagnostics")]
pub fn strand_registry() -> &'static StrandRegistry {
    STRAND_REGISTRY.get_or_init(|| {
        let size = std::env::var("WEFT_STRAND_REGISTRY_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REGISTRY_SIZE);
        StrandRegistry::new(size)
    })
}

/// Elapsed time since the scheduler was initialized.
pub fn scheduler_elapsed() -> Option<Duration> {
    SCHEDULER_START_TIME.get().map(|start| start.elapsed())
}

/// Initialize the scheduler. Idempotent; `spawn` calls it implicitly.
///
/// Records the start time (for the at-exit report) and installs the
/// SIGQUIT diagnostics handler and the watchdog when those are enabled.
pub fn init() {
    SCHEDULER_INIT.call_once(|| {
        SCHEDULER_START_TIME.get_or_init(Instant::now);

        #[cfg(feature = "diagnostics")]
        crate::diagnostics::install_signal_handler();

        #[cfg(feature = "diagnostics")]
        crate::watchdog::install_watchdog();
    });
}

/// Completion bookkeeping that must run even when the strand body panics;
/// otherwise `wait_all_strands` would wait forever for the lost strand.
struct StrandGuard {
    strand_id: u64,
}

impl Drop for StrandGuard {
    fn drop(&mut self) {
        #[cfg(feature = "diagnostics")]
        strand_registry().unregister(self.strand_id);

        // Decrement first, then record completion, so an observer never
        // sees completed + active exceed spawned.
        let prev = ACTIVE_STRANDS.fetch_sub(1, Ordering::AcqRel);
        TOTAL_COMPLETED.fetch_add(1, Ordering::Release);
        debug!(strand_id = self.strand_id, "strand exited");

        if prev == 1 {
            // Last strand out: the mutex must be held when notifying to
            // prevent a missed wakeup in wait_all_strands.
            let _guard = SHUTDOWN_MUTEX
                .lock()
                .expect("shutdown mutex poisoned during strand exit");
            SHUTDOWN_CONDVAR.notify_all();
        }
    }
}

/// Spawn a strand running `f`, returning its unique id.
///
/// The strand is detached; use channels to hand back results and
/// `wait_all_strands` for shutdown. Stack size comes from WEFT_STACK_SIZE
/// (default 128KB). Fails only if the OS refuses the thread.
pub fn spawn<F>(name: impl Into<String>, f: F) -> std::io::Result<u64>
where
    F: FnOnce() + Send + 'static,
{
    init();

    let strand_id = NEXT_STRAND_ID.fetch_add(1, Ordering::Relaxed);
    let new_count = ACTIVE_STRANDS.fetch_add(1, Ordering::Release) + 1;
    TOTAL_SPAWNED.fetch_add(1, Ordering::Relaxed);

    // CAS loop to advance the high-water mark without locks.
    let mut peak = PEAK_STRANDS.load(Ordering::Acquire);
    while new_count > peak {
        match PEAK_STRANDS.compare_exchange_weak(
            peak,
            new_count,
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(current) => peak = current,
        }
    }

    #[cfg(feature = "diagnostics")]
    let _ = strand_registry().register(strand_id);

    let spawned = std::thread::Builder::new()
        .name(name.into())
        .stack_size(stack_size())
        .spawn(move || {
            let _guard = StrandGuard { strand_id };
            f();
        });

    match spawned {
        Ok(handle) => {
            drop(handle);
            debug!(strand_id, "strand spawned");
            Ok(strand_id)
        }
        Err(err) => {
            // Roll back: the strand never existed.
            #[cfg(feature = "diagnostics")]
            strand_registry().unregister(strand_id);
            ACTIVE_STRANDS.fetch_sub(1, Ordering::AcqRel);
            TOTAL_SPAWNED.fetch_sub(1, Ordering::Relaxed);
            Err(err)
        }
    }
}

/// Number of strands currently running.
pub fn active_strands() -> usize {
    ACTIVE_STRANDS.load(Ordering::Acquire)
}

/// Block until every spawned strand has exited.
///
/// Event-driven via the shutdown condvar; the mutex is only held during
/// the wait protocol, never while strands run.
pub fn wait_all_strands() {
    let mut guard = SHUTDOWN_MUTEX
        .lock()
        .expect("shutdown mutex poisoned during shutdown wait");
    while ACTIVE_STRANDS.load(Ordering::Acquire) > 0 {
        guard = SHUTDOWN_CONDVAR
            .wait(guard)
            .expect("shutdown condvar wait failed during shutdown wait");
    }
}
