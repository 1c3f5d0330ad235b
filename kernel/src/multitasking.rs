//! multitasking provides the sleep/wakeup primitives used to coordinate
//! blocking kernel operations with the callbacks that complete them.
//!
//! This kernel does not implement preemptive, per-process threads of
//! execution. Instead, a caller that needs to block parks the CPU with
//! `hlt` until the channel it is waiting on is woken, then re-checks its
//! own completion condition. This gives the same sleep(chan, lock) /
//! wakeup(chan) contract used throughout the socket adapter, without
//! requiring a full scheduler: the channel is any stable address (most
//! often a socket's own identity), and wakeup(chan) is broadcast to every
//! waiter parked on that channel.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::instructions::interrupts;

/// Uniquely identifies a wait channel. Callers construct one from the
/// address of a stable object, such as a socket.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Channel(usize);

impl Channel {
    /// from_ptr derives a channel from the address of any value.
    ///
    /// The caller must ensure the referenced value outlives every
    /// sleeper parked on the resulting channel.
    ///
    pub fn from_ptr<T>(val: *const T) -> Self {
        Channel(val as usize)
    }
}

static GENERATIONS: spin::Mutex<BTreeMap<Channel, u64>> = spin::Mutex::new(BTreeMap::new());

// WAKEUPS is a global counter bumped on every wakeup, used only to
// avoid missing a wakeup that lands between a sleeper reading its
// channel's generation and parking the CPU.
static WAKEUPS: AtomicU64 = AtomicU64::new(0);

fn generation(chan: Channel) -> u64 {
    *GENERATIONS.lock().entry(chan).or_insert(0)
}

/// sleep blocks the caller until `wakeup(chan)` is called, releasing
/// `guard`'s lock while parked and re-acquiring it before returning.
///
/// The caller re-checks its own completion condition after `sleep`
/// returns; `sleep` itself does not know what condition is being
/// awaited, it only guarantees to return after at least one wakeup on
/// `chan` that was issued after `sleep` was called.
///
pub fn sleep<'a, T>(
    chan: Channel,
    lock: &'a spin::Mutex<T>,
    guard: spin::MutexGuard<'a, T>,
) -> spin::MutexGuard<'a, T> {
    let before = generation(chan);
    drop(guard);

    while generation(chan) == before {
        interrupts::enable_and_hlt();
    }

    lock.lock()
}

/// wakeup wakes every sleeper parked on `chan`.
///
pub fn wakeup(chan: Channel) {
    interrupts::without_interrupts(|| {
        let mut generations = GENERATIONS.lock();
        let entry = generations.entry(chan).or_insert(0);
        *entry = entry.wrapping_add(1);
        WAKEUPS.fetch_add(1, Ordering::Relaxed);
    });
}
