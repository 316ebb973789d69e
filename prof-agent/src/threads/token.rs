//! Thread identity
//!
//! A [`ThreadToken`] stands for one thread of the profiled application. Every
//! OS thread lazily owns one through a thread-local `Arc`; the registry only
//! keeps `Weak` references, so a token stops upgrading as soon as its thread
//! has exited. Tests and simulations can mint detached tokens with
//! [`ThreadToken::new`] and "kill" them by dropping the last `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Arc<ThreadToken> = Arc::new(ThreadToken::for_current_thread());
}

#[derive(Debug)]
pub struct ThreadToken {
    serial: u64,
    hash: u32,
    name: String,
    os_thread: Option<std::thread::ThreadId>,
}

impl ThreadToken {
    /// Mint a token that is not bound to any OS thread
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(name.into(), None))
    }

    fn for_current_thread() -> Self {
        let current = std::thread::current();
        let name = current.name().map_or_else(|| format!("{:?}", current.id()), str::to_owned);
        Self::build(name, Some(current.id()))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn build(name: String, os_thread: Option<std::thread::ThreadId>) -> Self {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        // splitmix64 finalizer spreads consecutive serials across the table
        let mut z = serial.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Self { serial, hash: (z as u32) & 0x7fff_ffff, name, os_thread }
    }

    /// Run `f` with the calling thread's token
    ///
    /// Returns `None` while the thread is tearing down its thread-locals.
    pub fn with_current<R>(f: impl FnOnce(&Arc<ThreadToken>) -> R) -> Option<R> {
        CURRENT.try_with(f).ok()
    }

    /// Clone of the calling thread's token
    #[must_use]
    pub fn current() -> Option<Arc<ThreadToken>> {
        Self::with_current(Arc::clone)
    }

    /// Identity hash, always non-negative as a 32-bit signed value
    #[must_use]
    pub fn identity_hash(&self) -> u32 {
        self.hash
    }

    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS thread this token belongs to (`None` for detached tokens)
    #[must_use]
    pub fn os_thread(&self) -> Option<std::thread::ThreadId> {
        self.os_thread
    }
}
