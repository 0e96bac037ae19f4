use std::sync::atomic::{AtomicU32, Ordering};

/// A wake-up word the loop thread parks on.
///
/// Wakers bump the word and wake one waiter. A waiter first reads the word with
/// [`Signal::observe`], re-checks its own condition, then calls [`Signal::wait`]
/// with the observed value; a bump in between makes the wait return at once.
pub struct Signal {
    word: AtomicU32,
}

impl Signal {
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn observe(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    pub fn notify(&self) {
        self.word.fetch_add(1, Ordering::Release);
        futex_wake(&self.word);
    }

    pub fn wait(&self, observed: u32) {
        futex_wait(&self.word, observed);
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn futex_wait(atomic: &AtomicU32, expected: u32) {
    use std::ptr;

    // Check condition first to avoid syscall if possible
    if atomic.load(Ordering::Relaxed) != expected {
        return;
    }

    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            ptr::null::<libc::timespec>(),
            ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(target_os = "linux")]
fn futex_wake(atomic: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1, // single loop thread
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn futex_wait(atomic: &AtomicU32, expected: u32) {
    // Fallback for non-Linux: yield until the word moves
    while atomic.load(Ordering::Acquire) == expected {
        std::thread::yield_now();
    }
}

#[cfg(not(target_os = "linux"))]
fn futex_wake(_atomic: &AtomicU32) {
    // No-op on non-Linux
}
