//! # Main loop runtime
//!
//! The pipeline executes single-threaded and cooperatively: stream-node
//! callbacks, PSI handlers and timers all run on the main loop and never
//! block. This module carries the loop's process-wide state as an
//! explicitly constructed value — no hidden singletons:
//!
//! - a [`JobQueue`] moving work from arbitrary callers (other threads,
//!   signal handlers) into the loop's execution domain;
//! - a flag word ([`SHUTDOWN`], [`RELOAD`], [`SIGHUP`], [`NO_SLEEP`])
//!   settable from any thread through a shared [`LoopControl`];
//! - the [`MainLoop::run`] cycle driving both.
//!
//! Transport modules that perform real I/O own their own event sources and
//! drive the loop from outside; they are not part of the core.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tspipe::runtime::MainLoop;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut main_loop = MainLoop::new();
//!     let control = main_loop.control();
//!
//!     std::thread::spawn(move || {
//!         // worker threads only talk to the core through the control
//!         control.request_shutdown();
//!     });
//!
//!     let reload = main_loop.run().await;
//!     assert!(!reload);
//! }
//! ```

/// Deferred-callback queue drained between loop cycles
pub mod jobs;

/// Periodic deadline helpers
pub mod timers;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

pub use jobs::JobQueue;
pub use timers::Interval;

/// Request a graceful shutdown; [`MainLoop::run`] returns `false`.
pub const SHUTDOWN: u32 = 0x0000_0001;
/// Request a configuration reload; [`MainLoop::run`] returns `true`.
pub const RELOAD: u32 = 0x0000_0002;
/// A SIGHUP arrived: reopen logs and invoke the user hook.
pub const SIGHUP: u32 = 0x0000_0004;
/// Skip sleeping on the next cycle (a burst of work is expected).
pub const NO_SLEEP: u32 = 0x0000_0008;

const EV_SLEEP: Duration = Duration::from_millis(1);

/// Shared, thread-safe handle to the loop's flag word and job queue.
///
/// This is the only surface auxiliary threads may touch.
#[derive(Clone, Default)]
pub struct LoopControl {
    inner: Arc<ControlInner>,
}

#[derive(Default)]
struct ControlInner {
    flags: AtomicU32,
    stop_cnt: AtomicU32,
    jobs: JobQueue,
}

impl LoopControl {
    /// Raises a flag; the loop consumes it on its next cycle.
    pub fn set_flag(&self, flag: u32) {
        self.inner.flags.fetch_or(flag, Ordering::AcqRel);
    }

    /// Requests a graceful shutdown.
    ///
    /// Repeated requests while a shutdown is already pending escalate: the
    /// second warns that the main thread appears stuck, the third
    /// terminates the process without teardown — shutdown is often driven
    /// from a signal handler and a wedged main thread would deadlock any
    /// orderly exit.
    pub fn request_shutdown(&self) {
        if self.inner.flags.load(Ordering::Acquire) & SHUTDOWN != 0 {
            let stop_cnt = self.inner.stop_cnt.fetch_add(1, Ordering::AcqRel) + 1;
            if stop_cnt >= 2 {
                std::process::exit(1);
            } else {
                error!(
                    "[mainloop] main thread appears to be blocked; \
                     will abort on next shutdown request"
                );
            }
        }

        self.set_flag(SHUTDOWN);
    }

    /// The job queue feeding the loop.
    pub fn jobs(&self) -> &JobQueue {
        &self.inner.jobs
    }
}

/// The cooperative main loop.
///
/// Owns the loop-cycle logic and the optional SIGHUP hook; everything
/// shareable lives behind [`MainLoop::control`].
#[derive(Default)]
pub struct MainLoop {
    control: LoopControl,
    on_sighup: Option<Box<dyn FnMut() + Send>>,
}

impl MainLoop {
    /// Creates a loop with no SIGHUP hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a hook invoked after log reopen when SIGHUP is consumed.
    pub fn set_sighup_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.on_sighup = Some(Box::new(hook));
    }

    /// Returns a shareable handle to the flag word and job queue.
    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    /// Runs cycles until a shutdown or reload is requested.
    ///
    /// Each cycle sleeps briefly (standing in for the I/O poll of the
    /// embedding transport layer), consumes the flag word, then drains the
    /// job queue. Returns `false` on [`SHUTDOWN`], `true` on [`RELOAD`].
    pub async fn run(&mut self) -> bool {
        let mut ev_sleep = EV_SLEEP;

        loop {
            tokio::time::sleep(ev_sleep).await;

            let flags = self.control.inner.flags.swap(0, Ordering::AcqRel);
            if flags != 0 {
                if flags & SHUTDOWN != 0 {
                    self.control.inner.stop_cnt.store(0, Ordering::Release);
                    return false;
                } else if flags & RELOAD != 0 {
                    return true;
                } else if flags & SIGHUP != 0 {
                    info!("[mainloop] caught SIGHUP, reopening logs");
                    if let Some(hook) = &mut self.on_sighup {
                        hook();
                    }
                } else if flags & NO_SLEEP != 0 {
                    ev_sleep = Duration::ZERO;
                    continue;
                }
            }

            self.control.inner.jobs.run_all();
            ev_sleep = EV_SLEEP;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn run_returns_false_on_shutdown() {
        let mut main_loop = MainLoop::new();
        main_loop.control().request_shutdown();
        assert!(!main_loop.run().await);
    }

    #[tokio::test]
    async fn run_returns_true_on_reload() {
        let mut main_loop = MainLoop::new();
        main_loop.control().set_flag(RELOAD);
        assert!(main_loop.run().await);
    }

    #[tokio::test]
    async fn sighup_invokes_hook_and_loop_continues() {
        let mut main_loop = MainLoop::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let hook_fired = fired.clone();
        main_loop.set_sighup_hook(move || {
            hook_fired.fetch_add(1, Ordering::SeqCst);
        });

        let control = main_loop.control();
        control.set_flag(SIGHUP);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            control.set_flag(RELOAD);
        });

        assert!(main_loop.run().await);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn jobs_drain_between_cycles() {
        let mut main_loop = MainLoop::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let job_ran = ran.clone();
        let control = main_loop.control();
        control.jobs().queue(1, move || {
            job_ran.fetch_add(1, Ordering::SeqCst);
        });

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            control.request_shutdown();
        });

        assert!(!main_loop.run().await);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_shutdown_requests_warn_before_aborting() {
        let control = LoopControl::default();
        control.request_shutdown();
        // second request escalates but must not terminate yet
        control.request_shutdown();
        assert_ne!(control.inner.flags.load(Ordering::Acquire) & SHUTDOWN, 0);
        assert_eq!(control.inner.stop_cnt.load(Ordering::Acquire), 1);
    }
}
