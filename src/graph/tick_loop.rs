// SPDX-License-Identifier: GPL-3.0-only

//! Paced worker threads
//!
//! Sources tick on a display-link style thread, writer pumps poll their
//! encoder inputs, decoders pull samples. All of them are a closure called
//! repeatedly on a named thread until it returns [`LoopAction::Stop`] or the
//! owner asks it to stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a loop running on its own thread
///
/// # Example
///
/// ```ignore
/// let ticks = TickLoop::start("display-link", Some(Duration::from_millis(33)), move || {
///     camera.tick();
///     LoopAction::Continue
/// });
/// ```
pub struct TickLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl TickLoop {
    /// Start a loop calling `loop_fn` every `interval` (or back to back with `None`)
    ///
    /// Pacing is deadline based: a slow iteration shortens the next sleep
    /// instead of shifting every later tick.
    pub fn start<F>(name: &str, interval: Option<Duration>, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::start_with_init(name, interval, || Ok(()), move |_: &mut ()| loop_fn())
    }

    /// Start a loop whose state is created on the loop thread
    ///
    /// If `init_fn` fails the thread exits without running `loop_fn`.
    pub fn start_with_init<S, I, F>(
        name: &str,
        interval: Option<Duration>,
        init_fn: I,
        mut loop_fn: F,
    ) -> Self
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, ?interval, "Starting tick loop");

        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Initialization failed");
                        return;
                    }
                };

                let mut next_tick = Instant::now();
                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    if loop_fn(&mut state) == LoopAction::Stop {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }

                    if let Some(interval) = interval {
                        next_tick += interval;
                        let now = Instant::now();
                        if next_tick > now {
                            thread::sleep(next_tick - now);
                        } else {
                            // Fell behind; resynchronise rather than burst
                            next_tick = now;
                        }
                    }
                }

                debug!(name = %name_clone, "Tick loop thread exiting");
            });

        let thread_handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn tick loop thread");
                None
            }
        };

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Get a clone of the stop signal for long-running iterations
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting tick loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Joining from inside the loop would never return
            debug!(name = %self.name, "Join requested from loop thread, detaching");
            return;
        }
        if let Err(e) = handle.join() {
            warn!(name = %self.name, "Tick loop thread panicked: {:?}", e);
        }
    }

    /// Signal stop and let the thread finish on its own
    pub fn detach(mut self) {
        self.request_stop();
        self.thread_handle.take();
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "TickLoop dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut ticks = TickLoop::start("test-loop", None, move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        });

        ticks.join();

        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_paced_loop_stops() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut ticks = TickLoop::start("test-paced", Some(Duration::from_millis(5)), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            LoopAction::Continue
        });

        thread::sleep(Duration::from_millis(50));
        ticks.stop();
        let ran = counter.load(Ordering::SeqCst);
        assert!(ran > 0);
        // Pacing keeps the loop far below a busy spin
        assert!(ran < 100, "ran {} times", ran);
        assert!(!ticks.is_running());
    }

    #[test]
    fn test_init_failure() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let mut ticks = TickLoop::start_with_init(
            "test-fail-init",
            None,
            || Err::<(), _>("Init failed".to_string()),
            move |_: &mut ()| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
        );

        ticks.join();
        assert!(!ran.load(Ordering::SeqCst));
    }
}
