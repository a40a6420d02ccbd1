// SPDX-License-Identifier: GPL-3.0-only
//! Capture threads for live devices
//!
//! Live sources grab frames on a dedicated thread and hand them to the run
//! loop through a [`super::LatestSlot`]. The controller owns that thread and
//! stops it when dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Returned by the per-iteration closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Owns a capture thread
///
/// # Example
///
/// ```ignore
/// let controller = CaptureLoopController::start_with_init(
///     "uvc-depth",
///     || open_stream(&path),
///     move |stream| {
///         if let Some(frame) = grab(stream) {
///             slot.put(frame);
///         }
///         LoopAction::Continue
///     },
/// )?;
/// ```
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Start a loop whose state is built on the capture thread.
    ///
    /// Blocks until `init_fn` finishes so a failed device open is reported
    /// to the caller. The state never leaves the capture thread.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> Result<Self, String>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

        info!(name = %name, "Starting capture loop with initialization");

        let thread_handle = thread::spawn(move || {
            debug!(name = %name_clone, "Capture loop thread started, initializing...");

            let mut state = match init_fn() {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    warn!(name = %name_clone, error = %e, "Initialization failed");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            run_loop(&name_clone, &stop_signal_clone, || loop_fn(&mut state));
        });

        let mut controller = Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(controller),
            Ok(Err(e)) => {
                controller.join();
                Err(e)
            }
            Err(_) => {
                controller.join();
                Err(format!("{} capture thread exited during initialization", name))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting
    fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Signal the loop and wait for the thread
    fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for capture loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Capture loop thread finished");
            }
        }
    }
}

fn run_loop(name: &str, stop_signal: &AtomicBool, mut iteration: impl FnMut() -> LoopAction) {
    loop {
        if stop_signal.load(Ordering::SeqCst) {
            debug!(name = %name, "Stop signal received");
            break;
        }
        if iteration() == LoopAction::Stop {
            debug!(name = %name, "Loop requested stop");
            break;
        }
    }
    info!(name = %name, "Capture loop thread exiting");
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}
