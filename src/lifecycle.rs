//! ==============================================================================
//! lifecycle.rs - cancellable hardware loops
//! ==============================================================================
//!
//! loops that drive outputs (actuator light/water, display button) share one
//! shape:
//!
//!     ControlTask::spawn(name, |cancel| body(cancel))
//!         body builds a Quiesce guard first, then exports its pins
//!         body checks `cancel` at every sleep through `pause`
//!     ControlTask::stop()
//!         cancels and waits until the body has returned
//!
//! the guard drives outputs low and releases pins and the pulse channel
//! exactly once, whether the body was cancelled, finished or failed setup.
//!
//! ==============================================================================

use crate::hal::{HardwareDriver, Level};
use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scoped teardown for one control loop.
pub struct Quiesce {
    hal: Arc<dyn HardwareDriver>,
    outputs: Vec<u8>,
    inputs: Vec<u8>,
    pulse: Option<u8>,
    done: AtomicBool,
}

impl Quiesce {
    pub fn new(hal: Arc<dyn HardwareDriver>, outputs: Vec<u8>, inputs: Vec<u8>, pulse: Option<u8>) -> Self {
        Self { hal, outputs, inputs, pulse, done: AtomicBool::new(false) }
    }

    /// Drive outputs low, stop the pulse channel, release everything. Later
    /// calls do nothing.
    pub fn run(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        for &pin in &self.outputs {
            if let Err(e) = self.hal.write_pin(pin, Level::Low) {
                debug!(pin, error = %e, "[QUIESCE] output already released");
            }
        }
        if let Some(channel) = self.pulse {
            if let Err(e) = self.hal.disable_pulse(channel) {
                debug!(channel, error = %e, "[QUIESCE] pulse already stopped");
            }
            if let Err(e) = self.hal.unexport_pulse(channel) {
                debug!(channel, error = %e, "[QUIESCE] pulse already released");
            }
        }
        for &pin in self.outputs.iter().chain(self.inputs.iter()) {
            if let Err(e) = self.hal.unexport_pin(pin) {
                debug!(pin, error = %e, "[QUIESCE] pin already released");
            }
        }
    }

    #[cfg(test)]
    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl Drop for Quiesce {
    fn drop(&mut self) {
        self.run();
    }
}

/// sleep unless cancelled first; false means stop
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// A running control loop and the token that stops it.
pub struct ControlTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ControlTask {
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let fut = body(cancel.clone());
        let handle = tokio::spawn(async move {
            match fut.await {
                Ok(()) => info!(control = name, "[CONTROL] loop finished"),
                Err(e) => warn!(control = name, error = %e, "[CONTROL] loop failed"),
            }
        });
        info!(control = name, "[CONTROL] loop started");
        Self { name, cancel, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// cancel and wait until the loop has quiesced its hardware
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(control = self.name, error = %e, "[CONTROL] loop task panicked");
        }
        info!(control = self.name, "[CONTROL] loop stopped");
    }
}
