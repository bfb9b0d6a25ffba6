//! Engine shared between execution contexts
//!
//! Every access goes through the mutual-exclusion guard. Blocking operations
//! started through [`SharedEngine::run`] release the guard between polls so an
//! update thread and other callers keep making progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::protocol::{CommandOutput, CommandTicket, EspError};
use crate::sync::{Guard, GuardRef, LockPrimitive};

/// Cloneable handle to a guarded [`Engine`]
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Guard<Engine>>,
    poll_interval: Duration,
}

impl SharedEngine {
    /// Wrap `engine` behind `primitive`, using the configured lock timeout
    pub fn new(engine: Engine, primitive: Box<dyn LockPrimitive>) -> Result<Self, EspError> {
        let timeout = Duration::from_millis(engine.config().lock_timeout_ms);
        Ok(Self {
            inner: Arc::new(Guard::create(primitive, timeout, engine)?),
            poll_interval: Duration::from_millis(1),
        })
    }

    /// Sleep between polls in [`run`](SharedEngine::run)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Exclusive access with a bounded wait
    pub fn lock(&self) -> Result<GuardRef<'_, Engine>, EspError> {
        self.inner.acquire()
    }

    /// Run one non-blocking engine pass under the lock
    pub fn update(&self) -> Result<usize, EspError> {
        Ok(self.lock()?.update())
    }

    /// Deliver deferred events under the lock
    pub fn process_events(&self) -> Result<usize, EspError> {
        Ok(self.lock()?.process_events())
    }

    /// Start an operation under the guard and wait for its ticket without
    /// holding the guard
    ///
    /// ```rust,ignore
    /// let output = shared.run(|engine| engine.start_scan())?;
    /// ```
    pub fn run<F>(&self, start: F) -> Result<CommandOutput, EspError>
    where
        F: FnOnce(&mut Engine) -> Result<CommandTicket, EspError>,
    {
        let ticket = {
            let mut engine = self.lock()?;
            start(&mut engine)?
        };

        loop {
            {
                let mut engine = self.lock()?;
                engine.update();
                if let Some(result) = engine.poll(ticket) {
                    return result;
                }
                if !engine.is_known_ticket(ticket) {
                    return Err(EspError::InvalidArgument(format!(
                        "unknown ticket {ticket}"
                    )));
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Run `update` and `process_events` every `period` on a background thread
    ///
    /// The thread stops when the returned handle is dropped.
    pub fn spawn_update_loop(&self, period: Duration) -> UpdateLoop {
        let shared = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            debug!("update loop started");
            while !stop_flag.load(Ordering::Acquire) {
                match shared.lock() {
                    Ok(mut engine) => {
                        engine.update();
                        engine.process_events();
                    }
                    Err(e) => warn!("update loop skipped a cycle: {e}"),
                }
                std::thread::sleep(period);
            }
            debug!("update loop stopped");
        });

        UpdateLoop {
            stop,
            handle: Some(handle),
        }
    }
}

/// Handle to a running update thread
pub struct UpdateLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for UpdateLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
