//! Single-flight background solve controller
//!
//! State machine: `Idle → Running → (CancelRequested →) Idle`. At most one
//! job runs at a time; `start` while a job is in flight is a no-op, not a
//! queued request. Cancellation is cooperative: the job polls its
//! [`CancellationToken`] and returns early, keeping whatever it has produced.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Cloneable cancellation flag shared with a running job
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveState {
    Idle,
    Running,
    CancelRequested,
}

struct Shared {
    state: Mutex<SolveState>,
    idle: Condvar,
}

/// Returns the controller to `Idle` when the worker exits, including by panic
struct IdleOnDrop(Arc<Shared>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        *self.0.state.lock() = SolveState::Idle;
        self.0.idle.notify_all();
    }
}

pub struct SolveController {
    shared: Arc<Shared>,
    token: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
    worker_name: String,
}

impl SolveController {
    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SolveState::Idle),
                idle: Condvar::new(),
            }),
            token: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
            worker_name: worker_name.into(),
        }
    }

    pub fn state(&self) -> SolveState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() != SolveState::Idle
    }

    /// Run `job` on a worker thread unless one is already running
    ///
    /// Returns `true` if the job was started.
    pub fn start<F>(&self, job: F) -> bool
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if *state != SolveState::Idle {
            debug!(state = ?*state, "solve already in flight, ignoring start");
            return false;
        }
        *state = SolveState::Running;
        let token = CancellationToken::new();
        *self.token.lock() = token.clone();
        // Held until the new handle is stored, so a start that follows this
        // job's completion cannot have its handle overwritten
        let mut handle = self.handle.lock();
        drop(state);

        // Reap the previous worker; it has already reported Idle
        if let Some(previous) = handle.take() {
            let _ = previous.join();
        }

        let guard = IdleOnDrop(Arc::clone(&self.shared));
        let spawned = thread::Builder::new()
            .name(self.worker_name.clone())
            .spawn(move || {
                let _guard = guard;
                job(&token);
            });

        match spawned {
            Ok(spawned) => {
                *handle = Some(spawned);
                true
            }
            Err(e) => {
                // The closure (and its guard) was dropped, so state is Idle again
                warn!(error = %e, "failed to spawn solver thread");
                false
            }
        }
    }

    /// Run `job` on the calling thread, under the same single-flight rule
    ///
    /// Returns `None` without running `job` if a solve is already in flight.
    pub fn run_inline<R>(&self, job: impl FnOnce(&CancellationToken) -> R) -> Option<R> {
        let mut state = self.shared.state.lock();
        if *state != SolveState::Idle {
            return None;
        }
        *state = SolveState::Running;
        let token = CancellationToken::new();
        *self.token.lock() = token.clone();
        drop(state);

        let _guard = IdleOnDrop(Arc::clone(&self.shared));
        Some(job(&token))
    }

    /// Request cancellation and block until the worker has exited
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if *state == SolveState::Running {
            *state = SolveState::CancelRequested;
            self.token.lock().cancel();
        }
        while *state != SolveState::Idle {
            self.shared.idle.wait(&mut state);
        }
        drop(state);
        self.join();
    }

    /// Block until the worker has exited, without cancelling it
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while *state != SolveState::Idle {
            self.shared.idle.wait(&mut state);
        }
        drop(state);
        self.join();
    }

    fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SolveController {
    fn drop(&mut self) {
        self.stop();
    }
}
