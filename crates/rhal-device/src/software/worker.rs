//! Background completion thread for the asynchronous software profiles.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use rhal_types::{BatchHandle, HalError, HalResult};
use tracing::{debug, error};

use super::SoftwareState;
use crate::driver::Command;

pub(crate) struct Job {
    pub(crate) batch: BatchHandle,
    pub(crate) commands: Vec<Command>,
}

/// Lets tests hold batches in flight.
#[derive(Default)]
struct Gate {
    paused: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn wait_open(&self) {
        let mut paused = self.paused.lock();
        while *paused {
            self.cv.wait(&mut paused);
        }
    }

    fn set(&self, paused: bool) {
        *self.paused.lock() = paused;
        self.cv.notify_all();
    }
}

pub(crate) struct CompletionWorker {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    gate: Arc<Gate>,
}

impl CompletionWorker {
    pub(crate) fn spawn(state: Arc<SoftwareState>) -> HalResult<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let gate = Arc::new(Gate::default());
        let thread_gate = gate.clone();

        let handle = std::thread::Builder::new()
            .name(format!("rhal-{}-completion", state.profile.backend.name()))
            .spawn(move || {
                debug!("completion worker started");
                for job in receiver.iter() {
                    thread_gate.wait_open();
                    state.run_batch(job.batch, &job.commands);
                    state.fire_completion_hook();
                }
                debug!("completion worker stopped");
            })
            .map_err(|e| HalError::Driver {
                code: -1,
                message: format!("failed to spawn completion worker: {}", e),
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            gate,
        })
    }

    pub(crate) fn enqueue(&self, job: Job) -> HalResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| HalError::DeviceLost("completion worker has shut down".into()))?;
        sender
            .send(job)
            .map_err(|_| HalError::DeviceLost("completion worker has exited".into()))
    }

    pub(crate) fn pause(&self) {
        self.gate.set(true);
    }

    pub(crate) fn resume(&self) {
        self.gate.set(false);
    }
}

impl Drop for CompletionWorker {
    fn drop(&mut self) {
        self.resume();
        // Closing the channel ends the worker loop once the queue drains
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            // The last device reference can be released from a completion
            // callback, i.e. on the worker itself.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("completion worker panicked");
            }
        }
    }
}
