// src/engine.rs
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::drivers::TriggeringError;

/// How long a stage blocks on its input before re-checking its run flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared "keep running" flag handed to a stage's run loop.
#[derive(Clone, Debug)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A fatal stage failure, reported to whoever owns the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub stage: String,
    pub reason: String,
}

/// Latch raised by the first stage that dies.
#[derive(Clone, Default)]
pub struct FaultSignal {
    inner: Arc<(Mutex<Option<Fault>>, Condvar)>,
}

impl FaultSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `fault` unless an earlier one is already latched.
    pub fn raise(&self, fault: Fault) {
        let (slot, raised) = &*self.inner;
        let mut slot = slot.lock();
        if slot.is_none() {
            *slot = Some(fault);
            raised.notify_all();
        }
    }

    pub fn fault(&self) -> Option<Fault> {
        self.inner.0.lock().clone()
    }

    /// Blocks until a fault is raised or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Fault> {
        let deadline = Instant::now() + timeout;
        let (slot, raised) = &*self.inner;
        let mut slot = slot.lock();
        while slot.is_none() {
            if raised.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
    }

    /// Blocks until a fault is raised.
    pub fn wait(&self) -> Fault {
        let (slot, raised) = &*self.inner;
        let mut slot = slot.lock();
        loop {
            if let Some(fault) = slot.as_ref() {
                return fault.clone();
            }
            raised.wait(&mut slot);
        }
    }
}

/// One pipeline stage running on its own thread.
pub struct Worker {
    name: String,
    flag: RunFlag,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns `run` with a fresh run flag. An `Err` or a panic from `run` is
    /// logged and raised on `faults`.
    pub fn start<F>(name: &str, faults: FaultSignal, run: F) -> Result<Self, TriggeringError>
    where
        F: FnOnce(RunFlag) -> Result<(), TriggeringError> + Send + 'static,
    {
        let flag = RunFlag::new();
        let thread_flag = flag.clone();
        let stage = name.to_owned();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                info!("{stage} stage started");
                let reason = match panic::catch_unwind(AssertUnwindSafe(|| run(thread_flag))) {
                    Ok(Ok(())) => {
                        info!("{stage} stage done");
                        return;
                    }
                    Ok(Err(err)) => err.to_string(),
                    Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
                };
                error!("{stage} stage failed: {reason}");
                faults.raise(Fault { stage, reason });
            })
            .map_err(|source| TriggeringError::Spawn {
                name: name.to_owned(),
                source,
            })?;
        Ok(Self {
            name: name.to_owned(),
            flag,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Clears the run flag and waits for the thread to exit.
    ///
    /// The stage must notice the flag within one [`POLL_INTERVAL`], or be
    /// woken by closing its input queue before calling this.
    pub fn stop(&mut self) {
        self.flag.stop();
        self.join();
    }

    /// Waits for the stage to return on its own, e.g. after its input closed.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} stage panicked", self.name);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown payload"
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SyncQueue;

    #[test]
    fn stop_interrupts_a_stage_waiting_on_an_empty_queue() {
        let queue: Arc<SyncQueue<u32>> = Arc::new(SyncQueue::new());
        let stage_queue = Arc::clone(&queue);
        let mut worker = Worker::start("idle", FaultSignal::new(), move |flag| {
            while flag.is_running() {
                let _ = stage_queue.pop_timeout(POLL_INTERVAL);
            }
            Ok(())
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        worker.stop();
        assert!(started.elapsed() < POLL_INTERVAL * 3);
        assert!(worker.is_finished());
    }

    #[test]
    fn join_lets_a_stage_drain_its_closed_input() {
        let queue: Arc<SyncQueue<u32>> = Arc::new(SyncQueue::new());
        for i in 0..3 {
            queue.push(i);
        }
        let stage_queue = Arc::clone(&queue);
        let drained = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&drained);
        let mut worker = Worker::start("drain", FaultSignal::new(), move |flag| {
            while flag.is_running() {
                match stage_queue.pop_timeout(POLL_INTERVAL) {
                    Some(item) => seen.lock().push(item),
                    None if stage_queue.is_closed() => break,
                    None => {}
                }
            }
            Ok(())
        })
        .unwrap();
        queue.close();
        worker.join();
        assert_eq!(*drained.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_stage_raises_fault() {
        let faults = FaultSignal::new();
        let _worker = Worker::start("reader", faults.clone(), |_| {
            Err(TriggeringError::DeviceClosed)
        })
        .unwrap();
        let fault = faults.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fault.stage, "reader");
        assert_eq!(fault.reason, "device link closed");
    }

    #[test]
    fn panicking_stage_raises_fault() {
        let faults = FaultSignal::new();
        let mut worker = Worker::start("analysis", faults.clone(), |_| {
            panic!("spectrum buffer too short");
        })
        .unwrap();
        let fault = faults.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fault.stage, "analysis");
        assert!(fault.reason.contains("spectrum buffer too short"), "{}", fault.reason);
        worker.stop();
        assert!(worker.is_finished());
    }

    #[test]
    fn first_fault_wins() {
        let faults = FaultSignal::new();
        faults.raise(Fault {
            stage: "a".into(),
            reason: "x".into(),
        });
        faults.raise(Fault {
            stage: "b".into(),
            reason: "y".into(),
        });
        assert_eq!(faults.wait().stage, "a");
    }

    #[test]
    fn no_fault_times_out() {
        let faults = FaultSignal::new();
        assert_eq!(faults.wait_timeout(Duration::from_millis(10)), None);
        assert_eq!(faults.fault(), None);
    }
}
