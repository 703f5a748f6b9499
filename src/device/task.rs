use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::buffer::RollingBuffer;
use crate::error::{FlightError, Result};
use crate::types::Sample;

/// Produces one new sample per sampling cycle.
///
/// `fetch` runs with the owning task's lock held, so it should finish well inside one
/// sampling period. Any state that must carry across cycles (previous estimate, last read
/// time) belongs to the sampler, not to the buffer.
pub trait Sampler: Send + 'static {
    type Sample: Sample;

    fn fetch(&mut self, slot: &mut Self::Sample) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    ShutDown,
}

struct TaskInner<S: Sampler> {
    buffer: RollingBuffer<S::Sample>,
    sampler: S,
}

/// Periodic sampling engine
///
/// One lock guards both the rolling buffer and the sampler, so readers always see a
/// completely written slot. `run` blocks the calling thread until `shutdown`; use `spawn`
/// to give it a dedicated thread.
pub struct DeviceTask<S: Sampler> {
    name: String,
    frequency_hz: u32,
    running: AtomicBool,
    shutdown: AtomicBool,
    samples_taken: AtomicU64,
    inner: Mutex<TaskInner<S>>,
}

impl<S: Sampler> DeviceTask<S> {
    pub fn new(name: &str, frequency_hz: u32, capacity: usize, sampler: S) -> Result<Self> {
        if frequency_hz == 0 {
            return Err(FlightError::InvalidParameters(format!(
                "{}: sampling frequency must be greater than 0",
                name
            )));
        }
        let buffer = RollingBuffer::new(capacity)?;
        Ok(DeviceTask {
            name: name.to_string(),
            frequency_hz,
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            samples_taken: AtomicU64::new(0),
            inner: Mutex::new(TaskInner { buffer, sampler }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz as f64)
    }

    pub fn samples_taken(&self) -> u64 {
        self.samples_taken.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TaskState {
        if self.shutdown.load(Ordering::SeqCst) {
            TaskState::ShutDown
        } else if self.running.load(Ordering::SeqCst) {
            TaskState::Running
        } else {
            TaskState::Idle
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, TaskInner<S>>> {
        self.inner
            .lock()
            .map_err(|_| FlightError::poisoned(&self.name))
    }

    /// Sampling loop. Returns once `shutdown` has been observed at the top of an iteration,
    /// so one in-flight fetch may still complete after the flag is set.
    pub fn run(&self) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(FlightError::ShutDown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(FlightError::AlreadyRunning);
        }

        log::info!("[{}] sampling at {} Hz", self.name, self.frequency_hz);
        let period = self.period();

        let result = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break Ok(());
            }
            match self.sample_once() {
                Ok(()) => {}
                Err(e @ FlightError::Internal(_)) => {
                    // A poisoned lock cannot be recovered; keep the task from being restarted.
                    self.shutdown.store(true, Ordering::SeqCst);
                    break Err(e);
                }
                Err(FlightError::NoData(source)) => {
                    log::debug!("[{}] waiting for {}", self.name, source)
                }
                Err(e) => log::warn!("[{}] fetch failed: {}", self.name, e),
            }
            let taken = self.samples_taken();
            if taken > 0 && taken % 1000 == 0 {
                log::debug!("[{}] {} samples", self.name, taken);
            }
            thread::sleep(period);
        };

        self.running.store(false, Ordering::SeqCst);
        log::info!(
            "[{}] stopped after {} samples",
            self.name,
            self.samples_taken()
        );
        result
    }

    /// One sampling cycle: fetch a fresh sample and commit it to the next slot.
    ///
    /// A failed fetch leaves the buffer untouched.
    pub fn sample_once(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let TaskInner { buffer, sampler } = &mut *inner;

        let mut next = S::Sample::default();
        sampler.fetch(&mut next)?;
        *buffer.advance() = next;

        self.samples_taken.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Serialised `{"currentIndex", "values"}` snapshot of the whole buffer.
    pub fn get(&self) -> Result<String> {
        let inner = self.lock()?;
        Ok(serde_json::to_string(&inner.buffer)?)
    }

    /// Copy of the current slot, or `None` before the first sample.
    pub fn get_data(&self) -> Result<Option<S::Sample>> {
        let inner = self.lock()?;
        Ok(inner.buffer.current().cloned())
    }

    /// Runs `f` under the task lock with mutable access to the sampler and the buffer.
    pub fn with_sampler<R>(
        &self,
        f: impl FnOnce(&mut S, &mut RollingBuffer<S::Sample>) -> R,
    ) -> Result<R> {
        let mut inner = self.lock()?;
        let TaskInner { buffer, sampler } = &mut *inner;
        Ok(f(sampler, buffer))
    }

    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            log::info!("[{}] shutdown requested", self.name);
        }
    }

    pub fn spawn(self: &Arc<Self>) -> Result<JoinHandle<Result<()>>> {
        if self.state() != TaskState::Idle {
            return Err(match self.state() {
                TaskState::ShutDown => FlightError::ShutDown,
                _ => FlightError::AlreadyRunning,
            });
        }
        let task = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || task.run())?;
        Ok(handle)
    }
}

/// Read access to a task's most recent sample, independent of the sampler behind it.
pub trait LatestSample<T>: Send + Sync {
    fn latest(&self) -> Result<Option<T>>;
}

impl<S: Sampler> LatestSample<S::Sample> for DeviceTask<S> {
    fn latest(&self) -> Result<Option<S::Sample>> {
        self.get_data()
    }
}

/// What a streaming server needs from a task.
pub trait SnapshotSource: Send + Sync {
    fn source_name(&self) -> &str;
    fn snapshot(&self) -> Result<String>;
}

impl<S: Sampler> SnapshotSource for DeviceTask<S> {
    fn source_name(&self) -> &str {
        self.name()
    }

    fn snapshot(&self) -> Result<String> {
        self.get()
    }
}
