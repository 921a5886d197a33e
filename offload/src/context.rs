//! Lifecycle owner of the offload engine.
//!
//! ```text
//! Inactive --acquire_devices--> Active --(scheduler spawned)--> Running
//!    ^                                                            |
//!    +--------------------------release_devices------------------+
//! ```
//!
//! Both transitions are idempotent and serialized by one lifecycle lock.
//! Submitting threads never hold that lock: they clone the engine handle and
//! work against it, so a release racing with a submit resolves the submit to
//! [`Error::NotRunning`] or to a request failed with [`Error::Shutdown`].

use std::sync::Arc;

use backend::{Backend, HalError, Instance as _};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, instrument, warn};

use crate::{
    config::OffloadConfig,
    counters::Stats,
    engine::{Engine, Workers},
    error::{Error, OffloadResult},
    instances::InstanceStatus,
    outstanding::QueueId,
    request::{Completion, RequestId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Inactive,
    Active,
    Running,
}

struct Lifecycle {
    state: LifecycleState,
    workers: Workers,
}

pub struct Context<B: Backend> {
    backend: B,
    config: OffloadConfig,
    lifecycle: Mutex<Lifecycle>,
    engine: RwLock<Option<Arc<Engine<B::Instance>>>>,
}

impl<B: Backend> Context<B> {
    /// Creates an inactive context. Nothing touches the backend until
    /// [`acquire_devices`](Self::acquire_devices).
    pub fn new(backend: B, config: OffloadConfig) -> Self {
        Self {
            backend,
            config,
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Inactive,
                workers: Workers::default(),
            }),
            engine: RwLock::new(None),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Counters of the current acquisition, all zero while inactive.
    pub fn stats(&self) -> Stats {
        self.engine
            .read()
            .as_ref()
            .map(|engine| engine.counters.snapshot())
            .unwrap_or_default()
    }

    /// Brings the service up and starts the background workers.
    ///
    /// A no-op when already acquired. On failure every step taken so far is
    /// undone and the context stays [`LifecycleState::Inactive`].
    #[instrument(skip_all, fields(backend = self.backend.name()))]
    pub fn acquire_devices(&self) -> OffloadResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != LifecycleState::Inactive {
            return Ok(());
        }
        self.config.validate()?;

        self.backend.init_mem_pool()?;
        if let Err(err) = self.backend.start_service() {
            self.backend.release_mem_pool();
            error!(%err, "service start failed");
            return Err(err.into());
        }
        match self.start_engine(&mut lifecycle) {
            Ok(engine) => {
                *self.engine.write() = Some(engine);
                info!(
                    instances = self.config.instances,
                    queues = self.config.outstanding_queues,
                    "offload context running"
                );
                Ok(())
            }
            Err(err) => {
                error!(%err, "acquire failed, unwinding");
                self.backend.stop_service();
                self.backend.release_mem_pool();
                lifecycle.state = LifecycleState::Inactive;
                Err(err)
            }
        }
    }

    fn start_engine(&self, lifecycle: &mut Lifecycle) -> OffloadResult<Arc<Engine<B::Instance>>> {
        let required: usize = self.config.instances;
        let mut handles: Vec<B::Instance> = self.backend.discover_instances()?;
        if handles.len() < required {
            return Err(HalError::InsufficientInstances {
                required,
                available: handles.len(),
            }
            .into());
        }
        handles.truncate(required);
        for (i, handle) in handles.iter().enumerate() {
            if let Err(err) = handle.start() {
                for started in &handles[..i] {
                    if let Err(err) = started.stop() {
                        warn!(instance = started.index(), %err, "failed to stop instance while unwinding");
                    }
                }
                return Err(err.into());
            }
        }

        let engine: Arc<Engine<B::Instance>> = Arc::new(Engine::new(self.config.clone(), handles));
        let mut workers: Workers = Workers::default();
        if let Err(err) = engine.spawn_dispatch(&mut workers) {
            engine.shutdown(workers);
            return Err(err);
        }
        lifecycle.state = LifecycleState::Active;
        info!("dispatcher and pollers started");

        if let Err(err) = engine.spawn_scheduler(&mut workers) {
            engine.shutdown(workers);
            return Err(err);
        }
        lifecycle.state = LifecycleState::Running;
        lifecycle.workers = workers;
        Ok(engine)
    }

    /// Stops the workers, lets in-flight work retire, and shuts the service
    /// down. A no-op while inactive.
    #[instrument(skip_all, fields(backend = self.backend.name()))]
    pub fn release_devices(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == LifecycleState::Inactive {
            return;
        }
        let engine: Option<Arc<Engine<B::Instance>>> = self.engine.write().take();
        let workers: Workers = std::mem::take(&mut lifecycle.workers);
        if let Some(engine) = engine {
            engine.shutdown(workers);
            info!(stats = ?engine.counters.snapshot(), "offload engine stopped");
        }
        self.backend.stop_service();
        self.backend.release_mem_pool();
        lifecycle.state = LifecycleState::Inactive;
        info!("offload context released");
    }

    fn engine(&self) -> OffloadResult<Arc<Engine<B::Instance>>> {
        self.engine.read().clone().ok_or(Error::NotRunning)
    }

    /// Submits one modular exponentiation outside any outstanding queue.
    /// Operands are big-endian buffers of `ceil(bits / 8)` bytes.
    pub fn submit_modexp(&self, base: &[u8], exponent: &[u8], modulus: &[u8], bits: usize) -> OffloadResult<RequestId> {
        self.engine()?.submit_direct(bits, base, exponent, modulus)
    }

    /// Blocks until the oldest `count` direct submissions resolve and returns
    /// their outcomes in submission order. The whole call waits at most
    /// `wait_timeout`; requests still unresolved then fail with
    /// [`Error::Timeout`].
    pub fn drain(&self, count: usize) -> OffloadResult<Vec<Completion>> {
        self.engine()?.drain(count)
    }

    /// Checks out an outstanding queue, blocking while all are in use.
    pub fn acquire_batch_queue(&self) -> OffloadResult<QueueId> {
        self.engine()?.outstanding.acquire()
    }

    pub fn submit_modexp_mt(
        &self,
        queue: QueueId,
        base: &[u8],
        exponent: &[u8],
        modulus: &[u8],
        bits: usize,
    ) -> OffloadResult<RequestId> {
        let engine = self.engine()?;
        let req = engine.new_request(bits, base, exponent, modulus)?;
        let id: RequestId = req.id();
        engine.outstanding.submit(queue, req)?;
        Ok(id)
    }

    /// Waits for the `batch_size` requests submitted through `queue` and
    /// returns their outcomes in submission order, then frees the queue.
    /// Bounded by one `wait_timeout` for the whole batch, as in
    /// [`drain`](Self::drain).
    pub fn release_batch_queue(&self, queue: QueueId, batch_size: usize) -> OffloadResult<Vec<Completion>> {
        self.engine()?.release_batch(queue, batch_size)
    }

    /// Outstanding queues currently checked out.
    pub fn busy_queues(&self) -> usize {
        self.engine.read().as_ref().map_or(0, |engine| engine.outstanding.busy())
    }

    /// Outcome of the last submit the dispatcher made on instance `idx`.
    pub fn instance_status(&self, idx: usize) -> Option<InstanceStatus> {
        let engine = self.engine.read();
        engine.as_ref()?.instances.iter().nth(idx).map(|slot| slot.last_status())
    }

    /// Jobs currently held by the hardware.
    pub fn in_flight(&self) -> usize {
        self.engine
            .read()
            .as_ref()
            .map_or(0, |engine| engine.instances.in_flight())
    }
}

impl<B: Backend> Drop for Context<B> {
    fn drop(&mut self) {
        self.release_devices();
    }
}

