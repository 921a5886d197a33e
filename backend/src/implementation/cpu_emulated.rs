//! Software emulation of a bank of modular-exponentiation accelerators.
//!
//! Each [`EmulatedInstance`] owns a fixed number of parallel execution slots.
//! A submit that finds every slot occupied is rejected as busy, exactly like
//! a saturated request ring on a real device. Accepted jobs become due after
//! a sampled service time and are retired in FIFO order by [`Instance::poll`],
//! which runs the arithmetic on device-order (least-significant byte first)
//! words before handing the big-endian result to the job's continuation.
//!
//! A shared [`FaultPlan`] lets tests inject the failure modes of real
//! hardware: memory-pool and service start-up failures, instance shortages,
//! busy streaks, failed executions and stalled completion rings.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rand_distr::{Distribution, Normal};
use rug::{Integer, integer::Order};
use sampling::Source;

use crate::{
    error::HalError,
    layouts::ModExpOperands,
    oep::{Backend, Instance, ModExpJob, Rejected},
    reference,
};

#[derive(Clone, Debug)]
pub struct EmulatedConfig {
    /// Instances exposed by the emulated service.
    pub instances: usize,
    /// Parallel execution slots per instance.
    pub slots_per_instance: usize,
    /// Mean service time of one job.
    pub latency: Duration,
    /// Standard deviation of the service time.
    pub jitter: Duration,
    pub seed: [u8; 32],
}

impl Default for EmulatedConfig {
    fn default() -> Self {
        Self {
            instances: 8,
            slots_per_instance: 64,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            seed: [0u8; 32],
        }
    }
}

/// Failure injection shared by the emulated service and all its instances.
#[derive(Debug)]
pub struct FaultPlan {
    fail_mem_pool: AtomicBool,
    fail_service_start: AtomicBool,
    instance_limit: AtomicUsize,
    failing_start: AtomicUsize,
    busy_streak: AtomicUsize,
    failures: AtomicUsize,
    stalled: AtomicBool,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            fail_mem_pool: AtomicBool::new(false),
            fail_service_start: AtomicBool::new(false),
            instance_limit: AtomicUsize::new(usize::MAX),
            failing_start: AtomicUsize::new(usize::MAX),
            busy_streak: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            stalled: AtomicBool::new(false),
        }
    }
}

fn consume(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl FaultPlan {
    pub fn fail_mem_pool(&self, fail: bool) {
        self.fail_mem_pool.store(fail, Ordering::Release);
    }

    pub fn fail_service_start(&self, fail: bool) {
        self.fail_service_start.store(fail, Ordering::Release);
    }

    /// Caps the number of instances discovery reports.
    pub fn limit_instances(&self, limit: usize) {
        self.instance_limit.store(limit, Ordering::Release);
    }

    /// Instance `index` fails to start; `None` clears the fault.
    pub fn fail_instance_start(&self, index: Option<usize>) {
        self.failing_start.store(index.unwrap_or(usize::MAX), Ordering::Release);
    }

    /// The next `attempts` submits, on any instance, are rejected as busy.
    pub fn inject_busy(&self, attempts: usize) {
        self.busy_streak.store(attempts, Ordering::Release);
    }

    /// The next `jobs` retired jobs complete with an execution failure.
    pub fn inject_failures(&self, jobs: usize) {
        self.failures.store(jobs, Ordering::Release);
    }

    /// While stalled, polling retires nothing.
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }

    fn take_busy(&self) -> bool {
        consume(&self.busy_streak)
    }

    fn take_failure(&self) -> bool {
        consume(&self.failures)
    }
}

#[derive(Debug, Default)]
struct ServiceState {
    mem_pool: bool,
    service: bool,
    mem_pool_inits: usize,
    service_starts: usize,
}

/// Emulated acceleration service.
pub struct CpuEmulated {
    config: EmulatedConfig,
    faults: Arc<FaultPlan>,
    state: Mutex<ServiceState>,
}

impl CpuEmulated {
    pub fn new(config: EmulatedConfig) -> Self {
        assert!(config.slots_per_instance > 0, "slots_per_instance must be > 0");
        Self {
            config,
            faults: Arc::new(FaultPlan::default()),
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Emulated service exposing `instances` instances with default settings.
    pub fn with_instances(instances: usize) -> Self {
        Self::new(EmulatedConfig {
            instances,
            ..EmulatedConfig::default()
        })
    }

    pub fn config(&self) -> &EmulatedConfig {
        &self.config
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    pub fn mem_pool_active(&self) -> bool {
        self.state.lock().mem_pool
    }

    pub fn service_running(&self) -> bool {
        self.state.lock().service
    }

    /// Number of times the memory pool has been initialized.
    pub fn mem_pool_inits(&self) -> usize {
        self.state.lock().mem_pool_inits
    }

    /// Number of times the service has been started.
    pub fn service_starts(&self) -> usize {
        self.state.lock().service_starts
    }
}

impl Backend for CpuEmulated {
    type Instance = EmulatedInstance;

    fn name(&self) -> &'static str {
        "cpu-emulated"
    }

    fn init_mem_pool(&self) -> Result<(), HalError> {
        if self.faults.fail_mem_pool.load(Ordering::Acquire) {
            return Err(HalError::MemPool("injected memory pool failure"));
        }
        let mut state = self.state.lock();
        state.mem_pool = true;
        state.mem_pool_inits += 1;
        Ok(())
    }

    fn release_mem_pool(&self) {
        self.state.lock().mem_pool = false;
    }

    fn start_service(&self) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if !state.mem_pool {
            return Err(HalError::ServiceUnavailable("memory pool is not initialized"));
        }
        if self.faults.fail_service_start.load(Ordering::Acquire) {
            return Err(HalError::ServiceUnavailable("injected service start failure"));
        }
        state.service = true;
        state.service_starts += 1;
        Ok(())
    }

    fn stop_service(&self) {
        self.state.lock().service = false;
    }

    fn discover_instances(&self) -> Result<Vec<EmulatedInstance>, HalError> {
        if !self.service_running() {
            return Err(HalError::ServiceUnavailable("service is not started"));
        }
        let count: usize = self
            .config
            .instances
            .min(self.faults.instance_limit.load(Ordering::Acquire));
        let mut source: Source = Source::new(self.config.seed);
        Ok((0..count)
            .map(|index| EmulatedInstance::new(index, &self.config, source.new_seed(), self.faults.clone()))
            .collect())
    }
}

/// Service-time model: a constant, or a normal distribution clamped at zero.
struct ServiceTime {
    mean: Duration,
    jitter: Option<(Normal<f64>, Mutex<Source>)>,
}

impl ServiceTime {
    fn new(mean: Duration, jitter: Duration, seed: [u8; 32]) -> Self {
        let jitter = if jitter.is_zero() {
            None
        } else {
            Normal::new(mean.as_secs_f64(), jitter.as_secs_f64())
                .ok()
                .map(|normal| (normal, Mutex::new(Source::new(seed))))
        };
        Self { mean, jitter }
    }

    fn sample(&self) -> Duration {
        match &self.jitter {
            None => self.mean,
            Some((normal, source)) => {
                let secs: f64 = normal.sample(&mut *source.lock());
                Duration::from_secs_f64(secs.max(0.0))
            }
        }
    }
}

/// Loads a big-endian operand the way the device stores it, least-significant
/// byte first.
fn device_word(be: &[u8]) -> Integer {
    let le: Vec<u8> = be.iter().rev().copied().collect();
    Integer::from_digits(&le, Order::Lsf)
}

pub struct EmulatedInstance {
    index: usize,
    slots: usize,
    service_time: ServiceTime,
    faults: Arc<FaultPlan>,
    started: AtomicBool,
    ring: Mutex<VecDeque<(Instant, ModExpJob)>>,
    retired: AtomicU64,
}

impl EmulatedInstance {
    fn new(index: usize, config: &EmulatedConfig, seed: [u8; 32], faults: Arc<FaultPlan>) -> Self {
        Self {
            index,
            slots: config.slots_per_instance,
            service_time: ServiceTime::new(config.latency, config.jitter, seed),
            faults,
            started: AtomicBool::new(false),
            ring: Mutex::new(VecDeque::with_capacity(config.slots_per_instance)),
            retired: AtomicU64::new(0),
        }
    }

    /// Total jobs retired by this instance.
    pub fn retired(&self) -> u64 {
        self.retired.load(Ordering::Acquire)
    }

    fn execute(&self, operands: &ModExpOperands) -> Result<Vec<u8>, HalError> {
        if self.faults.take_failure() {
            return Err(HalError::Execution {
                instance: self.index,
                reason: "injected execution failure".into(),
            });
        }
        let result: Integer = reference::modexp(
            &device_word(operands.base()),
            &device_word(operands.exponent()),
            &device_word(operands.modulus()),
        )?;
        operands.encode_result(&result)
    }
}

impl Instance for EmulatedInstance {
    fn index(&self) -> usize {
        self.index
    }

    fn start(&self) -> Result<(), HalError> {
        if self.faults.failing_start.load(Ordering::Acquire) == self.index {
            return Err(HalError::ServiceUnavailable("injected instance start failure"));
        }
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn submit(&self, job: ModExpJob) -> Result<(), Rejected> {
        if !self.started.load(Ordering::Acquire) {
            return Err(Rejected::Failed(job, HalError::InstanceStopped(self.index)));
        }
        if self.faults.take_busy() {
            return Err(Rejected::Busy(job));
        }
        let mut ring = self.ring.lock();
        if ring.len() >= self.slots {
            return Err(Rejected::Busy(job));
        }
        ring.push_back((Instant::now() + self.service_time.sample(), job));
        Ok(())
    }

    fn poll(&self) -> usize {
        if self.faults.is_stalled() {
            return 0;
        }
        let now: Instant = Instant::now();
        let due: Vec<ModExpJob> = {
            let mut ring = self.ring.lock();
            let ready: usize = ring.iter().take_while(|(at, _)| *at <= now).count();
            ring.drain(..ready).map(|(_, job)| job).collect()
        };
        let retired: usize = due.len();
        for job in due {
            let result: Result<Vec<u8>, HalError> = self.execute(job.operands());
            job.complete(result);
        }
        self.retired.fetch_add(retired as u64, Ordering::AcqRel);
        retired
    }

    fn in_flight(&self) -> usize {
        self.ring.lock().len()
    }

    fn stop(&self) -> Result<(), HalError> {
        self.started.store(false, Ordering::Release);
        let leftover: Vec<ModExpJob> = self.ring.lock().drain(..).map(|(_, job)| job).collect();
        for job in leftover {
            job.complete(Err(HalError::InstanceStopped(self.index)));
        }
        Ok(())
    }
}
