use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use backend::Instance;
use parking_lot::Mutex;

/// Outcome of the last operation the dispatcher ran on an instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstanceStatus {
    #[default]
    Idle,
    Accepted,
    Busy,
    Failed,
}

pub(crate) struct InstanceSlot<I: Instance> {
    pub(crate) handle: I,
    active: AtomicBool,
    polling: AtomicBool,
    last_status: Mutex<InstanceStatus>,
}

impl<I: Instance> InstanceSlot<I> {
    fn new(handle: I) -> Self {
        Self {
            handle,
            active: AtomicBool::new(true),
            polling: AtomicBool::new(true),
            last_status: Mutex::new(InstanceStatus::Idle),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    pub(crate) fn record(&self, status: InstanceStatus) {
        *self.last_status.lock() = status;
    }

    pub(crate) fn last_status(&self) -> InstanceStatus {
        *self.last_status.lock()
    }
}

/// The `M` opened instances and the dispatcher's round-robin cursor.
pub(crate) struct InstancePool<I: Instance> {
    slots: Box<[InstanceSlot<I>]>,
    next: AtomicUsize,
}

impl<I: Instance> InstancePool<I> {
    pub(crate) fn new(handles: Vec<I>) -> Self {
        Self {
            slots: handles.into_iter().map(InstanceSlot::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, idx: usize) -> &InstanceSlot<I> {
        &self.slots[idx]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &InstanceSlot<I>> {
        self.slots.iter()
    }

    /// The instance the next job goes to.
    pub(crate) fn current(&self) -> &InstanceSlot<I> {
        &self.slots[self.next.load(Ordering::Acquire)]
    }

    pub(crate) fn advance(&self) {
        let n: usize = self.slots.len();
        let _ = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % n));
    }

    /// Jobs accepted by any instance and not yet retired.
    pub(crate) fn in_flight(&self) -> usize {
        self.slots.iter().map(|slot| slot.handle.in_flight()).sum()
    }

    /// Stops accepting new work on every instance.
    pub(crate) fn deactivate(&self) {
        for slot in self.slots.iter() {
            slot.active.store(false, Ordering::Release);
        }
    }

    pub(crate) fn stop_polling(&self) {
        for slot in self.slots.iter() {
            slot.polling.store(false, Ordering::Release);
        }
    }
}
