//! Backend-generic tests of the offload engine.
//!
//! Every function takes a freshly constructed backend and drives a
//! [`Context`] over it. [`offload_test_suite!`](crate::offload_test_suite)
//! instantiates them as `#[test]`s for one backend type.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use backend::{
    Backend,
    layouts::{byte_len, decode_be, encode_be},
    reference,
};
use itertools::izip;
use rug::Integer;
use sampling::Source;

use crate::{
    config::OffloadConfig,
    context::{Context, LifecycleState},
    error::Error,
    request::Completion,
};

#[macro_export]
macro_rules! offload_test_suite {
    (
        mod $modname:ident,
        backend = $backend:expr,
        tests = {
            $( $(#[$attr:meta])* $test_name:ident => $impl:path ),+ $(,)?
        }
    ) => {
        mod $modname {
            $(
                $(#[$attr])*
                #[test]
                fn $test_name() {
                    ($impl)($backend);
                }
            )+
        }
    };
}

/// Small limits so every code path is hit quickly. Needs a backend exposing
/// at least two instances.
pub fn test_config() -> OffloadConfig {
    OffloadConfig::default()
        .with_instances(2)
        .with_queue_capacity(64)
        .with_outstanding_queues(4)
        .with_max_pending(32)
        .with_restart_threshold(4)
        .with_wait_timeout(Duration::from_secs(20))
}

fn running<B: Backend>(backend: B, config: OffloadConfig) -> Context<B> {
    let ctx: Context<B> = Context::new(backend, config);
    ctx.acquire_devices().expect("acquire_devices");
    ctx
}

/// An odd modulus of exactly `bits` bits with `count` random bases and
/// exponents below it.
pub fn random_batch(source: &mut Source, bits: usize, count: usize) -> (Integer, Vec<Integer>, Vec<Integer>) {
    let mut modulus: Integer = source.next_integer_bits(bits);
    modulus.set_bit((bits - 1) as u32, true);
    modulus.set_bit(0, true);
    let bases: Vec<Integer> = (0..count).map(|_| source.next_integer_below(&modulus)).collect();
    let exponents: Vec<Integer> = (0..count).map(|_| source.next_integer_below(&modulus)).collect();
    (modulus, bases, exponents)
}

fn be(value: &Integer, bits: usize) -> Vec<u8> {
    encode_be(value, byte_len(bits)).expect("operand fits")
}

fn output(done: Completion) -> Integer {
    decode_be(&done.into_result().expect("request succeeded"))
}

pub fn test_modexp_roundtrip<B: Backend>(backend: B) {
    const BITS: usize = 1024;
    let ctx = running(backend, test_config());
    let (base, exponent, modulus) = (Integer::from(216), Integer::from(3), Integer::from(7));

    let id = ctx
        .submit_modexp(&be(&base, BITS), &be(&exponent, BITS), &be(&modulus, BITS), BITS)
        .unwrap();
    let mut done: Vec<Completion> = ctx.drain(1).unwrap();
    assert_eq!(done.len(), 1);
    let done = done.remove(0);
    assert_eq!(done.id, id);
    let bytes = done.into_result().unwrap();
    assert_eq!(bytes.len(), BITS / 8);
    assert_eq!(decode_be(&bytes), 6);
    assert_eq!(decode_be(&bytes), reference::modexp(&base, &exponent, &modulus).unwrap());

    let queue = ctx.acquire_batch_queue().unwrap();
    ctx.submit_modexp_mt(queue, &be(&base, BITS), &be(&exponent, BITS), &be(&modulus, BITS), BITS)
        .unwrap();
    let done = ctx.release_batch_queue(queue, 1).unwrap();
    assert_eq!(output(done.into_iter().next().unwrap()), 6);
}

pub fn test_idempotent_lifecycle<B: Backend>(backend: B) {
    let ctx: Context<B> = Context::new(backend, test_config());
    assert_eq!(ctx.state(), LifecycleState::Inactive);
    ctx.release_devices();
    assert_eq!(ctx.state(), LifecycleState::Inactive);

    ctx.acquire_devices().unwrap();
    ctx.acquire_devices().unwrap();
    assert!(ctx.is_running());

    ctx.release_devices();
    ctx.release_devices();
    assert_eq!(ctx.state(), LifecycleState::Inactive);
    assert!(matches!(ctx.submit_modexp(&[3], &[2], &[5], 8), Err(Error::NotRunning)));
    assert!(matches!(ctx.acquire_batch_queue(), Err(Error::NotRunning)));

    // A second acquisition starts from clean state.
    ctx.acquire_devices().unwrap();
    ctx.submit_modexp(&[3], &[2], &[5], 8).unwrap();
    assert_eq!(output(ctx.drain(1).unwrap().remove(0)), 4);
    assert_eq!(ctx.stats().submitted, 1);
}

pub fn test_fifo_within_queue<B: Backend>(backend: B) {
    const BITS: usize = 256;
    let ctx = running(backend, test_config());
    let mut source: Source = Source::new([7u8; 32]);
    let (modulus, bases, exponents) = random_batch(&mut source, BITS, 40);

    let queue = ctx.acquire_batch_queue().unwrap();
    let ids: Vec<_> = izip!(&bases, &exponents)
        .map(|(b, e)| {
            ctx.submit_modexp_mt(queue, &be(b, BITS), &be(e, BITS), &be(&modulus, BITS), BITS)
                .unwrap()
        })
        .collect();
    let done: Vec<Completion> = ctx.release_batch_queue(queue, ids.len()).unwrap();

    assert_eq!(done.iter().map(|c| c.id).collect::<Vec<_>>(), ids);
    for (c, b, e) in izip!(done, &bases, &exponents) {
        assert_eq!(output(c), reference::modexp(b, e, &modulus).unwrap());
    }
}

pub fn test_no_lost_request<B: Backend>(backend: B) {
    const BITS: usize = 128;
    const THREADS: usize = 4;
    const PER_THREAD: usize = 100;
    let ctx = running(backend, test_config());

    thread::scope(|scope| {
        for t in 0..THREADS {
            let ctx = &ctx;
            scope.spawn(move || {
                let mut source: Source = Source::new([t as u8; 32]);
                let (modulus, bases, exponents) = random_batch(&mut source, BITS, PER_THREAD);
                let queue = ctx.acquire_batch_queue().unwrap();
                for (b, e) in izip!(&bases, &exponents) {
                    ctx.submit_modexp_mt(queue, &be(b, BITS), &be(e, BITS), &be(&modulus, BITS), BITS)
                        .unwrap();
                }
                let done = ctx.release_batch_queue(queue, PER_THREAD).unwrap();
                assert_eq!(done.len(), PER_THREAD);
                assert!(done.iter().all(Completion::is_ready));
            });
        }
    });

    let stats = ctx.stats();
    assert_eq!(stats.submitted, (THREADS * PER_THREAD) as u64);
    assert_eq!(stats.completed, stats.submitted);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.pending, 0);
}

pub fn test_pool_exhaustion_blocks<B: Backend>(backend: B) {
    let ctx = running(backend, test_config().with_outstanding_queues(2));
    let first = ctx.acquire_batch_queue().unwrap();
    let _second = ctx.acquire_batch_queue().unwrap();
    assert_eq!(ctx.busy_queues(), 2);

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        let ctx = &ctx;
        scope.spawn(move || {
            let queue = ctx.acquire_batch_queue().unwrap();
            tx.send(queue).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(ctx.release_batch_queue(first, 0).unwrap().is_empty());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), first);
    });
    assert_eq!(ctx.busy_queues(), 2);
}

pub fn test_busy_queue_does_not_starve_others<B: Backend>(backend: B) {
    const OTHERS: usize = 2;
    const PER_QUEUE: usize = 50;
    const HOG_LIMIT: usize = 100_000;
    let ctx = running(backend, test_config());
    // Checked out first, so the fixed-order scan always reaches it first.
    let hog = ctx.acquire_batch_queue().unwrap();
    assert_eq!(hog.index(), 0);
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        let ctx = &ctx;
        let stop = &stop;
        let feeder = scope.spawn(move || {
            let mut submitted: usize = 0;
            while !stop.load(Ordering::Acquire) && submitted < HOG_LIMIT {
                ctx.submit_modexp_mt(hog, &[3], &[2], &[5], 8).unwrap();
                submitted += 1;
            }
            ctx.release_batch_queue(hog, submitted).unwrap()
        });
        let others: Vec<_> = (0..OTHERS)
            .map(|_| {
                scope.spawn(move || {
                    let queue = ctx.acquire_batch_queue().unwrap();
                    for _ in 0..PER_QUEUE {
                        ctx.submit_modexp_mt(queue, &[2], &[3], &[5], 8).unwrap();
                    }
                    ctx.release_batch_queue(queue, PER_QUEUE).unwrap()
                })
            })
            .collect();

        let served: Vec<Vec<Completion>> = others.into_iter().map(|h| h.join().unwrap()).collect();
        stop.store(true, Ordering::Release);
        for done in served {
            assert_eq!(done.len(), PER_QUEUE);
            assert!(done.into_iter().all(|c| output(c) == 3));
        }
        assert!(feeder.join().unwrap().iter().all(Completion::is_ready));
    });
}

pub fn test_backpressure_bound<B: Backend>(backend: B) {
    const MAX_PENDING: usize = 4;
    let config = test_config().with_max_pending(MAX_PENDING).with_restart_threshold(1);
    let ctx = running(backend, config);
    for i in 0..200u32 {
        ctx.submit_modexp(&[(i % 200) as u8], &[3], &[251], 8).unwrap();
    }
    let done = ctx.drain(200).unwrap();
    assert!(done.into_iter().all(|c| c.is_ready()));
    let stats = ctx.stats();
    assert!(stats.peak_pending >= 1);
    assert!(stats.peak_pending <= MAX_PENDING as u64, "peak {} > {MAX_PENDING}", stats.peak_pending);
}

pub fn test_concurrent_stress<B: Backend>(backend: B) {
    const BITS: usize = 512;
    const THREADS: usize = 6;
    const ROUNDS: usize = 3;
    const PER_ROUND: usize = 50;
    let ctx = running(backend, test_config().with_queue_capacity(16));

    thread::scope(|scope| {
        for t in 0..THREADS {
            let ctx = &ctx;
            scope.spawn(move || {
                let mut source: Source = Source::new([(t + 100) as u8; 32]);
                for _ in 0..ROUNDS {
                    let (modulus, bases, exponents) = random_batch(&mut source, BITS, PER_ROUND);
                    let queue = ctx.acquire_batch_queue().unwrap();
                    for (b, e) in izip!(&bases, &exponents) {
                        ctx.submit_modexp_mt(queue, &be(b, BITS), &be(e, BITS), &be(&modulus, BITS), BITS)
                            .unwrap();
                    }
                    let done = ctx.release_batch_queue(queue, PER_ROUND).unwrap();
                    for (c, b, e) in izip!(done, &bases, &exponents) {
                        assert_eq!(output(c), reference::modexp(b, e, &modulus).unwrap());
                    }
                }
            });
        }
    });
    assert_eq!(ctx.stats().pending, 0);
}

pub fn test_invalid_params<B: Backend>(backend: B) {
    let ctx = running(backend, test_config());

    assert!(matches!(ctx.submit_modexp(&[3], &[2], &[5, 0], 8), Err(Error::InvalidParam(_))));
    assert!(matches!(ctx.submit_modexp(&[3], &[2], &[0], 8), Err(Error::InvalidParam(_))));
    assert!(matches!(ctx.submit_modexp(&[], &[], &[], 0), Err(Error::InvalidParam(_))));
    assert!(matches!(ctx.drain(1), Err(Error::InvalidParam(_))));

    let queue = ctx.acquire_batch_queue().unwrap();
    assert!(matches!(
        ctx.submit_modexp_mt(queue, &[3], &[2], &[5, 0], 8),
        Err(Error::InvalidParam(_))
    ));
    ctx.submit_modexp_mt(queue, &[3], &[2], &[5], 8).unwrap();
    assert!(matches!(ctx.release_batch_queue(queue, 2), Err(Error::InvalidParam(_))));
    assert_eq!(output(ctx.release_batch_queue(queue, 1).unwrap().remove(0)), 4);

    // Nothing was left behind by the rejected submits.
    assert_eq!(ctx.stats().submitted, 1);
}
