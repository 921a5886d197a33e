use criterion::{Criterion, criterion_group, criterion_main};

const BATCH: usize = 64;

pub fn bench_modexp_reference(c: &mut Criterion) {
    use backend::reference;
    use criterion::BenchmarkId;
    use offload::test_suite::random_batch;
    use rug::Integer;
    use sampling::Source;
    use std::hint::black_box;

    let mut group = c.benchmark_group("modexp_reference");

    fn runner(bits: usize) -> impl FnMut() {
        let mut source: Source = Source::new([0u8; 32]);
        let (modulus, bases, exponents): (Integer, Vec<Integer>, Vec<Integer>) = random_batch(&mut source, bits, BATCH);
        move || {
            black_box(reference::modexp_mb(&bases, &exponents, &modulus).unwrap());
        }
    }

    for bits in [1024, 2048, 4096] {
        let id: BenchmarkId = BenchmarkId::from_parameter(format!("bits: {bits}, batch: {BATCH}"));
        let mut runner = runner(bits);
        group.bench_with_input(id, &(), |b, _| b.iter(&mut runner));
    }

    group.finish();
}

pub fn bench_modexp_offload(c: &mut Criterion) {
    use backend::{
        implementation::CpuEmulated,
        layouts::{byte_len, encode_be},
    };
    use criterion::BenchmarkId;
    use offload::{Context, OffloadConfig, test_suite::random_batch};
    use sampling::Source;
    use std::{hint::black_box, sync::Arc, time::Duration};

    let mut group = c.benchmark_group("modexp_offload");

    let ctx: Arc<Context<CpuEmulated>> = Arc::new(Context::new(
        CpuEmulated::with_instances(8),
        OffloadConfig::default()
            .with_instances(8)
            .with_wait_timeout(Duration::from_secs(60)),
    ));
    ctx.acquire_devices().unwrap();

    fn runner(ctx: Arc<Context<CpuEmulated>>, bits: usize) -> impl FnMut() {
        let mut source: Source = Source::new([0u8; 32]);
        let (modulus, bases, exponents) = random_batch(&mut source, bits, BATCH);
        let len: usize = byte_len(bits);
        let modulus: Vec<u8> = encode_be(&modulus, len).unwrap();
        let operands: Vec<(Vec<u8>, Vec<u8>)> = bases
            .iter()
            .zip(&exponents)
            .map(|(b, e)| (encode_be(b, len).unwrap(), encode_be(e, len).unwrap()))
            .collect();
        move || {
            let queue = ctx.acquire_batch_queue().unwrap();
            for (b, e) in &operands {
                ctx.submit_modexp_mt(queue, b, e, &modulus, bits).unwrap();
            }
            black_box(ctx.release_batch_queue(queue, operands.len()).unwrap());
        }
    }

    for bits in [1024, 2048, 4096] {
        let id: BenchmarkId = BenchmarkId::from_parameter(format!("bits: {bits}, batch: {BATCH}"));
        let mut runner = runner(ctx.clone(), bits);
        group.bench_with_input(id, &(), |b, _| b.iter(&mut runner));
    }

    group.finish();
    ctx.release_devices();
}

criterion_group!(benches, bench_modexp_reference, bench_modexp_offload);
criterion_main!(benches);
