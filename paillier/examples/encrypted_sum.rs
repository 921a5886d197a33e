use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use backend::implementation::{CpuEmulated, EmulatedConfig};
use offload::{Context, OffloadConfig};
use paillier::{CpuEngine, HybridEngine, KeyPair, ModExpEngine, OffloadEngine, PaillierResult};
use rug::Integer;
use sampling::Source;
use tracing::info;

const KEY_BITS: usize = 2048;
const VALUES: u32 = 256;

fn encrypted_sum<E: ModExpEngine>(pair: &KeyPair, engine: &E, source: &mut Source) -> PaillierResult<Integer> {
    let plaintexts: Vec<Integer> = (1..=VALUES).map(Integer::from).collect();
    let now: Instant = Instant::now();
    let cts = pair.public.encrypt_batch(&plaintexts, source, engine)?;
    let total = pair.public.sum(&cts).expect("non-empty batch");
    let sum: Integer = pair.private.decrypt(&total, engine)?;
    info!(engine = engine.name(), elapsed = ?now.elapsed(), %sum, "encrypted sum");
    Ok(sum)
}

fn main() -> PaillierResult<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let mut source: Source = Source::from_entropy();
    let pair: KeyPair = KeyPair::generate(KEY_BITS, &mut source)?;

    let backend = CpuEmulated::new(EmulatedConfig {
        instances: 8,
        slots_per_instance: 64,
        ..Default::default()
    });
    let config = OffloadConfig::default().with_wait_timeout(Duration::from_secs(60));
    let ctx = Arc::new(Context::new(backend, config));
    ctx.acquire_devices()?;

    let offload: OffloadEngine<CpuEmulated> = OffloadEngine::new(ctx.clone());
    let expected: Integer = Integer::from(VALUES * (VALUES + 1) / 2);
    for sum in [
        encrypted_sum(&pair, &CpuEngine, &mut source)?,
        encrypted_sum(&pair, &offload, &mut source)?,
        encrypted_sum(&pair, &HybridEngine::new(offload.clone(), 0.5), &mut source)?,
    ] {
        assert_eq!(sum, expected);
    }

    info!(stats = ?ctx.stats(), "offload counters");
    ctx.release_devices();
    Ok(())
}
