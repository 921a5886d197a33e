use rug::Integer;
use sampling::Source;

use crate::{CpuEngine, Error, KeyPair, ModExpEngine};

const BITS: usize = 512;

fn keys(seed: u8) -> (KeyPair, Source) {
    let mut source: Source = Source::new([seed; 32]);
    let pair: KeyPair = KeyPair::generate(BITS, &mut source).unwrap();
    (pair, source)
}

#[test]
fn generated_key_is_consistent() {
    let (pair, _) = keys(1);
    let public = &pair.public;
    assert_eq!(public.bits(), BITS);
    assert_eq!(public.n().significant_bits() as usize, BITS);
    assert_eq!(*public.n_squared(), Integer::from(public.n() * public.n()));
    assert_eq!(public.g(), Integer::from(public.n() + 1));
    assert_eq!(pair.private.public(), public);

    let check: Integer = Integer::from(pair.private.lambda() * pair.private.mu()) % public.n();
    assert_eq!(check, 1);
}

#[test]
fn rejects_bad_key_sizes() {
    let mut source: Source = Source::new([0u8; 32]);
    for bits in [0, 8, 15, 513] {
        assert!(matches!(KeyPair::generate(bits, &mut source), Err(Error::KeySize(b)) if b == bits));
    }
}

#[test]
fn tiny_key_round_trip() {
    let pair: KeyPair = KeyPair::from_primes(&Integer::from(11), &Integer::from(13)).unwrap();
    assert_eq!(*pair.public.n(), 143);
    assert_eq!(*pair.private.lambda(), 60);

    let mut source: Source = Source::new([3u8; 32]);
    let plaintexts: Vec<Integer> = (0..143).map(Integer::from).collect();
    let cts = pair.public.encrypt_batch(&plaintexts, &mut source, &CpuEngine).unwrap();
    let decrypted = pair.private.decrypt_batch(&cts, &CpuEngine).unwrap();
    assert_eq!(decrypted, plaintexts);
}

#[test]
fn encrypt_decrypt_round_trip() {
    let (pair, mut source) = keys(2);
    let n_minus_one: Integer = Integer::from(pair.public.n() - 1);
    let plaintexts: Vec<Integer> = vec![Integer::new(), Integer::from(1), Integer::from(0xdead_beef_u32), n_minus_one];

    let cts = pair.public.encrypt_batch(&plaintexts, &mut source, &CpuEngine).unwrap();
    assert!(cts.iter().all(|c| *c.value() > 0 && c.value() < pair.public.n_squared()));
    assert_eq!(pair.private.decrypt_batch(&cts, &CpuEngine).unwrap(), plaintexts);

    let single = pair.public.encrypt(&plaintexts[2], &mut source, &CpuEngine).unwrap();
    assert_eq!(pair.private.decrypt(&single, &CpuEngine).unwrap(), plaintexts[2]);
}

#[test]
fn encryption_is_randomized() {
    let (pair, mut source) = keys(4);
    let m: Integer = Integer::from(42);
    let a = pair.public.encrypt(&m, &mut source, &CpuEngine).unwrap();
    let b = pair.public.encrypt(&m, &mut source, &CpuEngine).unwrap();
    assert_ne!(a, b);
    assert_eq!(pair.private.decrypt(&a, &CpuEngine).unwrap(), pair.private.decrypt(&b, &CpuEngine).unwrap());
}

#[test]
fn additive_homomorphism_wraps_mod_n() {
    let (pair, mut source) = keys(5);
    let public = &pair.public;
    let n: &Integer = public.n();
    let a: Integer = Integer::from(n - 5);
    let b: Integer = Integer::from(12);

    let ca = public.encrypt(&a, &mut source, &CpuEngine).unwrap();
    let cb = public.encrypt(&b, &mut source, &CpuEngine).unwrap();
    assert_eq!(pair.private.decrypt(&public.add(&ca, &cb), &CpuEngine).unwrap(), 7);

    let plain = public.add_plain(&ca, &Integer::from(4)).unwrap();
    assert_eq!(pair.private.decrypt(&plain, &CpuEngine).unwrap(), Integer::from(n - 1));

    let sum = public.sum([&ca, &cb, &cb]).unwrap();
    assert_eq!(pair.private.decrypt(&sum, &CpuEngine).unwrap(), 19);
    assert!(public.sum([]).is_none());
}

#[test]
fn multiply_by_plaintext() {
    let (pair, mut source) = keys(6);
    let public = &pair.public;
    let cts = public
        .encrypt_batch(&[Integer::from(3), Integer::from(1000)], &mut source, &CpuEngine)
        .unwrap();
    let scaled = public
        .mul_plain_batch(&cts, &[Integer::from(7), Integer::new()], &CpuEngine)
        .unwrap();
    let out = pair.private.decrypt_batch(&scaled, &CpuEngine).unwrap();
    assert_eq!(out, vec![Integer::from(21), Integer::new()]);

    let one = public.mul_plain(&cts[1], &Integer::from(5), &CpuEngine).unwrap();
    assert_eq!(pair.private.decrypt(&one, &CpuEngine).unwrap(), 5000);
}

#[test]
fn out_of_range_inputs_are_rejected() {
    let (pair, mut source) = keys(7);
    let public = &pair.public;
    let n: Integer = public.n().clone();
    assert!(matches!(
        public.encrypt(&n, &mut source, &CpuEngine),
        Err(Error::PlaintextOutOfRange(_))
    ));
    assert!(matches!(
        public.encrypt(&Integer::from(-1), &mut source, &CpuEngine),
        Err(Error::PlaintextOutOfRange(_))
    ));
    assert!(matches!(public.ciphertext(Integer::new()), Err(Error::CiphertextOutOfRange)));
    assert!(matches!(
        public.ciphertext(public.n_squared().clone()),
        Err(Error::CiphertextOutOfRange)
    ));
}

#[test]
fn engine_checks_batch_shape() {
    let err = CpuEngine
        .modexp(&[Integer::from(2)], &[], &Integer::from(7))
        .unwrap_err();
    assert!(matches!(err, Error::LengthMismatch { bases: 1, exponents: 0 }));
    assert!(matches!(
        CpuEngine.modexp(&[Integer::from(2)], &[Integer::from(3)], &Integer::new()),
        Err(Error::Backend(_))
    ));
}
