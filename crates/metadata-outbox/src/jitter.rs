//! Secure jitter source for the external worker's backoff computation.
//!
//! `backoff = base * 2^retry_count * (1 + jitter)` where `jitter` comes from
//! [`secure_random_f64`]. Scoped to jitter only — this is not a
//! general-purpose RNG facility.

use std::sync::Once;

use rand::Rng;

static FALLBACK_WARNED: Once = Once::new();

/// Draw a uniform value in `[0.0, 1.0)` from the OS CSPRNG.
///
/// Reads 8 bytes from [`getrandom`], interprets them as a big-endian `u64`,
/// and divides by `u64::MAX`. If the CSPRNG is unavailable, falls back to a
/// non-cryptographic PRNG and emits a single process-lifetime warning with
/// no sensitive context — never per-call spam.
pub fn secure_random_f64() -> f64 {
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => {
            let n = u64::from_be_bytes(buf);
            (n as f64) / (u64::MAX as f64)
        }
        Err(_) => {
            FALLBACK_WARNED.call_once(|| {
                tracing::warn!("secure_random_f64: OS CSPRNG unavailable, falling back to non-crypto PRNG for backoff jitter");
            });
            rand::thread_rng().gen::<f64>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_unit_interval() {
        for _ in 0..1000 {
            let v = secure_random_f64();
            assert!((0.0..1.0).contains(&v), "jitter {v} out of range");
        }
    }

    #[test]
    fn is_not_constant() {
        let samples: std::collections::HashSet<_> = (0..32)
            .map(|_| secure_random_f64().to_bits())
            .collect();
        assert!(samples.len() > 1, "jitter source produced a constant value");
    }
}
