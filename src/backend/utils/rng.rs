// src/backend/utils/rng.rs

use ic_cdk::api::management_canister::main::raw_rand;
use rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::cell::RefCell;
use thiserror::Error;

/// Seeding failures. Only logged: key generation keeps working on the fallback seed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RngError {
    #[error("raw_rand call failed: {0}")]
    RandomnessUnavailable(String),

    #[error("raw_rand returned {0} bytes, need 32")]
    ShortSeed(usize),
}

thread_local! {
    // Seeded from raw_rand after install/upgrade. Until then a fixed seed is used;
    // storage keys stay unique regardless because they embed the upload id.
    static INTERNAL_RNG: RefCell<Option<ChaCha20Rng>> = RefCell::new(None);
}

/// Initializes the thread-local ChaCha20Rng using raw_rand from the IC.
/// Should be called during canister init and post_upgrade.
pub async fn initialize_internal_rng() -> Result<(), RngError> {
    let (bytes,) = raw_rand()
        .await
        .map_err(|(code, msg)| RngError::RandomnessUnavailable(format!("{:?} - {}", code, msg)))?;
    seed_from_bytes(&bytes)?;
    crate::log_info!("Internal RNG initialized successfully.");
    Ok(())
}

/// Seeds from the first 32 bytes of `bytes`.
fn seed_from_bytes(bytes: &[u8]) -> Result<(), RngError> {
    let seed: [u8; 32] = bytes
        .get(..32)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(RngError::ShortSeed(bytes.len()))?;
    seed_internal_rng(seed);
    Ok(())
}

pub fn seed_internal_rng(seed: [u8; 32]) {
    INTERNAL_RNG.with(|rng| *rng.borrow_mut() = Some(ChaCha20Rng::from_seed(seed)));
}

/// Fills `dest` from the internal RNG.
pub fn fill_random(dest: &mut [u8]) {
    INTERNAL_RNG.with(|rng| {
        rng.borrow_mut()
            .get_or_insert_with(|| ChaCha20Rng::from_seed([0u8; 32]))
            .fill_bytes(dest)
    })
}

#[cfg(target_arch = "wasm32")]
fn custom_getrandom(buf: &mut [u8]) -> Result<(), getrandom::Error> {
    fill_random(buf);
    Ok(())
}

#[cfg(target_arch = "wasm32")]
getrandom::register_custom_getrandom!(custom_getrandom);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reseeding_changes_the_stream() {
        let mut unseeded = [0u8; 16];
        fill_random(&mut unseeded);

        seed_internal_rng([42; 32]);
        let mut a = [0u8; 16];
        fill_random(&mut a);
        seed_internal_rng([42; 32]);
        let mut b = [0u8; 16];
        fill_random(&mut b);

        assert_eq!(a, b);
        assert_ne!(a, unseeded);
    }

    #[test]
    fn short_raw_rand_output_is_its_own_error() {
        assert_eq!(seed_from_bytes(&[1; 16]), Err(RngError::ShortSeed(16)));

        seed_from_bytes(&[42; 40]).unwrap();
        let mut from_bytes = [0u8; 16];
        fill_random(&mut from_bytes);
        seed_internal_rng([42; 32]);
        let mut direct = [0u8; 16];
        fill_random(&mut direct);
        assert_eq!(from_bytes, direct);
    }
}
