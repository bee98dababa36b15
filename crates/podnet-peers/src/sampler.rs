//! Validator sampling.
//!
//! Draws `n` distinct pods uniformly at random without replacement from a
//! role pool, never selecting the caller itself.

use std::collections::HashSet;

use podnet_ledger::Address;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::trace;

use crate::error::{Error, Result};
use crate::pod::{Pod, PodRole};

/// Select `n` distinct pods from `pool`, excluding `exclude`.
///
/// Duplicate addresses in the pool count once. Fails with
/// [`Error::InsufficientCandidates`] when fewer than `n` candidates remain.
pub fn select_random_with<R: Rng + ?Sized>(
    pool: &[Pod],
    n: usize,
    exclude: &Address,
    role: PodRole,
    rng: &mut R,
) -> Result<Vec<Pod>> {
    let mut seen = HashSet::new();
    let candidates: Vec<&Pod> = pool
        .iter()
        .filter(|p| &p.address != exclude)
        .filter(|p| seen.insert(&p.address))
        .collect();

    if candidates.len() < n {
        return Err(Error::InsufficientCandidates {
            role,
            requested: n,
            available: candidates.len(),
        });
    }

    let selected: Vec<Pod> = candidates
        .choose_multiple(rng, n)
        .map(|p| (*p).clone())
        .collect();

    trace!(
        %role,
        requested = n,
        pool = candidates.len(),
        "Selected validators"
    );
    Ok(selected)
}

/// [`select_random_with`] using the thread-local RNG.
pub fn select_random(pool: &[Pod], n: usize, exclude: &Address, role: PodRole) -> Result<Vec<Pod>> {
    select_random_with(pool, n, exclude, role, &mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use podnet_ledger::Wallet;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::net::SocketAddr;

    fn pod(seed: u8) -> Pod {
        let wallet = Wallet::from_seed(&[seed; 32]);
        let location: SocketAddr = format!("127.0.0.1:{}", 6000 + seed as u16).parse().unwrap();
        Pod::new(wallet.public_key().clone(), location, PodRole::Regular)
    }

    fn pool(size: u8) -> Vec<Pod> {
        (1..=size).map(pod).collect()
    }

    #[test]
    fn excludes_self() {
        let pool = pool(3);
        let me = pool[0].address.clone();
        for _ in 0..50 {
            let picked = select_random(&pool, 2, &me, PodRole::Regular).unwrap();
            assert!(picked.iter().all(|p| p.address != me));
        }
    }

    #[test]
    fn insufficient_when_only_self_remains() {
        let pool = pool(2);
        let me = pool[0].address.clone();
        let err = select_random(&pool, 2, &me, PodRole::Partner).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCandidates {
                role: PodRole::Partner,
                requested: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn duplicate_pool_entries_count_once() {
        let mut pool = pool(2);
        pool.push(pool[1].clone());
        pool.push(pool[1].clone());
        let me = pool[0].address.clone();
        assert!(select_random(&pool, 2, &me, PodRole::Regular).is_err());
    }

    #[test]
    fn exact_fit_returns_everyone_else() {
        let pool = pool(5);
        let me = pool[2].address.clone();
        let picked = select_random(&pool, 4, &me, PodRole::Regular).unwrap();
        let got: HashSet<_> = picked.iter().map(|p| p.address.clone()).collect();
        let want: HashSet<_> = pool
            .iter()
            .filter(|p| p.address != me)
            .map(|p| p.address.clone())
            .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn all_candidates_eventually_chosen() {
        let pool = pool(6);
        let me = pool[0].address.clone();
        let mut rng = StdRng::seed_from_u64(42);
        let mut hit = HashSet::new();
        for _ in 0..200 {
            for p in select_random_with(&pool, 2, &me, PodRole::Regular, &mut rng).unwrap() {
                hit.insert(p.address);
            }
        }
        assert_eq!(hit.len(), 5);
    }

    proptest! {
        #[test]
        fn selection_invariants(size in 2u8..20, n_frac in 0.0f64..1.0, me_idx in 0usize..20, seed in any::<u64>()) {
            let pool = pool(size);
            let me = pool[me_idx % pool.len()].address.clone();
            let n = ((size as f64 - 1.0) * n_frac) as usize;
            let mut rng = StdRng::seed_from_u64(seed);

            let picked = select_random_with(&pool, n, &me, PodRole::Regular, &mut rng).unwrap();
            prop_assert_eq!(picked.len(), n);

            let distinct: HashSet<_> = picked.iter().map(|p| p.address.clone()).collect();
            prop_assert_eq!(distinct.len(), n);
            prop_assert!(picked.iter().all(|p| p.address != me));
            prop_assert!(picked.iter().all(|p| pool.contains(p)));
        }
    }
}
