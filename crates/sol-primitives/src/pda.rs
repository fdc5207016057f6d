//! Program Derived Address (PDA) derivation.
//!
//! A PDA is `SHA-256(seed_0 || .. || seed_n || bump || program_id ||
//! "ProgramDerivedAddress")`, accepted only when the digest is NOT a valid
//! Ed25519 point. The bump search runs from 255 down to 0, exactly as the
//! runtime does, so the first off-curve candidate is the canonical one.

use sha2::{Digest, Sha256};

use crate::address::{is_on_curve, Pubkey};
use crate::error::SolError;

/// Maximum number of seeds, including the bump.
pub const MAX_SEEDS: usize = 16;

/// Maximum length of any single seed.
pub const MAX_SEED_LEN: usize = 32;

/// The string appended to PDA derivation: "ProgramDerivedAddress".
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Find the canonical PDA and its bump for `seeds` under `program_id`.
///
/// Deterministic and side-effect free. Seed order matters: any reordering
/// yields an unrelated address that the program will reject (or worse,
/// silently treat as a different account).
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<(Pubkey, u8), SolError> {
    // One slot is reserved for the bump.
    check_seeds(seeds, MAX_SEEDS - 1)?;

    for bump in (0u8..=255).rev() {
        if let Some(address) = hash_candidate(seeds, &[bump], program_id) {
            return Ok((address, bump));
        }
    }

    Err(SolError::DerivationExhausted)
}

/// Derive the PDA for seeds that already include the bump.
///
/// Fails with [`SolError::InvalidSeeds`] when the digest lands on the curve.
pub fn create_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Result<Pubkey, SolError> {
    check_seeds(seeds, MAX_SEEDS)?;

    hash_candidate(seeds, &[], program_id).ok_or_else(|| {
        SolError::InvalidSeeds("derived address lies on the ed25519 curve".into())
    })
}

fn check_seeds(seeds: &[&[u8]], max_seeds: usize) -> Result<(), SolError> {
    if seeds.len() > max_seeds {
        return Err(SolError::InvalidSeeds(format!(
            "{} seeds given, at most {max_seeds} allowed",
            seeds.len()
        )));
    }
    if let Some((idx, seed)) = seeds
        .iter()
        .enumerate()
        .find(|(_, s)| s.len() > MAX_SEED_LEN)
    {
        return Err(SolError::InvalidSeeds(format!(
            "seed {idx} is {} bytes, at most {MAX_SEED_LEN} allowed",
            seed.len()
        )));
    }
    Ok(())
}

/// Returns `Some(address)` if the digest is OFF the curve, `None` otherwise.
fn hash_candidate(seeds: &[&[u8]], bump_seed: &[u8], program_id: &Pubkey) -> Option<Pubkey> {
    let mut hasher = Sha256::new();

    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(bump_seed);
    hasher.update(program_id.as_ref());
    hasher.update(PDA_MARKER);

    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        return None;
    }

    Some(Pubkey::new_from_array(hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Pubkey {
        Pubkey::new_from_array([0x5Au8; 32])
    }

    #[test]
    fn derivation_is_deterministic() {
        let owner = [0x11u8; 32];
        let mint = [0x22u8; 32];
        let seeds: &[&[u8]] = &[b"staker", &owner, &mint];

        let a = find_program_address(seeds, &program()).unwrap();
        let b = find_program_address(seeds, &program()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derived_address_is_off_curve() {
        let mint = [0xBBu8; 32];
        let (pda, _) = find_program_address(&[b"vault", &mint], &program()).unwrap();
        assert!(!pda.is_on_curve(), "PDA must NOT be on the Ed25519 curve");
    }

    #[test]
    fn seed_order_changes_the_address() {
        let owner = [0x01u8; 32];
        let mint = [0x02u8; 32];

        let (a, _) = find_program_address(&[b"staker", &owner, &mint], &program()).unwrap();
        let (b, _) = find_program_address(&[b"staker", &mint, &owner], &program()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn program_id_changes_the_address() {
        let mint = [0x03u8; 32];
        let other = Pubkey::new_from_array([0x5Bu8; 32]);

        let (a, _) = find_program_address(&[b"vault", &mint], &program()).unwrap();
        let (b, _) = find_program_address(&[b"vault", &mint], &other).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn create_with_found_bump_reproduces_address() {
        let mint = [0x44u8; 32];
        let (pda, bump) = find_program_address(&[b"vault", &mint], &program()).unwrap();
        let recreated = create_program_address(&[b"vault", &mint, &[bump]], &program()).unwrap();
        assert_eq!(recreated, pda);
    }

    #[test]
    fn higher_bumps_are_all_on_curve() {
        // The canonical bump is the first off-curve candidate from 255 down.
        let mint = [0x45u8; 32];
        let (_, bump) = find_program_address(&[b"vault", &mint], &program()).unwrap();
        for higher in bump.saturating_add(1)..=255 {
            if higher == bump {
                continue;
            }
            assert!(
                create_program_address(&[b"vault", &mint, &[higher]], &program()).is_err(),
                "bump {higher} should be on-curve"
            );
        }
    }

    #[test]
    fn oversized_seed_is_rejected() {
        let long = [0u8; 33];
        let err = find_program_address(&[&long], &program()).unwrap_err();
        assert!(matches!(err, SolError::InvalidSeeds(_)));
    }

    #[test]
    fn too_many_seeds_are_rejected() {
        let seed = [1u8; 1];
        let seeds: Vec<&[u8]> = (0..MAX_SEEDS).map(|_| &seed[..]).collect();
        assert!(find_program_address(&seeds, &program()).is_err());

        let seventeen: Vec<&[u8]> = (0..=MAX_SEEDS).map(|_| &seed[..]).collect();
        assert!(matches!(
            create_program_address(&seventeen, &program()),
            Err(SolError::InvalidSeeds(_))
        ));
    }

    // -- Known runtime addresses -------------------------------------------

    #[test]
    fn create_matches_runtime_vectors() {
        fn derive(seeds: &[&[u8]]) -> String {
            let loader: Pubkey = "BPFLoaderUpgradeab1e11111111111111111111111".parse().unwrap();
            create_program_address(seeds, &loader).unwrap().to_string()
        }
        let seed_key: Pubkey = "SeedPubey1111111111111111111111111111111111".parse().unwrap();

        assert_eq!(derive(&[b"", &[1]]), "BwqrghZA2htAcqq8dzP1WDAhTXYTYWj7CHxF5j7TDBAe");
        assert_eq!(
            derive(&["\u{2609}".as_bytes(), &[0]]),
            "13yWmRpaTR4r5nAktwLqMpRNr28tnVUZw26rTvPSSB19"
        );
        assert_eq!(
            derive(&[b"Talking", b"Squirrels"]),
            "2fnQrngrQT4SeLcdToJAD96phoEjNL2man2kfRLCASVk"
        );
        assert_eq!(
            derive(&[seed_key.as_ref(), &[1]]),
            "976ymqVnfE32QFe6NfGDctSvVa36LWnvYxhU6G2232YL"
        );
    }

    #[test]
    fn empty_seed_set_is_allowed() {
        let (pda, _) = find_program_address(&[], &program()).unwrap();
        assert!(!pda.is_on_curve());
    }
}
