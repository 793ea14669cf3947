use crate::errors::{BingoResult, GameError, StorageError};
use crate::game_store::GameStore;
use crate::games::types::VRFBundle;
use chrono::{DateTime, Utc};
use schnorrkel::{ExpansionMode, Keypair, MiniSecretKey, PublicKey, Signature};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const VRF_SIGNING_CONTEXT: &[u8] = b"bingohall-draw";
const VRF_SEED_KEY: &[u8] = b"vrf:mini_secret_seed";

/// Commits each game to a draw seed the operator cannot choose freely.
///
/// The seed is the SHA-256 of a schnorrkel signature over the game's
/// identity, so the published bundle proves which key produced it.
pub struct VRFSeedEngine {
    keypair: Arc<Keypair>,
}

impl VRFSeedEngine {
    /// Create a new VRF engine with a keypair
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Create a new VRF engine with a random keypair (for testing)
    pub fn new_random() -> Self {
        use rand_core::OsRng;
        let keypair = Keypair::generate_with(OsRng);
        Self::new(keypair)
    }

    /// Engine whose key survives restarts, so published public keys stay valid
    pub fn load_or_create(store: &GameStore) -> BingoResult<Self> {
        let seed = store.transact("vrf_key", |txn| {
            if let Some(existing) = txn.get_raw(VRF_SEED_KEY)? {
                let seed: [u8; 32] = existing.try_into().map_err(|_| {
                    StorageError::CorruptedData("VRF seed must be 32 bytes".to_string())
                })?;
                return Ok(seed);
            }

            use rand_core::OsRng;
            let seed = MiniSecretKey::generate_with(OsRng).to_bytes();
            txn.put_raw(VRF_SEED_KEY.to_vec(), seed.to_vec());
            tracing::info!("Generated new VRF signing key");
            Ok(seed)
        })?;

        let mini = MiniSecretKey::from_bytes(&seed)
            .map_err(|e| StorageError::CorruptedData(format!("Invalid VRF seed: {:?}", e)))?;
        Ok(Self::new(mini.expand_to_keypair(ExpansionMode::Ed25519)))
    }

    /// Deterministic VRF input for a game at the moment it starts
    pub fn seed_input(game_id: &str, scheduled_start: DateTime<Utc>, cards_sold: u32) -> String {
        format!(
            "bingo:{}:{}:{}",
            game_id,
            scheduled_start.timestamp_millis(),
            cards_sold
        )
    }

    /// Generate the draw seed commitment for a game
    pub fn commit_seed(
        &self,
        game_id: &str,
        scheduled_start: DateTime<Utc>,
        cards_sold: u32,
    ) -> Result<VRFBundle, GameError> {
        let input_message = Self::seed_input(game_id, scheduled_start, cards_sold);
        let (vrf_output, vrf_proof) = self.vrf_sign(input_message.as_bytes());

        Ok(VRFBundle {
            vrf_output: hex::encode(vrf_output),
            vrf_proof: hex::encode(vrf_proof),
            public_key: self.public_key_hex(),
            input_message,
        })
    }

    /// Internal VRF signing (generates output + proof)
    fn vrf_sign(&self, message: &[u8]) -> ([u8; 32], [u8; 64]) {
        use schnorrkel::context::SigningContext;

        let ctx = SigningContext::new(VRF_SIGNING_CONTEXT);
        let transcript = ctx.bytes(message);
        let signature = self.keypair.sign(transcript).to_bytes();

        // VRF output is hash of signature (deterministic)
        let vrf_output: [u8; 32] = Sha256::digest(signature).into();
        (vrf_output, signature)
    }

    /// The 32-byte permutation seed carried by a bundle
    pub fn seed_from_bundle(bundle: &VRFBundle) -> Result<[u8; 32], GameError> {
        hex::decode(&bundle.vrf_output)
            .map_err(|e| GameError::SeedFailed(format!("Invalid VRF output hex: {}", e)))?
            .try_into()
            .map_err(|_| GameError::SeedFailed("VRF output must be 32 bytes".to_string()))
    }

    /// Verify a VRF proof (public verification function)
    pub fn verify_vrf_proof(vrf_bundle: &VRFBundle, expected_input: &str) -> Result<bool, GameError> {
        if vrf_bundle.input_message != expected_input {
            return Ok(false);
        }

        let vrf_output = Self::seed_from_bundle(vrf_bundle)?;
        let vrf_proof = hex::decode(&vrf_bundle.vrf_proof)
            .map_err(|e| GameError::SeedFailed(format!("Invalid VRF proof hex: {}", e)))?;
        let public_key_bytes = hex::decode(&vrf_bundle.public_key)
            .map_err(|e| GameError::SeedFailed(format!("Invalid public key hex: {}", e)))?;

        let public_key = PublicKey::from_bytes(&public_key_bytes)
            .map_err(|e| GameError::SeedFailed(format!("Invalid public key: {:?}", e)))?;
        let signature_array: [u8; 64] = vrf_proof
            .try_into()
            .map_err(|_| GameError::SeedFailed("Signature must be 64 bytes".to_string()))?;
        let signature = Signature::from_bytes(&signature_array)
            .map_err(|e| GameError::SeedFailed(format!("Invalid signature: {:?}", e)))?;

        use schnorrkel::context::SigningContext;
        let ctx = SigningContext::new(VRF_SIGNING_CONTEXT);
        let transcript = ctx.bytes(expected_input.as_bytes());
        if public_key.verify(transcript, &signature).is_err() {
            return Ok(false);
        }

        // Verify VRF output is correctly derived from signature
        let computed_output: [u8; 32] = Sha256::digest(signature_array).into();
        Ok(computed_output == vrf_output)
    }

    /// Get the public key as hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_seed_commitment_verifies() {
        let engine = VRFSeedEngine::new_random();
        let start = Utc::now();

        let bundle = engine.commit_seed("game-1", start, 3).unwrap();
        let input = VRFSeedEngine::seed_input("game-1", start, 3);

        assert!(VRFSeedEngine::verify_vrf_proof(&bundle, &input).unwrap());
        assert_eq!(VRFSeedEngine::seed_from_bundle(&bundle).unwrap().len(), 32);

        // Same game, different participant count: different input
        let other = VRFSeedEngine::seed_input("game-1", start, 4);
        assert!(!VRFSeedEngine::verify_vrf_proof(&bundle, &other).unwrap());
    }

    #[test]
    fn test_vrf_tamper_detection() {
        let engine = VRFSeedEngine::new_random();
        let start = Utc::now();
        let mut bundle = engine.commit_seed("game-1", start, 1).unwrap();

        bundle.vrf_output = hex::encode([0xff; 32]);
        let input = VRFSeedEngine::seed_input("game-1", start, 1);
        assert!(!VRFSeedEngine::verify_vrf_proof(&bundle, &input).unwrap());
    }

    #[test]
    fn test_key_is_persisted() {
        let store = GameStore::new(Arc::new(MemoryStorage::new()), 3);
        let first = VRFSeedEngine::load_or_create(&store).unwrap();
        let second = VRFSeedEngine::load_or_create(&store).unwrap();
        assert_eq!(first.public_key_hex(), second.public_key_hex());
    }
}
