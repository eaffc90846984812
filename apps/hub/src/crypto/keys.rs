#![allow(dead_code)] // the hub never signs; this side is for tests and validator tooling

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// Ed25519 keypair. The hub itself never signs anything; this lives
/// here for tests and for tooling that plays the validator side.
#[derive(Clone)]
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl KeyPair {
    pub fn new(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self { signing_key, verifying_key }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Base58 address form used on the wire and as the validator's
    /// durable identity.
    pub fn public_key_b58(&self) -> String {
        bs58::encode(self.public_key_bytes()).into_string()
    }
}

/// Generate a fresh Ed25519 keypair.
pub fn generate_keypair() -> KeyPair {
    let mut csprng = OsRng;
    let mut secret_bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut csprng, &mut secret_bytes);
    KeyPair::new(SigningKey::from_bytes(&secret_bytes))
}

/// Save a keypair's secret seed to a file.
pub fn save_keypair(keypair: &KeyPair, path: &Path) -> Result<()> {
    let secret_bytes = keypair.signing_key.to_bytes();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, secret_bytes).context("Failed to write keypair to file")?;

    tracing::info!("Saved keypair to: {}", path.display());
    Ok(())
}

/// Load a keypair from a file.
pub fn load_keypair(path: &Path) -> Result<KeyPair> {
    let secret_bytes = fs::read(path).context("Failed to read keypair file")?;

    if secret_bytes.len() != 32 {
        anyhow::bail!("Invalid keypair file: expected 32 bytes, got {}", secret_bytes.len());
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&secret_bytes);
    Ok(KeyPair::new(SigningKey::from_bytes(&bytes)))
}

/// Load a keypair from a file, generating and saving one if the file
/// does not exist yet.
pub fn load_or_generate_keypair(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        tracing::info!("Loading existing keypair from: {}", path.display());
        load_keypair(path)
    } else {
        tracing::info!("Generating new keypair and saving to: {}", path.display());
        let keypair = generate_keypair();
        save_keypair(&keypair, path)?;
        Ok(keypair)
    }
}

/// Produce a detached signature over the UTF-8 bytes of `message`,
/// encoded the way validators put it on the wire: a JSON array of the
/// 64 signature bytes.
pub fn sign_message(message: &str, keypair: &KeyPair) -> Result<String> {
    let signature = keypair.signing_key.sign(message.as_bytes());
    Ok(serde_json::to_string(&signature.to_bytes().to_vec())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_expected_shape() {
        let keypair = generate_keypair();
        assert_eq!(keypair.public_key_bytes().len(), 32);
        // 32 bytes encode to 43 or 44 base58 characters.
        assert!((43..=44).contains(&keypair.public_key_b58().len()));
    }

    #[test]
    fn saved_keypair_loads_back_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub_keypair.key");

        let original = generate_keypair();
        save_keypair(&original, &path).unwrap();

        let loaded = load_keypair(&path).unwrap();
        assert_eq!(original.public_key_bytes(), loaded.public_key_bytes());
        assert_eq!(original.public_key_b58(), loaded.public_key_b58());
    }

    #[test]
    fn load_or_generate_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub_keypair.key");

        let first = load_or_generate_keypair(&path).unwrap();
        let second = load_or_generate_keypair(&path).unwrap();
        assert_eq!(first.public_key_bytes(), second.public_key_bytes());
    }

    #[test]
    fn truncated_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(load_keypair(&path).is_err());
    }

    #[test]
    fn signature_encoding_is_a_json_byte_array() {
        let keypair = generate_keypair();
        let encoded = sign_message("hello", &keypair).unwrap();
        let bytes: Vec<u8> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(bytes.len(), 64);
    }
}
