use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

/// Why an inbound message failed verification. Distinct variants keep
/// the warn logs useful; callers treat every variant the same way
/// (drop the message, touch no state).
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("public key is not a valid base58 Ed25519 address")]
    InvalidPublicKey,
    #[error("signature is not a JSON array of 64 bytes")]
    MalformedSignature,
    #[error("signature does not match message and key")]
    Mismatch,
}

/// Check a detached signature against a claimed base58 public key and
/// the exact message string. Deterministic and side-effect free.
///
/// `signature_json` is the wire encoding: a JSON array of the 64
/// signature bytes.
pub fn verify_signature(
    message: &str,
    public_key_b58: &str,
    signature_json: &str,
) -> Result<(), VerifyError> {
    let key_bytes: [u8; 32] = bs58::decode(public_key_b58)
        .into_vec()
        .map_err(|_| VerifyError::InvalidPublicKey)?
        .try_into()
        .map_err(|_| VerifyError::InvalidPublicKey)?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| VerifyError::InvalidPublicKey)?;

    let sig_bytes: Vec<u8> =
        serde_json::from_str(signature_json).map_err(|_| VerifyError::MalformedSignature)?;
    let sig_bytes: [u8; 64] =
        sig_bytes.try_into().map_err(|_| VerifyError::MalformedSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key.verify(message.as_bytes(), &signature).map_err(|_| VerifyError::Mismatch)
}
