pub mod keys;
pub mod verification;

pub use keys::{KeyPair, generate_keypair, load_or_generate_keypair, sign_message};
pub use verification::{VerifyError, verify_signature};

use uuid::Uuid;

/// Canonical string a validator signs when it signs up. Binding both
/// the callback id and the claimed key prevents replaying a captured
/// signup under a different request or identity.
pub fn signup_message(callback_id: Uuid, public_key: &str) -> String {
    format!("Signed message for {callback_id}, {public_key}")
}

/// Canonical string a validator signs on every probe reply. The
/// callback id makes the signature single-use.
pub fn reply_message(callback_id: Uuid) -> String {
    format!("Replying to {callback_id}")
}
