//! PKCE verifier/challenge and CSRF state generation.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::{TryRngCore, rngs::OsRng},
    sha2::{Digest, Sha256},
};

use crate::{
    error::{OAuthError, Result},
    types::PkcePair,
};

const RANDOM_BYTES: usize = 32;

fn random_token() -> Result<String> {
    let mut bytes = [0u8; RANDOM_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| OAuthError::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// 32 bytes from the OS random source, base64url without padding (43 chars).
pub fn generate_verifier() -> Result<String> {
    random_token()
}

/// S256 challenge: base64url(SHA-256(verifier)) without padding.
pub fn derive_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// CSRF state, drawn independently of the verifier.
pub fn generate_state() -> Result<String> {
    random_token()
}

impl PkcePair {
    pub fn generate() -> Result<Self> {
        let verifier = generate_verifier()?;
        let challenge = derive_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}
