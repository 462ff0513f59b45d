//! Randomness and digests shared by codes and refresh tokens

use super::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

/// Refresh tokens carry 256 bits of entropy
const REFRESH_TOKEN_BYTES: usize = 32;

pub fn random_bytes<const N: usize>() -> Result<[u8; N], AuthError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf)
        .map_err(|e| AuthError::internal(anyhow::anyhow!("OS randomness unavailable: {e}")))?;
    Ok(buf)
}

/// Opaque, URL-safe refresh token
pub fn refresh_token() -> Result<String, AuthError> {
    let bytes = random_bytes::<REFRESH_TOKEN_BYTES>()?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Uniformly distributed decimal code of `len` digits
pub fn numeric_code(len: usize) -> Result<String, AuthError> {
    let mut code = String::with_capacity(len);
    while code.len() < len {
        for byte in random_bytes::<16>()? {
            // 250 is the largest multiple of 10 below 256
            if byte < 250 && code.len() < len {
                code.push(char::from(b'0' + byte % 10));
            }
        }
    }
    Ok(code)
}

/// Hex SHA-256, used to store codes and refresh tokens at rest
pub fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
