//! Random key material shared across restbase crates

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

/// Length of generated public and secret keys
pub const KEY_LENGTH: usize = 40;

/// Generate `length` random URL-safe characters from the OS RNG.
///
/// Draws `ceil(length * 3 / 4)` random bytes, base64url-encodes them and
/// truncates to the requested length.
pub fn random_urlsafe(length: usize) -> Result<String, getrandom::Error> {
    let mut bytes = vec![0u8; length.div_ceil(4) * 3];
    getrandom::getrandom(&mut bytes)?;

    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(length);
    Ok(encoded)
}
