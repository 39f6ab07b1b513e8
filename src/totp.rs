//! Time-based one-time code generation for the anonymous-token flow.
//!
//! The upstream service gates its public token endpoint behind a 30-second,
//! 6-digit, SHA1-based TOTP whose secret ships obfuscated in the web bundle:
//! a fixed byte sequence XORed with a position-dependent mask, the resulting
//! numbers joined into a string, and that string hex-encoded.

use sha1::{Digest, Sha1};

/// Obfuscated secret bytes as shipped in the service's web bundle.
const SECRET_CIPHER: [u8; 17] = [
    12, 56, 76, 33, 88, 44, 88, 33, 78, 78, 11, 66, 22, 22, 55, 69, 54,
];

const PERIOD_SECS: u64 = 30;
const DIGITS: u32 = 6;

/// De-obfuscates the secret and returns it hex-encoded, the form the TOTP
/// generator consumes.
pub fn secret_hex() -> String {
    let joined: String = SECRET_CIPHER
        .iter()
        .enumerate()
        .map(|(i, b)| (b ^ ((i as u8 % 33) + 9)).to_string())
        .collect();
    hex::encode(joined.as_bytes())
}

/// Generates the 6-digit code for the given Unix time (seconds). Returns
/// `None` if the hex secret is malformed.
pub fn generate(secret_hex: &str, unix_secs: u64) -> Option<String> {
    let key = hex::decode(secret_hex).ok()?;
    let counter = unix_secs / PERIOD_SECS;
    let digest = hmac_sha1(&key, &counter.to_be_bytes());

    // RFC 4226 dynamic truncation.
    let offset = (digest[19] & 0x0f) as usize;
    let code = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    Some(format!(
        "{:0width$}",
        code % 10u32.pow(DIGITS),
        width = DIGITS as usize
    ))
}

/// HMAC-SHA1 over the `sha1` hasher (RFC 2104 construction).
fn hmac_sha1(key: &[u8], message: &[u8]) -> [u8; 20] {
    const BLOCK: usize = 64;

    let mut key_block = [0u8; BLOCK];
    if key.len() > BLOCK {
        key_block[..20].copy_from_slice(&Sha1::digest(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha1::new();
    let mut outer = Sha1::new();
    let mut ipad = [0u8; BLOCK];
    let mut opad = [0u8; BLOCK];
    for i in 0..BLOCK {
        ipad[i] = key_block[i] ^ 0x36;
        opad[i] = key_block[i] ^ 0x5c;
    }

    inner.update(ipad);
    inner.update(message);
    outer.update(opad);
    outer.update(inner.finalize());
    outer.finalize().into()
}
