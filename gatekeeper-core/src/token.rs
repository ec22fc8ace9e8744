use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Textual length of a derived authkey/ticket token (base32-hex, full encoding).
pub const TOKEN_LEN: usize = 56;

/// Derive the `authkey`/`ticket` token for one epoch bucket.
///
/// `token = base32hex( HMAC-SHA256(secret, LE64(epoch_bucket) || ip_bytes) )`.
/// The MAC input is a 24-byte buffer: the bucket number followed by the peer IP,
/// zero-padded when the IP is shorter than 16 bytes (IPv4 case).
pub fn derive(ip: &[u8], epoch_bucket: u64, secret: &[u8]) -> String {
    let mut message = [0u8; 24];
    message[..8].copy_from_slice(&epoch_bucket.to_le_bytes());
    let ip_len = ip.len().min(16);
    message[8..8 + ip_len].copy_from_slice(&ip[..ip_len]);

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&message);
    let digest = mac.finalize().into_bytes();

    base32::encode(base32::Alphabet::Rfc4648Hex { padding: true }, &digest).to_lowercase()
}

/// Bucket number for wall-clock `unix_time` under a `window_bits`-wide window.
#[inline]
pub fn bucket(unix_time: u64, window_bits: u32) -> u64 {
    unix_time >> window_bits
}

/// Grace window, in buckets, per spec: `2 + window_bits^2`.
///
/// This is the literal formula from the original gate, reproduced as-is (see
/// DESIGN.md open question 1) rather than "corrected" to `2^window_bits`.
#[inline]
pub fn grace_buckets(window_bits: u32) -> u64 {
    2 + (window_bits as u64) * (window_bits as u64)
}

/// Validate a presented token against the current bucket or the grace window
/// behind it. Comparison is constant-time; acceptance is not.
pub fn validate(presented: &str, ip: &[u8], unix_time: u64, window_bits: u32, secret: &[u8]) -> bool {
    if presented.len() != TOKEN_LEN {
        return false;
    }
    let current_bucket = bucket(unix_time, window_bits);
    let expected_now = derive(ip, current_bucket, secret);
    let grace = grace_buckets(window_bits);
    let expected_grace = current_bucket
        .checked_sub(grace)
        .map(|b| derive(ip, b, secret));

    let now_matches = bool::from(presented.as_bytes().ct_eq(expected_now.as_bytes()));
    let grace_matches = expected_grace
        .map(|e| bool::from(presented.as_bytes().ct_eq(e.as_bytes())))
        .unwrap_or(false);

    now_matches || grace_matches
}
