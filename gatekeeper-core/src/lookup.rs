use crate::challenge::Collection;
use crate::error::{GateError, GateResult};
use subtle::ConstantTimeEq;

/// CRC32 polynomial the original gate uses to pick a challenge slot.
const CRC32_POLY: u32 = 0xD582_8281;

/// Deterministically pick a challenge index for `authkey`: `crc32(authkey) mod N`.
pub fn index_for_authkey(authkey: &[u8], no_challenges: u32) -> u32 {
    crc32_custom(authkey) % no_challenges
}

/// `crc32fast` only ships the IEEE polynomial publicly, so the custom
/// `0xD5828281` polynomial the original gate uses is computed with a small
/// table-less bit-at-a-time CRC (reflected input/output, final XOR
/// 0xFFFFFFFF). Go's `hash/crc32.MakeTable` consumes the polynomial directly
/// with no extra bit-reversal — same convention as its predefined `IEEE`
/// constant — so `CRC32_POLY` is XOR-ed in as-is, not `reverse_bits()`-ed.
fn crc32_custom(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC32_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Given `authkey`, return the base64-encoded public secret of its matching
/// challenge in `current`. A lookup miss (`challenges[i].idx == i` violated)
/// is a broken invariant, not a client error — it surfaces as a typed
/// `GateError`, not a client-visible response.
pub fn serve(current: &Collection, authkey: &[u8]) -> GateResult<String> {
    let index = index_for_authkey(authkey, current.challenges.len() as u32);
    current
        .challenges
        .get(index as usize)
        .map(|c| c.secret_b64())
        .ok_or(GateError::ChallengeLookupMiss {
            index,
            size: current.challenges.len() as u32,
        })
}

/// Check a posted `result` hex proof against the matching challenge in either
/// `current` or `prev` (covers the epoch boundary). Empty answer is always false.
pub fn verify(current: &Collection, prev: &Collection, authkey: &[u8], result: &str) -> bool {
    if result.is_empty() {
        return false;
    }
    let index = index_for_authkey(authkey, current.challenges.len() as u32) as usize;

    let matches = |collection: &Collection| -> bool {
        collection
            .challenges
            .get(index)
            .map(|c| bool::from(c.proof().as_bytes().ct_eq(result.as_bytes())))
            .unwrap_or(false)
    };

    matches(current) || matches(prev)
}
