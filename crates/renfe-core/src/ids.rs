//! Search and script-session identifiers
//!
//! All randomness comes from `rand::rng()`, a CSPRNG seeded from the
//! operating system. If the OS cannot provide entropy the first call
//! panics, which is treated as a fatal startup condition.

use rand::Rng;

/// Prefix of every search id
pub const SEARCH_ID_PREFIX: char = '_';

/// Number of random characters after the prefix
const SEARCH_ID_RANDOM_LEN: usize = 4;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Digit alphabet of the DWR client runtime's `tokenify`
const TOKEN_CHARMAP: &[u8] = b"1234567890abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ*$";

/// Largest integer the browser runtime represents exactly (2^53 - 1)
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Generate a search id: `_` followed by 4 random alphanumerics.
///
/// # Example
/// ```
/// let id = renfe_core::ids::new_search_id();
/// assert_eq!(id.len(), 5);
/// assert!(id.starts_with('_'));
/// ```
pub fn new_search_id() -> String {
    let mut rng = rand::rng();
    let mut id = String::with_capacity(1 + SEARCH_ID_RANDOM_LEN);
    id.push(SEARCH_ID_PREFIX);
    for _ in 0..SEARCH_ID_RANDOM_LEN {
        let idx = rng.random_range(0..ALPHANUMERIC.len());
        id.push(ALPHANUMERIC[idx] as char);
    }
    id
}

/// Build a script session id of the form `base/timestampToken-randomToken`.
///
/// The random part is 53 bits wide so it stays within the integer range the
/// upstream client runtime can represent.
pub fn new_session_token(base: &str) -> String {
    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    session_token_at(base, now_ms)
}

fn session_token_at(base: &str, now_ms: u64) -> String {
    let random = rand::rng().random::<u64>() & MAX_SAFE_INTEGER;
    format!("{}/{}-{}", base, tokenify(now_ms), tokenify(random))
}

/// Encode a number in the DWR base-64 token alphabet, least significant
/// digit first. Zero encodes to the empty string.
pub fn tokenify(number: u64) -> String {
    let mut out = String::new();
    let mut remainder = number;
    while remainder > 0 {
        out.push(TOKEN_CHARMAP[(remainder & 0x3F) as usize] as char);
        remainder >>= 6;
    }
    out
}
