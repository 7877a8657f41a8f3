use rand::Rng;
use rand::rngs::OsRng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ID_LEN: usize = 10;

pub const ANTHOLOGY: &str = "coll";
pub const ARTICLE: &str = "art";
pub const CATEGORY: &str = "cat";
pub const TAG: &str = "tag";
pub const ASSET: &str = "res";
pub const PROVIDER: &str = "prov";
pub const MODEL: &str = "model";

/// Returns `"{prefix}_{random}"`, or just the random part when `prefix` is empty.
///
/// 62^10 possible suffixes drawn from the OS generator; collisions are not
/// checked here and would surface as a primary-key violation on insert.
pub fn generate(prefix: &str) -> String {
    let mut rng = OsRng;
    let suffix: String = (0..ID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    if prefix.is_empty() {
        suffix
    } else {
        format!("{prefix}_{suffix}")
    }
}
