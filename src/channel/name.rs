//! Deterministic channel-name derivation.
//!
//! Both processes compute the same name without negotiation: the runner
//! knows only the host's process id (from enumeration) and its own build
//! version; the host knows its own pid and version.  Because the two
//! sides are built from the same crate, the normalized version tuples
//! coincide and the derived names match.

use sha2::{Digest, Sha256};

/// Non-numeric pre-release/build tokens are folded into this slot range.
///
/// The fold is a bounded hash, not a unique encoding: two versions that
/// differ only in their textual remainder collide with probability
/// `1 / 65535`, which is acceptable because the pid component already
/// disambiguates unrelated processes.
const TOKEN_FOLD_RANGE: u32 = 0xFFFF;

/// Normalize a version string to a fixed-arity numeric tuple.
///
/// Up to four dotted numeric components are parsed from the version
/// core; missing components are zero.  Pre-release (`-…`) and build
/// metadata (`+…`) are never rendered as free text: when present, their
/// concatenation is hashed into the fourth slot (range `1..=65535`),
/// displacing whatever numeric value that slot held.
///
/// The function is pure and total — unparsable input degrades to zeros
/// rather than failing, so name derivation can never error.
#[must_use]
pub fn normalize_version(raw: &str) -> [u32; 4] {
    let (core, remainder) = split_version(raw);

    let mut tuple = [0_u32; 4];
    for (slot, part) in core.split('.').take(4).enumerate() {
        tuple[slot] = part.trim().parse::<u32>().unwrap_or(0);
    }

    if !remainder.is_empty() {
        tuple[3] = fold_token(&remainder);
    }

    tuple
}

/// Derive the main channel name for a host process.
///
/// Rendered as `"<Prefix>_<a>.<b>.<c>.<d>_<pid>"`.  Deterministic: the
/// same `(prefix, version, pid)` triple always yields the same string,
/// and the string contains only characters safe for namespaced
/// local-socket names.
#[must_use]
pub fn channel_name(prefix: &str, version: &str, pid: u32) -> String {
    let [a, b, c, d] = normalize_version(version);
    format!("{prefix}_{a}.{b}.{c}.{d}_{pid}")
}

/// Mint a fresh cancellation side-channel name.
///
/// Unlike [`channel_name`] this is intentionally unique per call: the
/// runner mints one per command and carries it inside the command
/// itself, so the host never needs to derive it.
#[must_use]
pub fn cancel_channel_name(prefix: &str) -> String {
    format!("{prefix}_cancel_{}", uuid::Uuid::new_v4().simple())
}

/// Split a raw version into its numeric core and the textual remainder
/// (pre-release plus build metadata, concatenated).
fn split_version(raw: &str) -> (&str, String) {
    let (with_pre, build) = match raw.split_once('+') {
        Some((head, build)) => (head, build),
        None => (raw, ""),
    };
    let (core, pre) = match with_pre.split_once('-') {
        Some((head, pre)) => (head, pre),
        None => (with_pre, ""),
    };

    let mut remainder = String::new();
    if !pre.is_empty() {
        remainder.push_str(pre);
    }
    if !build.is_empty() {
        remainder.push('+');
        remainder.push_str(build);
    }

    (core, remainder)
}

/// Fold an arbitrary token into `1..=TOKEN_FOLD_RANGE` deterministically.
fn fold_token(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (word % TOKEN_FOLD_RANGE) + 1
}
