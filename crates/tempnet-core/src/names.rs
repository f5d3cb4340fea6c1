//! Collision-resistant identifiers for transient objects.
//!
//! Neither generator reserves anything: the caller has to create the object
//! and retry with a fresh identifier when the kernel reports a collision.

use rand::Rng;
use rand::distributions::Alphanumeric;
use tempnet_common::constants::{MAX_NIFNAME_LEN, MIN_RANDOM_SUFFIX_LEN};
use tempnet_common::error::{Result, TempnetError};

/// Returns a network interface name of maximum length, made of `prefix`
/// followed by random alphanumeric characters.
///
/// # Errors
///
/// Returns a [`TempnetError::Config`] if the prefix leaves room for fewer
/// than four random characters.
pub fn random_nifname(prefix: &str) -> Result<String> {
    let room = MAX_NIFNAME_LEN - MIN_RANDOM_SUFFIX_LEN;
    if prefix.len() > room {
        return Err(TempnetError::Config {
            message: format!(
                "cannot create random network interface name: prefix {prefix:?} is longer than {room} bytes"
            ),
        });
    }
    let mut name = String::with_capacity(MAX_NIFNAME_LEN);
    name.push_str(prefix);
    name.extend(
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MAX_NIFNAME_LEN - prefix.len())
            .map(char::from),
    );
    Ok(name)
}

/// Returns the lowest non-negative integer not contained in `taken`.
#[must_use]
pub fn lowest_unused(taken: impl IntoIterator<Item = u32>) -> u32 {
    let mut taken: Vec<u32> = taken.into_iter().collect();
    taken.sort_unstable();
    taken.dedup();
    let mut candidate = 0;
    for id in taken {
        if id != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

/// Returns a random non-negative network namespace ID.
#[must_use]
pub fn random_nsid() -> i32 {
    rand::thread_rng().gen_range(0..=i32::MAX)
}
