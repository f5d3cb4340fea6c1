//! Bounded retries on name and ID collisions.

use tempnet_common::error::{Result, TempnetError};

/// Calls `attempt` with the attempt number, starting at one, until it
/// succeeds, fails with anything but a collision, or `attempts` calls have
/// collided.
///
/// # Errors
///
/// Returns the first non-collision error unchanged, or a
/// [`TempnetError::Exhausted`] naming `kind` if every attempt collided.
pub fn retry_on_collision<T>(
    attempts: u32,
    kind: &str,
    mut attempt: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    for n in 1..=attempts {
        match attempt(n) {
            Err(e) if e.is_collision() => {
                tracing::debug!(kind, attempt = n, error = %e, "collision, retrying");
            }
            outcome => return outcome,
        }
    }
    Err(TempnetError::Exhausted {
        kind: kind.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn collision() -> TempnetError {
        TempnetError::Netlink {
            operation: "create link".into(),
            message: "File exists (os error 17)".into(),
            errno: Some(libc::EEXIST),
        }
    }

    #[test]
    fn collisions_are_retried_until_success() {
        let calls = Cell::new(0);
        let out = retry_on_collision(10, "dummy", |n| {
            calls.set(n);
            if n < 3 { Err(collision()) } else { Ok(n) }
        })
        .expect("third attempt succeeds");
        assert_eq!(out, 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn other_errors_end_the_loop_at_once() {
        let calls = Cell::new(0);
        let err = retry_on_collision::<()>(10, "dummy", |_| {
            calls.set(calls.get() + 1);
            Err(TempnetError::Io {
                path: "/sys/bus/netdevsim/new_device".into(),
                source: std::io::Error::from_raw_os_error(libc::EPERM),
            })
        })
        .expect_err("fails");
        assert!(matches!(err, TempnetError::Io { .. }), "{err}");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn running_out_of_attempts_names_the_kind() {
        let calls = Cell::new(0);
        let err = retry_on_collision::<()>(4, "netdevsim", |_| {
            calls.set(calls.get() + 1);
            Err(collision())
        })
        .expect_err("exhausted");
        assert_eq!(calls.get(), 4);
        match err {
            TempnetError::Exhausted { kind, attempts } => {
                assert_eq!(kind, "netdevsim");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn io_collisions_count_too() {
        let err = retry_on_collision::<()>(2, "netdevsim", |_| {
            Err(TempnetError::Io {
                path: "/sys/bus/netdevsim/new_device".into(),
                source: std::io::Error::from_raw_os_error(libc::EEXIST),
            })
        })
        .expect_err("exhausted");
        assert!(matches!(err, TempnetError::Exhausted { attempts: 2, .. }));
    }
}
