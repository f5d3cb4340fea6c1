//! Exclusive claims on OS threads and disposable worker threads.
//!
//! Linux tracks namespace membership per thread. A [`ThreadClaim`] marks the
//! current thread as owned by one logical task that may switch its
//! namespaces; it cannot leave the thread it was acquired on.
//!
//! Some changes cannot be undone at all: once a thread has unshared its
//! filesystem attributes (root, cwd, umask) it must never be handed back to
//! anyone else. Such threads are marked tainted, and the work that needs them
//! runs on a [`DisposableWorker`] or through [`run_disposable`], whose
//! threads end when the work is done.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::mpsc;
use std::thread::{JoinHandle, ThreadId};

use tempnet_common::error::{Result, TempnetError};

thread_local! {
    static CLAIMED: Cell<bool> = const { Cell::new(false) };
    static TAINTED: Cell<bool> = const { Cell::new(false) };
}

/// Exclusive claim of the calling logical task on its OS thread.
///
/// At most one claim exists per thread at any time. The claim is neither
/// `Send` nor `Sync`, so it can only be used on the thread it was acquired on.
#[derive(Debug)]
pub struct ThreadClaim {
    thread: ThreadId,
    _pinned: PhantomData<*const ()>,
}

impl ThreadClaim {
    /// Claims the calling OS thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread is already claimed.
    pub fn acquire() -> Result<Self> {
        if CLAIMED.get() {
            return Err(TempnetError::Thread {
                message: format!(
                    "thread {:?} is already claimed by another task",
                    std::thread::current().id()
                ),
            });
        }
        CLAIMED.set(true);
        let thread = std::thread::current().id();
        tracing::trace!(?thread, "thread claimed");
        Ok(Self {
            thread,
            _pinned: PhantomData,
        })
    }

    /// Returns the ID of the claimed thread.
    #[must_use]
    pub const fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Reports whether the claimed thread underwent an irreversible change.
    #[must_use]
    pub fn is_tainted(&self) -> bool {
        TAINTED.get()
    }

    /// Marks the claimed thread as permanently tainted.
    pub(crate) fn taint(&self, reason: &str) {
        if !TAINTED.get() {
            tracing::warn!(thread = ?self.thread, reason, "thread tainted");
        }
        TAINTED.set(true);
    }
}

impl Drop for ThreadClaim {
    fn drop(&mut self) {
        CLAIMED.set(false);
        if TAINTED.get() {
            tracing::warn!(
                thread = ?self.thread,
                "releasing claim on a tainted thread; it must not be reused"
            );
        }
    }
}

/// Reports whether the calling thread underwent an irreversible change.
#[must_use]
pub fn current_thread_tainted() -> bool {
    TAINTED.get()
}

/// A helper thread that is tainted on purpose and idles until released.
///
/// The worker runs a setup closure, hands its result back, and then blocks
/// until [`DisposableWorker::release`] is called or the worker is dropped;
/// afterwards its thread terminates and is never reused.
#[derive(Debug)]
pub struct DisposableWorker {
    release: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    tid: i32,
}

impl DisposableWorker {
    /// Spawns a worker thread named `name` that runs `setup` and then idles.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned, if `setup` fails, or
    /// if the worker dies before reporting back.
    pub fn spawn<T, F>(name: &str, setup: F) -> Result<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(T, i32)>>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                TAINTED.set(true);
                let outcome = setup().map(|value| (value, nix::unistd::gettid().as_raw()));
                let ready = outcome.is_ok();
                if ready_tx.send(outcome).is_err() || !ready {
                    return;
                }
                // idle until released; a dropped sender also counts
                let _ = release_rx.recv();
            })
            .map_err(|e| TempnetError::Thread {
                message: format!("cannot spawn worker thread {name:?}: {e}"),
            })?;

        match ready_rx.recv() {
            Ok(Ok((value, tid))) => {
                tracing::debug!(worker = name, tid, "disposable worker ready");
                Ok((
                    Self {
                        release: Some(release_tx),
                        handle: Some(handle),
                        tid,
                    },
                    value,
                ))
            }
            Ok(Err(err)) => {
                join_failed_worker(name, handle)?;
                Err(err)
            }
            Err(_) => {
                join_failed_worker(name, handle)?;
                Err(TempnetError::Thread {
                    message: format!("worker thread {name:?} terminated before becoming ready"),
                })
            }
        }
    }

    /// Returns the kernel thread ID of the worker.
    #[must_use]
    pub const fn tid(&self) -> i32 {
        self.tid
    }

    /// Lets the worker terminate and waits for its thread to end.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread panicked.
    pub fn release(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        drop(self.release.take());
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| TempnetError::Thread {
                message: format!("disposable worker (tid {}) panicked", self.tid),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for DisposableWorker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "disposable worker shutdown failed");
        }
    }
}

fn join_failed_worker(name: &str, handle: JoinHandle<()>) -> Result<()> {
    handle.join().map_err(|_| TempnetError::Thread {
        message: format!("worker thread {name:?} panicked during setup"),
    })
}

/// Runs `f` on a fresh thread that is tainted and discarded afterwards.
///
/// Panics inside `f` are propagated to the caller.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned, or whatever `f` returns.
pub fn run_disposable<R, F>(name: &str, f: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> Result<R> + Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn_scoped(scope, || {
                TAINTED.set(true);
                f()
            })
            .map_err(|e| TempnetError::Thread {
                message: format!("cannot spawn disposable thread {name:?}: {e}"),
            })?;
        match handle.join() {
            Ok(result) => result,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}
