//! Scoped cleanup actions that also run when the process is interrupted.
//!
//! [`register`] hands back an [`ExitHook`]. Dropping the hook runs its action, so normal returns
//! and `?`-propagated errors are covered by scope. The first registration arms a listener thread
//! for `SIGINT`/`SIGTERM`: on delivery it runs every action still registered, exactly once each,
//! and exits with `128 + signo`.
//!
//! The handlers only queue the signal for the listener thread. Handlers are reset on `exec`, so
//! spawned tools still get the default `SIGINT` behaviour from the terminal.

use std::{
    collections::BTreeMap,
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex, MutexGuard, Once, PoisonError,
    },
    thread,
};

use nix::sys::signal::Signal;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

type Action = Box<dyn FnOnce() + Send>;

static ACTIONS: Mutex<BTreeMap<u64, Action>> = Mutex::new(BTreeMap::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(0);
static ARMED: Once = Once::new();
/// set once the signal listener is running
static ARMED_OK: AtomicBool = AtomicBool::new(false);

/// Guard for one registered action. Runs the action when dropped unless a signal got to it
/// first.
#[must_use = "the action runs as soon as the hook is dropped"]
#[derive(Debug)]
pub struct ExitHook {
    id: u64,
}

/// Registers `action` to run when the returned hook drops, or on `SIGINT`/`SIGTERM`, whichever
/// comes first.
pub fn register(action: impl FnOnce() + Send + 'static) -> ExitHook {
    arm();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    actions().insert(id, Box::new(action));
    ExitHook { id }
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        // take it out under the lock, run it without
        let action = actions().remove(&self.id);
        if let Some(action) = action {
            action();
        }
    }
}

/// Runs and forgets every registered action. This is what the signal listener does before
/// exiting.
pub fn run_all() {
    let pending = std::mem::take(&mut *actions());
    log::trace!("running {} exit hooks", pending.len());
    for action in pending.into_values() {
        action();
    }
}

fn actions() -> MutexGuard<'static, BTreeMap<u64, Action>> {
    // a panicking action must not stop the others from running
    ACTIONS.lock().unwrap_or_else(PoisonError::into_inner)
}

fn arm() {
    ARMED.call_once(|| {
        if let Err(e) = install_listener() {
            log::warn!(
                "Could not install the interrupt handler, cleanup will not run on Ctrl-C: {}",
                e
            );
        }
    });
}

fn install_listener() -> io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("exit-hook".to_string())
        .spawn(move || {
            if let Some(signo) = signals.forever().next() {
                on_signal(signo);
            }
        })?;
    ARMED_OK.store(true, Ordering::SeqCst);
    log::trace!("exit hooks armed");
    Ok(())
}

fn on_signal(signo: i32) -> ! {
    let name = Signal::try_from(signo).map_or("signal", Signal::as_str);
    log::warn!("Received {}, cleaning up", name);
    run_all();
    std::process::exit(128 + signo);
}

/// Tests that register hooks or call [`run_all`] hold this, so one test's simulated interrupt
/// cannot run another test's actions.
#[cfg(test)]
pub(crate) fn test_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicU64>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicU64::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn drop_runs_action_once() {
        let _lock = test_lock();
        let (count, action) = counter();
        let hook = register(action);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(hook);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_all_then_drop_runs_once() {
        let _lock = test_lock();
        let (count, action) = counter();
        let hook = register(action);
        run_all();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(hook);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hooks_do_not_overwrite_each_other() {
        let _lock = test_lock();
        let (first, a) = counter();
        let (second, b) = counter();
        let hook_a = register(a);
        let hook_b = register(b);
        drop(hook_b);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        drop(hook_a);
        assert_eq!(first.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_is_armed() {
        let _lock = test_lock();
        let hook = register(|| {});
        assert!(ARMED_OK.load(Ordering::SeqCst));
        drop(hook);
    }
}
