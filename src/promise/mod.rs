//! Single-assignment result cells.
//!
//! A [`Promise`] holds the eventual result of a task: pending until settled,
//! then exactly one of resolved or failed, forever. Listeners registered on a
//! pending promise fire on the settling thread, in registration order; a
//! listener registered after settlement fires synchronously.
//!
//! [`SettablePromise`] is the producer half. A second completion attempt is
//! silently ignored, which is what gives the timeout commit discipline and
//! cancellation their first-writer-wins semantics.

use crate::error::Error;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The result stored in a settled promise.
pub type PromiseResult<T> = Result<T, Error>;

type Listener<T> = Box<dyn FnOnce(&PromiseResult<T>) + Send>;

enum CellState<T> {
    Pending { listeners: Vec<Listener<T>> },
    Settled(PromiseResult<T>),
}

struct PromiseCell<T> {
    state: Mutex<CellState<T>>,
    settled: Condvar,
}

/// A read handle to a single-assignment result cell.
///
/// Cheaply clonable; all clones observe the same settlement.
pub struct Promise<T> {
    cell: Arc<PromiseCell<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.cell.state.lock() {
            CellState::Pending { .. } => "pending",
            CellState::Settled(Ok(_)) => "resolved",
            CellState::Settled(Err(_)) => "failed",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    fn pending() -> Self {
        Self {
            cell: Arc::new(PromiseCell {
                state: Mutex::new(CellState::Pending {
                    listeners: Vec::new(),
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// Creates an already-resolved promise.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        let p = Self::pending();
        p.settle(Ok(value));
        p
    }

    /// Creates an already-failed promise.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        let p = Self::pending();
        p.settle(Err(error));
        p
    }

    /// Returns true once the promise has settled (resolved or failed).
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(&*self.cell.state.lock(), CellState::Settled(_))
    }

    /// Returns true if the promise settled with a value.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.cell.state.lock(), CellState::Settled(Ok(_)))
    }

    /// Returns true if the promise settled with an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(&*self.cell.state.lock(), CellState::Settled(Err(_)))
    }

    /// Returns a copy of the settled result, or `None` while pending.
    #[must_use]
    pub fn result(&self) -> Option<PromiseResult<T>> {
        match &*self.cell.state.lock() {
            CellState::Settled(res) => Some(res.clone()),
            CellState::Pending { .. } => None,
        }
    }

    /// Returns the error of a failed promise, or `None` otherwise.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match &*self.cell.state.lock() {
            CellState::Settled(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Registers a listener to fire when the promise settles.
    ///
    /// If the promise is already settled the listener fires synchronously on
    /// the calling thread. Listeners registered while pending fire on the
    /// settling thread, in registration order.
    pub fn on_terminal(&self, listener: impl FnOnce(&PromiseResult<T>) + Send + 'static) {
        let result = {
            let mut state = self.cell.state.lock();
            if let CellState::Pending { listeners } = &mut *state {
                listeners.push(Box::new(listener));
                return;
            }
            match &*state {
                CellState::Settled(res) => res.clone(),
                CellState::Pending { .. } => unreachable!(),
            }
        };
        listener(&result);
    }

    /// Blocks the calling thread until the promise settles.
    #[must_use]
    pub fn wait(&self) -> PromiseResult<T> {
        let mut state = self.cell.state.lock();
        loop {
            if let CellState::Settled(res) = &*state {
                return res.clone();
            }
            self.cell.settled.wait(&mut state);
        }
    }

    /// Blocks until the promise settles or the timeout elapses.
    ///
    /// Returns `None` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<PromiseResult<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        loop {
            if let CellState::Settled(res) = &*state {
                return Some(res.clone());
            }
            if self.cell.settled.wait_until(&mut state, deadline).timed_out() {
                return match &*state {
                    CellState::Settled(res) => Some(res.clone()),
                    CellState::Pending { .. } => None,
                };
            }
        }
    }

    /// Settles the cell. Returns false if it was already settled.
    fn settle(&self, result: PromiseResult<T>) -> bool {
        let listeners = {
            let mut state = self.cell.state.lock();
            match &mut *state {
                CellState::Settled(_) => return false,
                CellState::Pending { listeners } => {
                    let taken = std::mem::take(listeners);
                    *state = CellState::Settled(result.clone());
                    taken
                }
            }
        };
        self.cell.settled.notify_all();
        for listener in listeners {
            listener(&result);
        }
        true
    }
}

/// The producer half of a promise.
///
/// Clonable; the first `done`/`fail` across all clones wins.
pub struct SettablePromise<T> {
    promise: Promise<T>,
}

impl<T> Clone for SettablePromise<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T> std::fmt::Debug for SettablePromise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettablePromise").finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> SettablePromise<T> {
    /// Creates a new unsettled promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            promise: Promise::pending(),
        }
    }

    /// Resolves the promise with a value. Returns false if already settled.
    pub fn done(&self, value: T) -> bool {
        self.promise.settle(Ok(value))
    }

    /// Fails the promise with an error. Returns false if already settled.
    pub fn fail(&self, error: Error) -> bool {
        self.promise.settle(Err(error))
    }

    /// Settles the promise with a full result. Returns false if already
    /// settled.
    pub fn settle(&self, result: PromiseResult<T>) -> bool {
        self.promise.settle(result)
    }

    /// Returns a read handle to the underlying promise.
    #[must_use]
    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }
}

impl<T: Clone + Send + 'static> Default for SettablePromise<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Links a source promise into a destination: whenever `src` settles, `dst`
/// is settled with the same result (unless `dst` settled first).
pub fn propagate_result<T: Clone + Send + 'static>(src: &Promise<T>, dst: &SettablePromise<T>) {
    let dst = dst.clone();
    src.on_terminal(move |res| {
        dst.settle(res.clone());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn settles_exactly_once() {
        let p = SettablePromise::new();
        assert!(p.done(1));
        assert!(!p.done(2));
        assert!(!p.fail(Error::user("late")));
        assert_eq!(p.promise().result().expect("settled").expect("resolved"), 1);
    }

    #[test]
    fn failure_wins_when_first() {
        let p: SettablePromise<i32> = SettablePromise::new();
        assert!(p.fail(Error::timeout()));
        assert!(!p.done(1));
        assert!(p.promise().is_failed());
        assert!(p.promise().error().expect("error").is_timeout());
    }

    #[test]
    fn listener_fires_on_settle() {
        let p = SettablePromise::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        p.promise().on_terminal(move |res| {
            assert_eq!(res.as_ref().ok(), Some(&42));
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        p.done(42);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_listener_fires_synchronously() {
        let p = Promise::resolved(5);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        p.on_terminal(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let p = SettablePromise::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            p.promise().on_terminal(move |_: &PromiseResult<i32>| {
                order.lock().unwrap().push(i);
            });
        }
        p.done(0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn wait_unblocks_on_settle_from_other_thread() {
        let p = SettablePromise::new();
        let producer = p.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.done("ready".to_string());
        });
        assert_eq!(p.promise().wait().expect("resolved"), "ready");
        t.join().expect("producer thread");
    }

    #[test]
    fn wait_timeout_returns_none_while_pending() {
        let p: SettablePromise<i32> = SettablePromise::new();
        assert!(p.promise().wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn propagate_result_links_promises() {
        let src: SettablePromise<i32> = SettablePromise::new();
        let dst = SettablePromise::new();
        propagate_result(&src.promise(), &dst);
        src.fail(Error::user("upstream"));
        let err = dst.promise().error().expect("propagated error");
        assert_eq!(err.kind(), ErrorKind::User);
    }

    #[test]
    fn propagate_result_does_not_overwrite() {
        let src = SettablePromise::new();
        let dst = SettablePromise::new();
        propagate_result(&src.promise(), &dst);
        dst.done(9);
        src.done(1);
        assert_eq!(dst.promise().result().expect("settled").expect("resolved"), 9);
    }
}
