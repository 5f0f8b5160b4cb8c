// Copyright 2025-2026 CEMAXECUTER LLC

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Requested state of the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Running,
    Paused,
}

/// What the loop should do after passing its checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Proceed,
    Shutdown,
}

#[derive(Debug)]
struct Inner {
    requested: GateState,
    /// Bumped by every resume; a pending pause gives up waiting when it moves
    epoch: u64,
    /// Outstanding [`Hold`]s; the loop stays parked while any exist
    holds: usize,
    /// Loop is blocked at its checkpoint and will not touch the radio
    parked: bool,
    shutdown: bool,
    exited: bool,
    loop_thread: Option<ThreadId>,
}

/// Pause/resume handshake between the control side and the receive loop.
///
/// The loop calls [`checkpoint`](Self::checkpoint) before every acquisition.
/// [`pause`](Self::pause) returns once the loop is parked there, has exited,
/// or a later [`resume`](Self::resume) has withdrawn the request. A
/// [`Hold`] from [`hold`](Self::hold) parks the loop independently of the
/// requested state, so no resume can release it early. A parked loop sleeps
/// on a condition variable.
#[derive(Debug)]
pub struct PauseGate {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                requested: GateState::Running,
                epoch: 0,
                holds: 0,
                parked: false,
                shutdown: false,
                exited: false,
                loop_thread: None,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a pause and wait for the loop to park. Returns `true` if this
    /// call moved the gate from running to paused.
    ///
    /// Stops waiting early if another thread resumes before the loop parks;
    /// the request is gone by then and the loop may keep running.
    ///
    /// Called from the loop thread itself (e.g. inside the packet callback)
    /// it does not wait: the loop is between acquisitions by construction.
    pub fn pause(&self) -> bool {
        let mut inner = self.lock();
        let changed = inner.requested == GateState::Running;
        inner.requested = GateState::Paused;
        self.cond.notify_all();

        if inner.loop_thread == Some(thread::current().id()) {
            return changed;
        }
        let epoch = inner.epoch;
        while !(inner.parked || inner.exited || inner.epoch != epoch) {
            inner = self.cond.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
        changed
    }

    /// Let the loop run again. Returns `true` if this call moved the gate
    /// from paused to running. Outstanding holds keep the loop parked.
    pub fn resume(&self) -> bool {
        let mut inner = self.lock();
        let changed = inner.requested == GateState::Paused;
        inner.requested = GateState::Running;
        inner.epoch = inner.epoch.wrapping_add(1);
        self.cond.notify_all();
        changed
    }

    /// Park the loop until the returned guard is dropped, regardless of
    /// concurrent [`pause`](Self::pause)/[`resume`](Self::resume) calls.
    /// Waits for the park unless called from the loop thread.
    pub fn hold(&self) -> Hold<'_> {
        let mut inner = self.lock();
        inner.holds += 1;
        self.cond.notify_all();

        if inner.loop_thread != Some(thread::current().id()) {
            while !(inner.parked || inner.exited) {
                inner = self.cond.wait(inner).unwrap_or_else(PoisonError::into_inner);
            }
        }
        Hold { gate: self }
    }

    fn release(&self) {
        let mut inner = self.lock();
        inner.holds = inner.holds.saturating_sub(1);
        self.cond.notify_all();
    }

    pub fn state(&self) -> GateState {
        self.lock().requested
    }

    pub fn is_paused(&self) -> bool {
        self.state() == GateState::Paused
    }

    /// Ask the loop to exit at its next checkpoint, waking it if parked.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.cond.notify_all();
    }

    /// Record the calling thread as the loop thread.
    pub fn register_loop_thread(&self) {
        self.lock().loop_thread = Some(thread::current().id());
    }

    pub fn is_loop_thread(&self) -> bool {
        self.lock().loop_thread == Some(thread::current().id())
    }

    /// Loop side: block while paused, report shutdown.
    pub fn checkpoint(&self) -> Checkpoint {
        let mut inner = self.lock();
        loop {
            if inner.shutdown {
                return Checkpoint::Shutdown;
            }
            if inner.requested == GateState::Running && inner.holds == 0 {
                inner.parked = false;
                return Checkpoint::Proceed;
            }
            if !inner.parked {
                inner.parked = true;
                self.cond.notify_all();
                log::debug!("receive loop parked");
            }
            inner = self.cond.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Loop side: the loop has stopped and will never touch the radio again.
    pub fn mark_exited(&self) {
        let mut inner = self.lock();
        inner.exited = true;
        inner.parked = false;
        self.cond.notify_all();
    }

    pub fn has_exited(&self) -> bool {
        self.lock().exited
    }
}

/// Keeps the loop parked while alive. See [`PauseGate::hold`].
#[must_use = "the loop resumes as soon as the hold is dropped"]
pub struct Hold<'a> {
    gate: &'a PauseGate,
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{unbounded, Receiver, Sender};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    /// Minimal loop: count iterations until shutdown.
    fn spawn_loop(gate: Arc<PauseGate>, iterations: Arc<AtomicU64>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            gate.register_loop_thread();
            while gate.checkpoint() == Checkpoint::Proceed {
                iterations.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
            }
            gate.mark_exited();
        })
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_pause_parks_loop() {
        let gate = Arc::new(PauseGate::new());
        let iterations = Arc::new(AtomicU64::new(0));
        let handle = spawn_loop(gate.clone(), iterations.clone());
        wait_for(|| iterations.load(Ordering::SeqCst) > 0);

        assert!(gate.pause());
        let frozen = iterations.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(iterations.load(Ordering::SeqCst), frozen);

        assert!(gate.resume());
        wait_for(|| iterations.load(Ordering::SeqCst) > frozen);

        gate.shutdown();
        handle.join().unwrap();
        assert!(gate.has_exited());
    }

    #[test]
    fn test_pause_and_resume_are_idempotent() {
        let gate = Arc::new(PauseGate::new());
        let handle = spawn_loop(gate.clone(), Arc::new(AtomicU64::new(0)));

        assert!(gate.pause());
        assert!(!gate.pause());
        assert!(gate.is_paused());
        assert!(gate.resume());
        assert!(!gate.resume());
        assert_eq!(gate.state(), GateState::Running);

        gate.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_shutdown_wakes_parked_loop() {
        let gate = Arc::new(PauseGate::new());
        let handle = spawn_loop(gate.clone(), Arc::new(AtomicU64::new(0)));
        gate.pause();
        gate.shutdown();
        handle.join().unwrap();
        assert!(gate.has_exited());
    }

    #[test]
    fn test_pause_after_exit_returns() {
        let gate = PauseGate::new();
        gate.mark_exited();
        assert!(gate.pause());
        assert!(gate.is_paused());
    }

    /// Loop that reports each pass and then blocks in its "acquisition" until
    /// `step` is signalled. Dropping the step sender ends it.
    fn spawn_latched_loop(
        gate: Arc<PauseGate>,
    ) -> (thread::JoinHandle<()>, Sender<()>, Receiver<()>) {
        let (step_tx, step_rx) = unbounded::<()>();
        let (entered_tx, entered_rx) = unbounded::<()>();
        let handle = thread::spawn(move || {
            gate.register_loop_thread();
            while gate.checkpoint() == Checkpoint::Proceed {
                let _ = entered_tx.send(());
                if step_rx.recv().is_err() {
                    break;
                }
            }
            gate.mark_exited();
        });
        (handle, step_tx, entered_rx)
    }

    #[test]
    fn test_pause_waits_for_acquisition_to_finish() {
        let gate = Arc::new(PauseGate::new());
        let (handle, step, entered) = spawn_latched_loop(gate.clone());
        entered.recv_timeout(WAIT).unwrap();

        let (done_tx, done_rx) = unbounded();
        let g = gate.clone();
        let pauser = thread::spawn(move || {
            let changed = g.pause();
            let _ = done_tx.send(());
            changed
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

        step.send(()).unwrap();
        done_rx.recv_timeout(WAIT).unwrap();
        assert!(pauser.join().unwrap());
        assert!(entered.recv_timeout(Duration::from_millis(30)).is_err());

        gate.shutdown();
        drop(step);
        handle.join().unwrap();
    }

    #[test]
    fn test_resume_releases_pending_pause() {
        let gate = Arc::new(PauseGate::new());
        let (handle, step, entered) = spawn_latched_loop(gate.clone());
        entered.recv_timeout(WAIT).unwrap();

        let (done_tx, done_rx) = unbounded();
        let g = gate.clone();
        let pauser = thread::spawn(move || {
            g.pause();
            let _ = done_tx.send(());
        });
        wait_for(|| gate.is_paused());

        // Resume before the loop ever reaches its checkpoint
        gate.resume();
        done_rx.recv_timeout(Duration::from_secs(3)).expect("pause stuck after resume");
        pauser.join().unwrap();

        step.send(()).unwrap();
        entered.recv_timeout(WAIT).unwrap();

        gate.shutdown();
        drop(step);
        handle.join().unwrap();
    }

    #[test]
    fn test_hold_is_not_released_by_resume() {
        let gate = Arc::new(PauseGate::new());
        let (handle, step, entered) = spawn_latched_loop(gate.clone());
        entered.recv_timeout(WAIT).unwrap();

        let (held_tx, held_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();
        let g = gate.clone();
        let holder = thread::spawn(move || {
            let _hold = g.hold();
            let _ = held_tx.send(());
            let _ = release_rx.recv();
        });
        assert!(held_rx.recv_timeout(Duration::from_millis(50)).is_err());

        step.send(()).unwrap();
        held_rx.recv_timeout(WAIT).unwrap();

        gate.pause();
        gate.resume();
        gate.resume();
        assert!(!gate.is_paused());
        assert!(entered.recv_timeout(Duration::from_millis(30)).is_err());

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        entered.recv_timeout(WAIT).unwrap();

        gate.shutdown();
        drop(step);
        handle.join().unwrap();
    }

    #[test]
    fn test_hold_keeps_requested_state() {
        let gate = Arc::new(PauseGate::new());
        let handle = spawn_loop(gate.clone(), Arc::new(AtomicU64::new(0)));

        gate.pause();
        drop(gate.hold());
        assert!(gate.is_paused());
        gate.resume();
        drop(gate.hold());
        assert!(!gate.is_paused());

        gate.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_pause_from_loop_thread_does_not_wait() {
        let gate = Arc::new(PauseGate::new());
        let g = gate.clone();
        let handle = thread::spawn(move || {
            g.register_loop_thread();
            assert!(g.is_loop_thread());
            g.pause()
        });
        assert!(handle.join().unwrap());
        assert!(!gate.is_loop_thread());
    }
}
