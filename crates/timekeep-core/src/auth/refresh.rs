//! Single-flight credential refresh.
//!
//! When a call comes back 401 it asks the [`RefreshCoordinator`] for
//! admission. The first caller while `Idle` becomes the owner and performs
//! the one refresh call; everyone arriving while `Refreshing` parks as a
//! [`Waiter`] and is released, in registration order, when the owner settles.
//!
//! All state reads and writes happen under one mutex that is never held
//! across an `.await`, so the check-and-flip to `Refreshing` is atomic even
//! on a multi-threaded runtime.
//!
//! A sign-out while `Refreshing` revokes the in-flight refresh: its token is
//! discarded and its waiters are rejected, so a session is never restored
//! after the application was told to log in again.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use super::credentials::CredentialStore;
use super::session::{AuthEvent, LogoutReason};

/// Capacity of the auth event channel. Events are rare; slow subscribers
/// only ever miss old ones.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Why a parked call was not given a new credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The refresh call failed or a sign-out revoked it; the session is gone.
    Rejected,
    /// The owner was dropped before the refresh settled.
    Abandoned,
}

type WaiterOutcome = Result<String, RefreshFailure>;

/// What a call that just saw a 401 should do next.
pub enum Admission {
    /// Perform the refresh and settle the ticket.
    Owner(RefreshTicket),
    /// Park until the in-flight refresh settles.
    Wait(Waiter),
    /// The credential was replaced after this call went out; re-issue now.
    Retry,
    /// The session was torn down after this call went out.
    Rejected,
}

/// A call parked behind an in-flight refresh.
#[derive(Debug)]
pub struct Waiter {
    rx: oneshot::Receiver<WaiterOutcome>,
}

impl Waiter {
    /// Resolve with the new credential, or the reason there is none.
    pub async fn wait(self) -> Result<String, RefreshFailure> {
        self.rx.await.unwrap_or(Err(RefreshFailure::Abandoned))
    }
}

#[derive(Debug)]
struct Inner {
    state: RefreshState,
    waiters: Vec<oneshot::Sender<WaiterOutcome>>,
    /// Set by a sign-out that lands while `Refreshing`.
    revoked: bool,
}

/// Owns the refresh state machine and the auth event channel.
#[derive(Debug)]
pub struct RefreshCoordinator {
    credentials: Arc<CredentialStore>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<AuthEvent>,
}

impl RefreshCoordinator {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            credentials,
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                waiters: Vec::new(),
                revoked: false,
            }),
            events,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn state(&self) -> RefreshState {
        self.inner.lock().state
    }

    pub fn pending_waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Decide the fate of a call that was rejected with 401.
    ///
    /// `sent_generation` is the credential generation the call carried.
    pub fn admit(self: &Arc<Self>, sent_generation: u64) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            RefreshState::Refreshing => {
                let (tx, rx) = oneshot::channel();
                inner.waiters.push(tx);
                debug!(waiters = inner.waiters.len(), "Refresh in flight, parking call");
                Admission::Wait(Waiter { rx })
            }
            RefreshState::Idle => {
                let current = self.credentials.snapshot();
                if current.generation != sent_generation {
                    return if current.token.is_some() {
                        debug!("Credential replaced since send, retrying");
                        Admission::Retry
                    } else {
                        debug!("Session ended since send, rejecting");
                        Admission::Rejected
                    };
                }
                inner.state = RefreshState::Refreshing;
                debug!("Taking ownership of credential refresh");
                Admission::Owner(RefreshTicket {
                    coordinator: Arc::clone(self),
                    settled: false,
                })
            }
        }
    }

    /// Drop the session: clear the credential and tell the application.
    pub fn sign_out(&self, reason: LogoutReason) {
        {
            let mut inner = self.inner.lock();
            if inner.state == RefreshState::Refreshing {
                inner.revoked = true;
            }
            self.credentials.clear();
        }
        info!(reason = %reason, "Session ended");
        self.emit(AuthEvent::LoggedOut { reason });
    }

    fn settle(&self, outcome: Settlement) -> WaiterOutcome {
        let (outcome, waiters) = {
            let mut inner = self.inner.lock();
            let outcome = match outcome {
                Settlement::Refreshed(_) | Settlement::Failed if inner.revoked => Settlement::Revoked,
                other => other,
            };
            match &outcome {
                Settlement::Refreshed(token) => self.credentials.set(token.clone()),
                Settlement::Failed => self.credentials.clear(),
                Settlement::Revoked | Settlement::Abandoned => {}
            }
            inner.state = RefreshState::Idle;
            inner.revoked = false;
            (outcome, std::mem::take(&mut inner.waiters))
        };

        let released = waiters.len();
        let result: WaiterOutcome = match &outcome {
            Settlement::Refreshed(token) => Ok(token.clone()),
            Settlement::Failed | Settlement::Revoked => Err(RefreshFailure::Rejected),
            Settlement::Abandoned => Err(RefreshFailure::Abandoned),
        };
        for waiter in waiters {
            // A dropped waiter has gone away; nothing to release
            let _ = waiter.send(result.clone());
        }

        match outcome {
            Settlement::Refreshed(_) => {
                info!(released, "Credential refreshed");
                self.emit(AuthEvent::Refreshed);
            }
            Settlement::Failed => {
                warn!(released, "Credential refresh failed, signing out");
                self.emit(AuthEvent::LoggedOut {
                    reason: LogoutReason::RefreshFailed,
                });
            }
            Settlement::Revoked => {
                info!(released, "Session ended during refresh, discarding new credential");
            }
            Settlement::Abandoned => {
                warn!(released, "Refresh owner dropped before settling");
            }
        }

        result
    }
}

enum Settlement {
    Refreshed(String),
    Failed,
    /// Refreshed, but a sign-out arrived first.
    Revoked,
    Abandoned,
}

/// Proof of refresh ownership. Must be settled exactly once; dropping it
/// unsettled releases every waiter with [`RefreshFailure::Abandoned`].
///
/// Owns its coordinator so the refresh can run on a task of its own.
pub struct RefreshTicket {
    coordinator: Arc<RefreshCoordinator>,
    settled: bool,
}

impl RefreshTicket {
    /// Store the new credential and release every waiter with it.
    ///
    /// Fails with [`RefreshFailure::Rejected`] when a sign-out revoked the
    /// refresh while it was in flight.
    pub fn succeed(mut self, token: String) -> Result<String, RefreshFailure> {
        self.settled = true;
        self.coordinator.settle(Settlement::Refreshed(token))
    }

    /// Clear the credential, reject every waiter and signal logout.
    pub fn fail(mut self) {
        self.settled = true;
        let _ = self.coordinator.settle(Settlement::Failed);
    }
}

impl Drop for RefreshTicket {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.coordinator.settle(Settlement::Abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Arc<RefreshCoordinator> {
        Arc::new(RefreshCoordinator::new(Arc::new(CredentialStore::new())))
    }

    fn owner(admission: Admission) -> RefreshTicket {
        match admission {
            Admission::Owner(ticket) => ticket,
            _ => panic!("expected ownership"),
        }
    }

    fn waiter(admission: Admission) -> Waiter {
        match admission {
            Admission::Wait(w) => w,
            _ => panic!("expected to wait"),
        }
    }

    #[test]
    fn test_first_caller_owns_rest_wait() {
        let coord = coordinator();
        let generation = coord.credentials().snapshot().generation;

        let ticket = owner(coord.admit(generation));
        assert_eq!(coord.state(), RefreshState::Refreshing);

        let _w1 = waiter(coord.admit(generation));
        let _w2 = waiter(coord.admit(generation));
        assert_eq!(coord.pending_waiters(), 2);

        assert_eq!(ticket.succeed("new".into()), Ok("new".to_string()));
        assert_eq!(coord.state(), RefreshState::Idle);
        assert_eq!(coord.pending_waiters(), 0);
        assert_eq!(coord.credentials().get().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_success_releases_all_waiters_with_token() {
        let coord = coordinator();
        let mut events = coord.subscribe();
        let generation = coord.credentials().snapshot().generation;

        let ticket = owner(coord.admit(generation));
        let w1 = waiter(coord.admit(generation));
        let w2 = waiter(coord.admit(generation));

        ticket.succeed("T2".into()).unwrap();

        assert_eq!(w1.wait().await, Ok("T2".to_string()));
        assert_eq!(w2.wait().await, Ok("T2".to_string()));
        assert_eq!(events.try_recv().ok(), Some(AuthEvent::Refreshed));
    }

    #[tokio::test]
    async fn test_failure_rejects_waiters_and_signs_out() {
        let coord = coordinator();
        coord.credentials().set("T1");
        let mut events = coord.subscribe();
        let generation = coord.credentials().snapshot().generation;

        let ticket = owner(coord.admit(generation));
        let w1 = waiter(coord.admit(generation));

        ticket.fail();

        assert_eq!(w1.wait().await, Err(RefreshFailure::Rejected));
        assert_eq!(coord.credentials().get(), None);
        assert_eq!(coord.state(), RefreshState::Idle);
        assert_eq!(
            events.try_recv().ok(),
            Some(AuthEvent::LoggedOut { reason: LogoutReason::RefreshFailed })
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_owner_abandons_waiters_without_logout() {
        let coord = coordinator();
        coord.credentials().set("T1");
        let mut events = coord.subscribe();
        let generation = coord.credentials().snapshot().generation;

        let ticket = owner(coord.admit(generation));
        let w1 = waiter(coord.admit(generation));
        drop(ticket);

        assert_eq!(w1.wait().await, Err(RefreshFailure::Abandoned));
        assert_eq!(coord.state(), RefreshState::Idle);
        assert_eq!(coord.credentials().get().as_deref(), Some("T1"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stale_generation_retries_without_refresh() {
        let coord = coordinator();
        coord.credentials().set("T1");
        let stale = coord.credentials().snapshot().generation;

        owner(coord.admit(stale)).succeed("T2".into()).unwrap();

        assert!(matches!(coord.admit(stale), Admission::Retry));
        assert_eq!(coord.state(), RefreshState::Idle);
    }

    #[test]
    fn test_stale_generation_after_failure_is_rejected() {
        let coord = coordinator();
        coord.credentials().set("T1");
        let stale = coord.credentials().snapshot().generation;

        owner(coord.admit(stale)).fail();

        assert!(matches!(coord.admit(stale), Admission::Rejected));
        assert_eq!(coord.state(), RefreshState::Idle);
    }

    #[test]
    fn test_dropped_waiter_is_discarded_once() {
        let coord = coordinator();
        let generation = coord.credentials().snapshot().generation;

        let ticket = owner(coord.admit(generation));
        drop(waiter(coord.admit(generation)));
        let kept = waiter(coord.admit(generation));
        assert_eq!(coord.pending_waiters(), 2);

        ticket.succeed("T".into()).unwrap();
        assert_eq!(coord.pending_waiters(), 0);
        drop(kept);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_waiters_resume_in_registration_order() {
        let coord = coordinator();
        let generation = coord.credentials().snapshot().generation;
        let order = Arc::new(Mutex::new(Vec::new()));

        let ticket = owner(coord.admit(generation));
        let waiters: Vec<Waiter> = (0..3).map(|_| waiter(coord.admit(generation))).collect();

        // Spawn in reverse so spawn order cannot explain the result
        let mut handles = Vec::new();
        for (id, w) in waiters.into_iter().enumerate().rev() {
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                w.wait().await.expect("refresh succeeded");
                order.lock().push(id + 1);
            }));
        }

        // Let every task park on its receiver
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        ticket.succeed("T2".into()).unwrap();
        for handle in handles {
            handle.await.expect("waiter task panicked");
        }

        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_sign_out_during_refresh_discards_new_token() {
        let coord = coordinator();
        coord.credentials().set("T2");
        let mut events = coord.subscribe();
        let generation = coord.credentials().snapshot().generation;

        let ticket = owner(coord.admit(generation));
        let w1 = waiter(coord.admit(generation));

        coord.sign_out(LogoutReason::Rejected);
        assert_eq!(ticket.succeed("T3".into()), Err(RefreshFailure::Rejected));

        assert_eq!(w1.wait().await, Err(RefreshFailure::Rejected));
        assert_eq!(coord.credentials().get(), None);
        assert_eq!(coord.state(), RefreshState::Idle);
        assert_eq!(
            events.try_recv().ok(),
            Some(AuthEvent::LoggedOut { reason: LogoutReason::Rejected })
        );
        assert!(events.try_recv().is_err());

        // The revocation only applies to the refresh it interrupted
        let generation = coord.credentials().snapshot().generation;
        assert_eq!(owner(coord.admit(generation)).succeed("T4".into()), Ok("T4".to_string()));
        assert_eq!(coord.credentials().get().as_deref(), Some("T4"));
    }
}
