//! Single-flight refresh coordination.
//!
//! When the access token expires, every in-flight request sees a 401 at about
//! the same moment. [`RefreshCoordinator`] makes sure exactly one refresh
//! call runs for all of them and that every caller gets the same outcome.
//!
//! # State machine
//!
//! ```text
//!            401 / start driver                driver resolves
//!   Idle ─────────────────────────▶ Refreshing ─────────────────▶ Idle
//!     ▲                              │    ▲
//!     │                              └────┘ 401 / enqueue waiter
//!     │                              │
//!     │                              │ login / logout
//!     │     abandoned call returns,  ▼
//!     └──── nobody queued ───────  Draining ──▶ Refreshing
//!                                         abandoned call returns,
//!                                         callers queued
//! ```
//!
//! All transitions, and every credential store access they need, happen
//! under one `parking_lot::Mutex` that is never held across an `.await`.
//! When a cycle ends the phase is reset to `Idle` and the queue is taken in
//! the same critical section; waiters are notified only after the lock is
//! released. A waiter whose replay is rejected again therefore finds the
//! coordinator idle and can open a new cycle.
//!
//! The refresh call runs on its own task. Dropping any caller, including
//! the one that opened the cycle, only removes that caller's waiter. Login
//! and logout end a cycle without waiting for its call; until that call
//! returns the coordinator is `Draining` and never starts a second one.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::refresh::{RefreshError, RefreshInvoker, RefreshedTokens};
use crate::request::RequestKind;
use crate::store::{CredentialPair, CredentialStore, Secret, StoreError};

/// Terminal authentication failure.
///
/// No automatic recovery is possible; the user has to log in again.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// A 401 arrived but there is no refresh token to recover with.
    #[error("no refresh token available, login required")]
    MissingRefreshToken,

    /// The shared refresh attempt failed; credentials have been cleared.
    #[error("token refresh failed: {0}")]
    RefreshFailed(RefreshError),

    /// The request was rejected again after being replayed with a fresh token.
    #[error("request rejected again after replay with a refreshed token")]
    ReplayRejected,

    /// A login or refresh request itself was rejected.
    #[error("{kind} request rejected as unauthorized")]
    Unauthorized { kind: RequestKind },

    /// The session was logged out while the caller waited for a refresh.
    #[error("logged out while waiting for token refresh")]
    LoggedOut,

    /// The refresh cycle ended without delivering an outcome to this caller.
    #[error("refresh cycle ended without an outcome")]
    Abandoned,
}

/// What every waiter of a cycle receives.
pub type RefreshOutcome = Result<Secret, AuthError>;

/// A usable access token handed back after a 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renewal {
    /// A refresh that already finished had replaced the rejected token.
    Replaced(Secret),
    /// Delivered by the refresh cycle this caller started or joined, or by a
    /// login that ended that cycle.
    Refreshed(Secret),
}

impl Renewal {
    pub fn token(&self) -> &Secret {
        match self {
            Self::Replaced(token) | Self::Refreshed(token) => token,
        }
    }

    pub fn into_token(self) -> Secret {
        match self {
            Self::Replaced(token) | Self::Refreshed(token) => token,
        }
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<RefreshOutcome>,
}

enum Phase {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
    /// The cycle was ended by login or logout but its refresh call has not
    /// returned. Callers queue here until it does, then get a fresh cycle.
    Draining { waiters: VecDeque<Waiter> },
}

struct RefreshState {
    phase: Phase,
    /// Incremented whenever a cycle starts or is ended early.
    cycle: u64,
    next_waiter: u64,
}

impl RefreshState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            cycle: 0,
            next_waiter: 0,
        }
    }

    fn allocate_waiter(&mut self) -> u64 {
        let id = self.next_waiter;
        self.next_waiter += 1;
        id
    }

    fn begin_cycle(&mut self, waiters: VecDeque<Waiter>) -> u64 {
        self.cycle += 1;
        self.phase = Phase::Refreshing { waiters };
        self.cycle
    }

    /// Return to `Idle`, handing back the queue that existed at this instant.
    fn finish_cycle(&mut self) -> VecDeque<Waiter> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Refreshing { waiters } | Phase::Draining { waiters } => waiters,
            Phase::Idle => VecDeque::new(),
        }
    }

    /// End the running cycle without its outcome. The refresh call keeps
    /// running, so the phase becomes `Draining` rather than `Idle`.
    fn end_early(&mut self) -> VecDeque<Waiter> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => VecDeque::new(),
            Phase::Refreshing { waiters } | Phase::Draining { waiters } => {
                self.cycle += 1;
                self.phase = Phase::Draining {
                    waiters: VecDeque::new(),
                };
                waiters
            }
        }
    }

    fn is_refreshing(&self) -> bool {
        matches!(self.phase, Phase::Refreshing { .. })
    }

    fn call_in_flight(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    fn queue_mut(&mut self) -> Option<&mut VecDeque<Waiter>> {
        match &mut self.phase {
            Phase::Refreshing { waiters } | Phase::Draining { waiters } => Some(waiters),
            Phase::Idle => None,
        }
    }
}

/// Ticket held by a suspended caller.
struct Ticket {
    waiter_id: u64,
    rx: oneshot::Receiver<RefreshOutcome>,
}

enum Admission {
    /// No refresh needed; another cycle already replaced the stale token.
    Current(Secret),
    /// Suspended on a cycle, possibly one this caller just started.
    Waiting(Ticket),
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    invoker: Arc<dyn RefreshInvoker>,
    refresh_timeout: Duration,
    state: Mutex<RefreshState>,
    refresh_count: AtomicU64,
}

/// Guarantees at most one outstanding refresh call and fans its outcome out
/// to every caller that needed it.
///
/// One coordinator belongs to one session; clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        invoker: Arc<dyn RefreshInvoker>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                invoker,
                refresh_timeout,
                state: Mutex::new(RefreshState::new()),
                refresh_count: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a fresh access token after a 401.
    ///
    /// `stale` is the token the rejected request was sent with. If no cycle
    /// is running and the store already holds a different access token, that
    /// token is returned as [`Renewal::Replaced`] without refreshing. The
    /// caller has not been through a cycle yet, so a 401 on the replay should
    /// come back here with `stale: None`, which always refreshes or joins.
    ///
    /// Otherwise the caller joins the running cycle or starts one, and
    /// suspends until it resolves. Fails immediately, without calling the
    /// refresh endpoint, when no refresh token is stored.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn await_refresh(&self, stale: Option<&Secret>) -> Result<Renewal, AuthError> {
        let ticket = match self.inner.admit(stale)? {
            Admission::Current(token) => return Ok(Renewal::Replaced(token)),
            Admission::Waiting(ticket) => ticket,
        };

        let mut guard = WaiterGuard {
            inner: &self.inner,
            waiter_id: ticket.waiter_id,
            armed: true,
        };
        let outcome = ticket.rx.await;
        guard.armed = false;

        outcome
            .unwrap_or(Err(AuthError::Abandoned))
            .map(Renewal::Refreshed)
    }

    /// Store a pair obtained outside a refresh (login).
    ///
    /// A cycle that is still running is ended: its waiters receive the new
    /// access token and its late outcome is discarded.
    pub fn install(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let waiters = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            self.inner.store.set_tokens(pair)?;
            if state.is_refreshing() {
                tracing::info!("New credentials installed during refresh, ending cycle early");
            }
            state.end_early()
        };

        notify(waiters, &Ok(pair.access_token.clone()));
        Ok(())
    }

    /// Clear all credentials (logout).
    ///
    /// A running cycle is ended and its waiters receive [`AuthError::LoggedOut`].
    pub fn teardown(&self) -> Result<(), StoreError> {
        let (cleared, waiters) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let cleared = self.inner.store.clear();
            if state.is_refreshing() {
                tracing::info!("Session torn down during refresh, ending cycle early");
            }
            (cleared, state.end_early())
        };

        notify(waiters, &Err(AuthError::LoggedOut));
        cleared
    }

    /// Whether a refresh cycle is running on behalf of callers.
    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().is_refreshing()
    }

    /// Whether a refresh call is outstanding, including one whose cycle was
    /// ended early by login or logout.
    pub fn call_in_flight(&self) -> bool {
        self.inner.state.lock().call_in_flight()
    }

    /// Number of suspended callers.
    pub fn pending_waiters(&self) -> usize {
        self.inner
            .state
            .lock()
            .queue_mut()
            .map_or(0, |waiters| waiters.len())
    }

    /// Number of refresh calls started since construction.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        let phase = match state.phase {
            Phase::Idle => "idle",
            Phase::Refreshing { .. } => "refreshing",
            Phase::Draining { .. } => "draining",
        };
        f.debug_struct("RefreshCoordinator")
            .field("phase", &phase)
            .field("cycle", &state.cycle)
            .field("refresh_count", &self.refresh_count())
            .finish()
    }
}

impl Inner {
    /// The `Idle -> Refreshing` transition, or joining a queue.
    fn admit(self: &Arc<Self>, stale: Option<&Secret>) -> Result<Admission, AuthError> {
        let (tx, rx) = oneshot::channel();

        let (cycle, waiter_id, refresh_token) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let waiter_id = state.allocate_waiter();

            if let Phase::Refreshing { waiters } = &mut state.phase {
                waiters.push_back(Waiter { id: waiter_id, tx });
                tracing::debug!(
                    "Joined refresh cycle {} as waiter {} ({} queued)",
                    state.cycle,
                    waiter_id,
                    waiters.len()
                );
                return Ok(Admission::Waiting(Ticket { waiter_id, rx }));
            }

            if let Some(current) = stale.and_then(|stale| self.replaced_token(stale)) {
                return Ok(Admission::Current(current));
            }

            let refresh_token = self.load_refresh_token()?;

            if let Phase::Draining { waiters } = &mut state.phase {
                waiters.push_back(Waiter { id: waiter_id, tx });
                tracing::debug!(
                    "Abandoned refresh call still running, waiter {} queued ({} queued)",
                    waiter_id,
                    waiters.len()
                );
                return Ok(Admission::Waiting(Ticket { waiter_id, rx }));
            }

            let cycle = state.begin_cycle(VecDeque::from([Waiter { id: waiter_id, tx }]));
            self.refresh_count.fetch_add(1, Ordering::SeqCst);

            (cycle, waiter_id, refresh_token)
        };

        tracing::info!("Access token rejected, starting refresh cycle {}", cycle);
        self.spawn_driver(cycle, refresh_token);

        Ok(Admission::Waiting(Ticket { waiter_id, rx }))
    }

    /// The stored access token, if it differs from `stale`.
    fn replaced_token(&self, stale: &Secret) -> Option<Secret> {
        match self.store.get_access_token() {
            Ok(Some(current)) if current != *stale => {
                tracing::debug!("Access token already replaced, skipping refresh");
                Some(current)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Failed to read access token, refreshing instead: {}", e);
                None
            }
        }
    }

    /// Read the refresh token, tearing down the session when there is none.
    fn load_refresh_token(&self) -> Result<Secret, AuthError> {
        match self.store.get_refresh_token() {
            Ok(Some(token)) if !token.is_empty() => Ok(token),
            Ok(_) => {
                tracing::warn!("Access token rejected and no refresh token stored");
                self.clear_store();
                Err(AuthError::MissingRefreshToken)
            }
            Err(e) => {
                tracing::warn!("Failed to read refresh token: {}", e);
                self.clear_store();
                Err(AuthError::RefreshFailed(RefreshError::Store {
                    message: e.to_string(),
                }))
            }
        }
    }

    /// Run the refresh call detached from every caller.
    fn spawn_driver(self: &Arc<Self>, cycle: u64, refresh_token: Secret) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let invoker = Arc::clone(&inner.invoker);
            let timeout = inner.refresh_timeout;
            let previous = refresh_token.clone();

            // A panicking invoker surfaces as a JoinError instead of leaving
            // the phase stuck in Refreshing.
            let attempt = tokio::spawn(async move {
                match tokio::time::timeout(timeout, invoker.refresh(&refresh_token)).await {
                    Ok(result) => result,
                    Err(_) => Err(RefreshError::Timeout {
                        seconds: timeout.as_secs(),
                    }),
                }
            });

            let result = match attempt.await {
                Ok(result) => result,
                Err(e) => Err(RefreshError::Aborted {
                    message: e.to_string(),
                }),
            };

            inner.complete(cycle, result, previous);
        });
    }

    /// The `Refreshing -> Idle` transition, or `Draining -> Idle | Refreshing`
    /// when the call belonged to a cycle that was ended early.
    fn complete(
        self: &Arc<Self>,
        cycle: u64,
        result: Result<RefreshedTokens, RefreshError>,
        previous: Secret,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.phase {
            Phase::Refreshing { .. } if state.cycle == cycle => {}
            Phase::Draining { .. } => {
                tracing::debug!("Discarding outcome of abandoned refresh cycle {}", cycle);
                let queued = state.finish_cycle();
                if queued.is_empty() {
                    return;
                }

                let queued_count = queued.len();
                match self.load_refresh_token() {
                    Ok(refresh_token) => {
                        let next = state.begin_cycle(queued);
                        self.refresh_count.fetch_add(1, Ordering::SeqCst);
                        drop(guard);

                        tracing::info!(
                            "Starting refresh cycle {} for {} caller(s) queued behind an abandoned call",
                            next,
                            queued_count
                        );
                        self.spawn_driver(next, refresh_token);
                    }
                    Err(e) => {
                        drop(guard);
                        notify(queued, &Err(e));
                    }
                }
                return;
            }
            _ => {
                tracing::debug!("Discarding outcome of stale refresh cycle {}", cycle);
                return;
            }
        }

        let outcome = match result {
            Ok(tokens) => {
                let pair = tokens.into_pair(previous);
                match self.store.set_tokens(&pair) {
                    Ok(()) => Ok(pair.access_token.clone()),
                    Err(e) => {
                        self.clear_store();
                        Err(AuthError::RefreshFailed(RefreshError::Store {
                            message: e.to_string(),
                        }))
                    }
                }
            }
            Err(e) => {
                self.clear_store();
                Err(AuthError::RefreshFailed(e))
            }
        };
        let waiters = state.finish_cycle();
        drop(guard);

        match &outcome {
            Ok(_) => tracing::info!(
                "Refresh cycle {} succeeded, resuming {} waiter(s)",
                cycle,
                waiters.len()
            ),
            Err(e) => tracing::warn!(
                "Refresh cycle {} failed, credentials cleared, rejecting {} waiter(s): {}",
                cycle,
                waiters.len(),
                e
            ),
        }

        notify(waiters, &outcome);
    }

    /// Remove a waiter whose caller went away before being resolved.
    fn cancel_waiter(&self, waiter_id: u64) {
        let mut state = self.state.lock();
        if let Some(waiters) = state.queue_mut() {
            waiters.retain(|w| w.id != waiter_id);
            tracing::debug!("Waiter {} cancelled ({} still queued)", waiter_id, waiters.len());
        }
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear credentials: {}", e);
        }
    }
}

/// Resolve waiters in arrival order. Callers that already went away are skipped.
fn notify(waiters: VecDeque<Waiter>, outcome: &RefreshOutcome) {
    for waiter in waiters {
        if waiter.tx.send(outcome.clone()).is_err() {
            tracing::debug!("Waiter {} went away before the outcome arrived", waiter.id);
        }
    }
}

/// Removes the caller's waiter if its future is dropped while suspended.
struct WaiterGuard<'a> {
    inner: &'a Inner,
    waiter_id: u64,
    armed: bool,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.cancel_waiter(self.waiter_id);
        }
    }
}
