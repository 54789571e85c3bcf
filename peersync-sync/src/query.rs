//! Reactive enablement query.
//!
//! Re-runs the enablement decision whenever its inputs change: the system
//! gate, the per-user channel toggles and the signed-in user. Inputs are
//! compared by value, so asking again with the same inputs returns the
//! retained result (or joins the evaluation already running) instead of
//! touching the orchestrator.
//!
//! Evaluations are numbered and run one after another in request order, so
//! the orchestrator always ends up reflecting the newest inputs. One that
//! is superseded before it gets to run is skipped. Only the newest may
//! publish to [`EnablementQuery::current`]; older ones that did run still
//! cache their own key's result.

use crate::error::QueryError;
use crate::orchestrator::OrchestratorHandle;
use crate::resolver::resolve;
use crate::settings::{ChannelToggles, SettingsSnapshot, SettingsSource, SystemEnable};
use futures::future::{BoxFuture, FutureExt, Shared};
use peersync_types::{ChannelMap, Identity, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// The inputs an evaluation depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnablementKey {
    pub system: SystemEnable,
    pub toggles: ChannelToggles,
    /// `None` when nobody is signed in.
    pub user_id: Option<UserId>,
}

impl EnablementKey {
    pub fn new(snapshot: &SettingsSnapshot, identity: Option<&Identity>) -> Self {
        Self {
            system: snapshot.system_enable,
            toggles: snapshot.settings.toggles(),
            user_id: identity
                .filter(|identity| identity.is_present())
                .map(|identity| identity.id.clone()),
        }
    }
}

/// What observers see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnablementState {
    /// Key of the newest evaluation.
    pub key: Option<EnablementKey>,
    /// Latest known result for `key`; a cached value while revalidating.
    pub value: Option<bool>,
    /// Failure of the newest evaluation.
    pub error: Option<QueryError>,
    /// An evaluation for `key` is running.
    pub validating: bool,
}

type Evaluation = Shared<BoxFuture<'static, Result<bool, QueryError>>>;

struct InFlight {
    seq: u64,
    key: EnablementKey,
    evaluation: Evaluation,
}

#[derive(Default)]
struct QueryInner {
    seq: u64,
    current: Option<EnablementKey>,
    /// The key `current` replaced.
    previous: Option<EnablementKey>,
    /// Outcome of the newest finished evaluation for `current`.
    last: Option<Result<bool, QueryError>>,
    inflight: Option<InFlight>,
    /// Last successful result for `current` and `previous` only.
    results: HashMap<EnablementKey, bool>,
}

impl QueryInner {
    fn retains(&self, key: &EnablementKey) -> bool {
        self.current.as_ref() == Some(key) || self.previous.as_ref() == Some(key)
    }
}

/// Memoized enablement decision over an orchestrator.
#[derive(Clone)]
pub struct EnablementQuery {
    orchestrator: OrchestratorHandle,
    settings: Arc<dyn SettingsSource>,
    inner: Arc<Mutex<QueryInner>>,
    state_tx: Arc<watch::Sender<EnablementState>>,
}

impl EnablementQuery {
    pub fn new(orchestrator: OrchestratorHandle, settings: Arc<dyn SettingsSource>) -> Self {
        let (state_tx, _) = watch::channel(EnablementState::default());
        Self {
            orchestrator,
            settings,
            inner: Arc::new(Mutex::new(QueryInner::default())),
            state_tx: Arc::new(state_tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueryInner> {
        lock(&self.inner)
    }

    /// The orchestrator this query drives.
    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.orchestrator
    }

    /// The latest published state.
    pub fn current(&self) -> EnablementState {
        self.state_tx.borrow().clone()
    }

    /// Receives every published state.
    pub fn subscribe(&self) -> watch::Receiver<EnablementState> {
        self.state_tx.subscribe()
    }

    /// Returns whether sync is enabled for the current settings and user,
    /// evaluating only if the inputs changed since the last call.
    pub async fn evaluate(&self, identity: Option<Identity>) -> Result<bool, QueryError> {
        self.run(identity, false).await
    }

    /// Evaluates again even if the inputs did not change, e.g. after a room
    /// name or password was edited.
    pub async fn refresh(&self, identity: Option<Identity>) -> Result<bool, QueryError> {
        self.run(identity, true).await
    }

    async fn run(&self, identity: Option<Identity>, force: bool) -> Result<bool, QueryError> {
        let snapshot = self.settings.load();
        let key = EnablementKey::new(&snapshot, identity.as_ref());

        let (seq, evaluation) = {
            let mut inner = self.lock();
            let reuse = if force || inner.current.as_ref() != Some(&key) {
                None
            } else if let Some(flight) = inner.inflight.as_ref().filter(|f| f.key == key) {
                debug!("Joining in-flight enablement evaluation {}", flight.seq);
                Some((flight.seq, flight.evaluation.clone()))
            } else if let Some(outcome) = inner.last.clone() {
                return outcome;
            } else {
                None
            };

            match reuse {
                Some(joined) => joined,
                None => self.begin(&mut inner, key.clone(), snapshot, identity),
            }
        };

        let outcome = evaluation.await;
        // A panicked or cancelled task never settled its own outcome.
        if matches!(outcome, Err(QueryError::Task(_))) {
            settle(&self.inner, &self.state_tx, seq, key, &outcome);
        }
        outcome
    }

    fn begin(
        &self,
        inner: &mut QueryInner,
        key: EnablementKey,
        snapshot: SettingsSnapshot,
        identity: Option<Identity>,
    ) -> (u64, Evaluation) {
        inner.seq += 1;
        let seq = inner.seq;
        if inner.current.as_ref() != Some(&key) {
            inner.previous = inner.current.replace(key.clone());
            let QueryInner {
                results,
                current,
                previous,
                ..
            } = &mut *inner;
            results.retain(|k, _| Some(k) == current.as_ref() || Some(k) == previous.as_ref());
        }
        inner.last = None;

        debug!("Starting enablement evaluation {} for {:?}", seq, key);
        self.state_tx.send_replace(EnablementState {
            key: Some(key.clone()),
            value: inner.results.get(&key).copied(),
            error: None,
            validating: true,
        });

        let previous = inner.inflight.take().map(|flight| flight.evaluation);
        let latest = Arc::clone(&self.inner);
        let state_tx = Arc::clone(&self.state_tx);
        let orchestrator = self.orchestrator.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let superseded = lock(&latest).seq != seq;
            let outcome = if superseded {
                Err(QueryError::Superseded)
            } else {
                compute(orchestrator, snapshot, task_key.clone(), identity).await
            };
            // Settled here so callers that went away still clear `validating`.
            settle(&latest, &state_tx, seq, task_key, &outcome);
            outcome
        });
        let evaluation = task
            .map(|joined| joined.unwrap_or_else(|e| Err(QueryError::Task(e.to_string()))))
            .boxed()
            .shared();

        inner.inflight = Some(InFlight {
            seq,
            key,
            evaluation: evaluation.clone(),
        });
        (seq, evaluation)
    }
}

fn lock(inner: &Mutex<QueryInner>) -> MutexGuard<'_, QueryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records an evaluation's outcome and publishes it if it is the newest.
fn settle(
    inner: &Mutex<QueryInner>,
    state_tx: &watch::Sender<EnablementState>,
    seq: u64,
    key: EnablementKey,
    outcome: &Result<bool, QueryError>,
) {
    let mut inner = lock(inner);
    if let Ok(value) = outcome {
        if inner.retains(&key) {
            inner.results.insert(key.clone(), *value);
        }
    }

    let owns_flight = inner.inflight.as_ref().is_some_and(|f| f.seq == seq);
    if inner.seq != seq {
        debug!("Discarding superseded enablement evaluation {}", seq);
        return;
    }
    if !owns_flight {
        return;
    }

    inner.inflight = None;
    inner.last = Some(outcome.clone());
    if let Err(e) = outcome {
        error!("Sync enablement evaluation failed: {}", e);
    }

    let value = match outcome {
        Ok(value) => Some(*value),
        Err(_) => inner.results.get(&key).copied(),
    };
    state_tx.send_replace(EnablementState {
        key: Some(key),
        value,
        error: outcome.as_ref().err().cloned(),
        validating: false,
    });
}

async fn compute(
    orchestrator: OrchestratorHandle,
    snapshot: SettingsSnapshot,
    key: EnablementKey,
    identity: Option<Identity>,
) -> Result<bool, QueryError> {
    if key.system == SystemEnable::Pending {
        debug!("System sync gate pending, not evaluating");
        return Ok(false);
    }

    let Some(identity) = identity.filter(Identity::is_present) else {
        debug!("No signed-in user, sync stays off");
        return Ok(false);
    };

    if key.system == SystemEnable::Disabled {
        orchestrator.disable_all(ChannelMap::new(false, false)).await?;
        return Ok(false);
    }

    orchestrator.disable_all(key.toggles).await?;
    if !key.toggles.any() {
        info!("All sync channels turned off by user");
        return Ok(false);
    }

    let plan = resolve(&snapshot.settings).with_toggles(key.toggles);
    Ok(orchestrator.evaluate_and_activate(identity, plan).await?)
}
