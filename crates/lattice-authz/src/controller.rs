//! AuthorizationPolicy controller
//!
//! Watches AuthorizationPolicy resources and turns every watch event into a
//! reconcile of the affected identity. Reconciles of the same identity never
//! overlap: events arriving while one runs are merged into a single rerun.
//! Distinct identities run concurrently up to a limit. Fetch failures are
//! retried with backoff a bounded number of times, then requeued after a
//! delay without holding a reconcile slot. Compile failures are not retried.
//!
//! Deletions that happen while the watch is down are caught on relist: any
//! stored identity missing from the fresh listing is reconciled, which finds
//! it absent and removes it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::channel::mpsc;
use futures::{stream, Stream, StreamExt};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use lattice_policy_cache::{
    PolicyCache, PolicyKey, PolicyStore, ReconcileError, ReconcileOutcome, Reconciler,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::compiler::CompiledPolicy;
use crate::crd::AuthorizationPolicy;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Reconcile attempts per dispatch before requeueing
const DEFAULT_RECONCILE_ATTEMPTS: u32 = 5;

/// Delay before an identity whose attempts ran out is reconciled again
const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(30);

/// Policy cache specialized to AuthorizationPolicy resources
pub type AuthzPolicyCache = PolicyCache<AuthorizationPolicy, CompiledPolicy>;

/// Dispatch configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum reconciles in flight at once
    pub max_concurrent_reconciles: usize,
    /// Backoff for retryable reconcile failures within one dispatch
    pub retry: RetryConfig,
    /// Delay before requeueing an identity whose retries ran out
    pub requeue_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 16,
            retry: RetryConfig {
                max_attempts: DEFAULT_RECONCILE_ATTEMPTS,
                ..RetryConfig::default()
            },
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        }
    }
}

/// Routes watch events to the reconciler
pub struct Dispatcher {
    reconciler: Arc<Reconciler<AuthorizationPolicy, CompiledPolicy>>,
    store: Arc<PolicyStore<CompiledPolicy>>,
    /// Identities with a reconcile running, flagged when another event
    /// arrived meanwhile
    inflight: DashMap<PolicyKey, bool>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher for a policy cache
    pub fn new(cache: &AuthzPolicyCache, config: DispatchConfig) -> Self {
        Self {
            reconciler: cache.reconciler(),
            store: cache.store(),
            inflight: DashMap::new(),
            config,
        }
    }

    /// Reconcile one identity, retrying transient failures
    ///
    /// Returns `Ok(None)` without waiting when the identity is already being
    /// reconciled; the running reconcile then runs once more so it observes
    /// the change behind this event.
    pub async fn dispatch(
        &self,
        key: PolicyKey,
        cancel: &CancellationToken,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(mut running) => {
                *running.get_mut() = true;
                debug!(key = %key, "Reconcile already running, merging event");
                return Ok(None);
            }
            Entry::Vacant(slot) => {
                slot.insert(false);
            }
        }

        loop {
            let result = retry_with_backoff(
                &self.config.retry,
                "reconcile AuthorizationPolicy",
                cancel,
                ReconcileError::is_retryable,
                || self.reconciler.reconcile(&key, cancel),
            )
            .await;

            log_result(&key, &result);

            let finished = if cancel.is_cancelled() {
                self.inflight.remove(&key);
                true
            } else {
                self.inflight
                    .remove_if(&key, |_, rerun| !*rerun)
                    .is_some()
            };

            if finished {
                return result.map(Some);
            }

            if let Some(mut rerun) = self.inflight.get_mut(&key) {
                *rerun = false;
            }
            debug!(key = %key, "Events arrived during reconcile, running again");
        }
    }

    /// Reconcile identities from `keys` until cancelled
    ///
    /// Identities whose retries run out are fed back in after the requeue
    /// delay.
    pub async fn process<S>(self: Arc<Self>, keys: S, cancel: CancellationToken)
    where
        S: Stream<Item = PolicyKey>,
    {
        let (requeue_tx, requeue_rx) = mpsc::unbounded();
        let limit = self.config.max_concurrent_reconciles;

        stream::select(keys, requeue_rx)
            .take_until(cancel.clone().cancelled_owned())
            .for_each_concurrent(limit, |key| {
                let dispatcher = self.clone();
                let cancel = cancel.clone();
                let requeue_tx = requeue_tx.clone();
                async move {
                    let result = dispatcher.dispatch(key.clone(), &cancel).await;
                    if matches!(&result, Err(e) if e.is_retryable()) && !cancel.is_cancelled() {
                        dispatcher.requeue(key, requeue_tx, cancel);
                    }
                }
            })
            .await;
    }

    /// Feed an identity back into the dispatch stream after a delay
    fn requeue(
        &self,
        key: PolicyKey,
        requeue_tx: mpsc::UnboundedSender<PolicyKey>,
        cancel: CancellationToken,
    ) {
        let delay = self.config.requeue_delay;
        warn!(
            key = %key,
            delay_secs = delay.as_secs(),
            "AuthorizationPolicy retries exhausted, requeueing"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = requeue_tx.unbounded_send(key);
                }
            }
        });
    }

    /// Watch AuthorizationPolicies and reconcile until cancelled
    ///
    /// Watches all namespaces when `namespace` is `None`.
    pub async fn run(
        self: Arc<Self>,
        client: Client,
        namespace: Option<String>,
        cancel: CancellationToken,
    ) {
        let api: Api<AuthorizationPolicy> = match &namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };

        info!(
            namespace = namespace.as_deref().unwrap_or("*"),
            "Starting AuthorizationPolicy controller"
        );

        let store = self.store.clone();
        let mut tracker = RelistTracker::default();

        let keys = watcher::watcher(api, watcher::Config::default().timeout(WATCH_TIMEOUT_SECS))
            .default_backoff()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(error = %e, "AuthorizationPolicy watch error, will retry");
                        None
                    }
                }
            })
            .flat_map(move |event| stream::iter(tracker.keys_for(event, || store.keys())));

        self.process(keys, cancel).await;

        info!("AuthorizationPolicy controller stopped");
    }
}

fn log_result(key: &PolicyKey, result: &Result<ReconcileOutcome, ReconcileError>) {
    match result {
        Ok(ReconcileOutcome::Rejected { errors, evicted }) => {
            warn!(
                key = %key,
                errors = errors.len(),
                evicted,
                "AuthorizationPolicy rejected, not retrying"
            );
        }
        Ok(outcome) => debug!(
            key = %key,
            ?outcome,
            mutated = outcome.mutated(),
            "AuthorizationPolicy reconciled"
        ),
        Err(e) => error!(key = %key, error = %e, "AuthorizationPolicy reconcile failed"),
    }
}

/// Maps watch events to identities, detecting deletions missed across relists
#[derive(Debug, Default)]
struct RelistTracker {
    /// Identities seen since the current relist began
    listing: Option<HashSet<PolicyKey>>,
}

impl RelistTracker {
    fn keys_for(
        &mut self,
        event: Event<AuthorizationPolicy>,
        stored: impl FnOnce() -> Vec<PolicyKey>,
    ) -> Vec<PolicyKey> {
        match event {
            Event::Apply(policy) | Event::Delete(policy) => policy_key(&policy).into_iter().collect(),
            Event::Init => {
                self.listing = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(policy) => {
                let key = policy_key(&policy);
                if let (Some(listing), Some(key)) = (self.listing.as_mut(), key.as_ref()) {
                    listing.insert(key.clone());
                }
                key.into_iter().collect()
            }
            Event::InitDone => match self.listing.take() {
                Some(listing) => {
                    let mut missing: Vec<PolicyKey> = stored()
                        .into_iter()
                        .filter(|key| !listing.contains(key))
                        .collect();
                    missing.sort();
                    if !missing.is_empty() {
                        info!(
                            count = missing.len(),
                            "Reconciling policies missing from relist"
                        );
                    }
                    missing
                }
                None => Vec::new(),
            },
        }
    }
}

/// Identity of an AuthorizationPolicy
fn policy_key(policy: &AuthorizationPolicy) -> Option<PolicyKey> {
    let namespace = policy.namespace()?;
    Some(PolicyKey::namespaced(&namespace, &policy.name_any()))
}
