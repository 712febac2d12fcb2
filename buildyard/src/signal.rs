//! Process-local publish/subscribe bus for lifecycle signals
//!
//! Modules subscribe handlers to a [`SignalKind`]; the coordinator emits
//! signals at fixed lifecycle points. Handlers run synchronously in
//! subscription order and all of them run even if one fails; the returned
//! [`Dispatch`] reports every outcome. A handler that needs to do long-lived
//! work spawns it into the [`ServiceRegistry`] and returns, so emission only
//! waits for handlers to *start* their work.
//!
//! A payload is shared by mutable reference across the handlers of one
//! emission: later handlers observe what earlier ones wrote.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::bundle::BundleConfig;
use crate::context::TaskContext;
use crate::error::SignalError;
use crate::process::ParentLink;
use crate::services::ServiceRegistry;

/// Signal names, used as subscription keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// Start the application
    Run,
    /// Master side of `build --watch`
    WatchOutput,
    /// Worker side of `--watch`, frontend modules
    WatchFrontend,
    /// Worker side of `--watch`, backend modules
    WatchBackend,
    /// Compose the bundle configuration
    BuildBundleConfig,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Run => "run",
            SignalKind::WatchOutput => "watch-output",
            SignalKind::WatchFrontend => "watch-frontend",
            SignalKind::WatchBackend => "watch-backend",
            SignalKind::BuildBundleConfig => "build-bundle-config",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signal together with its payload
#[derive(Debug)]
pub enum Signal<'a> {
    Run,
    WatchOutput,
    WatchFrontend,
    WatchBackend,
    BuildBundleConfig(&'a mut BundleConfig),
}

impl Signal<'_> {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Run => SignalKind::Run,
            Signal::WatchOutput => SignalKind::WatchOutput,
            Signal::WatchFrontend => SignalKind::WatchFrontend,
            Signal::WatchBackend => SignalKind::WatchBackend,
            Signal::BuildBundleConfig(_) => SignalKind::BuildBundleConfig,
        }
    }
}

/// What a handler gets besides the signal
#[derive(Clone)]
pub struct HandlerContext {
    pub task: Arc<TaskContext>,
    pub services: ServiceRegistry,
    pub parent: Arc<dyn ParentLink>,
}

pub type Handler = Arc<dyn Fn(&mut Signal<'_>, &HandlerContext) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    subscriber: String,
    handler: Handler,
}

/// Outcome of one handler invocation
#[derive(Debug)]
pub struct HandlerOutcome {
    pub subscriber: String,
    pub result: anyhow::Result<()>,
}

/// Report of one emission
#[derive(Debug)]
pub struct Dispatch {
    pub signal: SignalKind,
    pub outcomes: Vec<HandlerOutcome>,
}

impl Dispatch {
    pub fn handled(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HandlerOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Fail if any handler failed
    pub fn into_result(self) -> Result<(), SignalError> {
        let failures: Vec<(String, String)> = self
            .outcomes
            .into_iter()
            .filter_map(|o| match o.result {
                Ok(()) => None,
                Err(e) => Some((o.subscriber, format!("{:#}", e))),
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SignalError {
                signal: self.signal.as_str(),
                failures,
            })
        }
    }
}

/// Subscriptions keyed by signal
///
/// Cloning yields another handle on the same subscriptions, so sub-tasks can
/// carry the bus and emit while a phase runs.
#[derive(Clone, Default)]
pub struct SignalBus {
    subscriptions: Arc<RwLock<HashMap<SignalKind, Vec<Subscription>>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    // Subscriptions stay usable after a panic while the lock was held
    fn read(&self) -> RwLockReadGuard<'_, HashMap<SignalKind, Vec<Subscription>>> {
        self.subscriptions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SignalKind, Vec<Subscription>>> {
        self.subscriptions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler for future emissions of `kind`
    pub fn subscribe<F>(&self, kind: SignalKind, subscriber: impl Into<String>, handler: F)
    where
        F: Fn(&mut Signal<'_>, &HandlerContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let subscriber = subscriber.into();
        debug!(signal = %kind, subscriber = %subscriber, "Subscribed");
        self.write().entry(kind).or_default().push(Subscription {
            subscriber,
            handler: Arc::new(handler),
        });
    }

    pub fn subscriber_count(&self, kind: SignalKind) -> usize {
        self.read().get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Invoke every handler subscribed to the signal, in subscription order
    pub fn emit(&self, signal: &mut Signal<'_>, ctx: &HandlerContext) -> Dispatch {
        let kind = signal.kind();
        // Snapshot so handlers may subscribe without deadlocking
        let subs: Vec<Subscription> = self.read().get(&kind).cloned().unwrap_or_default();

        if subs.is_empty() {
            debug!(signal = %kind, "No subscribers");
        } else {
            debug!(signal = %kind, handlers = subs.len(), "Emitting signal");
        }

        let outcomes = subs
            .into_iter()
            .map(|sub| {
                let result = (sub.handler)(signal, ctx);
                if let Err(e) = &result {
                    warn!(signal = %kind, subscriber = %sub.subscriber, error = %e, "Signal handler failed");
                }
                HandlerOutcome {
                    subscriber: sub.subscriber,
                    result,
                }
            })
            .collect();

        Dispatch {
            signal: kind,
            outcomes,
        }
    }
}
