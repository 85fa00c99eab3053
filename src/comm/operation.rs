//! Asynchronous data operations with multi-listener completion
//!
//! A [`DataOperation`] settles exactly once, as success or failure. Every
//! listener attached before settlement is notified when it settles. A
//! listener attached afterwards is notified on the spot with the decided
//! outcome, so no subscriber is ever dropped.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

use crate::error::{Error, ErrorCode};

use super::DataLocation;

/// Outcome of a settled operation, or of a request to start one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    /// Value is (now) present at the target
    Ok,
    /// Operation is running; listeners will be told how it ends
    InProgress,
    /// Operation ran and failed
    Failed,
    /// Operation could not be set up at all
    PreparationFailed,
    /// Operation is queued behind a copy producing its source
    WaitingSources,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Ok => "OP_OK",
            OperationStatus::InProgress => "OP_IN_PROGRESS",
            OperationStatus::Failed => "OP_FAILED",
            OperationStatus::PreparationFailed => "OP_PREPARATION_FAILED",
            OperationStatus::WaitingSources => "OP_WAITING_SOURCES",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the operation does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Make `data` available at `target`
    Copy { data: String, target: DataLocation },
    /// Remove one physical location of `data`
    Delete { data: String, location: DataLocation },
}

impl OperationKind {
    pub fn data(&self) -> &str {
        match self {
            OperationKind::Copy { data, .. } => data,
            OperationKind::Delete { data, .. } => data,
        }
    }
}

/// Final result shared by all listeners
pub type OperationResult = std::result::Result<Option<DataLocation>, Arc<Error>>;

/// Receiver of data operation outcomes
///
/// Implementations must tolerate being called after the operation ended.
pub trait DataOperationListener: Send + Sync {
    fn notify_end(&self, operation: &DataOperation);
    fn notify_failure(&self, operation: &DataOperation, error: &Error);
}

enum Settlement {
    Pending,
    Done(OperationResult),
}

struct OperationInner {
    settlement: Settlement,
    waiting_sources: bool,
    listeners: Vec<Arc<dyn DataOperationListener>>,
}

/// One copy or delete with its listener list
pub struct DataOperation {
    id: String,
    kind: OperationKind,
    inner: Mutex<OperationInner>,
}

impl DataOperation {
    pub fn new(kind: OperationKind) -> Arc<Self> {
        Arc::new(Self {
            id: format!("op-{}", &Uuid::new_v4().to_string()[..8]),
            kind,
            inner: Mutex::new(OperationInner {
                settlement: Settlement::Pending,
                waiting_sources: false,
                listeners: Vec::new(),
            }),
        })
    }

    /// Operation that is already decided when created
    pub fn settled(kind: OperationKind, result: OperationResult) -> Arc<Self> {
        let op = Self::new(kind);
        op.inner.lock().settlement = Settlement::Done(result);
        op
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn data(&self) -> &str {
        self.kind.data()
    }

    pub(crate) fn mark_waiting_sources(&self, waiting: bool) {
        self.inner.lock().waiting_sources = waiting;
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.inner.lock().settlement, Settlement::Done(_))
    }

    /// Current status as seen by a new subscriber
    pub fn status(&self) -> OperationStatus {
        let inner = self.inner.lock();
        match &inner.settlement {
            Settlement::Pending if inner.waiting_sources => OperationStatus::WaitingSources,
            Settlement::Pending => OperationStatus::InProgress,
            Settlement::Done(Ok(_)) => OperationStatus::Ok,
            Settlement::Done(Err(e)) if e.code() == ErrorCode::TransferPreparation => {
                OperationStatus::PreparationFailed
            }
            Settlement::Done(Err(_)) => OperationStatus::Failed,
        }
    }

    /// Location produced by a successful copy
    pub fn result_location(&self) -> Option<DataLocation> {
        match &self.inner.lock().settlement {
            Settlement::Done(Ok(location)) => location.clone(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<Arc<Error>> {
        match &self.inner.lock().settlement {
            Settlement::Done(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Subscribe to the outcome
    pub fn add_listener(&self, listener: Arc<dyn DataOperationListener>) {
        let outcome = {
            let mut inner = self.inner.lock();
            match &inner.settlement {
                Settlement::Pending => {
                    inner.listeners.push(listener);
                    return;
                }
                Settlement::Done(result) => result.clone(),
            }
        };
        trace!(operation = %self.id, "Late listener notified");
        self.dispatch(&listener, &outcome);
    }

    /// Decide the outcome and notify every listener
    ///
    /// Returns false if the operation had already settled.
    pub fn end(&self, result: OperationResult) -> bool {
        let listeners = {
            let mut inner = self.inner.lock();
            if let Settlement::Done(_) = inner.settlement {
                return false;
            }
            inner.settlement = Settlement::Done(result.clone());
            inner.waiting_sources = false;
            std::mem::take(&mut inner.listeners)
        };

        trace!(
            operation = %self.id,
            data = self.data(),
            ok = result.is_ok(),
            listeners = listeners.len(),
            "Operation settled"
        );
        for listener in &listeners {
            self.dispatch(listener, &result);
        }
        true
    }

    fn dispatch(&self, listener: &Arc<dyn DataOperationListener>, result: &OperationResult) {
        match result {
            Ok(_) => listener.notify_end(self),
            Err(e) => listener.notify_failure(self, e),
        }
    }

    /// Wait for settlement
    pub async fn settled_result(&self) -> OperationResult {
        let (tx, rx) = oneshot::channel();
        self.add_listener(Arc::new(OneshotListener {
            tx: Mutex::new(Some(tx)),
        }));
        rx.await
            .unwrap_or_else(|_| Err(Arc::new(Error::Internal("operation listener dropped".into()))))
    }
}

impl fmt::Debug for DataOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataOperation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

struct OneshotListener {
    tx: Mutex<Option<oneshot::Sender<OperationResult>>>,
}

impl DataOperationListener for OneshotListener {
    fn notify_end(&self, operation: &DataOperation) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Ok(operation.result_location()));
        }
    }

    fn notify_failure(&self, operation: &DataOperation, _error: &Error) {
        if let Some(tx) = self.tx.lock().take() {
            let err = operation
                .error()
                .unwrap_or_else(|| Arc::new(Error::Internal("failure without error".into())));
            let _ = tx.send(Err(err));
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Operation Group
// ─────────────────────────────────────────────────────────────────

type GroupCallback = Box<dyn FnOnce(std::result::Result<(), Arc<Error>>) + Send>;

struct GroupState {
    pending: usize,
    enabled: bool,
    fired: bool,
    failure: Option<Arc<Error>>,
}

/// Waits for a set of operations registered one by one
///
/// Operations may settle while the owner is still registering others, even
/// synchronously inside the registering call. The callback therefore only
/// fires once the owner called [`enable`](Self::enable) *and* the pending
/// count is back to zero. It fires exactly once, carrying the first failure
/// if any operation failed.
pub struct OperationGroup {
    state: Mutex<GroupState>,
    callback: Mutex<Option<GroupCallback>>,
}

impl OperationGroup {
    pub fn new(
        callback: impl FnOnce(std::result::Result<(), Arc<Error>>) + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GroupState {
                pending: 0,
                enabled: false,
                fired: false,
                failure: None,
            }),
            callback: Mutex::new(Some(Box::new(callback))),
        })
    }

    /// Count one more operation; call before handing `self` to it
    pub fn add_operation(&self) {
        self.state.lock().pending += 1;
    }

    /// Registration is over
    pub fn enable(&self) {
        self.state.lock().enabled = true;
        self.try_fire();
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    fn operation_done(&self, failure: Option<Arc<Error>>) {
        {
            let mut state = self.state.lock();
            state.pending = state.pending.saturating_sub(1);
            if state.failure.is_none() {
                state.failure = failure;
            }
        }
        self.try_fire();
    }

    fn try_fire(&self) {
        let outcome = {
            let mut state = self.state.lock();
            if state.fired || !state.enabled || state.pending > 0 {
                return;
            }
            state.fired = true;
            match state.failure.clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        };
        if let Some(callback) = self.callback.lock().take() {
            callback(outcome);
        }
    }
}

impl DataOperationListener for OperationGroup {
    fn notify_end(&self, _operation: &DataOperation) {
        self.operation_done(None);
    }

    fn notify_failure(&self, operation: &DataOperation, _error: &Error) {
        self.operation_done(operation.error());
    }
}
