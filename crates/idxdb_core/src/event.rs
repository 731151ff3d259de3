//! Event kernel: listener tables and three-phase dispatch.
//!
//! Events propagate over the chain request → transaction → database:
//! capture from the outermost ancestor inward, target listeners, then
//! bubbling back out when the event bubbles. Listener failures are
//! isolated (every listener still runs) and reported back through
//! [`DispatchOutcome`]; the transaction machinery, not this module,
//! decides whether a failure aborts anything.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// The kinds of events the engine delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A request finished successfully.
    Success,
    /// A request failed.
    Error,
    /// A transaction was aborted.
    Abort,
    /// A transaction committed.
    Complete,
    /// An open needs a version upgrade; fired inside the version-change
    /// transaction.
    UpgradeNeeded,
    /// An open or delete is blocked by live connections.
    Blocked,
    /// Another connection requested a version change or deletion.
    VersionChange,
}

impl EventKind {
    /// The event's conventional name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Success => "success",
            EventKind::Error => "error",
            EventKind::Abort => "abort",
            EventKind::Complete => "complete",
            EventKind::UpgradeNeeded => "upgradeneeded",
            EventKind::Blocked => "blocked",
            EventKind::VersionChange => "versionchange",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivered event.
#[derive(Debug)]
pub struct Event {
    kind: EventKind,
    bubbles: bool,
    cancelable: bool,
    default_prevented: bool,
    propagation_stopped: bool,
    /// Previous database version, on version-change-flavored events.
    pub old_version: Option<u64>,
    /// New database version; `None` means the database is being deleted.
    pub new_version: Option<u64>,
}

impl Event {
    pub(crate) fn new(kind: EventKind, bubbles: bool, cancelable: bool) -> Self {
        Self {
            kind,
            bubbles,
            cancelable,
            default_prevented: false,
            propagation_stopped: false,
            old_version: None,
            new_version: None,
        }
    }

    pub(crate) fn with_versions(mut self, old: u64, new: Option<u64>) -> Self {
        self.old_version = Some(old);
        self.new_version = new;
        self
    }

    /// The event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Whether the event bubbles.
    #[must_use]
    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    /// Cancels the event's default action (for error events, aborting the
    /// transaction). No effect on non-cancelable events.
    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    /// Whether the default action was cancelled.
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Stops propagation to the remaining targets in the path.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }
}

/// A listener callback. Returning `Err` is the engine's rendition of a
/// handler throwing: remaining listeners still run, and the error is
/// surfaced to the transaction machinery.
pub type Listener = Box<dyn FnMut(&mut Event) -> Result<()> + Send>;

struct ListenerEntry {
    id: u64,
    kind: EventKind,
    capture: bool,
    once: bool,
    callback: Arc<Mutex<Listener>>,
}

#[derive(Default)]
struct TargetState {
    next_id: u64,
    listeners: Vec<ListenerEntry>,
}

/// A listener table attached to a request, transaction, or database.
#[derive(Default)]
pub(crate) struct EventTarget {
    state: Mutex<TargetState>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener; returns its id for removal.
    pub fn add_listener(&self, kind: EventKind, capture: bool, once: bool, callback: Listener) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.listeners.push(ListenerEntry {
            id,
            kind,
            capture,
            once,
            callback: Arc::new(Mutex::new(callback)),
        });
        id
    }

    /// Removes a listener by id.
    pub fn remove_listener(&self, id: u64) {
        self.state.lock().listeners.retain(|entry| entry.id != id);
    }

    /// Snapshots the listeners matching a kind and phase. `capture_phase
    /// = None` matches both registrations (target phase).
    fn snapshot(
        &self,
        kind: EventKind,
        capture_phase: Option<bool>,
    ) -> Vec<(u64, bool, Arc<Mutex<Listener>>)> {
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|entry| {
                entry.kind == kind && capture_phase.map_or(true, |phase| entry.capture == phase)
            })
            .map(|entry| (entry.id, entry.once, Arc::clone(&entry.callback)))
            .collect()
    }
}

/// What dispatch observed, for the caller to act on.
#[derive(Debug)]
pub(crate) struct DispatchOutcome {
    /// First listener failure, if any. All listeners ran regardless.
    pub handler_error: Option<Error>,
    /// Whether some listener cancelled the default action.
    pub default_prevented: bool,
}

/// Dispatches an event over a propagation path.
///
/// `path` is ordered target-first: `path[0]` is the event target, the
/// rest are ancestors innermost to outermost.
pub(crate) fn dispatch(event: &mut Event, path: &[&EventTarget]) -> DispatchOutcome {
    let mut handler_error: Option<Error> = None;

    let mut run_target = |target: &EventTarget, phase: Option<bool>, event: &mut Event| {
        for (id, once, callback) in target.snapshot(event.kind, phase) {
            if once {
                target.remove_listener(id);
            }
            if let Err(e) = (callback.lock())(event) {
                tracing::warn!(kind = %event.kind, error = %e, "event listener failed");
                if handler_error.is_none() {
                    handler_error = Some(e);
                }
            }
        }
    };

    // Capture: outermost ancestor inward.
    for target in path.iter().skip(1).rev() {
        if event.propagation_stopped {
            break;
        }
        run_target(target, Some(true), event);
    }

    // Target phase.
    if !event.propagation_stopped {
        if let Some(target) = path.first() {
            run_target(target, None, event);
        }
    }

    // Bubble: innermost ancestor outward.
    if event.bubbles {
        for target in path.iter().skip(1) {
            if event.propagation_stopped {
                break;
            }
            run_target(target, Some(false), event);
        }
    }

    DispatchOutcome {
        handler_error,
        default_prevented: event.default_prevented,
    }
}
