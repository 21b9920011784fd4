//! Sync events and their identity.
//!
//! Every change notification for an `ApiExposure` becomes a [`SyncEvent`].
//! The work queue keeps at most one pending event per [`ObjectKey`] and
//! folds newer events into it with [`SyncEvent::coalesce`].

use crds::ApiExposure;
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;

/// Identity of an ApiExposure (namespace/name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(exposure: &ApiExposure) -> Self {
        Self::new(exposure.namespace().unwrap_or_default(), exposure.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What happened to an ApiExposure
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Create { object: Arc<ApiExposure> },
    /// `old` is the last state the controller acted on, `new` the latest seen
    Update { old: Arc<ApiExposure>, new: Arc<ApiExposure> },
    /// `object` is the final state before removal
    Delete { object: Arc<ApiExposure> },
}

impl SyncEvent {
    pub fn create(object: impl Into<Arc<ApiExposure>>) -> Self {
        SyncEvent::Create { object: object.into() }
    }

    pub fn update(old: impl Into<Arc<ApiExposure>>, new: impl Into<Arc<ApiExposure>>) -> Self {
        SyncEvent::Update {
            old: old.into(),
            new: new.into(),
        }
    }

    pub fn delete(object: impl Into<Arc<ApiExposure>>) -> Self {
        SyncEvent::Delete { object: object.into() }
    }

    /// Identity of the affected object
    pub fn key(&self) -> ObjectKey {
        match self {
            SyncEvent::Create { object } | SyncEvent::Delete { object } => ObjectKey::of(object),
            SyncEvent::Update { new, .. } => ObjectKey::of(new),
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Create { .. } => "create",
            SyncEvent::Update { .. } => "update",
            SyncEvent::Delete { .. } => "delete",
        }
    }

    /// Fold a later event for the same key into this pending one.
    ///
    /// The result carries the earliest state the controller has not yet
    /// acted on and the latest observed state, so a single sync covers both.
    pub fn coalesce(self, later: SyncEvent) -> SyncEvent {
        match (self, later) {
            // Deletion always wins and carries the final snapshot
            (_, SyncEvent::Delete { object }) => SyncEvent::Delete { object },

            (SyncEvent::Create { .. }, SyncEvent::Create { object })
            | (SyncEvent::Create { .. }, SyncEvent::Update { new: object, .. }) => {
                SyncEvent::Create { object }
            }

            (SyncEvent::Update { old, .. }, SyncEvent::Create { object: new })
            | (SyncEvent::Update { old, .. }, SyncEvent::Update { new, .. }) => {
                SyncEvent::Update { old, new }
            }

            // Removed and recreated before the removal was processed. The
            // derived resources of `old` still exist, so treat it as a change.
            (SyncEvent::Delete { object: old }, SyncEvent::Create { object: new })
            | (SyncEvent::Delete { object: old }, SyncEvent::Update { new, .. }) => {
                SyncEvent::Update { old, new }
            }
        }
    }
}
