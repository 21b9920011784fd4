//! ApiExposure watcher.
//!
//! Follows the ApiExposure watch stream, keeps the reflector cache behind
//! [`crate::validation::StoreLister`] up to date and turns every change into
//! a [`SyncEvent`] on the work queue. Applies are classified against the
//! cache: unknown objects are creates, known ones updates, and objects that
//! disappear across a relist are deletes.

use crate::error::ControllerError;
use crate::event::SyncEvent;
use crate::queue::EventQueue;
use crds::ApiExposure;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store, store::Writer};
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns watch events into queue entries and feeds the reflector cache
pub struct EventTranslator {
    writer: Writer<ApiExposure>,
    store: Store<ApiExposure>,
    queue: Arc<EventQueue>,
    /// Objects seen since the current relist started
    relisted: Option<HashSet<ObjectRef<ApiExposure>>>,
}

impl EventTranslator {
    pub fn new(writer: Writer<ApiExposure>, queue: Arc<EventQueue>) -> Self {
        let store = writer.as_reader();
        Self {
            writer,
            store,
            queue,
            relisted: None,
        }
    }

    /// Cache read handle
    pub fn store(&self) -> Store<ApiExposure> {
        self.store.clone()
    }

    /// Handle one watch event.
    ///
    /// The event is classified against the cache before the cache applies
    /// it, so the cache still holds the previous state here.
    pub fn handle(&mut self, event: Event<ApiExposure>) {
        match &event {
            Event::Init => {
                debug!("ApiExposure relist started");
                self.relisted = Some(HashSet::new());
            }
            Event::InitApply(object) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(ObjectRef::from_obj(object));
                }
                self.classify_apply(object);
            }
            Event::InitDone => {
                if let Some(seen) = self.relisted.take() {
                    for cached in self.store.state() {
                        if !seen.contains(&ObjectRef::from_obj(cached.as_ref())) {
                            info!(
                                "ApiExposure {}/{} vanished during relist",
                                cached.namespace().unwrap_or_default(),
                                cached.name_any()
                            );
                            self.enqueue(SyncEvent::delete(cached));
                        }
                    }
                }
                debug!("ApiExposure relist finished");
            }
            Event::Apply(object) => self.classify_apply(object),
            Event::Delete(object) => {
                self.enqueue(SyncEvent::delete(object.clone()));
            }
        }
        self.writer.apply_watcher_event(&event);
    }

    fn classify_apply(&self, object: &ApiExposure) {
        match self.store.get(&ObjectRef::from_obj(object)) {
            None => self.enqueue(SyncEvent::create(object.clone())),
            Some(previous) if previous.resource_version() == object.resource_version() => {
                debug!(
                    "ApiExposure {}/{} unchanged (version {})",
                    object.namespace().unwrap_or_default(),
                    object.name_any(),
                    object.resource_version().unwrap_or_default()
                );
            }
            Some(previous) => self.enqueue(SyncEvent::update(previous, object.clone())),
        }
    }

    fn enqueue(&self, event: SyncEvent) {
        let key = event.key();
        let kind = event.kind();
        if self.queue.add(event) {
            debug!("Queued {} for {}", kind, key);
        } else {
            debug!("Queue is shutting down, dropped {} for {}", kind, key);
        }
    }
}

/// Watches ApiExposure objects.
pub struct Watcher {
    api: Api<ApiExposure>,
    translator: EventTranslator,
}

impl Watcher {
    pub fn new(api: Api<ApiExposure>, translator: EventTranslator) -> Self {
        Self { api, translator }
    }

    /// Follow the watch stream until it ends.
    ///
    /// Watch errors are retried with backoff; the stream only ends when the
    /// client is torn down, which is reported as an error.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Starting ApiExposure watcher");
        let mut stream = pin!(watcher::watcher(self.api.clone(), watcher::Config::default()).default_backoff());
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.translator.handle(event),
                Err(e) => warn!("ApiExposure watch failed, retrying: {}", e),
            }
        }
        Err(ControllerError::Watch("ApiExposure watch stream ended".to_string()))
    }
}
