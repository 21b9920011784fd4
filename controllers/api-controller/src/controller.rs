//! Main controller implementation.
//!
//! Wires the watcher, work queue, workers, resync sweep and the metrics
//! server together and runs them until a shutdown signal arrives. On
//! shutdown the queue stops accepting events and the workers drain what is
//! left before the process exits.

use crate::config::ControllerConfig;
use crate::drivers::build_drivers;
use crate::error::ControllerError;
use crate::event::SyncEvent;
use crate::metrics::{self, Metrics};
use crate::queue::EventQueue;
use crate::reconciler::Reconciler;
use crate::validation::{ServiceValidator, StoreLister};
use crate::watcher::{EventTranslator, Watcher};
use crate::worker::Worker;
use crds::{ApiExposure, ApiExposureStatus};
use gateway_client::{GatewayClientTrait, KubeGatewayClient};
use kube::{Api, Client};
use kube_runtime::reflector::{self, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

/// Main controller for ApiExposure objects.
pub struct Controller {
    config: ControllerConfig,
    api: Api<ApiExposure>,
    queue: Arc<EventQueue>,
    translator: EventTranslator,
    lister: StoreLister,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing API Controller");

        let client = Client::try_default().await?;
        let gateway: Arc<dyn GatewayClientTrait> = Arc::new(KubeGatewayClient::new(client.clone()));
        let api: Api<ApiExposure> = match &config.namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        };

        let queue = EventQueue::new(config.retry_base, config.retry_max);
        let (_, writer) = reflector::store();
        let translator = EventTranslator::new(writer, queue.clone());
        let lister = StoreLister::new(translator.store());

        let validator = ServiceValidator::new(Arc::new(lister.clone()), config.blacklist.clone());
        let drivers = build_drivers(gateway.clone(), &config);
        info!("Registered {} resource drivers", drivers.len());
        let reconciler = Arc::new(Reconciler::new(gateway, validator, drivers));
        let metrics = Arc::new(Metrics::new()?);

        Ok(Self {
            config,
            api,
            queue,
            translator,
            lister,
            reconciler,
            metrics,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Controller {
            config,
            api,
            queue,
            translator,
            lister,
            reconciler,
            metrics,
        } = self;
        let store = translator.store();

        let mut watcher = tokio::spawn(Watcher::new(api, translator).run());
        let mut server = tokio::spawn(metrics::serve(metrics.clone(), config.metrics_addr));

        info!("Waiting for ApiExposure cache to sync");
        tokio::select! {
            ready = store.wait_until_ready() => {
                ready.map_err(|e| ControllerError::Watch(format!("ApiExposure cache never synced: {}", e)))?;
            }
            result = &mut watcher => return Err(task_exit("ApiExposure watcher", result)),
            result = &mut server => return Err(task_exit("Metrics server", result)),
            _ = shutdown_signal() => {
                info!("Shutdown requested before the cache synced");
                return Ok(());
            }
        }
        lister.mark_synced();
        metrics.mark_ready();

        let workers: Vec<JoinHandle<()>> = (0..config.workers)
            .map(|id| {
                let worker = Worker::new(id, queue.clone(), reconciler.clone(), metrics.clone(), config.max_retries);
                tokio::spawn(worker.run())
            })
            .collect();
        let resync = config
            .resync_interval
            .map(|interval| tokio::spawn(resync_loop(store.clone(), queue.clone(), interval)));

        info!("API Controller running with {} workers", config.workers);
        let outcome = tokio::select! {
            result = &mut watcher => Err(task_exit("ApiExposure watcher", result)),
            result = &mut server => Err(task_exit("Metrics server", result)),
            _ = shutdown_signal() => Ok(()),
        };

        info!("Draining {} queued events", queue.len());
        queue.shut_down();
        if let Some(resync) = resync {
            resync.abort();
        }
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker panicked: {}", e);
            }
        }
        watcher.abort();
        server.abort();

        info!("API Controller stopped");
        outcome
    }
}

/// Periodically re-enqueue every cached object whose status is unsettled
async fn resync_loop(store: Store<ApiExposure>, queue: Arc<EventQueue>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // the initial list already queued everything
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let queued = resync_unsettled(&store, &queue);
        debug!("Resync queued {} unsettled ApiExposures", queued);
    }
}

/// Queue a create for every unsettled object; returns how many were queued
pub(crate) fn resync_unsettled(store: &Store<ApiExposure>, queue: &EventQueue) -> usize {
    store
        .state()
        .into_iter()
        .filter(|exposure| exposure.status.as_ref().map_or(true, ApiExposureStatus::is_unsettled))
        .filter(|exposure| queue.add(SyncEvent::create(exposure.clone())))
        .count()
}

fn task_exit(name: &str, result: Result<Result<(), ControllerError>, JoinError>) -> ControllerError {
    match result {
        Ok(Ok(())) => ControllerError::Watch(format!("{} exited", name)),
        Ok(Err(e)) => e,
        Err(e) => ControllerError::Watch(format!("{} panicked: {}", name, e)),
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
