//! Wires the stores, the processing loop, and the router pipeline into one
//! runnable system with a shared shutdown signal.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use cortex_agent::{
    run_startup_recovery, CortexDeliveryHandler, CortexLoop, LoopParts, ModelProvider,
    RouterSpawner,
};
use cortex_bus::MessageBus;
use cortex_channels::AdapterRegistry;
use cortex_context::ContextAssembler;
use cortex_core::config::CortexConfig;
use cortex_gardener::{Compactor, Evictor, FactExtractor, FactModel};
use cortex_hippocampus::{Embedder, Hippocampus};
use cortex_router::{
    Dispatcher, Evaluator, Executor, Notifier, RouterEngine, RouterQueue, Watchdog, WeightModel,
};
use cortex_sessions::SessionStore;

/// Capacity of the router's process-local event bus.
const EVENT_BUS_CAPACITY: usize = 64;

/// The injected external collaborators (see the adapter, model, embedder,
/// evaluator and executor contracts).
pub struct Collaborators {
    pub model: Arc<dyn ModelProvider>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub weight_model: Arc<dyn WeightModel>,
    pub executor: Arc<dyn Executor>,
    /// Cheap model for the Gardener's fact extractor; `None` disables it.
    pub fact_model: Option<Arc<dyn FactModel>>,
    pub adapters: AdapterRegistry,
}

/// A fully wired Cortex process, ready to run.
pub struct CortexSystem {
    cortex: Arc<CortexLoop>,
    engine: Arc<RouterEngine>,
    notifier: Arc<Notifier>,
    watchdog: Arc<Watchdog>,
    compactor: Option<Arc<Compactor>>,
    evictor: Option<Arc<Evictor>>,
    extractor: Option<Arc<FactExtractor>>,
    events_rx: mpsc::Receiver<cortex_router::RouterEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Open the store, run recovery, and assemble every component.
pub fn build(config: CortexConfig, collaborators: Collaborators) -> anyhow::Result<CortexSystem> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = cortex_bus::db::open_database(&config.database.path)?;
    cortex_bus::db::init_db(&conn)?;
    cortex_sessions::db::init_db(&conn)?;
    cortex_hippocampus::db::init_db(&conn)?;
    cortex_router::db::init_db(&conn)?;
    let db = Arc::new(Mutex::new(conn));

    let bus = Arc::new(MessageBus::new(db.clone()));
    let sessions = Arc::new(SessionStore::new(db.clone()));
    let hippocampus = Arc::new(Hippocampus::new(
        db.clone(),
        collaborators.embedder,
        config.hippocampus.embedding_dim,
    ));
    let queue = Arc::new(RouterQueue::new(db));

    // Crash-time sweep before anything ticks.
    let report = run_startup_recovery(&bus, &sessions)?;
    info!(
        stalled = report.stalled_reset,
        queue_depth = report.queue_depth,
        orphaned_ops = report.ops_failed,
        integrity = %report.integrity,
        "startup recovery complete"
    );

    let assembler = ContextAssembler::new(
        sessions.clone(),
        hippocampus.clone(),
        &config.workspace.dir,
        config.hippocampus.clone(),
    );

    let mut tools = cortex_agent::tools::ToolRegistry::new();
    tools.register(Arc::new(
        cortex_agent::tools::fetch_history::FetchChatHistory::new(sessions.clone()),
    ));
    tools.register(Arc::new(cortex_agent::tools::memory_query::MemoryQuery::new(
        hippocampus.clone(),
    )));

    let cortex = Arc::new(CortexLoop::new(LoopParts {
        bus: bus.clone(),
        sessions: sessions.clone(),
        assembler,
        tools,
        model: collaborators.model,
        spawner: Arc::new(RouterSpawner::new(queue.clone())),
        adapters: collaborators.adapters,
        pipeline: config.pipeline.clone(),
        modes: config.channels.clone(),
        hippocampus_enabled: config.hippocampus.enabled,
    }));

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUS_CAPACITY);
    let engine = Arc::new(RouterEngine::new(
        queue.clone(),
        Evaluator::new(
            collaborators.weight_model,
            Duration::from_secs(config.router.evaluator_timeout_secs),
            config.router.fallback_weight,
        ),
        Dispatcher::new(config.router.tiers.clone(), config.router.models.clone()),
        collaborators.executor,
        events_tx.clone(),
        config.router.clone(),
    ));
    let notifier = Arc::new(Notifier::new(
        queue.clone(),
        Arc::new(CortexDeliveryHandler::new(sessions.clone(), bus)),
    ));
    let watchdog = Arc::new(Watchdog::new(queue, events_tx, config.router.clone()));

    let (compactor, evictor, extractor) = if config.gardener.enabled {
        (
            Some(Arc::new(Compactor::new(
                sessions.clone(),
                config.gardener.clone(),
            ))),
            Some(Arc::new(Evictor::new(
                hippocampus.clone(),
                config.gardener.clone(),
            ))),
            collaborators.fact_model.map(|model| {
                Arc::new(FactExtractor::new(
                    sessions.clone(),
                    hippocampus.clone(),
                    model,
                    config.gardener.clone(),
                ))
            }),
        )
    } else {
        (None, None, None)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    Ok(CortexSystem {
        cortex,
        engine,
        notifier,
        watchdog,
        compactor,
        evictor,
        extractor,
        events_rx,
        shutdown_tx,
        shutdown_rx,
    })
}

impl CortexSystem {
    /// Run everything until ctrl-c, then stop: the shutdown flag is
    /// broadcast, the in-flight turn finishes, and all tasks are joined.
    pub async fn run_until_shutdown(self) {
        let CortexSystem {
            cortex,
            engine,
            notifier,
            watchdog,
            compactor,
            evictor,
            extractor,
            events_rx,
            shutdown_tx,
            shutdown_rx,
        } = self;

        if let Err(e) = engine.recover().await {
            error!(error = %e, "router recovery failed");
        }

        let notifier_task = tokio::spawn(notifier.run(events_rx, shutdown_rx.clone()));
        let engine_task = {
            let engine = Arc::clone(&engine);
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { engine.run(rx).await })
        };
        let watchdog_task = {
            let watchdog = Arc::clone(&watchdog);
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { watchdog.run(rx).await })
        };
        let loop_task = {
            let cortex = Arc::clone(&cortex);
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { cortex.run(rx).await })
        };

        let mut gardener_tasks = Vec::new();
        if let Some(compactor) = compactor {
            let rx = shutdown_rx.clone();
            gardener_tasks.push(tokio::spawn(async move { compactor.run(rx).await }));
        }
        if let Some(evictor) = evictor {
            let rx = shutdown_rx.clone();
            gardener_tasks.push(tokio::spawn(async move { evictor.run(rx).await }));
        }
        if let Some(extractor) = extractor {
            let rx = shutdown_rx.clone();
            gardener_tasks.push(tokio::spawn(async move { extractor.run(rx).await }));
        }

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);

        for (name, task) in [
            ("loop", loop_task),
            ("router", engine_task),
            ("watchdog", watchdog_task),
            ("notifier", notifier_task),
        ] {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "task join failed");
            }
        }
        for task in gardener_tasks {
            if let Err(e) = task.await {
                error!(task = "gardener", error = %e, "task join failed");
            }
        }
    }
}
