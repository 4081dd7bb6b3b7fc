use anyhow::{Context, Result};
use citygrid::api::{create_router, AppState, Collection};
use citygrid::cache::{CacheAside, CacheBackend, MemoryCache, RedisCache};
use citygrid::config::{load_config, CacheBackendKind, CityConfig, QueueBackend};
use citygrid::consumer::{Actuator, CommandConsumer, LogActuator};
use citygrid::dispatch::Dispatcher;
use citygrid::nats::NatsClient;
use citygrid::queue::{CommandQueue, MemoryQueue};
use citygrid::store::{StateStore, Stores};
use citygrid::{ActionRegistry, Record};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Hands out command channels per collection: one for the dispatcher and
/// one per consumer worker.
enum Channels {
    Memory,
    Nats(NatsClient),
}

impl Channels {
    fn open(
        &self,
        collection: &str,
        workers: usize,
    ) -> (Arc<dyn CommandQueue>, Vec<Arc<dyn CommandQueue>>) {
        match self {
            Channels::Memory => {
                let queue = MemoryQueue::new();
                let consumers = (0..workers)
                    .map(|_| Arc::new(queue.clone()) as Arc<dyn CommandQueue>)
                    .collect();
                (Arc::new(queue), consumers)
            }
            Channels::Nats(client) => {
                let consumers = (0..workers)
                    .map(|_| {
                        Arc::new(client.queue(collection)) as Arc<dyn CommandQueue>
                    })
                    .collect();
                (Arc::new(client.queue(collection)), consumers)
            }
        }
    }
}

/// Everything shared by the three collections.
struct Wiring {
    config: CityConfig,
    cache: Arc<dyn CacheBackend>,
    channels: Channels,
    registry: Arc<ActionRegistry>,
    actuator: Arc<dyn Actuator>,
}

impl Wiring {
    fn collection<E: Record>(
        &self,
        store: Arc<dyn StateStore<E>>,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> Arc<Collection<E>> {
        let settings = self.config.consumer_settings();
        let (publisher, consumers) = self
            .channels
            .open(E::COLLECTION, self.config.consumer.worker_count());

        for queue in consumers {
            let consumer = CommandConsumer::new(
                Arc::clone(&store),
                queue,
                Arc::clone(&self.actuator),
                settings.clone(),
            );
            tasks.push(tokio::spawn(consumer.run()));
        }

        info!(
            collection = E::COLLECTION,
            workers = self.config.consumer.worker_count(),
            "Collection wired"
        );

        Arc::new(Collection::new(
            CacheAside::new(
                Arc::clone(&store),
                Arc::clone(&self.cache),
                self.config.cache_policy(),
            ),
            Dispatcher::new(
                store,
                publisher,
                Arc::clone(&self.registry),
                self.config.dispatch_timeouts(),
            ),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "citygrid=info".into()),
        )
        .init();

    info!("Citygrid starting...");

    let config = match std::env::var("CITYGRID_CONFIG") {
        Ok(path) => load_config(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => {
            info!("CITYGRID_CONFIG not set, using defaults");
            CityConfig::default()
        }
    };

    info!(
        bind_addr = %config.api.bind_addr,
        store = ?config.store.backend,
        cache = ?config.cache.backend,
        queue = ?config.queue.backend,
        "Configuration loaded"
    );
    if !config.consumer.preserves_key_order() {
        warn!(
            workers = config.consumer.worker_count(),
            "Multiple consumer workers: commands for one entity may be applied out of order"
        );
    }

    // State store
    let stores = Stores::open(&config.store).context("Failed to open state store")?;
    info!(backend = ?config.store.backend, "State store opened");

    // Cache
    let cache: Arc<dyn CacheBackend> = match config.cache.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new()),
        CacheBackendKind::Redis => Arc::new(
            RedisCache::connect(&config.cache.url)
                .await
                .context("Failed to connect to Redis")?,
        ),
    };

    // Command queue
    let channels = match config.queue.backend {
        QueueBackend::Memory => Channels::Memory,
        QueueBackend::Nats => Channels::Nats(
            NatsClient::connect(config.nats.clone())
                .await
                .context("Failed to initialize NATS")?,
        ),
    };

    let wiring = Wiring {
        config,
        cache,
        channels,
        registry: Arc::new(ActionRegistry::with_defaults()),
        actuator: Arc::new(LogActuator),
    };

    let mut tasks = Vec::new();
    let state = AppState {
        houses: wiring.collection(stores.houses, &mut tasks),
        energy_sources: wiring.collection(stores.energy_sources, &mut tasks),
        batteries: wiring.collection(stores.batteries, &mut tasks),
    };

    // Start HTTP API server
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&wiring.config.api.bind_addr)
        .await
        .context("Failed to bind API address")?;
    info!(addr = %wiring.config.api.bind_addr, "Control API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "Control API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    for task in tasks {
        task.abort();
    }
    info!("Citygrid stopped");

    Ok(())
}
