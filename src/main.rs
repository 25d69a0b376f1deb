use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fanout::{
    create_router, init_pool, run_migrations, AppState, Clock, Config, Dispatcher, SqliteQueue,
    SqliteRegistry, SqliteSharedCache, SubscriberCache, SystemClock,
};

/// How often expired cache entries and old received messages are purged.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Optional: DATABASE_URL (default: sqlite://fanout.db)");
            eprintln!("Optional: LISTEN_ADDR (default: 0.0.0.0:3000)");
            eprintln!("Optional: PROCESS_CACHE_TTL_SECS, SHARED_CACHE_TTL_SECS, MAX_WORKERS");
            eprintln!("Optional: DEPENDENCY_TIMEOUT_MS, DISPATCH_TIMEOUT_MS");
            std::process::exit(1);
        }
    };

    tracing::info!("Starting fanout dispatcher");
    tracing::info!("Listen address: {}", config.listen_addr);
    tracing::info!("Database: {}", config.database_url);
    tracing::info!(
        "Cache TTLs: process {:?}, shared {:?}; max workers {}",
        config.process_cache_ttl,
        config.shared_cache_ttl,
        config.max_workers
    );

    // Connect to database
    let pool = match init_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Database connection error: {}", e);
            std::process::exit(1);
        }
    };

    // Run migrations
    if let Err(e) = run_migrations(&pool).await {
        eprintln!("Migration error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Database migrations completed");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(SqliteRegistry::new(pool.clone(), clock.clone()));
    let shared = Arc::new(SqliteSharedCache::new(pool.clone(), clock.clone()));
    let queue = Arc::new(SqliteQueue::new(pool, clock.clone()));

    let cache = SubscriberCache::new(
        registry.clone(),
        shared.clone(),
        clock.clone(),
        config.cache_settings(),
    );
    let dispatcher = Dispatcher::new(cache, queue.clone(), clock, config.dispatch_settings());
    let state = AppState::new(dispatcher, registry, queue.clone());

    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            ticker.tick().await;
            let dropped = dispatcher.cache().purge_expired();
            if dropped > 0 {
                tracing::debug!("Dropped {} expired subscriber snapshots", dropped);
            }
            match shared.purge_expired().await {
                Ok(n) if n > 0 => tracing::debug!("Purged {} expired cache entries", n),
                Ok(_) => {}
                Err(e) => tracing::warn!("Cache purge failed: {}", e),
            }
            match queue.purge_received().await {
                Ok(n) if n > 0 => tracing::debug!("Purged {} received messages", n),
                Ok(_) => {}
                Err(e) => tracing::warn!("Queue purge failed: {}", e),
            }
        }
    });

    // Build router
    let app = create_router(state);

    // Start server
    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server running at http://{}", config.listen_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
