pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod models;
pub mod predicate;
pub mod queue;
pub mod registry;
pub mod routes;
pub mod shared_cache;
pub mod state;
pub mod validation;

#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, CacheSettings, SubscriberCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::{init_pool, run_migrations};
pub use dispatch::{DispatchReport, DispatchSettings, Dispatcher};
pub use error::{CacheError, DispatchError, PredicateError, QueueError, RegistryError, ValidationError};
pub use models::{PublishRequest, Subscription};
pub use predicate::{CompiledPredicate, Predicate};
pub use queue::{DeliveryQueue, InMemoryQueue, SqliteQueue};
pub use registry::{InMemoryRegistry, SqliteRegistry, SubscriptionRegistry};
pub use routes::create_router;
pub use shared_cache::{InMemorySharedCache, SharedCache, SqliteSharedCache};
pub use state::AppState;
