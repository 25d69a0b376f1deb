use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::queue::DeliveryQueue;
use crate::registry::SubscriptionRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<dyn SubscriptionRegistry>,
    pub queue: Arc<dyn DeliveryQueue>,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        registry: Arc<dyn SubscriptionRegistry>,
        queue: Arc<dyn DeliveryQueue>,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            registry,
            queue,
        }
    }
}
