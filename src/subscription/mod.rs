// src/subscription/mod.rs

pub mod manager;
pub mod pool_cache;
pub mod transport;

pub use manager::SubscriptionManager;
pub use pool_cache::PoolStateCache;
pub use transport::{AccountSubscriber, AccountUpdate, PubsubTransport, PushConnection, PushTransport};
