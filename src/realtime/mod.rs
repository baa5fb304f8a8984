//! Notification Channels
//!
//! Explicit publish/subscribe channels replacing implicit platform events.
//!
//! # Module Structure
//!
//! ```text
//! realtime/
//! ├── mod.rs       - Module exports and documentation
//! └── broadcast.rs - EventBus (application events) and StorageBus (storage mutations)
//! ```
//!
//! # Delivery Guarantees
//!
//! Both buses are `tokio::sync::broadcast` channels with a single owning publisher
//! per producer. Every subscriber alive at publish time receives each message at
//! least once, unless it falls more than the channel capacity behind, in which case
//! it observes a `Lagged` error and must resynchronise from storage. There is no
//! ordering guarantee across independent sources (connectivity, sync engine,
//! storage bus).

/// Event broadcasting utilities
pub mod broadcast;

pub use broadcast::{ContextId, EventBus, StorageBus, StorageChange};
