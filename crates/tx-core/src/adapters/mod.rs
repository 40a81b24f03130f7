//! # Adapters
//!
//! In-memory implementations of the outbound ports, used by the test
//! suite and by single-process deployments. Distributed deployments
//! substitute the real messaging substrate, cache, and storage engine.

pub mod balancer;
pub mod bus;
pub mod datasource;
pub mod stores;

pub use balancer::RoundRobinBalancer;
pub use bus::InMemoryMessageBus;
pub use datasource::{InMemoryDataSource, InMemoryDataSourcePool};
pub use stores::{
    InMemoryAspectLogStore, InMemorySharedCache, InMemoryTxExceptionStore, InMemoryUndoLogStore,
};
