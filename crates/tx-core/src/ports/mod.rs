//! # Ports
//!
//! Hexagonal boundary of the crate: inbound surfaces the core exposes
//! and outbound traits for everything it consumes.

pub mod inbound;
pub mod outbound;

pub use inbound::{RemoteCommandHandler, SqlInterception, TccExecutor};
pub use outbound::{
    AspectLogStore, DataSourcePool, LoadBalancer, MessageBus, SharedCache, TxConnection,
    TxExceptionStore, UndoLogStore,
};
