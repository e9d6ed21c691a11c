//! Application layer: the dispatch cycle and its submitters.

pub mod dispatcher;
pub mod nonce;
pub mod submitter;
pub mod user_op;
pub mod worker;

pub use dispatcher::{BatchDispatcher, CycleContext, DispatcherConfig, SharedCycleStore};
pub use nonce::NonceCoordinator;
pub use submitter::{GroupOutcome, NetworkSubmitter};
pub use user_op::UserOpSubmitter;
pub use worker::{TriggerConfig, spawn_dispatcher};
