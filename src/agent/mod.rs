//! Agent core: lifecycle sequencing and the beacon loop

pub mod lifecycle;

pub use lifecycle::{AgentLifecycle, LifecycleError};
