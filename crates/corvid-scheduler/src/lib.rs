//! Corvid Scheduler - Places unassigned pods onto eligible nodes
//!
//! This crate provides:
//! - Fit predicates and priority functions, combined by `GenericScheduler`
//! - A plugin registry with algorithm providers and policy documents
//! - The modeler that tracks pods bound but not yet confirmed
//! - Per-pod exponential backoff and the retrying error handler
//! - `ConfigFactory`, which wires the caches, and the `Scheduler` loop

pub mod algorithm;
pub mod backoff;
pub mod binder;
pub mod clock;
pub mod error;
pub mod error_handler;
pub mod factory;
pub mod listers;
pub mod modeler;
pub mod plugins;
pub mod policy;
pub mod scheduler;

// Re-export commonly used types
pub use algorithm::{
    FilterResult, FitPredicate, GenericScheduler, PriorityConfig, PriorityFunction,
    ScheduleAlgorithm, SchedulingContext, ScoreResult,
};
pub use backoff::{BackoffConfig, PodBackoff};
pub use binder::{make_binding, Binder, ClientBinder};
pub use clock::{Clock, FakeClock, RealClock};
pub use error::{Result, SchedulerError};
pub use error_handler::ErrorHandler;
pub use factory::{ConfigFactory, FactoryConfig, NodeEnumerator, NodePollSource, SchedulerConfig};
pub use listers::{
    NodeLister, PodLister, ServiceLister, StoreToNodeLister, StoreToPodLister,
    StoreToServiceLister,
};
pub use modeler::{SimpleModeler, SystemModeler};
pub use plugins::{AlgorithmProvider, AlgorithmRegistry, PluginFactoryArgs, DEFAULT_PROVIDER};
pub use policy::Policy;
pub use scheduler::Scheduler;
