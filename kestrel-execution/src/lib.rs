//! Algorithmic execution of parent orders.
//!
//! An [`AlgoEngine`] owns many [`AlgoInstance`]s, each slicing one
//! [`ParentOrderSpec`] into child orders according to its [`Strategy`]. The
//! engine itself is synchronous; [`EngineRunner`] hosts it in a tokio task and
//! [`EngineHandle`] is the thread-safe way to talk to it.

pub mod cache;
pub mod engine;
pub mod error;
pub mod instance;
pub mod instruments;
pub mod ledger;
pub mod parent;
pub mod runner;
pub mod strategy;
pub mod throttle;

pub use cache::SnapshotCache;
pub use engine::AlgoEngine;
pub use error::{EngineError, EngineResult};
pub use instance::{AlgoInstance, AlgoSnapshot, AlgoStatus, AlgoUpdate, InstanceLimits, Outbound};
pub use instruments::InstrumentRegistry;
pub use ledger::{ChildOrder, Ledger};
pub use parent::{ParamSpec, ParentOrderSpec, ResolvedParams, StrategyKind};
pub use runner::{ControlCommand, EngineEvent, EngineHandle, EngineRunner};
pub use strategy::{Action, DecisionContext, Intent, Strategy};
pub use throttle::{QueuedSubmission, SubmissionThrottle};
