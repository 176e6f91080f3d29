//! Request lifecycle services.
//!
//! - `lifecycle`: the `submit` / `query` entry points
//! - `processor`: drives one request from `pending` to a terminal status
//! - `generator`: key generation with configurable fault injection
//! - `worker`: bounded, tracked pool for background processing
//! - `config`: tunables for all of the above

pub mod config;
pub mod generator;
pub mod lifecycle;
pub mod processor;
pub mod worker;

pub use config::ServiceConfig;
pub use generator::{FailurePolicy, GenerationError, KeyGenerator, SimulatedKeyGenerator};
pub use lifecycle::{LifecycleError, LifecycleService, RequestOutcome};
pub use processor::{ProcessOutcome, RequestProcessor};
pub use worker::{Reservation, SpawnError, TaskPool};
