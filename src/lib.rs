pub mod algorithms;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod counter_store;
pub mod downstream;
pub mod error;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod keyed_state;
pub mod metrics;
pub mod middleware;
pub mod policy_config;
pub mod redis;
pub mod resilience;
pub mod response;
pub mod server;

pub use algorithms::{Algorithm, Decision, RateLimiter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use counter_store::{CounterStore, MemoryCounterStore, StoreError};
pub use error::{GateError, Result};
pub use policy_config::PolicyConfig;
pub use resilience::{CircuitBreaker, PolicyError, RetryPolicy, TimeoutPolicy};
pub use server::{create_app, Server};
