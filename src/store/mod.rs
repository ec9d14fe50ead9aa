//! The two storage collaborators: the durable relational store (plans,
//! clients, global rules) and the counter store (atomic check-and-increment,
//! subscription cache).

pub mod counters;
pub mod durable;
mod scripts;

pub use counters::{CounterBackend, EvalOutcome, RedisCounterStore, SubCacheValue};
pub use durable::DurableStore;
