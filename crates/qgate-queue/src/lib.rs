//! Queue transports and the consumer loop
//!
//! - [`MemoryQueue`]: in-process transport for tests and single-node runs
//! - [`RedisQueue`]: reliable-list transport with per-consumer processing lists
//! - [`Consumer`]: drives a [`qgate_core::DeliveryHandler`] from any transport

pub mod consumer;
pub mod memory;
pub mod redis;

pub use consumer::{Consumer, ConsumerOptions};
pub use memory::MemoryQueue;
pub use redis::{RedisQueue, RedisQueueConfig};
