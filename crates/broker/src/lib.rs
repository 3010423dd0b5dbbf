//! Broker client for the email topic.
//!
//! Producers hand [`Envelope`]s to a [`Publisher`]; the delivery worker pulls
//! them back out through a [`Subscriber`]. Two bindings exist: Redis Streams
//! for production ([`RedisPublisher`], [`RedisSubscriber`]) and an in-process
//! log ([`InMemoryBroker`]) for tests and local runs.
//!
//! [`Envelope`]: tracker_common::types::Envelope

pub mod client;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod memory;
pub mod partition;
pub mod redis_publisher;
pub mod redis_subscriber;

pub use client::{Delivery, Publisher, Subscriber};
pub use dispatch::BackgroundDispatcher;
pub use error::{CommitError, FetchError, PublishError};
pub use events::NotificationEvent;
pub use memory::{InMemoryBroker, InMemorySubscriber};
pub use redis_publisher::RedisPublisher;
pub use redis_subscriber::RedisSubscriber;
