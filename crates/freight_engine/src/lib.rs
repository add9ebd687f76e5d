//! # Freight Optimization Engine
//!
//! Long-running service layer over [freight_core]: ingests driver-position
//! and load-status events, debounces them into optimization jobs, schedules
//! the jobs through a priority queue with bounded worker concurrency, and
//! publishes result artifacts to downstream subscribers.
//!
//! ## Key Concepts
//!
//! - **Jobs**: Durable records with priority, progress, and lifecycle state
//! - **Queue**: Higher priority first, FIFO among ties by creation time
//! - **Dispatcher**: Worker threads routing each job to its algorithm,
//!   with retry/backoff for transient failures and a stall monitor
//! - **Ingress**: Per-driver debounce of position updates; load-status
//!   transitions map to job enqueues and are never suppressed
//! - **Explicit collaborators**: Repositories, models, and the event bus are
//!   passed in at startup; there are no module-level singletons

pub mod clock;
pub mod config;
pub mod job;
pub mod result;
pub mod store;
pub mod queue;
pub mod events;
pub mod ingress;
pub mod dispatcher;
pub mod engine;
