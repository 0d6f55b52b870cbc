//! Ember Foundation
//!
//! Reusable building blocks for microcontroller firmware: the concurrent
//! infrastructure every device project re-invents, packaged as independent
//! components that application code composes into a system.
//!
//! - [`apptimer`]: hierarchical timer wheel with deferred expiry dispatch
//! - [`jobqueue`]: bounded job queue drained by an elastic worker pool
//!   (`std` feature)
//! - [`pubsub`]: topic-filtered synchronous publish/subscribe bus
//! - [`ringbuf`]: SPSC power-of-two byte ring buffer
//! - [`logging`]: binary log-record pipeline over pluggable storage
//! - [`button`]: debouncing button state machine
//! - [`retry`]: capped exponential backoff with jitter
//! - [`pm`]: priority-ordered power-management hook registry
//! - [`fsm`]: table-driven finite-state-machine executor
//! - [`metrics`]: fixed-table counters
//!
//! The crate is `no_std` on embedded targets; dynamic allocation is never
//! required (the `alloc` feature only adds heap-backed convenience
//! constructors). Components are initialised with their dependencies
//! injected: storage back-ends, board hooks, clocks and alarm sinks are
//! all plain function pointers or trait impls owned by the application.
//!
//! Internal diagnostics go through the `log` facade; install any
//! `log`-compatible sink to see them. The [`logging`] component is not that
//! sink: it is the device's own structured record pipeline.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod apptimer;
pub mod button;
pub mod error;
pub mod fsm;
#[cfg(feature = "std")]
pub mod jobqueue;
pub mod logging;
pub mod metrics;
pub mod pm;
pub mod pubsub;
pub mod retry;
pub mod ringbuf;

pub use error::{FoundationError, FoundationResult};
