//! # Dogtor Library
//!
//! Coordinator and page executor for a neck-stretch page rotator.
//!
//! ## Architecture
//!
//! - **Background coordinator** (`core`): shared settings record, scheduler,
//!   reconciler, message router, alarm-fire cycle and the event loop that ties
//!   them together
//! - **Page link** (`link`): target probing, liveness checks and delivery with retry
//! - **Page side** (`page`): sequencer, animator, overlay and the executor that
//!   answers coordinator requests
//! - **Host capabilities** (`host`): traits for alarms, tabs, messaging and
//!   injection, with in-memory and loopback implementations
//! - **Persistence** (`state`): settings model, storage tiers, verified store
//!   and migration
//! - **Infrastructure**: configuration, logging, signals, time sources and the CLI

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod logger;

pub mod args;
pub mod commands;
pub mod config;
pub mod constants;
pub mod core;
pub mod host;
pub mod link;
pub mod page;
pub mod protocol;
pub mod signals;
pub mod state;
pub mod time_source;

pub use core::{Coordinator, CoordinatorHandle};
