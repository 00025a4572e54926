//! # Hestia - Smart Charging Coordinator
//!
//! A Rust implementation of a smart charging coordinator that mediates
//! between a vehicle telemetry/command API and a home energy-storage API,
//! deciding on a schedule whether each vehicle should charge, pause, or be
//! deferred to off-peak hours, and executing that decision through signed,
//! rate-limited remote calls.
//!
//! ## Features
//!
//! - **Token Lifecycle**: Transparent credential refresh with a 60-second
//!   safety buffer, safe under concurrent callers
//! - **Rate Limiting**: One FIFO queue and one worker pacing every outbound
//!   call to a fixed requests-per-second ceiling
//! - **Signed Commands**: RSA-SHA256 command envelopes for privileged
//!   vehicle operations
//! - **Charging Plans**: Storage-, solar- and reserve-aware decisions with
//!   priority-based admission control
//! - **Scheduled Loop**: Recurring coordination cycles with cooperative
//!   cancellation and per-cycle failure isolation
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of
//! concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `token`: Credential lifecycle management
//! - `dispatch`: Rate-limited outbound request dispatching
//! - `signing`: Signed command envelopes
//! - `api`: Provider API abstraction and data shapes
//! - `plan`: Charging plan model and decision policy
//! - `coordinator`: Plan computation, execution and the scheduled loop
//! - `store`: Pending authorization state with TTL eviction

pub mod api;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod plan;
pub mod signing;
pub mod store;
pub mod token;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::ChargingCoordinator;
pub use error::{HestiaError, Result};
pub use plan::{ChargingPlan, ExecutionResult};
pub use token::Credential;
