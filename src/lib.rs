//! Slider GW - serial slider box to per-application volume bridge
//!
//! A microcontroller with potentiometers streams `v0|v1|...\n` lines over a
//! serial port. Each slider index is routed to the master output or to named
//! applications, and every changed reading becomes a volume command.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod filter;
pub mod paths;
pub mod routing;
pub mod serial;
pub mod sink;

pub use config::AppConfig;
pub use engine::{Engine, ReloadOutcome};
pub use error::{EngineError, EngineResult};
