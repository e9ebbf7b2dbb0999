//! sumreplay - Reconstruct and replay IP packets from summary dumps.
//!
//! This library ingests IP summary dump streams (text lines or
//! length-prefixed binary frames) and synthesizes well-formed IPv4
//! packets from whatever subset of fields each record carries,
//! filling in defaults for the rest. Packets are emitted through a
//! push task or a pull-on-demand contract, with optional sampling,
//! real-time pacing, checksum recomputation, and multi-packet
//! expansion.
//!
//! # Example
//!
//! ```no_run
//! use sumreplay::config::ReplayConfig;
//! use sumreplay::engine::ReplayEngine;
//! use sumreplay::runtime::SystemRuntime;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = ReplayConfig::new("trace.sumdump");
//!     config.checksum = true;
//!     let mut engine = ReplayEngine::new(&config)?;
//!     engine.initialize()?;
//!
//!     let mut rt = SystemRuntime::new();
//!     while !engine.source_exhausted() {
//!         if let Some(packet) = engine.pull(&mut rt) {
//!             // hand the packet to the pipeline...
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod assemble;
pub mod config;
pub mod directive;
pub mod engine;
pub mod error;
pub mod expand;
pub mod field;
pub mod io;
pub mod packet;
pub mod runtime;
pub mod time;

pub use error::{Error, Result};
