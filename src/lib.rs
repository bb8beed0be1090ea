#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod fixture;
pub mod harness;
pub mod level;
pub mod logging;
pub mod process;
pub mod roundtrip;
pub mod run_log;
pub mod script;

pub use config::{ConfigLayer, HarnessConfig};
pub use error::{RtError, RtResult};
pub use harness::{Harness, RunReport};
pub use roundtrip::{RoundTripOutcome, RoundTripState};
