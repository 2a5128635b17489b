//! hiltestor: hardware-in-the-loop test orchestration.
//!
//! Decides which embedded test scenarios apply to which platforms, builds each one once
//! no matter how many workers ask, runs the image on a board, an emulator or the host,
//! and turns the console output into sub-test results.

pub mod build;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod harness;
pub mod orchestrator;
pub mod platform;
pub mod resolver;
pub mod scheduler;
pub mod testspec;
pub mod utils;
