#![no_std]

// Actuation core of the engine controller: channel assignment, per-channel
// event schedules and the output drivers they fire.
//
// The crate avoids the Rust standard library so the firmware and the host
// emulator share the same scheduler, bank and bench console.

pub mod assignment;
pub mod bench;
pub mod config;
pub mod engine;
pub mod output;
pub mod schedule;
pub mod status;
pub mod tacho;
pub mod telemetry;
