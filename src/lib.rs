//! Control core for a motorized coating machine.
//!
//! One microcontroller behind a USB-to-serial link drives a linear actuator
//! with a limit switch, a rotating table, and a force sensor. This crate
//! owns the serial command protocol and the process orchestration: it
//! sequences the fixed coating stages, waits for machine-reported
//! completion, detects object presence by debounced sensor polling, and
//! divides a full table rotation into near-equal per-cycle step counts.
//!
//! Operator-facing surfaces (prompts, processing indicator) stay behind
//! the traits in [`operator`]; the binary wires in a console
//! implementation.

pub mod config;
pub mod detect;
pub mod error;
pub mod link;
pub mod operator;
pub mod planner;
pub mod process;
pub mod protocol;
