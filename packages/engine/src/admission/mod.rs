// packages/engine/src/admission/mod.rs
//! Admission control in front of the execution engine

pub mod throttler;

pub use throttler::{ThrottlePermit, Throttler};
