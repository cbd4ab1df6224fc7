//! Admission, enrollment and payment lifecycle for institute back offices.
//!
//! The [`workflows::admissions`] module owns the core: identifier sequencing, the admission
//! state machine, fee structures, strict payment validation and the two-party payment
//! approval workflow. Configuration, telemetry and the binary-level error type live alongside
//! it so the API service can stay a thin wiring layer.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
