//! Observability subsystem.
//!
//! Structured logging is initialized in `main` via `tracing-subscriber`;
//! this module owns metric registration and the optional Prometheus
//! exporter.

pub mod metrics;
