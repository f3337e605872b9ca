//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     parse args → load config → resolve hosts → bind listeners
//!
//! Shutdown (shutdown.rs):
//!     SIGHUP/SIGINT/SIGTERM (signals.rs) → broadcast trigger
//!         → accept loops stop → connections drain → main returns
//!
//! Self-check (selfcheck.rs):
//!     direct mode: one HTTPS request per hostname before readiness
//!     proxy mode: periodic best-effort self-dial, stopped by shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close; no drain deadline
//! - Background tasks subscribe to the same broadcast so nothing leaks

pub mod selfcheck;
pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
