//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! CLI arguments (clap) ──┐
//! config file (TOML) ────┼──▶ loader.rs (parse & deserialize)
//! environment (ACMEURL) ─┘        │
//!                                 ▼
//!                     validation.rs (semantic checks)
//!                                 ▼
//!                     FrontConfig (validated, immutable)
//!                                 ▼
//!                     shared by value/Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no runtime reload
//! - All fields have defaults so a bare invocation works
//! - CLI flags override file values, which override defaults

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AcmeSettings;
pub use schema::FrontConfig;
pub use schema::ListenerConfig;
