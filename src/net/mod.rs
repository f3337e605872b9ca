//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! HostSet
//!     → orchestrator.rs (resolve names, dedupe addresses, bind per address)
//!         → listener.rs (accept loop, connection limits)
//!             → tls.rs (SNI handshake via the certificate manager)
//!             → serve.rs (hyper connection serving, graceful drain)
//! ```
//!
//! # Design Decisions
//! - One accept-loop task per bound listener; all tracked for shutdown
//! - A bind failure aborts startup after rolling back started listeners
//! - Per-listener semaphore bounds concurrent connections

pub mod listener;
pub mod orchestrator;
pub mod serve;
pub mod tls;
