//! ticketdrop-core library.
//!
//! The ticket lifecycle engine behind `td`: daily-sequenced ticket ids,
//! stage-gated validation, an atomic per-ticket store, the lifecycle state
//! machine, offline reconciliation of field updates, and the fixed-column
//! billing export.

pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod id;
pub mod lifecycle;
pub mod lock;
pub mod model;
pub mod queue;
pub mod reference;
pub mod store;
pub mod validate;

/// # Conventions
///
/// - **Errors**: business-rule rejections are values ([`lifecycle::Rejection`]);
///   only infrastructure faults surface as `Err`.
/// - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
pub fn init() {
    tracing::info!("ticketdrop-core initialized");
}
