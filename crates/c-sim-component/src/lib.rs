//! ---
//! csim_section: "01-core-functionality"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Epoch coordination and component lifecycle management."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
//! Epoch-synchronised simulation component runtime.
//!
//! [`SimulationComponent`] drives one component through simulation start,
//! per-epoch processing, status/error signalling, and shutdown. The actual
//! epoch computation is supplied through the [`EpochProcessor`] trait.

pub mod callbacks;
pub mod coordinator;
pub mod processor;

pub use callbacks::{MessageCallback, MessageHandler};
pub use coordinator::SimulationComponent;
pub use processor::{EpochProcessor, NoopProcessor};
