//! ---
//! csim_section: "01-core-functionality"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Epoch coordination and component lifecycle management."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use async_trait::async_trait;
use tracing::debug;

use c_sim_msg::{DecodedPayload, EpochMessage};

/// Extension point carrying the component-specific simulation logic.
///
/// The coordinator calls these hooks while holding its internal state lock,
/// so at most one of them runs at a time for a given component.
#[async_trait]
pub trait EpochProcessor: Send + Sync {
    /// Whether every message required to process the current epoch has
    /// arrived. The default needs nothing beyond the epoch message itself.
    async fn all_messages_received(&self, epoch: &EpochMessage) -> bool {
        let _ = epoch;
        true
    }

    /// Run the epoch computation, including publishing any result messages
    /// other than the status message.
    ///
    /// `Ok(true)` marks the epoch complete, `Ok(false)` signals that
    /// processing is not yet possible and will be retried when the next
    /// message arrives. An `Err` is reported on the error topic with the
    /// error text as description; the component keeps running.
    async fn process_epoch(&self, epoch: &EpochMessage) -> anyhow::Result<bool> {
        let _ = epoch;
        Ok(true)
    }

    /// Called with every message that is not a simulation state or epoch
    /// message, including payloads that failed schema validation.
    async fn handle_message(&self, message: DecodedPayload, topic: &str) {
        match message.as_message() {
            Some(message) => {
                debug!(kind = %message.type_tag(), topic, "received message left unhandled")
            }
            None => debug!(topic, "received unknown message left unhandled"),
        }
    }
}

/// Processor that treats every epoch as immediately complete.
pub struct NoopProcessor;

#[async_trait]
impl EpochProcessor for NoopProcessor {}
