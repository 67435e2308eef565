//! Producer-side helpers: "make sure a refresh is queued".
//!
//! Producers do not care whether they queued a new event or an equivalent
//! one was already pending, so `DuplicateEvent` becomes
//! [`RefreshOutcome::AlreadyPending`] here instead of an error.

use tracing::{debug, info};

use crate::error::Result;
use crate::model::{EventMessage, EventType, ParsingEvent};
use crate::queue::EventQueue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new WAIT event was created.
    Queued(Box<ParsingEvent>),
    /// An equivalent event is already waiting or processing.
    AlreadyPending,
}

/// Queue a refresh unless an equivalent one is outstanding.
pub async fn request_refresh(
    queue: &dyn EventQueue,
    event_type: EventType,
    message: EventMessage,
) -> Result<RefreshOutcome> {
    match queue.create_event(event_type, &message).await {
        Ok(event) => {
            info!(event_id = %event.id, %event_type, %message, "refresh queued");
            Ok(RefreshOutcome::Queued(Box::new(event)))
        }
        Err(e) if e.is_duplicate() => {
            debug!(%event_type, %message, "refresh already pending");
            Ok(RefreshOutcome::AlreadyPending)
        }
        Err(e) => Err(e),
    }
}

/// A stored campaign, as far as refresh requests are concerned.
#[derive(Debug, Clone)]
pub struct CampaignRef {
    /// Source the campaign was scraped from, e.g. `DINNER_QUEEN`.
    pub resource_provider: String,
    /// `{PROVIDER}_{source id}`, e.g. `DINNER_QUEEN_1234`.
    pub duplicate_id: String,
}

impl CampaignRef {
    /// The event that refreshes just this campaign.
    ///
    /// Fails with `UnsupportedEventType` when no source matches the provider,
    /// and with `InvalidMessage` when no source id is left after the prefix.
    pub fn update_request(&self) -> Result<(EventType, EventMessage)> {
        let event_type: EventType = self.resource_provider.parse()?;
        let prefix = format!("{event_type}_");
        let target_id = self
            .duplicate_id
            .strip_prefix(&prefix)
            .unwrap_or(&self.duplicate_id);
        let message = EventMessage::update(target_id);
        message.validate()?;
        Ok((event_type, message))
    }
}

/// Queue a refresh of one campaign.
pub async fn request_campaign_refresh(
    queue: &dyn EventQueue,
    campaign: &CampaignRef,
) -> Result<RefreshOutcome> {
    let (event_type, message) = campaign.update_request()?;
    request_refresh(queue, event_type, message).await
}
