//! Event processing: dispatch, per-condition attempts, reaction host and
//! bus intake.

pub mod attempt;
pub mod consumer;
pub mod dispatcher;
pub mod host;

pub use attempt::{Attempt, AttemptOutcome};
pub use consumer::EventConsumer;
pub use dispatcher::{Dispatched, Dispatcher};
pub use host::AttemptHost;

use bytes::Bytes;

use crate::common::{subjects, EventId, OrganizationId};
use crate::kernel::NatsPublisher;

/// Empty ping telling watchers the event's audit trail changed.
pub(crate) async fn publish_progress<P: NatsPublisher + ?Sized>(
    nats: &P,
    organization_id: OrganizationId,
    event_id: EventId,
) {
    let subject = subjects::event_progress(organization_id, event_id);
    if let Err(e) = nats.publish(subject, Bytes::new()).await {
        tracing::warn!(event_id = %event_id, error = %e, "failed to publish event progress");
    }
}
