//! Bus subject naming.
//!
//! Every subject the engine publishes on or listens to is built here so the
//! module connection layer and UIs agree on a single scheme.

use super::{EventId, ModuleSessionId, OrganizationId};

/// Subject a live module session listens on for requests and notifications.
pub fn module_session(organization_id: OrganizationId, session_id: ModuleSessionId) -> String {
    format!("organization.{}.module.{}", organization_id, session_id)
}

/// Subject carrying storage sync broadcasts for an organization.
pub fn storage(organization_id: OrganizationId) -> String {
    format!("organization.{}.storage", organization_id)
}

/// Subject pinged whenever the audit trail of an event changes.
pub fn event_progress(organization_id: OrganizationId, event_id: EventId) -> String {
    format!("organization.{}:event.{}", organization_id, event_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_session_subject() {
        let org = OrganizationId::new();
        let session = ModuleSessionId::new();
        assert_eq!(
            module_session(org, session),
            format!("organization.{}.module.{}", org, session)
        );
    }

    #[test]
    fn test_event_progress_subject_uses_colon_separator() {
        let org = OrganizationId::new();
        let event = EventId::new();
        assert!(event_progress(org, event).contains(&format!(":event.{}", event)));
    }
}
