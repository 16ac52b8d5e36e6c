//! Names of the shared bus channels.

use crate::frames::DomainEvent;

/// Room and direct chat messages.
pub const CHAT: &str = "chat-messages";

/// Online/offline transitions.
pub const PRESENCE: &str = "user-presence";

/// Room membership and creation.
pub const ROOM: &str = "room-events";

/// Every channel a fan-out process subscribes to.
pub const ALL: [&str; 3] = [CHAT, PRESENCE, ROOM];

/// The channel an event is published on.
///
/// Targeted notifications are not carried by the bus and return `None`.
#[must_use]
pub fn for_event(event: &DomainEvent) -> Option<&'static str> {
    match event {
        DomainEvent::NewMessage(_) | DomainEvent::NewDirectMessage(_) => Some(CHAT),
        DomainEvent::PresenceChanged(_) => Some(PRESENCE),
        DomainEvent::Room(_) => Some(ROOM),
        DomainEvent::Notification(_) => None,
    }
}
