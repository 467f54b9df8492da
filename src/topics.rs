//! Topic naming.
//!
//! Two dialects share one namespace: facts (`{domain}.events.{entity}.{action}`)
//! and commands (`{domain}.command.{verb}`). Publishers and consumers agree on
//! the strings out of band.

const EVENTS_SEGMENT: &str = "events";
const COMMAND_SEGMENT: &str = "command";

pub const WILDCARD: &str = "*";

pub const NOTIFY_SEND: &str = "notify.command.send";

pub const AUTH_TWO_FACTOR_INITIATED: &str = "auth.events.authentication.twofactorinitiated";
pub const AUTH_TWO_FACTOR_SUCCEEDED: &str = "auth.events.authentication.twofactorsucceeded";
pub const AUTH_TWO_FACTOR_FAILED: &str = "auth.events.authentication.twofactorfailed";
pub const AUTH_TWO_FACTOR_EXPIRED: &str = "auth.events.authentication.twofactorexpired";

pub const PROFILE_CREATED: &str = "profiles.events.profile.created";
pub const CONTACT_POINT_ADDED: &str = "profiles.events.contactpoint.added";

pub const INAPP_DELIVERED: &str = "notify.events.inapp.delivered";

pub const SERVICE_REGISTERED: &str = "hub.events.service.registered";

/// `notify` + `send` -> `notify.command.send`
pub fn command(domain: &str, verb: &str) -> String {
    format!(
        "{}.{}.{}",
        normalize(domain),
        COMMAND_SEGMENT,
        normalize(verb)
    )
}

/// `auth` + `authentication` + `TwoFactorSucceeded` ->
/// `auth.events.authentication.twofactorsucceeded`
pub fn event(domain: &str, entity: &str, action: &str) -> String {
    format!(
        "{}.{}.{}.{}",
        normalize(domain),
        EVENTS_SEGMENT,
        normalize(entity),
        normalize(action)
    )
}

pub fn is_command(topic: &str) -> bool {
    topic.split('.').nth(1) == Some(COMMAND_SEGMENT)
}

pub fn is_event(topic: &str) -> bool {
    topic.split('.').nth(1) == Some(EVENTS_SEGMENT)
}

/// Matches a topic against a pattern where `*` stands for exactly one segment.
pub fn matches(pattern: &str, topic: &str) -> bool {
    if pattern == topic {
        return true;
    }

    if !pattern.contains(WILDCARD) {
        return false;
    }

    let pattern_parts: Vec<&str> = pattern.split('.').collect();
    let topic_parts: Vec<&str> = topic.split('.').collect();

    if pattern_parts.len() != topic_parts.len() {
        return false;
    }

    pattern_parts
        .iter()
        .zip(topic_parts.iter())
        .all(|(p, t)| *p == WILDCARD || p == t)
}

fn normalize(segment: &str) -> String {
    segment.trim().to_lowercase()
}
