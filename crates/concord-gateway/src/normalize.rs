use chrono::Utc;

use concord_core::{CommunityId, EventEnvelope, EventId, EventType, SubjectKey};

use crate::transport::RawGatewayEvent;

/// Map the upstream event kind string onto the closed [`EventType`]
/// enumeration (§4.1). Unrecognized kinds fall through to `Other` rather
/// than being dropped, so the worker still sees (and can log) them.
fn classify_event_type(kind: &str) -> EventType {
    match kind {
        "GUILD_CREATE" => EventType::GuildCreate,
        "GUILD_DELETE" => EventType::GuildDelete,
        "GUILD_UPDATE" => EventType::GuildUpdate,
        "GUILD_MEMBER_ADD" => EventType::MemberAdd,
        "GUILD_MEMBER_REMOVE" => EventType::MemberRemove,
        "GUILD_MEMBER_UPDATE" => EventType::MemberUpdate,
        "INTERACTION_CREATE" => EventType::InteractionCreate,
        "READY" => EventType::Ready,
        "RESUMED" => EventType::Resumed,
        "HEARTBEAT_ACK" => EventType::HeartbeatAck,
        _ => EventType::Other,
    }
}

/// Build the bus envelope for a raw gateway event (§3.2). `subject_key` is
/// the tenant id when the event carries a guild id, otherwise `"global"`.
pub fn normalize(raw: &RawGatewayEvent, shard_id: u32) -> EventEnvelope {
    let subject_key = match &raw.guild_id {
        Some(guild_id) => SubjectKey::for_tenant(&CommunityId::from(guild_id.as_str())),
        None => SubjectKey::global(),
    };

    EventEnvelope {
        event_id: EventId::new(),
        event_type: classify_event_type(&raw.kind),
        shard_id,
        producer_ts: Utc::now(),
        subject_key,
        payload: raw.body.clone(),
        schema_version: EventEnvelope::CURRENT_SCHEMA_VERSION,
    }
}

/// Bus subject a normalized envelope is published to: `events.<type>.<shard>`.
pub fn subject_for(envelope: &EventEnvelope) -> String {
    format!(
        "events.{:?}.{}",
        envelope.event_type, envelope.shard_id
    )
    .to_lowercase()
}
