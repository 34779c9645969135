//! Protocol-version negotiation (§9 open question).
//!
//! The source carries both a 4.6.0 and a 7.0.0 protocol-version negotiation
//! path. The gateway handshake accepts the legacy allow-list; the canonical
//! validator (event acceptance past ingress) always enforces
//! [`MIN_PROTOCOL_VERSION`]. [`LEGACY_SUNSET_AT`] is `None` until a sunset
//! date is scheduled — this forces a future change to either set one or
//! document why none exists, rather than letting the allow-list go silently
//! permanent.

use crate::types::Timestamp;

/// The canonical validator requires at least this protocol version.
pub const MIN_PROTOCOL_VERSION: &str = "6.0.0";

/// Versions accepted at the gateway handshake during the legacy transition
/// window, even though they fall below [`MIN_PROTOCOL_VERSION`].
pub const LEGACY_ALLOW_LIST: &[&str] = &["4.6.0"];

/// Scheduled end of the legacy transition window. `None` means "not yet
/// scheduled" — the allow-list remains active until an operator sets one.
pub fn legacy_sunset_at() -> Option<Timestamp> {
    None
}

fn parse_version(v: &str) -> Option<(u32, u32, u32)> {
    let mut parts = v.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    Some((major, minor, patch))
}

/// Gateway-handshake acceptance: current minimum OR the legacy allow-list,
/// provided the sunset date (if any) hasn't passed.
pub fn handshake_accepts(version: &str, now: Timestamp) -> bool {
    if meets_minimum(version) {
        return true;
    }
    if !LEGACY_ALLOW_LIST.contains(&version) {
        return false;
    }
    match legacy_sunset_at() {
        Some(sunset) => now < sunset,
        None => true,
    }
}

/// Canonical post-ingress validation: always requires the minimum version,
/// never consults the legacy allow-list.
pub fn meets_minimum(version: &str) -> bool {
    let Some(got) = parse_version(version) else {
        return false;
    };
    let Some(min) = parse_version(MIN_PROTOCOL_VERSION) else {
        return false;
    };
    got >= min
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn current_version_meets_minimum() {
        assert!(meets_minimum("6.0.0"));
        assert!(meets_minimum("7.0.0"));
    }

    #[test]
    fn legacy_version_fails_canonical_but_passes_handshake() {
        assert!(!meets_minimum("4.6.0"));
        assert!(handshake_accepts("4.6.0", Utc::now()));
    }

    #[test]
    fn unknown_version_rejected_everywhere() {
        assert!(!meets_minimum("3.0.0"));
        assert!(!handshake_accepts("3.0.0", Utc::now()));
    }
}
