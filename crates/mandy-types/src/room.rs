//! Room key derivation.
//!
//! A room is identified by `(domain, room)`. Callers either name the domain
//! directly or hand over a full room URL, in which case the domain is the
//! host label in front of [`ROOM_HOST_SUFFIX`]. The derivation is part of the
//! key contract: the same URL must always land on the same key.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Host suffix of hosted room URLs (`https://<domain>.daily.co/<room>`).
pub const ROOM_HOST_SUFFIX: &str = ".daily.co";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomKeyError {
    #[error("domain or room_url must be provided")]
    MissingRoomUrl,
}

/// Identifies one logical voice-agent session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomKey {
    pub domain: String,
    pub room: String,
}

impl RoomKey {
    pub fn new(domain: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            room: room.into(),
        }
    }

    /// Resolves the room URL and key for a start request.
    ///
    /// An explicit `room_url` wins over `domain`. Returns the key together
    /// with the URL the agent should join.
    pub fn resolve(
        domain: Option<&str>,
        room: &str,
        room_url: Option<&str>,
    ) -> Result<(Self, String), RoomKeyError> {
        let url = resolve_room_url(domain, room, room_url)?;
        let key = Self::new(derive_domain(domain, &url), room);
        Ok((key, url))
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.room)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Returns the URL to join: `room_url` if given, else built from `domain`.
pub fn resolve_room_url(
    domain: Option<&str>,
    room: &str,
    room_url: Option<&str>,
) -> Result<String, RoomKeyError> {
    if let Some(url) = non_empty(room_url) {
        return Ok(url.to_string());
    }
    let domain = non_empty(domain).ok_or(RoomKeyError::MissingRoomUrl)?;
    Ok(format!("https://{domain}{ROOM_HOST_SUFFIX}/{room}"))
}

/// Derives the key domain.
///
/// An explicit domain is used as-is. Otherwise the host of `room_url` is
/// taken, trimmed at [`ROOM_HOST_SUFFIX`] when present. Unparseable URLs or
/// URLs without a host fall back to the raw URL string.
pub fn derive_domain(domain: Option<&str>, room_url: &str) -> String {
    if let Some(domain) = non_empty(domain) {
        return domain.to_string();
    }

    let host = Url::parse(room_url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_default();

    if host.ends_with(ROOM_HOST_SUFFIX) {
        return host
            .split(ROOM_HOST_SUFFIX)
            .next()
            .unwrap_or_default()
            .to_string();
    }
    if host.is_empty() {
        room_url.to_string()
    } else {
        host
    }
}

/// Returns the last non-empty path segment of a room URL.
pub fn room_name_from_url(room_url: &str) -> Option<String> {
    let parsed = Url::parse(room_url).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_url_from_domain() {
        let (key, url) = RoomKey::resolve(Some("acme"), "standup", None).unwrap();
        assert_eq!(url, "https://acme.daily.co/standup");
        assert_eq!(key, RoomKey::new("acme", "standup"));
        assert_eq!(key.to_string(), "acme/standup");
    }

    #[test]
    fn room_url_overrides_domain() {
        let (key, url) = RoomKey::resolve(
            Some("acme"),
            "standup",
            Some("https://other.daily.co/standup"),
        )
        .unwrap();
        assert_eq!(url, "https://other.daily.co/standup");
        // An explicit domain still names the key.
        assert_eq!(key.domain, "acme");
    }

    #[test]
    fn domain_is_derived_from_hosted_url() {
        let (key, _) =
            RoomKey::resolve(None, "standup", Some("https://Acme.daily.co/standup")).unwrap();
        assert_eq!(key, RoomKey::new("acme", "standup"));
    }

    #[test]
    fn foreign_host_is_used_whole() {
        assert_eq!(
            derive_domain(None, "https://rooms.example.com/standup"),
            "rooms.example.com"
        );
    }

    #[test]
    fn unparseable_url_falls_back_to_raw_string() {
        assert_eq!(derive_domain(None, "not a url"), "not a url");
    }

    #[test]
    fn missing_domain_and_url_is_rejected() {
        assert_eq!(
            RoomKey::resolve(None, "standup", None),
            Err(RoomKeyError::MissingRoomUrl)
        );
        assert_eq!(
            RoomKey::resolve(Some(""), "standup", Some("")),
            Err(RoomKeyError::MissingRoomUrl)
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let url = "https://team-7.daily.co/retro";
        assert_eq!(derive_domain(None, url), derive_domain(None, url));
        assert_eq!(derive_domain(None, url), "team-7");
    }

    #[test]
    fn room_name_is_last_path_segment() {
        assert_eq!(
            room_name_from_url("https://acme.daily.co/standup/").as_deref(),
            Some("standup")
        );
        assert_eq!(room_name_from_url("https://acme.daily.co"), None);
        assert_eq!(room_name_from_url("standup"), None);
    }
}
