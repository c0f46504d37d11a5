//! JSON wire format of the roster service.
//!
//! Responses share one envelope:
//!
//! ```json
//! { "success": true, "type": "Heartbeat", "payload": { ... }, "error": null }
//! ```
//!
//! Anything that does not match the expected shape is a
//! [`Error::Decode`](crate::Error::Decode) and is never retried.

use roster_core::{
    FriendEntry, FriendRequest, FriendStatus, NATION_NOT_CARRIED, RequestDirection,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Decoded heartbeat: a sparse status delta plus event cursors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartbeatDelta {
    pub statuses: Vec<FriendStatus>,
    pub last_event_timestamp: u64,
    pub last_request_event_timestamp: u64,
    pub is_outdated: bool,
    pub latest_version: Option<String>,
}

/// Decoded authoritative roster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FriendListSnapshot {
    pub friends: Vec<FriendEntry>,
    pub statuses: Vec<FriendStatus>,
}

/// Decoded pending requests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestList {
    pub incoming: Vec<FriendRequest>,
    pub outgoing: Vec<FriendRequest>,
}

impl RequestList {
    pub fn all(&self) -> impl Iterator<Item = &FriendRequest> {
        self.incoming.iter().chain(self.outgoing.iter())
    }
}

/// Turns successful response bodies into typed values.
pub trait WireDecoder: Send + Sync + 'static {
    fn decode_heartbeat(&self, body: &str) -> Result<HeartbeatDelta>;
    fn decode_friend_list(&self, body: &str) -> Result<FriendListSnapshot>;
    fn decode_requests(&self, body: &str) -> Result<RequestList>;
}

/// Body of a heartbeat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub character_name: String,
    pub last_event_timestamp: u64,
    pub last_request_event_timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireStatus {
    character_name: String,
    display_name: String,
    is_online: bool,
    job: String,
    rank: String,
    nation: Option<i32>,
    zone: String,
    last_seen_at: u64,
    show_online_status: Option<bool>,
    is_linked_character: bool,
    is_on_alt_character: bool,
    alt_character_name: String,
    friended_as: String,
    linked_characters: Vec<String>,
}

impl WireStatus {
    fn into_status(self) -> FriendStatus {
        let display_name = if self.display_name.is_empty() {
            self.character_name.clone()
        } else {
            self.display_name
        };
        FriendStatus {
            character_name: self.character_name,
            display_name,
            is_online: self.is_online,
            job: self.job,
            rank: self.rank,
            nation: self.nation.unwrap_or(NATION_NOT_CARRIED),
            zone: self.zone,
            last_seen_at: self.last_seen_at,
            show_online_status: self.show_online_status.unwrap_or(true),
            is_linked_character: self.is_linked_character,
            is_on_alt_character: self.is_on_alt_character,
            alt_character_name: self.alt_character_name,
            friended_as: self.friended_as,
            linked_characters: self.linked_characters,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHeartbeat {
    #[serde(default)]
    statuses: Vec<WireStatus>,
    #[serde(default)]
    last_event_timestamp: u64,
    #[serde(default)]
    last_request_event_timestamp: u64,
    #[serde(default)]
    is_outdated: bool,
    #[serde(default)]
    latest_version: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireFriend {
    name: String,
    friended_as: String,
    linked_characters: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFriendList {
    friends: Vec<WireFriend>,
    #[serde(default)]
    statuses: Vec<WireStatus>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireRequest {
    request_id: String,
    from_character_name: String,
    to_character_name: String,
    status: String,
    created_at: u64,
}

impl WireRequest {
    fn into_request(self, direction: RequestDirection) -> FriendRequest {
        FriendRequest {
            request_id: self.request_id,
            from_character_name: self.from_character_name,
            to_character_name: self.to_character_name,
            direction,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequestList {
    #[serde(default)]
    incoming: Vec<WireRequest>,
    #[serde(default)]
    outgoing: Vec<WireRequest>,
}

/// serde_json implementation of [`WireDecoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWireDecoder;

impl JsonWireDecoder {
    fn open<T: DeserializeOwned>(body: &str, expected: &str) -> Result<T> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|e| Error::decode(format!("invalid JSON envelope: {}", e)))?;

        if !envelope.success {
            return Err(Error::decode(format!(
                "server reported failure: {}",
                envelope.error.as_deref().unwrap_or("unknown error")
            )));
        }
        if envelope.kind != expected {
            return Err(Error::decode(format!(
                "unexpected response type '{}', expected '{}'",
                envelope.kind, expected
            )));
        }

        let payload = envelope
            .payload
            .ok_or_else(|| Error::decode(format!("{} response has no payload", expected)))?;
        serde_json::from_value(payload)
            .map_err(|e| Error::decode(format!("invalid {} payload: {}", expected, e)))
    }
}

impl WireDecoder for JsonWireDecoder {
    fn decode_heartbeat(&self, body: &str) -> Result<HeartbeatDelta> {
        let wire: WireHeartbeat = Self::open(body, "Heartbeat")?;
        Ok(HeartbeatDelta {
            statuses: wire.statuses.into_iter().map(WireStatus::into_status).collect(),
            last_event_timestamp: wire.last_event_timestamp,
            last_request_event_timestamp: wire.last_request_event_timestamp,
            is_outdated: wire.is_outdated,
            latest_version: wire.latest_version.filter(|v| !v.is_empty()),
        })
    }

    fn decode_friend_list(&self, body: &str) -> Result<FriendListSnapshot> {
        let wire: WireFriendList = Self::open(body, "FriendList")?;
        Ok(FriendListSnapshot {
            friends: wire
                .friends
                .into_iter()
                .map(|f| FriendEntry {
                    name: f.name,
                    friended_as: f.friended_as,
                    linked_characters: f.linked_characters,
                })
                .collect(),
            statuses: wire.statuses.into_iter().map(WireStatus::into_status).collect(),
        })
    }

    fn decode_requests(&self, body: &str) -> Result<RequestList> {
        let wire: WireRequestList = Self::open(body, "FriendRequests")?;
        Ok(RequestList {
            incoming: wire
                .incoming
                .into_iter()
                .map(|r| r.into_request(RequestDirection::Incoming))
                .collect(),
            outgoing: wire
                .outgoing
                .into_iter()
                .map(|r| r.into_request(RequestDirection::Outgoing))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sparse_heartbeat() {
        let body = r#"{
            "success": true,
            "type": "Heartbeat",
            "payload": {
                "statuses": [{ "characterName": "Aria", "isOnline": true }],
                "lastEventTimestamp": 42,
                "lastRequestEventTimestamp": 7
            }
        }"#;

        let delta = JsonWireDecoder.decode_heartbeat(body).unwrap();
        assert_eq!(delta.last_event_timestamp, 42);
        assert_eq!(delta.last_request_event_timestamp, 7);

        let status = &delta.statuses[0];
        assert!(status.is_online);
        assert_eq!(status.display_name, "Aria");
        assert_eq!(status.nation, 0);
        assert!(status.show_online_status);
        assert!(status.job.is_empty());
    }

    #[test]
    fn test_decode_friend_list() {
        let body = r#"{
            "success": true,
            "type": "FriendList",
            "payload": {
                "friends": [{ "name": "Aria", "linkedCharacters": ["AriaAlt"] }],
                "statuses": [{ "characterName": "Aria", "isOnline": false, "nation": -1 }]
            }
        }"#;

        let snapshot = JsonWireDecoder.decode_friend_list(body).unwrap();
        assert_eq!(snapshot.friends[0].linked_characters, vec!["AriaAlt".to_string()]);
        assert_eq!(snapshot.statuses[0].nation, -1);
    }

    #[test]
    fn test_decode_requests_assigns_direction() {
        let body = r#"{
            "success": true,
            "type": "FriendRequests",
            "payload": {
                "incoming": [{ "requestId": "1", "fromCharacterName": "Bast" }],
                "outgoing": [{ "requestId": "2", "toCharacterName": "Cid" }]
            }
        }"#;

        let list = JsonWireDecoder.decode_requests(body).unwrap();
        assert_eq!(list.incoming[0].direction, RequestDirection::Incoming);
        assert_eq!(list.outgoing[0].counterpart(), "Cid");
        assert_eq!(list.all().count(), 2);
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let body = r#"{ "success": true, "type": "FriendList", "payload": {} }"#;
        assert!(matches!(
            JsonWireDecoder.decode_heartbeat(body),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_failure_envelope() {
        let body = r#"{ "success": false, "type": "Heartbeat", "error": "bad key" }"#;
        let err = JsonWireDecoder.decode_heartbeat(body).unwrap_err();
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(matches!(
            JsonWireDecoder.decode_requests("not json"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_heartbeat_request_encoding() {
        let request = HeartbeatRequest {
            character_name: "Me".to_string(),
            last_event_timestamp: 1,
            last_request_event_timestamp: 2,
            client_version: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"characterName":"Me","lastEventTimestamp":1,"lastRequestEventTimestamp":2}"#
        );
    }
}
