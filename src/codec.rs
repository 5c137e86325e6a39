use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RoutingError;

/// Status codes carried on a `RouteResponse`. Fixed numeric codes per the
/// wire format; an unrecognized code decodes to `Unknown` rather than
/// failing, so the codec stays schema-stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    RouteFound,
    RequestAlreadyInProgress,
    NoRouteFound,
    TtlExpired,
    MaxHopsReached,
    Unknown(u8),
}

impl RouteStatus {
    fn code(self) -> u8 {
        match self {
            RouteStatus::RouteFound => 1,
            RouteStatus::RequestAlreadyInProgress => 2,
            RouteStatus::NoRouteFound => 3,
            RouteStatus::TtlExpired => 4,
            RouteStatus::MaxHopsReached => 5,
            RouteStatus::Unknown(code) => code,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            1 => RouteStatus::RouteFound,
            2 => RouteStatus::RequestAlreadyInProgress,
            3 => RouteStatus::NoRouteFound,
            4 => RouteStatus::TtlExpired,
            5 => RouteStatus::MaxHopsReached,
            other => RouteStatus::Unknown(other),
        }
    }
}

impl Serialize for RouteStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for RouteStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Ok(RouteStatus::from_code(code))
    }
}

/// Request to discover a route to `destination_address`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequestMessage {
    pub uuid: Uuid,
    pub destination_address: String,
    pub remaining_hops: u32,
    pub max_ttl_absolute_millis: i64,
}

/// Reply to a `RouteRequestMessage`, flowing back toward the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponseMessage {
    pub request_uuid: Uuid,
    pub status: RouteStatus,
    pub hop_count: u32,
}

/// An opaque, end-to-end-encrypted application payload in transit along an
/// established route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedMessageEnvelope {
    pub final_destination_address: String,
    pub route_uuid: Uuid,
    pub route_usage_uuid: Uuid,
    pub original_sender_address: String,
    pub e2e_encrypted_body: Vec<u8>,
    pub payload_id: Option<u64>,
}

/// The three envelope kinds this crate ever puts on the wire.
#[derive(Debug, Clone)]
pub enum CoreMessage {
    RouteRequest(RouteRequestMessage),
    RouteResponse(RouteResponseMessage),
    RoutedMessage(RoutedMessageEnvelope),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    RouteRequest,
    RouteResponse,
    RoutedMessage,
    Unknown(u8),
}

impl MessageType {
    fn code(self) -> u8 {
        match self {
            MessageType::RouteRequest => 1,
            MessageType::RouteResponse => 2,
            MessageType::RoutedMessage => 3,
            MessageType::Unknown(code) => code,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            1 => MessageType::RouteRequest,
            2 => MessageType::RouteResponse,
            3 => MessageType::RoutedMessage,
            other => MessageType::Unknown(other),
        }
    }
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Ok(MessageType::from_code(code))
    }
}

/// Outer, tag-dispatched container. The whole serialized form of this
/// struct is what gets hop-encrypted before handing to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OuterEnvelope {
    message_type: MessageType,
    encrypted_data: Vec<u8>,
}

/// Serialize a `CoreMessage` into the bytes that get hop-encrypted.
pub fn encode_envelope(message: &CoreMessage) -> Result<Vec<u8>, RoutingError> {
    let (message_type, inner) = match message {
        CoreMessage::RouteRequest(m) => (
            MessageType::RouteRequest,
            serde_json::to_vec(m).map_err(|e| RoutingError::MalformedMessage {
                reason: e.to_string(),
            })?,
        ),
        CoreMessage::RouteResponse(m) => (
            MessageType::RouteResponse,
            serde_json::to_vec(m).map_err(|e| RoutingError::MalformedMessage {
                reason: e.to_string(),
            })?,
        ),
        CoreMessage::RoutedMessage(m) => (
            MessageType::RoutedMessage,
            serde_json::to_vec(m).map_err(|e| RoutingError::MalformedMessage {
                reason: e.to_string(),
            })?,
        ),
    };

    let outer = OuterEnvelope {
        message_type,
        encrypted_data: inner,
    };

    serde_json::to_vec(&outer).map_err(|e| RoutingError::MalformedMessage {
        reason: e.to_string(),
    })
}

/// Decode bytes (already hop-decrypted by the caller) back into a
/// `CoreMessage`. An unrecognized outer tag is reported as a malformed
/// message rather than panicking; the caller drops it per the error
/// handling design.
pub fn decode_envelope(bytes: &[u8]) -> Result<CoreMessage, RoutingError> {
    let outer: OuterEnvelope =
        serde_json::from_slice(bytes).map_err(|e| RoutingError::MalformedMessage {
            reason: e.to_string(),
        })?;

    match outer.message_type {
        MessageType::RouteRequest => {
            let inner = serde_json::from_slice(&outer.encrypted_data).map_err(|e| {
                RoutingError::MalformedMessage {
                    reason: e.to_string(),
                }
            })?;
            Ok(CoreMessage::RouteRequest(inner))
        }
        MessageType::RouteResponse => {
            let inner = serde_json::from_slice(&outer.encrypted_data).map_err(|e| {
                RoutingError::MalformedMessage {
                    reason: e.to_string(),
                }
            })?;
            Ok(CoreMessage::RouteResponse(inner))
        }
        MessageType::RoutedMessage => {
            let inner = serde_json::from_slice(&outer.encrypted_data).map_err(|e| {
                RoutingError::MalformedMessage {
                    reason: e.to_string(),
                }
            })?;
            Ok(CoreMessage::RoutedMessage(inner))
        }
        MessageType::Unknown(code) => Err(RoutingError::MalformedMessage {
            reason: format!("unknown outer message type {code}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_request_round_trips() {
        let msg = CoreMessage::RouteRequest(RouteRequestMessage {
            uuid: Uuid::new_v4(),
            destination_address: "peer-d".to_string(),
            remaining_hops: 9,
            max_ttl_absolute_millis: 1_700_000_000_000,
        });

        let bytes = encode_envelope(&msg).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();

        match decoded {
            CoreMessage::RouteRequest(m) => {
                assert_eq!(m.destination_address, "peer-d");
                assert_eq!(m.remaining_hops, 9);
            }
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn route_response_round_trips() {
        let msg = CoreMessage::RouteResponse(RouteResponseMessage {
            request_uuid: Uuid::new_v4(),
            status: RouteStatus::RouteFound,
            hop_count: 2,
        });

        let bytes = encode_envelope(&msg).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();

        match decoded {
            CoreMessage::RouteResponse(m) => {
                assert!(matches!(m.status, RouteStatus::RouteFound));
                assert_eq!(m.hop_count, 2);
            }
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn routed_message_round_trips() {
        let msg = CoreMessage::RoutedMessage(RoutedMessageEnvelope {
            final_destination_address: "peer-d".to_string(),
            route_uuid: Uuid::new_v4(),
            route_usage_uuid: Uuid::new_v4(),
            original_sender_address: "peer-a".to_string(),
            e2e_encrypted_body: vec![1, 2, 3, 4],
            payload_id: Some(42),
        });

        let bytes = encode_envelope(&msg).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();

        match decoded {
            CoreMessage::RoutedMessage(m) => {
                assert_eq!(m.e2e_encrypted_body, vec![1, 2, 3, 4]);
                assert_eq!(m.payload_id, Some(42));
            }
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn unknown_status_code_maps_to_unknown_variant() {
        let json = r#"{"request_uuid":"00000000-0000-0000-0000-000000000000","status":200,"hop_count":0}"#;
        let decoded: RouteResponseMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(decoded.status, RouteStatus::Unknown(200)));
    }

    #[test]
    fn malformed_bytes_are_reported_not_panicked() {
        let result = decode_envelope(b"not a valid envelope");
        assert!(result.is_err());
    }
}
