//! `{ "event": <name>, "data": <payload> }` framing for the WebSocket channel.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use tracker_core::events::{LocationReport, NearbyRequest, ServerEvent, ViewportRequest};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: &'static str, reason: String },
}

impl ProtocolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_frame",
            Self::UnknownEvent(_) => "unknown_event",
            Self::InvalidPayload { .. } => "invalid_payload",
        }
    }
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// A decoded client frame.
#[derive(Clone, Debug)]
pub enum ClientFrame {
    LocationUpdate(LocationReport),
    LocationRequest(NearbyRequest),
    PresenceSubscribe,
    ViewportSubscribe(ViewportRequest),
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        match frame.event.as_str() {
            "location:update" => payload("location:update", frame.data).map(Self::LocationUpdate),
            "location:request" => payload("location:request", frame.data).map(Self::LocationRequest),
            "presence:subscribe" => Ok(Self::PresenceSubscribe),
            "viewport:subscribe" => payload("viewport:subscribe", frame.data).map(Self::ViewportSubscribe),
            _ => Err(ProtocolError::UnknownEvent(frame.event)),
        }
    }
}

fn payload<T: DeserializeOwned>(event: &'static str, data: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        event,
        reason: e.to_string(),
    })
}

pub fn encode(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_location_update() {
        let frame = ClientFrame::parse(
            r#"{"event":"location:update","data":{"coordinates":[10.5,-3.25],"timestamp":"2026-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::LocationUpdate(report) => assert_eq!(report.coordinates, [10.5, -3.25]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_nearby_request_with_defaults() {
        let frame = ClientFrame::parse(r#"{"event":"location:request","data":{"center":[1.0,2.0]}}"#).unwrap();
        match frame {
            ClientFrame::LocationRequest(req) => {
                assert_eq!(req.center, [1.0, 2.0]);
                assert!(req.radius.is_none());
                assert!(req.exclude_self.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn presence_subscribe_needs_no_data() {
        assert!(matches!(
            ClientFrame::parse(r#"{"event":"presence:subscribe"}"#),
            Ok(ClientFrame::PresenceSubscribe)
        ));
    }

    #[test]
    fn viewport_subscribe_reads_camel_case() {
        let frame = ClientFrame::parse(
            r#"{"event":"viewport:subscribe","data":{"minLat":1,"minLng":2,"maxLat":3,"maxLng":4,"zoom":12}}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::ViewportSubscribe(req) => {
                assert_eq!(req.max_lng, 4.0);
                assert_eq!(req.zoom, Some(12.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(ClientFrame::parse("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            ClientFrame::parse(r#"{"event":"chat:send","data":{}}"#),
            Err(ProtocolError::UnknownEvent(e)) if e == "chat:send"
        ));
        let err = ClientFrame::parse(r#"{"event":"viewport:subscribe"}"#).unwrap_err();
        assert_eq!(err.kind(), "invalid_payload");
        let err = ClientFrame::parse(r#"{"event":"location:update","data":{"coordinates":[1]}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { event: "location:update", .. }));
    }
}
