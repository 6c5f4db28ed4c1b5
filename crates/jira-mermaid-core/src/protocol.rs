//! Cross-context message shapes shared by the host and the rendering surface.
//!
//! Wire format (JSON, as seen by `postMessage`):
//!
//! ```text
//! host -> surface   { "type": "WINDOW_ID", "value": 3 }
//! surface -> host   { "type": "BEFORE_RENDER", "windowId": 3 }
//! host -> surface   { "type": "BEFORE_RENDER_ACK" }
//! surface -> host   { "type": "AFTER_RENDER", "windowId": 3 }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id tagging one render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrossContextMessage {
    /// Tells a freshly loaded surface which id to tag its messages with.
    WindowId { value: WindowId },
    /// The surface is about to lay out and waits for an ack.
    BeforeRender {
        #[serde(rename = "windowId")]
        window_id: WindowId,
    },
    /// The surface finished drawing.
    AfterRender {
        #[serde(rename = "windowId")]
        window_id: WindowId,
    },
    /// Host side of the `BEFORE_RENDER` barrier.
    BeforeRenderAck,
}

/// Lifecycle events a surface can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    BeforeRender,
    AfterRender,
}

/// A validated message from a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundMessage {
    pub window_id: WindowId,
    pub event: SurfaceEvent,
}

impl InboundMessage {
    /// Validate an arbitrary posted value.
    ///
    /// Accepts only plain objects carrying a string `type` and a positive
    /// integer `windowId`. Anything else, including the host's own outbound
    /// message types, yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind = object.get("type")?.as_str()?;
        let window_id = object.get("windowId")?.as_u64().filter(|id| *id != 0)?;

        let event = match kind {
            "BEFORE_RENDER" => SurfaceEvent::BeforeRender,
            "AFTER_RENDER" => SurfaceEvent::AfterRender,
            _ => return None,
        };

        Some(Self {
            window_id: WindowId(window_id),
            event,
        })
    }
}

impl From<InboundMessage> for CrossContextMessage {
    fn from(msg: InboundMessage) -> Self {
        match msg.event {
            SurfaceEvent::BeforeRender => CrossContextMessage::BeforeRender {
                window_id: msg.window_id,
            },
            SurfaceEvent::AfterRender => CrossContextMessage::AfterRender {
                window_id: msg.window_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_shape() {
        let window = serde_json::to_value(CrossContextMessage::WindowId { value: WindowId(7) })
            .unwrap();
        assert_eq!(window, json!({ "type": "WINDOW_ID", "value": 7 }));

        let ack = serde_json::to_value(CrossContextMessage::BeforeRenderAck).unwrap();
        assert_eq!(ack, json!({ "type": "BEFORE_RENDER_ACK" }));
    }

    #[test]
    fn test_inbound_deserializes_surface_messages() {
        let msg: CrossContextMessage =
            serde_json::from_value(json!({ "type": "AFTER_RENDER", "windowId": 2 })).unwrap();
        assert_eq!(msg, CrossContextMessage::AfterRender { window_id: WindowId(2) });
    }

    #[test]
    fn test_validation_accepts_well_formed() {
        let msg = InboundMessage::from_value(&json!({ "type": "BEFORE_RENDER", "windowId": 4 }));
        assert_eq!(
            msg,
            Some(InboundMessage {
                window_id: WindowId(4),
                event: SurfaceEvent::BeforeRender,
            })
        );
        assert_eq!(
            CrossContextMessage::from(msg.unwrap()),
            CrossContextMessage::BeforeRender { window_id: WindowId(4) }
        );
    }

    #[test]
    fn test_validation_rejects_malformed() {
        let rejected = [
            json!(null),
            json!("BEFORE_RENDER"),
            json!([{ "type": "BEFORE_RENDER", "windowId": 1 }]),
            json!({ "windowId": 1 }),
            json!({ "type": "BEFORE_RENDER" }),
            json!({ "type": "BEFORE_RENDER", "windowId": 0 }),
            json!({ "type": "BEFORE_RENDER", "windowId": "1" }),
            json!({ "type": "BEFORE_RENDER", "windowId": 1.5 }),
            json!({ "type": "", "windowId": 1 }),
            json!({ "type": "WINDOW_ID", "value": 1 }),
            json!({ "type": "BEFORE_RENDER_ACK" }),
            json!({ "type": "SOMETHING_ELSE", "windowId": 1 }),
        ];
        for value in rejected {
            assert_eq!(InboundMessage::from_value(&value), None, "{value}");
        }
    }
}
