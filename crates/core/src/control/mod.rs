//! Manual control surface: a JSON request/response protocol and the
//! websocket server that carries it.
//!
//! Every request is a JSON object with a `cmd` string and an `msg_id`
//! integer. Every response echoes `msg_id` (or `-1` if none could be read)
//! and carries `success` and `message` next to the command's own fields.

mod server;

pub use server::ControlServer;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{AtmoError, Channel, Color, DeviceIndex, Devices, Mode, ModeController, Result};

pub type MessageId = i32;

/// Message id reported when the request carried no readable `msg_id`.
pub const UNKNOWN_MESSAGE_ID: MessageId = -1;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Response {
    msg_id: MessageId,
    success: bool,
    message: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Response {
    fn ok(msg_id: MessageId, payload: Map<String, Value>) -> Self {
        Self {
            msg_id,
            success: true,
            message: "OK".to_owned(),
            payload,
        }
    }

    fn failed(msg_id: MessageId, error: &AtmoError) -> Self {
        Self {
            msg_id,
            success: false,
            message: error.to_string(),
            payload: Map::new(),
        }
    }
}

/// Executes control requests against the devices and the mode controller.
/// Shared by every connection of the control server.
pub struct RequestHandler {
    devices: Arc<Devices>,
    modes: Arc<ModeController>,
}

impl RequestHandler {
    pub fn new(devices: Arc<Devices>, modes: Arc<ModeController>) -> Self {
        Self { devices, modes }
    }

    /// Handles one serialized request and returns the serialized response.
    /// Failures are reported inside the response, never to the caller.
    pub fn handle(&self, request: &str) -> String {
        let mut msg_id = UNKNOWN_MESSAGE_ID;
        let response = match self.parse_and_dispatch(request, &mut msg_id) {
            Ok(payload) => Response::ok(msg_id, payload),
            Err(error) => {
                tracing::error!(msg_id, %error, "error while executing request");
                Response::failed(msg_id, &error)
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|error| {
            tracing::error!(%error, "failed to serialize response");
            format!(
                r#"{{"msg_id":{msg_id},"success":false,"message":"serializer error"}}"#
            )
        })
    }

    fn parse_and_dispatch(
        &self,
        request: &str,
        msg_id: &mut MessageId,
    ) -> Result<Map<String, Value>> {
        let request: Value = serde_json::from_str(request)
            .map_err(|e| AtmoError::request(format!("deserializer error: {e}")))?;
        *msg_id = required(&request, "msg_id")?;
        let cmd: String = required(&request, "cmd")?;
        tracing::debug!(msg_id = *msg_id, %cmd, "handling request");

        self.dispatch(&cmd, &request).map_err(|error| match error {
            AtmoError::Request(_) => error,
            other => AtmoError::request(format!("request failed: {other}")),
        })
    }

    fn dispatch(&self, cmd: &str, request: &Value) -> Result<Map<String, Value>> {
        match cmd {
            "get_modes" => Ok(payload(json!({ "modes": self.modes.modes() }))),
            "get_mode" => {
                let mode = self.modes.mode()?;
                Ok(payload(json!({ "mode": mode })))
            }
            "set_mode" => {
                let mode: String = required(request, "mode")?;
                let mode: Mode = mode.parse()?;
                self.modes.set_mode(mode)?;
                Ok(Map::new())
            }
            "get_devices" => Ok(payload(json!({ "devices": self.devices.devices() }))),
            "get_channel" => {
                let device: DeviceIndex = required(request, "device")?;
                let channel: Channel = required(request, "channel")?;
                let color = self.devices.channel(device, channel)?;
                Ok(payload(json!(color)))
            }
            "get_channels" => {
                let device: DeviceIndex = required(request, "device")?;
                let channels = self.devices.channels(device)?;
                Ok(payload(json!({ "channels": channels })))
            }
            "set_channel" => {
                let device: DeviceIndex = required(request, "device")?;
                let channel: Channel = required(request, "channel")?;
                let color = color(request)?;
                self.devices.set_channel(device, channel, color)?;
                Ok(Map::new())
            }
            "set_channels" => {
                let device: DeviceIndex = required(request, "device")?;
                let channels = required_node(request, "channels")?
                    .as_array()
                    .ok_or_else(|| {
                        AtmoError::request("expected property 'channels' to be an array")
                    })?
                    .iter()
                    .map(color)
                    .collect::<Result<Vec<_>>>()?;
                self.devices.set_channels(device, &channels)?;
                Ok(Map::new())
            }
            other => Err(AtmoError::request(format!("illegal command '{other}'"))),
        }
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

fn required_node<'a>(node: &'a Value, property: &str) -> Result<&'a Value> {
    node.get(property)
        .ok_or_else(|| AtmoError::request(format!("missing property '{property}'")))
}

fn required<T: DeserializeOwned>(node: &Value, property: &str) -> Result<T> {
    let value = required_node(node, property)?;
    T::deserialize(value)
        .map_err(|e| AtmoError::request(format!("invalid property '{property}': {e}")))
}

fn color(node: &Value) -> Result<Color> {
    Ok(Color::new(
        required(node, "red")?,
        required(node, "green")?,
        required(node, "blue")?,
    ))
}

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
