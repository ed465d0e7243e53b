use serde::{Deserialize, Serialize};

/// Environment variable carrying the supervisor's readiness listener address.
pub const READY_ADDR_ENV: &str = "MEDSRV_READY_ADDR";

/// Message sent once by the gateway to its supervisor over the readiness channel.
///
/// Encoded as a single JSON line, e.g. `{"type":"GATEWAY_READY","port":5123}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayMessage {
    #[serde(rename = "GATEWAY_READY")]
    GatewayReady { port: u16 },
}

impl GatewayMessage {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_message_wire_shape() {
        let line = GatewayMessage::GatewayReady { port: 3001 }.to_line().unwrap();
        assert_eq!(line, "{\"type\":\"GATEWAY_READY\",\"port\":3001}\n");
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let parsed = serde_json::from_str::<GatewayMessage>(r#"{"type":"HELLO","port":1}"#);
        assert!(parsed.is_err());
    }
}
