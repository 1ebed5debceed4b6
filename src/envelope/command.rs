use serde_json::json;

use super::WireEnvelope;

/// Outbound control commands understood by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
    Ping,
}

impl Command {
    pub fn subscribe(channels: Vec<String>) -> Self {
        Self::Subscribe { channels }
    }

    pub fn unsubscribe(channels: Vec<String>) -> Self {
        Self::Unsubscribe { channels }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Subscribe { .. } => "subscribe",
            Command::Unsubscribe { .. } => "unsubscribe",
            Command::Ping => "ping",
        }
    }

    pub fn into_envelope(self) -> WireEnvelope {
        let kind = self.kind();
        let data = match self {
            Command::Subscribe { channels } | Command::Unsubscribe { channels } => {
                json!({ "channels": channels })
            }
            Command::Ping => serde_json::Value::Null,
        };
        WireEnvelope::new(kind, None, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_command_wire_format() {
        let envelope =
            Command::subscribe(vec!["demo".to_string(), "executions".to_string()]).into_envelope();
        let json: serde_json::Value = serde_json::from_str(&envelope.to_frame().unwrap()).unwrap();

        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["channel"], serde_json::Value::Null);
        assert_eq!(json["data"]["channels"][1], "executions");
        assert!(!json["id"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_ping_has_no_data() {
        let envelope = Command::Ping.into_envelope();
        assert_eq!(envelope.kind, "ping");
        assert!(envelope.data.is_null());
    }
}
