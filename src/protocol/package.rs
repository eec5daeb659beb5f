use super::command::Command;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operation status carried in acknowledgment headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpStatus {
    Success,
    Fail,
    AclFail,
    TpsOverload,
}

impl OpStatus {
    pub const fn code(self) -> i32 {
        match self {
            OpStatus::Success => 0,
            OpStatus::Fail => 1,
            OpStatus::AclFail => 2,
            OpStatus::TpsOverload => 3,
        }
    }

    pub const fn desc(self) -> &'static str {
        match self {
            OpStatus::Success => "success",
            OpStatus::Fail => "fail",
            OpStatus::AclFail => "aclFail",
            OpStatus::TpsOverload => "tpsOverload",
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(OpStatus::Success),
            1 => Some(OpStatus::Fail),
            2 => Some(OpStatus::AclFail),
            3 => Some(OpStatus::TpsOverload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub command: Command,
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub desc: String,
    /// Client-assigned correlation id.
    #[serde(default)]
    pub seq: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Header {
    /// Header for a client-originated request.
    pub fn request(command: Command, seq: impl Into<String>) -> Self {
        Self {
            command,
            code: 0,
            desc: String::new(),
            seq: seq.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Acknowledgment header using the status' canonical description.
    pub fn ack(command: Command, status: OpStatus, seq: impl Into<String>) -> Self {
        Self::ack_with_desc(command, status, status.desc(), seq)
    }

    pub fn ack_with_desc(
        command: Command,
        status: OpStatus,
        desc: impl Into<String>,
        seq: impl Into<String>,
    ) -> Self {
        Self {
            command,
            code: status.code(),
            desc: desc.into(),
            seq: seq.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> Option<OpStatus> {
        OpStatus::from_code(self.code)
    }
}

/// Public (client-facing) message representation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireMessage {
    pub topic: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl WireMessage {
    pub fn new(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            properties: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Identity a client presents in its HELLO request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserAgent {
    #[serde(default)]
    pub subsystem: String,
    pub group: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub purpose: String,
}

impl UserAgent {
    pub fn new(subsystem: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            group: group.into(),
            purpose: "pub".into(),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for UserAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}:{}|{}",
            self.subsystem, self.group, self.pid, self.ip, self.port, self.purpose
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PackageBody {
    Message(WireMessage),
    UserAgent(UserAgent),
    Text(String),
}

/// Header + body unit written to and read from a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub header: Header,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<PackageBody>,
}

impl Package {
    pub fn new(header: Header) -> Self {
        Self { header, body: None }
    }

    pub fn with_message(header: Header, message: WireMessage) -> Self {
        Self {
            header,
            body: Some(PackageBody::Message(message)),
        }
    }

    pub fn message(&self) -> Option<&WireMessage> {
        match &self.body {
            Some(PackageBody::Message(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn user_agent(&self) -> Option<&UserAgent> {
        match &self.body {
            Some(PackageBody::UserAgent(agent)) => Some(agent),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_header_carries_status_code_and_seq() {
        let header = Header::ack(Command::AsyncMessageToServerAck, OpStatus::Success, "42");
        assert_eq!(header.code, 0);
        assert_eq!(header.desc, "success");
        assert_eq!(header.seq, "42");
        assert_eq!(header.status(), Some(OpStatus::Success));

        let failed = Header::ack_with_desc(
            Command::BroadcastMessageToServerAck,
            OpStatus::Fail,
            "broker down",
            "7",
        );
        assert_eq!(failed.status(), Some(OpStatus::Fail));
        assert_eq!(failed.desc, "broker down");
    }

    #[test]
    fn package_body_is_tagged() {
        let pkg = Package::with_message(
            Header::request(Command::AsyncMessageToServer, "1"),
            WireMessage::new("orders", "hello"),
        );
        let json = serde_json::to_value(&pkg).unwrap();
        assert_eq!(json["body"]["type"], "message");
        assert_eq!(json["header"]["command"], "ASYNC_MESSAGE_TO_SERVER");
        let back: Package = serde_json::from_value(json).unwrap();
        assert_eq!(back.message().unwrap().topic, "orders");
        assert!(back.user_agent().is_none());
    }
}
