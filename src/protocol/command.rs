//! TCP command vocabulary and the request → acknowledgment table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Commands exchanged between clients and the mesh over TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    HeartbeatRequest,
    HeartbeatResponse,
    HelloRequest,
    HelloResponse,
    ClientGoodbyeRequest,
    ClientGoodbyeResponse,
    ServerGoodbyeRequest,
    ServerGoodbyeResponse,
    SubscribeRequest,
    SubscribeResponse,
    UnsubscribeRequest,
    UnsubscribeResponse,
    ListenRequest,
    ListenResponse,
    RequestToServer,
    RequestToClient,
    RequestToClientAck,
    ResponseToServer,
    ResponseToClient,
    ResponseToClientAck,
    AsyncMessageToServer,
    AsyncMessageToServerAck,
    AsyncMessageToClient,
    AsyncMessageToClientAck,
    BroadcastMessageToServer,
    BroadcastMessageToServerAck,
    BroadcastMessageToClient,
    BroadcastMessageToClientAck,
    SysLogToLogserver,
    TraceLogToLogserver,
    RedirectToClient,
}

impl Command {
    /// Reply command for an originating request. Unmapped commands echo themselves.
    pub const fn reply(self) -> Command {
        match self {
            Command::RequestToServer => Command::ResponseToClient,
            Command::AsyncMessageToServer => Command::AsyncMessageToServerAck,
            Command::BroadcastMessageToServer => Command::BroadcastMessageToServerAck,
            other => other,
        }
    }

    /// Commands that carry a message bound for the backend.
    pub const fn is_upstream(self) -> bool {
        matches!(
            self,
            Command::RequestToServer
                | Command::ResponseToServer
                | Command::AsyncMessageToServer
                | Command::BroadcastMessageToServer
        )
    }

    /// Acks the generic send adapter writes on success.
    pub const fn is_send_ack(self) -> bool {
        matches!(
            self,
            Command::AsyncMessageToServerAck | Command::BroadcastMessageToServerAck
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Command::HeartbeatRequest => "HEARTBEAT_REQUEST",
            Command::HeartbeatResponse => "HEARTBEAT_RESPONSE",
            Command::HelloRequest => "HELLO_REQUEST",
            Command::HelloResponse => "HELLO_RESPONSE",
            Command::ClientGoodbyeRequest => "CLIENT_GOODBYE_REQUEST",
            Command::ClientGoodbyeResponse => "CLIENT_GOODBYE_RESPONSE",
            Command::ServerGoodbyeRequest => "SERVER_GOODBYE_REQUEST",
            Command::ServerGoodbyeResponse => "SERVER_GOODBYE_RESPONSE",
            Command::SubscribeRequest => "SUBSCRIBE_REQUEST",
            Command::SubscribeResponse => "SUBSCRIBE_RESPONSE",
            Command::UnsubscribeRequest => "UNSUBSCRIBE_REQUEST",
            Command::UnsubscribeResponse => "UNSUBSCRIBE_RESPONSE",
            Command::ListenRequest => "LISTEN_REQUEST",
            Command::ListenResponse => "LISTEN_RESPONSE",
            Command::RequestToServer => "REQUEST_TO_SERVER",
            Command::RequestToClient => "REQUEST_TO_CLIENT",
            Command::RequestToClientAck => "REQUEST_TO_CLIENT_ACK",
            Command::ResponseToServer => "RESPONSE_TO_SERVER",
            Command::ResponseToClient => "RESPONSE_TO_CLIENT",
            Command::ResponseToClientAck => "RESPONSE_TO_CLIENT_ACK",
            Command::AsyncMessageToServer => "ASYNC_MESSAGE_TO_SERVER",
            Command::AsyncMessageToServerAck => "ASYNC_MESSAGE_TO_SERVER_ACK",
            Command::AsyncMessageToClient => "ASYNC_MESSAGE_TO_CLIENT",
            Command::AsyncMessageToClientAck => "ASYNC_MESSAGE_TO_CLIENT_ACK",
            Command::BroadcastMessageToServer => "BROADCAST_MESSAGE_TO_SERVER",
            Command::BroadcastMessageToServerAck => "BROADCAST_MESSAGE_TO_SERVER_ACK",
            Command::BroadcastMessageToClient => "BROADCAST_MESSAGE_TO_CLIENT",
            Command::BroadcastMessageToClientAck => "BROADCAST_MESSAGE_TO_CLIENT_ACK",
            Command::SysLogToLogserver => "SYS_LOG_TO_LOGSERVER",
            Command::TraceLogToLogserver => "TRACE_LOG_TO_LOGSERVER",
            Command::RedirectToClient => "REDIRECT_TO_CLIENT",
        }
    }

    pub const ALL: [Command; 31] = [
        Command::HeartbeatRequest,
        Command::HeartbeatResponse,
        Command::HelloRequest,
        Command::HelloResponse,
        Command::ClientGoodbyeRequest,
        Command::ClientGoodbyeResponse,
        Command::ServerGoodbyeRequest,
        Command::ServerGoodbyeResponse,
        Command::SubscribeRequest,
        Command::SubscribeResponse,
        Command::UnsubscribeRequest,
        Command::UnsubscribeResponse,
        Command::ListenRequest,
        Command::ListenResponse,
        Command::RequestToServer,
        Command::RequestToClient,
        Command::RequestToClientAck,
        Command::ResponseToServer,
        Command::ResponseToClient,
        Command::ResponseToClientAck,
        Command::AsyncMessageToServer,
        Command::AsyncMessageToServerAck,
        Command::AsyncMessageToClient,
        Command::AsyncMessageToClientAck,
        Command::BroadcastMessageToServer,
        Command::BroadcastMessageToServerAck,
        Command::BroadcastMessageToClient,
        Command::BroadcastMessageToClientAck,
        Command::SysLogToLogserver,
        Command::TraceLogToLogserver,
        Command::RedirectToClient,
    ];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledgment command to emit for `request`.
pub fn reply_command_for(request: Command) -> Command {
    request.reply()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_table_matches_protocol() {
        assert_eq!(
            reply_command_for(Command::RequestToServer),
            Command::ResponseToClient
        );
        assert_eq!(
            reply_command_for(Command::AsyncMessageToServer),
            Command::AsyncMessageToServerAck
        );
        assert_eq!(
            reply_command_for(Command::BroadcastMessageToServer),
            Command::BroadcastMessageToServerAck
        );
    }

    #[test]
    fn unmapped_commands_echo_themselves() {
        let mapped = [
            Command::RequestToServer,
            Command::AsyncMessageToServer,
            Command::BroadcastMessageToServer,
        ];
        for cmd in Command::ALL {
            if mapped.contains(&cmd) {
                continue;
            }
            assert_eq!(reply_command_for(cmd), cmd, "{cmd} should echo");
        }
    }

    #[test]
    fn only_async_and_broadcast_acks_are_send_acks() {
        let acks: Vec<_> = Command::ALL
            .into_iter()
            .filter(|c| c.reply().is_send_ack())
            .collect();
        assert_eq!(
            acks,
            vec![
                Command::AsyncMessageToServer,
                Command::AsyncMessageToServerAck,
                Command::BroadcastMessageToServer,
                Command::BroadcastMessageToServerAck,
            ]
        );
    }

    #[test]
    fn wire_names_round_trip_through_serde() {
        for cmd in Command::ALL {
            let json = serde_json::to_string(&cmd).unwrap();
            assert_eq!(json, format!("\"{}\"", cmd.as_str()));
            let back: Command = serde_json::from_str(&json).unwrap();
            assert_eq!(back, cmd);
        }
    }
}
