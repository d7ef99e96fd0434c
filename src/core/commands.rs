// src/core/commands.rs

//! Parsing of the text command surface.
//!
//! A command is a single line; the prefix before `:` selects the command and
//! the text after it is the argument. Parsing never fails: anything outside
//! the table becomes `Unknown` and is answered with the transport-flavored
//! fallback error.

/// Which transport a command arrived on. Only used to personalize the
/// fallback error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl TransportKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "TCP",
            TransportKind::Udp => "UDP",
        }
    }
}

/// One parsed text command.
#[derive(Debug, Clone, PartialEq)]
pub enum TextCommand {
    ConnPing,
    UdpPing,
    RegisterFunc(String),
    LuaHello,
    LuaHelloAsync,
    HotReload,
    SaveState(String),
    LoadState,
    DeleteState,
    DbHealth,
    RouteThread(String),
    FlowRoom,
    Stability,
    Metrics,
    Stop,
    Unknown(String),
}

impl TextCommand {
    /// Parses one stripped command line.
    pub fn parse(input: &str) -> Self {
        match input {
            "M1_CONN_PING" => return TextCommand::ConnPing,
            "M1_UDP_PING" => return TextCommand::UdpPing,
            "M3_LUA_HELLO" => return TextCommand::LuaHello,
            "M3_LUA_HELLO_ASYNC" => return TextCommand::LuaHelloAsync,
            "M3_HOT_RELOAD" => return TextCommand::HotReload,
            "M4_LOAD_STATE" => return TextCommand::LoadState,
            "M4_DELETE_STATE" => return TextCommand::DeleteState,
            "M4_DB_HEALTH" => return TextCommand::DbHealth,
            "M5_FLOW_ROOM" => return TextCommand::FlowRoom,
            "M6_STABILITY" => return TextCommand::Stability,
            "__METRICS__" => return TextCommand::Metrics,
            "__STOP__" => return TextCommand::Stop,
            _ => {}
        }

        if let Some(name) = input.strip_prefix("M3_REGISTER_FUNC:") {
            return TextCommand::RegisterFunc(name.to_string());
        }
        if let Some(value) = input.strip_prefix("M4_SAVE_STATE:") {
            return TextCommand::SaveState(value.to_string());
        }
        if let Some(room_key) = input.strip_prefix("M4_ROUTE_THREAD:") {
            return TextCommand::RouteThread(room_key.to_string());
        }

        TextCommand::Unknown(input.to_string())
    }

    /// The command's wire name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            TextCommand::ConnPing => "M1_CONN_PING",
            TextCommand::UdpPing => "M1_UDP_PING",
            TextCommand::RegisterFunc(_) => "M3_REGISTER_FUNC",
            TextCommand::LuaHello => "M3_LUA_HELLO",
            TextCommand::LuaHelloAsync => "M3_LUA_HELLO_ASYNC",
            TextCommand::HotReload => "M3_HOT_RELOAD",
            TextCommand::SaveState(_) => "M4_SAVE_STATE",
            TextCommand::LoadState => "M4_LOAD_STATE",
            TextCommand::DeleteState => "M4_DELETE_STATE",
            TextCommand::DbHealth => "M4_DB_HEALTH",
            TextCommand::RouteThread(_) => "M4_ROUTE_THREAD",
            TextCommand::FlowRoom => "M5_FLOW_ROOM",
            TextCommand::Stability => "M6_STABILITY",
            TextCommand::Metrics => "__METRICS__",
            TextCommand::Stop => "__STOP__",
            TextCommand::Unknown(_) => "UNKNOWN",
        }
    }
}
