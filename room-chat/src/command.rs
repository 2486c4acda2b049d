use crate::session::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SetNick,
    Join,
    Message,
    ListRooms,
    Quit,
    /// Connection went away; emitted by the connection layer, never parsed.
    Disconnect,
}

impl CommandKind {
    /// Maps a line's first token to a command kind.
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "/nick" => Some(Self::SetNick),
            "/join" => Some(Self::Join),
            "/msg" => Some(Self::Message),
            "/rooms" => Some(Self::ListRooms),
            "/quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// One client-requested action, immutable once built.
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub client: SessionHandle,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(kind: CommandKind, client: SessionHandle, args: Vec<String>) -> Self {
        Self { kind, client, args }
    }

    pub fn disconnect(client: SessionHandle) -> Self {
        Self::new(CommandKind::Disconnect, client, Vec::new())
    }
}

/// Result of tokenizing one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Blank,
    Unknown(String),
    Command {
        kind: CommandKind,
        args: Vec<String>,
    },
}

pub fn parse_line(line: &str) -> ParsedLine {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return ParsedLine::Blank;
    };

    match CommandKind::from_verb(verb) {
        Some(kind) => ParsedLine::Command {
            kind,
            args: tokens.map(str::to_string).collect(),
        },
        None => ParsedLine::Unknown(verb.to_string()),
    }
}
