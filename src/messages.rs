//! # Wire Protocol Frames
//!
//! Every exchange between nodes is a single line of UTF-8 text. The first
//! characters of the line select the frame kind:
//!
//! | Frame | Wire form | Purpose |
//! |-------|-----------|---------|
//! | Join | `JOIN:<name>:<address>` | A node announcing itself |
//! | Peers | `PEERS:<addr>,<addr>,...` | A batch of known peer addresses |
//! | Chat | `<id>\|<label>: <text>` | A chat message (anything else) |
//!
//! ## Message IDs
//!
//! Chat messages carry a UUID v4 string generated once by the originating
//! node. Forwarding nodes never touch it, so every receiver deduplicates on
//! the same value.
//!
//! ## Round-trip
//!
//! A parsed [`ChatMessage`] keeps the text after the `|` verbatim, so
//! `Frame::parse(line)?.to_wire() == line` for every chat line.

use std::fmt;

/// Prefix of a JOIN frame.
pub const JOIN_PREFIX: &str = "JOIN:";

/// Prefix of a PEERS frame.
pub const PEERS_PREFIX: &str = "PEERS:";

/// Separates the message id from the rest of a chat frame.
pub const ID_SEPARATOR: char = '|';

/// Separates the origin label from the text of a chat frame.
pub const LABEL_SEPARATOR: &str = ": ";

/// Separates addresses inside a PEERS frame.
pub const PEER_LIST_SEPARATOR: &str = ",";

/// Maximum length of a single frame line (64 KiB).
/// SECURITY: Bounds the per-connection read buffer.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Generate a fresh message id.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Check `host:port` syntax: `^[A-Za-z0-9.]+:[0-9]+$`.
///
/// This is deliberately strict: IPv6 literals and host names with dashes are
/// rejected, matching the addresses nodes advertise for themselves.
pub fn is_valid_address(address: &str) -> bool {
    let Some((host, port)) = address.split_once(':') else {
        return false;
    };
    !host.is_empty()
        && !port.is_empty()
        && host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
        && port.chars().all(|c| c.is_ascii_digit())
}

/// Why a line could not be parsed as a frame.
///
/// Parse errors are never reported to peers or to the event sink; the
/// handler drops the frame and logs at debug level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// JOIN frame without exactly a name and an address.
    MalformedJoin,
    /// Chat frame without the `|` separating the id from the content.
    MissingIdSeparator,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedJoin => write!(f, "JOIN frame must be JOIN:<name>:<address>"),
            Self::MissingIdSeparator => write!(f, "chat frame is missing the '|' id separator"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A chat message as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    id: String,
    /// Everything after the id separator, normally `<label>: <text>`.
    content: String,
}

impl ChatMessage {
    /// Build a new message with a fresh id.
    ///
    /// Line breaks in `label` or `text` are replaced with spaces so the
    /// frame stays on a single line.
    pub fn new(label: &str, text: &str) -> Self {
        Self::with_id(new_message_id(), label, text)
    }

    pub fn with_id(id: String, label: &str, text: &str) -> Self {
        let content = format!(
            "{}{}{}",
            single_line(label),
            LABEL_SEPARATOR,
            single_line(text)
        );
        Self { id, content }
    }

    /// Parse `<id>|<content>`, splitting on the first `|`.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (id, content) = line
            .split_once(ID_SEPARATOR)
            .ok_or(ParseError::MissingIdSeparator)?;
        Ok(Self {
            id: id.to_string(),
            content: content.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Text shown to the user: `<label>: <text>`.
    pub fn display_text(&self) -> &str {
        &self.content
    }

    /// The originator's label, if the content has one.
    pub fn origin_label(&self) -> Option<&str> {
        self.content
            .split_once(LABEL_SEPARATOR)
            .map(|(label, _)| label)
    }

    /// The message text without the label.
    pub fn body(&self) -> &str {
        self.content
            .split_once(LABEL_SEPARATOR)
            .map(|(_, body)| body)
            .unwrap_or(&self.content)
    }

    pub fn to_wire(&self) -> String {
        format!("{}{}{}", self.id, ID_SEPARATOR, self.content)
    }
}

/// One protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Join { name: String, address: String },
    Peers(Vec<String>),
    Chat(ChatMessage),
}

impl Frame {
    pub fn join(name: &str, address: &str) -> Self {
        Frame::Join {
            name: name.to_string(),
            address: address.to_string(),
        }
    }

    /// Decode a single line. The discriminator is the textual prefix;
    /// anything that is neither JOIN nor PEERS is treated as chat.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        if line.starts_with(JOIN_PREFIX) {
            // JOIN:<name>:<address>, address may itself contain ':'
            let mut parts = line.splitn(3, ':');
            let _prefix = parts.next();
            let (Some(name), Some(address)) = (parts.next(), parts.next()) else {
                return Err(ParseError::MalformedJoin);
            };
            if name.is_empty() || address.is_empty() {
                return Err(ParseError::MalformedJoin);
            }
            return Ok(Frame::join(name, address));
        }

        if let Some(list) = line.strip_prefix(PEERS_PREFIX) {
            let peers = list
                .split(PEER_LIST_SEPARATOR)
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(Frame::Peers(peers));
        }

        ChatMessage::parse(line).map(Frame::Chat)
    }

    pub fn to_wire(&self) -> String {
        match self {
            Frame::Join { name, address } => format!("{JOIN_PREFIX}{name}:{address}"),
            Frame::Peers(peers) => {
                format!("{PEERS_PREFIX}{}", peers.join(PEER_LIST_SEPARATOR))
            }
            Frame::Chat(message) => message.to_wire(),
        }
    }

    /// Short name of the frame kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Join { .. } => "join",
            Frame::Peers(_) => "peers",
            Frame::Chat(_) => "chat",
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}
