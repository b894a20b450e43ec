//! Wire format: a four-character ASCII opcode immediately followed by a
//! compact JSON document, one frame per line.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::FrameError;

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Ping,
    Pong,
    /// Text message.
    Message,
    /// File message.
    File,
    /// Connection acknowledgement carrying the session key.
    Login,
    /// Channel update (invite, join, exit).
    SystemEvent,
    /// Read receipt.
    Read,
    TypingStart,
    TypingEnd,
    /// Anything this client does not model.
    Unknown([u8; 4]),
}

impl Opcode {
    pub fn from_tag(tag: [u8; 4]) -> Self {
        match &tag {
            b"PING" => Opcode::Ping,
            b"PONG" => Opcode::Pong,
            b"MESG" => Opcode::Message,
            b"FILE" => Opcode::File,
            b"LOGI" => Opcode::Login,
            b"SYEV" => Opcode::SystemEvent,
            b"READ" => Opcode::Read,
            b"TPST" => Opcode::TypingStart,
            b"TPEN" => Opcode::TypingEnd,
            _ => Opcode::Unknown(tag),
        }
    }

    pub fn tag(self) -> [u8; 4] {
        match self {
            Opcode::Ping => *b"PING",
            Opcode::Pong => *b"PONG",
            Opcode::Message => *b"MESG",
            Opcode::File => *b"FILE",
            Opcode::Login => *b"LOGI",
            Opcode::SystemEvent => *b"SYEV",
            Opcode::Read => *b"READ",
            Opcode::TypingStart => *b"TPST",
            Opcode::TypingEnd => *b"TPEN",
            Opcode::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tags are ASCII by construction.
        let tag = self.tag();
        f.write_str(std::str::from_utf8(&tag).unwrap_or("????"))
    }
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Value,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: Value) -> Self {
        Self { opcode, payload }
    }

    /// `opcode + compact JSON + "\n"`.
    pub fn encode(&self) -> String {
        format!("{}{}\n", self.opcode, self.payload)
    }

    /// Decode one frame. A single trailing newline is tolerated; an empty
    /// payload decodes as `{}`.
    pub fn decode(raw: &str) -> Result<Self, FrameError> {
        let raw = raw.strip_suffix('\n').unwrap_or(raw);
        let raw = raw.strip_suffix('\r').unwrap_or(raw);

        let bytes = raw.as_bytes();
        if bytes.len() < 4 {
            return Err(FrameError::TooShort(bytes.len()));
        }
        let tag = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if !tag.iter().all(|b| b.is_ascii_graphic()) {
            return Err(FrameError::InvalidOpcode(
                String::from_utf8_lossy(&tag).into_owned(),
            ));
        }

        // The tag is ASCII, so byte 4 is a char boundary.
        let rest = raw[4..].trim();
        let payload = if rest.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(rest)?
        };

        Ok(Self {
            opcode: Opcode::from_tag(tag),
            payload,
        })
    }

    /// Decode every non-empty line of a buffer. Each line succeeds or fails
    /// on its own.
    pub fn decode_many(buf: &str) -> Vec<Result<Self, FrameError>> {
        buf.split('\n')
            .filter(|line| !line.trim().is_empty())
            .map(Self::decode)
            .collect()
    }

    /// String field of the payload.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }
}
