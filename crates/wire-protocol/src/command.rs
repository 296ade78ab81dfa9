//! Commands and Replies

use event_record::Flags;
use zeromq::ZmqMessage;

/// Positive reply, NUL terminated as C clients expect
pub const ACK: &[u8] = b"ACK\0";

/// Negative reply to an unknown command
pub const NAK: &[u8] = b"NAK\0";

/// Longest command name the server looks at
const MAX_COMMAND_LEN: usize = 9;

/// Client commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Liveness check
    Check,
    /// Request acquisition
    Start,
    /// Stop acquisition
    Stop,
    /// Read the staging flags
    Stat,
    /// Drain the staged events
    Send,
}

impl Command {
    /// Every command
    pub const ALL: [Command; 5] = [
        Command::Check,
        Command::Start,
        Command::Stop,
        Command::Stat,
        Command::Send,
    ];

    /// ASCII command name
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Check => "check",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Stat => "stat",
            Command::Send => "send",
        }
    }

    /// Parse a request payload.
    ///
    /// The payload is read like a C string: it ends at the first NUL, and
    /// only the first nine bytes count, so longer requests never match.
    pub fn parse(payload: &[u8]) -> Option<Command> {
        let head = &payload[..payload.len().min(MAX_COMMAND_LEN)];
        let end = head.iter().position(|&b| b == 0).unwrap_or(head.len());
        let name = &head[..end];
        Command::ALL
            .into_iter()
            .find(|cmd| cmd.as_str().as_bytes() == name)
    }

    /// Request payload, NUL terminated
    pub fn to_request(&self) -> Vec<u8> {
        let mut payload = self.as_str().as_bytes().to_vec();
        payload.push(0);
        payload
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ack,
    Nak,
    /// Raw flags word
    Flags(Flags),
    /// Encoded records, a multiple of 16 bytes (possibly empty)
    Events(Vec<u8>),
}

impl Response {
    /// Reply payload
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Response::Ack => ACK.to_vec(),
            Response::Nak => NAK.to_vec(),
            Response::Flags(flags) => flags.to_le_bytes().to_vec(),
            Response::Events(bytes) => bytes,
        }
    }
}

/// True if `reply` is `ACK`, with or without the trailing NUL
pub(crate) fn is_ack(reply: &[u8]) -> bool {
    reply == ACK || reply == &ACK[..3]
}

/// First frame of a message; further frames are ignored
pub(crate) fn first_frame(message: ZmqMessage) -> Vec<u8> {
    message
        .into_vec()
        .into_iter()
        .next()
        .map(|frame| frame.to_vec())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_known_commands() {
        for cmd in Command::ALL {
            assert_eq!(Command::parse(cmd.as_str().as_bytes()), Some(cmd));
            assert_eq!(Command::parse(&cmd.to_request()), Some(cmd));
        }
    }

    #[test]
    fn test_parse_c_string_semantics() {
        assert_eq!(Command::parse(b"send\0trailing"), Some(Command::Send));
        assert_eq!(Command::parse(b"stop\0\0\0\0\0\0\0\0"), Some(Command::Stop));
        assert_eq!(Command::parse(b"garbage"), None);
        assert_eq!(Command::parse(b""), None);
        assert_eq!(Command::parse(b"START"), None);
        assert_eq!(Command::parse(b"check "), None);
    }

    #[test]
    fn test_replies() {
        assert_eq!(Response::Ack.into_bytes(), b"ACK\0");
        assert_eq!(Response::Nak.into_bytes(), b"NAK\0");
        assert_eq!(Response::Flags(Flags::RUN | Flags::PAUSE).into_bytes(), vec![3, 0, 0, 0]);
        assert!(Response::Events(Vec::new()).into_bytes().is_empty());
        assert!(is_ack(b"ACK"));
        assert!(!is_ack(b"NAK\0"));
    }

    #[test]
    fn test_first_frame() {
        assert_eq!(first_frame(ZmqMessage::from(b"stat\0".to_vec())), b"stat\0");
        assert!(first_frame(ZmqMessage::from(Vec::<u8>::new())).is_empty());
    }

    proptest! {
        #[test]
        fn prop_long_requests_never_match(tail in "[a-z]{5,20}") {
            let request = format!("send{}", tail);
            prop_assert_eq!(Command::parse(request.as_bytes()), None);
        }
    }
}
