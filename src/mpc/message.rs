use std::fmt;

use thiserror::Error;

use crate::{
    mpc::{share::Share, ProtocolError},
    net::{Network, Packet, PeerId},
};

/// Token a party sends to signal it is ready for the next phase.
pub const CONTINUE_TOKEN: &str = "continue";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("malformed share message: {0:?}")]
    MalformedShareMessage(String),

    #[error("malformed triple batch: {0}")]
    MalformedTripleBatch(String),

    #[error("expected a {expected} message, got {got:?}")]
    UnexpectedMessage { expected: &'static str, got: String },

    #[error("message is not valid UTF-8")]
    NotUtf8,
}

/// Messages exchanged over the share lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Share(Share),
    Continue,
}

impl Message {
    pub fn to_packet(&self) -> Packet {
        Packet::from_text(&self.to_string())
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, WireError> {
        let text = packet.as_text().map_err(|_| WireError::NotUtf8)?;
        if text == CONTINUE_TOKEN {
            Ok(Self::Continue)
        } else {
            Ok(Self::Share(text.parse()?))
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Share(share) => write!(f, "{share}"),
            Self::Continue => f.write_str(CONTINUE_TOKEN),
        }
    }
}

/// Receives the next message sent by `from` on the share lane.
pub fn recv_message(network: &mut Network, from: PeerId) -> Result<Message, ProtocolError> {
    let packet = network.recv_from(from)?;
    Message::from_packet(&packet).map_err(|err| {
        log::error!("invalid message from party {from}: {err}");
        err.into()
    })
}

/// Receives the next message sent by `from`, which must be a share.
pub fn recv_share(network: &mut Network, from: PeerId) -> Result<Share, ProtocolError> {
    match recv_message(network, from)? {
        Message::Share(share) => Ok(share),
        other => Err(WireError::UnexpectedMessage {
            expected: "share",
            got: other.to_string(),
        }
        .into()),
    }
}

/// Receives the next message sent by `from`, which must be a continue token.
pub fn recv_continue(network: &mut Network, from: PeerId) -> Result<(), ProtocolError> {
    match recv_message(network, from)? {
        Message::Continue => Ok(()),
        other => Err(WireError::UnexpectedMessage {
            expected: "continue",
            got: other.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{recv_continue, recv_share, Message, WireError};
    use crate::{
        mpc::{share::Share, ProtocolError},
        net::{Network, Packet},
    };

    #[test]
    fn continue_token_and_shares_are_distinguished() {
        let share = Share::new(99.into(), 4, 4);
        assert_eq!(
            Message::from_packet(&Message::Share(share.clone()).to_packet()).unwrap(),
            Message::Share(share)
        );
        assert_eq!(
            Message::from_packet(&Packet::from_text("continue")).unwrap(),
            Message::Continue
        );
        assert_eq!(
            Message::from_packet(&Packet::new(vec![0xff, 0xfe])),
            Err(WireError::NotUtf8)
        );
    }

    #[test]
    fn unexpected_message_kind_is_reported() {
        let mut networks = Network::in_memory(2, Duration::from_secs(1));
        networks[1]
            .send_to(&Message::Continue.to_packet(), 2)
            .unwrap();
        networks[1]
            .send_to(&Packet::from_text("12;1"), 2)
            .unwrap();
        networks[1]
            .send_to(&Message::Share(Share::new(1.into(), 1, 1)).to_packet(), 2)
            .unwrap();

        assert!(matches!(
            recv_share(&mut networks[2], 1),
            Err(ProtocolError::Wire(WireError::UnexpectedMessage { .. }))
        ));
        assert!(matches!(
            recv_share(&mut networks[2], 1),
            Err(ProtocolError::Wire(WireError::MalformedShareMessage(_)))
        ));
        assert!(matches!(
            recv_continue(&mut networks[2], 1),
            Err(ProtocolError::Wire(WireError::UnexpectedMessage { .. }))
        ));
    }
}
