//! Protocol message type numbering (RFC 4250 Section 4.1).
//!
//! The first payload byte of every packet identifies the message. Ranges:
//!
//! - 1-19: transport generic (disconnect, ignore, debug, service)
//! - 20-29: algorithm negotiation
//! - 30-49: key exchange method specific
//! - 50-79: user authentication
//! - 80-89: connection generic
//! - 90-127: channel related

use std::fmt;

/// Protocol message types.
///
/// Value 60 is method-dependent within the authentication protocol: it is
/// `PK_OK` while a public-key request is outstanding and `INFO_REQUEST`
/// while keyboard-interactive is in progress. It is represented here as
/// [`MessageType::UserauthPkOk`]; the authentication layer disambiguates
/// by context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// SSH_MSG_DISCONNECT
    Disconnect = 1,
    /// SSH_MSG_IGNORE
    Ignore = 2,
    /// SSH_MSG_UNIMPLEMENTED
    Unimplemented = 3,
    /// SSH_MSG_DEBUG
    Debug = 4,
    /// SSH_MSG_SERVICE_REQUEST
    ServiceRequest = 5,
    /// SSH_MSG_SERVICE_ACCEPT
    ServiceAccept = 6,
    /// SSH_MSG_KEXINIT
    KexInit = 20,
    /// SSH_MSG_NEWKEYS
    NewKeys = 21,
    /// SSH_MSG_KEXDH_INIT
    KexDhInit = 30,
    /// SSH_MSG_KEXDH_REPLY
    KexDhReply = 31,
    /// SSH_MSG_USERAUTH_REQUEST
    UserauthRequest = 50,
    /// SSH_MSG_USERAUTH_FAILURE
    UserauthFailure = 51,
    /// SSH_MSG_USERAUTH_SUCCESS
    UserauthSuccess = 52,
    /// SSH_MSG_USERAUTH_BANNER
    UserauthBanner = 53,
    /// SSH_MSG_USERAUTH_PK_OK / SSH_MSG_USERAUTH_INFO_REQUEST
    UserauthPkOk = 60,
    /// SSH_MSG_USERAUTH_INFO_RESPONSE
    UserauthInfoResponse = 61,
    /// SSH_MSG_GLOBAL_REQUEST
    GlobalRequest = 80,
    /// SSH_MSG_REQUEST_SUCCESS
    RequestSuccess = 81,
    /// SSH_MSG_REQUEST_FAILURE
    RequestFailure = 82,
    /// SSH_MSG_CHANNEL_OPEN
    ChannelOpen = 90,
    /// SSH_MSG_CHANNEL_OPEN_CONFIRMATION
    ChannelOpenConfirmation = 91,
    /// SSH_MSG_CHANNEL_OPEN_FAILURE
    ChannelOpenFailure = 92,
    /// SSH_MSG_CHANNEL_WINDOW_ADJUST
    ChannelWindowAdjust = 93,
    /// SSH_MSG_CHANNEL_DATA
    ChannelData = 94,
    /// SSH_MSG_CHANNEL_EXTENDED_DATA
    ChannelExtendedData = 95,
    /// SSH_MSG_CHANNEL_EOF
    ChannelEof = 96,
    /// SSH_MSG_CHANNEL_CLOSE
    ChannelClose = 97,
    /// SSH_MSG_CHANNEL_REQUEST
    ChannelRequest = 98,
    /// SSH_MSG_CHANNEL_SUCCESS
    ChannelSuccess = 99,
    /// SSH_MSG_CHANNEL_FAILURE
    ChannelFailure = 100,
}

impl MessageType {
    /// Converts a raw message number to a `MessageType`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Disconnect),
            2 => Some(Self::Ignore),
            3 => Some(Self::Unimplemented),
            4 => Some(Self::Debug),
            5 => Some(Self::ServiceRequest),
            6 => Some(Self::ServiceAccept),
            20 => Some(Self::KexInit),
            21 => Some(Self::NewKeys),
            30 => Some(Self::KexDhInit),
            31 => Some(Self::KexDhReply),
            50 => Some(Self::UserauthRequest),
            51 => Some(Self::UserauthFailure),
            52 => Some(Self::UserauthSuccess),
            53 => Some(Self::UserauthBanner),
            60 => Some(Self::UserauthPkOk),
            61 => Some(Self::UserauthInfoResponse),
            80 => Some(Self::GlobalRequest),
            81 => Some(Self::RequestSuccess),
            82 => Some(Self::RequestFailure),
            90 => Some(Self::ChannelOpen),
            91 => Some(Self::ChannelOpenConfirmation),
            92 => Some(Self::ChannelOpenFailure),
            93 => Some(Self::ChannelWindowAdjust),
            94 => Some(Self::ChannelData),
            95 => Some(Self::ChannelExtendedData),
            96 => Some(Self::ChannelEof),
            97 => Some(Self::ChannelClose),
            98 => Some(Self::ChannelRequest),
            99 => Some(Self::ChannelSuccess),
            100 => Some(Self::ChannelFailure),
            _ => None,
        }
    }

    /// Returns the protocol name of this message type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnect => "SSH_MSG_DISCONNECT",
            Self::Ignore => "SSH_MSG_IGNORE",
            Self::Unimplemented => "SSH_MSG_UNIMPLEMENTED",
            Self::Debug => "SSH_MSG_DEBUG",
            Self::ServiceRequest => "SSH_MSG_SERVICE_REQUEST",
            Self::ServiceAccept => "SSH_MSG_SERVICE_ACCEPT",
            Self::KexInit => "SSH_MSG_KEXINIT",
            Self::NewKeys => "SSH_MSG_NEWKEYS",
            Self::KexDhInit => "SSH_MSG_KEXDH_INIT",
            Self::KexDhReply => "SSH_MSG_KEXDH_REPLY",
            Self::UserauthRequest => "SSH_MSG_USERAUTH_REQUEST",
            Self::UserauthFailure => "SSH_MSG_USERAUTH_FAILURE",
            Self::UserauthSuccess => "SSH_MSG_USERAUTH_SUCCESS",
            Self::UserauthBanner => "SSH_MSG_USERAUTH_BANNER",
            Self::UserauthPkOk => "SSH_MSG_USERAUTH_PK_OK",
            Self::UserauthInfoResponse => "SSH_MSG_USERAUTH_INFO_RESPONSE",
            Self::GlobalRequest => "SSH_MSG_GLOBAL_REQUEST",
            Self::RequestSuccess => "SSH_MSG_REQUEST_SUCCESS",
            Self::RequestFailure => "SSH_MSG_REQUEST_FAILURE",
            Self::ChannelOpen => "SSH_MSG_CHANNEL_OPEN",
            Self::ChannelOpenConfirmation => "SSH_MSG_CHANNEL_OPEN_CONFIRMATION",
            Self::ChannelOpenFailure => "SSH_MSG_CHANNEL_OPEN_FAILURE",
            Self::ChannelWindowAdjust => "SSH_MSG_CHANNEL_WINDOW_ADJUST",
            Self::ChannelData => "SSH_MSG_CHANNEL_DATA",
            Self::ChannelExtendedData => "SSH_MSG_CHANNEL_EXTENDED_DATA",
            Self::ChannelEof => "SSH_MSG_CHANNEL_EOF",
            Self::ChannelClose => "SSH_MSG_CHANNEL_CLOSE",
            Self::ChannelRequest => "SSH_MSG_CHANNEL_REQUEST",
            Self::ChannelSuccess => "SSH_MSG_CHANNEL_SUCCESS",
            Self::ChannelFailure => "SSH_MSG_CHANNEL_FAILURE",
        }
    }

    /// Returns `true` for messages numbered in the channel range (90-100).
    pub fn is_channel_message(&self) -> bool {
        (*self as u8) >= 90
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_known_values() {
        assert_eq!(MessageType::from_u8(20), Some(MessageType::KexInit));
        assert_eq!(MessageType::from_u8(21), Some(MessageType::NewKeys));
        assert_eq!(MessageType::from_u8(50), Some(MessageType::UserauthRequest));
        assert_eq!(MessageType::from_u8(94), Some(MessageType::ChannelData));
    }

    #[test]
    fn test_from_u8_unknown_values() {
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(255), None);
        assert_eq!(MessageType::from_u8(42), None);
    }

    #[test]
    fn test_round_trip() {
        for value in 0..=255u8 {
            if let Some(msg) = MessageType::from_u8(value) {
                assert_eq!(msg as u8, value);
            }
        }
    }

    #[test]
    fn test_channel_range() {
        assert!(MessageType::ChannelOpen.is_channel_message());
        assert!(MessageType::ChannelFailure.is_channel_message());
        assert!(!MessageType::UserauthRequest.is_channel_message());
        assert!(!MessageType::KexInit.is_channel_message());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            MessageType::Disconnect.to_string(),
            "SSH_MSG_DISCONNECT (1)"
        );
    }
}
