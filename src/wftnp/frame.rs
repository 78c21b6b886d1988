//! The 6-byte WFTNP frame header and its wire codec.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ProtocolErrorKind, TransportError};

pub const HEADER_LEN: usize = 6;
pub const WFTNP_VERSION: u8 = 1;

/// One of the six WFTNP message types. Type 6 is the only unsolicited one;
/// the rest are requests that expect a correlated response of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    DiscoverServices = 1,
    DiscoverCharacteristics = 2,
    ReadCharacteristic = 3,
    WriteCharacteristic = 4,
    EnableNotifications = 5,
    Notification = 6,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::DiscoverServices),
            2 => Ok(Self::DiscoverCharacteristics),
            3 => Ok(Self::ReadCharacteristic),
            4 => Ok(Self::WriteCharacteristic),
            5 => Ok(Self::EnableNotifications),
            6 => Ok(Self::Notification),
            _ => Err(ProtocolErrorKind::Malformed),
        }
    }
}

/// A fully decoded WFTNP frame: header fields plus the trailing payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: u8,
    pub sequence: u8,
    pub response_code: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn request(message_type: MessageType, sequence: u8, payload: Vec<u8>) -> Self {
        Self {
            message_type: message_type.as_u8(),
            sequence,
            response_code: 0,
            payload,
        }
    }

    /// Packs the frame into its wire representation: header then payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(WFTNP_VERSION);
        buf.push(self.message_type);
        buf.push(self.sequence);
        buf.push(self.response_code);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Writes the encoded frame to `writer` in one call.
    pub async fn write_to<W: AsyncWriteExt + Unpin>(
        &self,
        writer: &mut W,
    ) -> Result<(), TransportError> {
        writer.write_all(&self.encode()).await?;
        Ok(())
    }

    /// Reads exactly one frame from `reader`: the 6-byte header, then
    /// `data_len` payload bytes. Any truncation is a `ShortRead` protocol
    /// error; an unsupported version is fatal and reported before the
    /// payload is even read.
    pub async fn read_from<R: AsyncReadExt + Unpin>(
        reader: &mut R,
    ) -> Result<Self, TransportError> {
        let mut header = [0u8; HEADER_LEN];
        read_exact_or_short(reader, &mut header).await?;

        let version = header[0];
        if version != WFTNP_VERSION {
            return Err(TransportError::Protocol(ProtocolErrorKind::UnsupportedVersion));
        }
        let message_type = header[1];
        let sequence = header[2];
        let response_code = header[3];
        let data_len = u16::from_be_bytes([header[4], header[5]]) as usize;

        let mut payload = vec![0u8; data_len];
        if data_len > 0 {
            read_exact_or_short(reader, &mut payload).await?;
        }

        Ok(Self {
            message_type,
            sequence,
            response_code,
            payload,
        })
    }
}

async fn read_exact_or_short<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), TransportError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(TransportError::Protocol(ProtocolErrorKind::ShortRead))
        }
        Err(e) => Err(TransportError::Io(e)),
    }
}
