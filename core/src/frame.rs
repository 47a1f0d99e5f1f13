//! API frame codec for XBee-style cellular modems.
//!
//! # Design
//! Every frame on the serial line is `0x7E`, a big-endian 16-bit length, the
//! frame data and a one-byte checksum (`0xFF` minus the low byte of the sum of
//! the frame data). Only the frame types the HTTP client needs are decoded
//! into variants; everything else is kept as `Frame::Other` so the reader can
//! skip it without losing sync.
//!
//! Frame data is capped at `MAX_FRAME_DATA`. A delimiter whose declared length
//! exceeds the cap, or whose checksum fails, is treated as a stray `0x7E`: only
//! that byte is dropped and the decoder rescans from the next one.

use std::net::Ipv4Addr;

use tracing::debug;

pub const START_DELIMITER: u8 = 0x7E;

/// Largest frame data accepted in either direction.
pub const MAX_FRAME_DATA: usize = 2048;

const AT_COMMAND: u8 = 0x08;
const TX_IPV4: u8 = 0x20;
const AT_RESPONSE: u8 = 0x88;
const TX_STATUS: u8 = 0x89;
const RX_IPV4: u8 = 0xB0;

/// IP protocol selector carried in transmit and receive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Udp,
    Tcp,
    TcpSsl,
    Unknown(u8),
}

impl IpProtocol {
    pub fn to_byte(self) -> u8 {
        match self {
            IpProtocol::Udp => 0,
            IpProtocol::Tcp => 1,
            IpProtocol::TcpSsl => 4,
            IpProtocol::Unknown(b) => b,
        }
    }
}

impl From<u8> for IpProtocol {
    fn from(b: u8) -> Self {
        match b {
            0 => IpProtocol::Udp,
            1 => IpProtocol::Tcp,
            4 => IpProtocol::TcpSsl,
            other => IpProtocol::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    AtCommand {
        frame_id: u8,
        command: [u8; 2],
        parameter: Vec<u8>,
    },
    AtResponse {
        frame_id: u8,
        command: [u8; 2],
        status: u8,
        data: Vec<u8>,
    },
    TxIpv4 {
        frame_id: u8,
        dest: Ipv4Addr,
        dest_port: u16,
        src_port: u16,
        protocol: IpProtocol,
        options: u8,
        payload: Vec<u8>,
    },
    TxStatus {
        frame_id: u8,
        status: u8,
    },
    RxIpv4 {
        source: Ipv4Addr,
        dest_port: u16,
        src_port: u16,
        protocol: IpProtocol,
        payload: Vec<u8>,
    },
    Other {
        frame_type: u8,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame with no data")]
    Empty,

    #[error("frame type {frame_type:#04x} too short ({len} bytes)")]
    Truncated { frame_type: u8, len: usize },

    #[error("checksum {actual:#04x} does not match {expected:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("frame data of {len} bytes exceeds {max}")]
    TooLong { len: usize, max: usize },
}

pub fn checksum(data: &[u8]) -> u8 {
    0xFF - data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn ipv4(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

fn port(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

impl Frame {
    /// Frame data: the frame type byte followed by its fields.
    pub fn frame_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Frame::AtCommand {
                frame_id,
                command,
                parameter,
            } => {
                out.extend([AT_COMMAND, *frame_id, command[0], command[1]]);
                out.extend_from_slice(parameter);
            }
            Frame::AtResponse {
                frame_id,
                command,
                status,
                data,
            } => {
                out.extend([AT_RESPONSE, *frame_id, command[0], command[1], *status]);
                out.extend_from_slice(data);
            }
            Frame::TxIpv4 {
                frame_id,
                dest,
                dest_port,
                src_port,
                protocol,
                options,
                payload,
            } => {
                out.extend([TX_IPV4, *frame_id]);
                out.extend(dest.octets());
                out.extend(dest_port.to_be_bytes());
                out.extend(src_port.to_be_bytes());
                out.extend([protocol.to_byte(), *options]);
                out.extend_from_slice(payload);
            }
            Frame::TxStatus { frame_id, status } => {
                out.extend([TX_STATUS, *frame_id, *status]);
            }
            Frame::RxIpv4 {
                source,
                dest_port,
                src_port,
                protocol,
                payload,
            } => {
                out.push(RX_IPV4);
                out.extend(source.octets());
                out.extend(dest_port.to_be_bytes());
                out.extend(src_port.to_be_bytes());
                out.extend([protocol.to_byte(), 0]);
                out.extend_from_slice(payload);
            }
            Frame::Other { frame_type, data } => {
                out.push(*frame_type);
                out.extend_from_slice(data);
            }
        }
        out
    }

    /// Full API frame ready for the serial line.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let data = self.frame_data();
        let too_long = FrameError::TooLong {
            len: data.len(),
            max: MAX_FRAME_DATA,
        };
        if data.len() > MAX_FRAME_DATA {
            return Err(too_long);
        }
        let len = u16::try_from(data.len()).map_err(|_| too_long)?;
        let mut out = Vec::with_capacity(data.len() + 4);
        out.push(START_DELIMITER);
        out.extend(len.to_be_bytes());
        out.extend_from_slice(&data);
        out.push(checksum(&data));
        Ok(out)
    }

    /// Decode frame data (without delimiter, length or checksum).
    pub fn parse(data: &[u8]) -> Result<Frame, FrameError> {
        let (&frame_type, rest) = data.split_first().ok_or(FrameError::Empty)?;
        let need = |min: usize| {
            if data.len() < min {
                Err(FrameError::Truncated {
                    frame_type,
                    len: data.len(),
                })
            } else {
                Ok(())
            }
        };

        let frame = match frame_type {
            AT_COMMAND => {
                need(4)?;
                Frame::AtCommand {
                    frame_id: rest[0],
                    command: [rest[1], rest[2]],
                    parameter: rest[3..].to_vec(),
                }
            }
            AT_RESPONSE => {
                need(5)?;
                Frame::AtResponse {
                    frame_id: rest[0],
                    command: [rest[1], rest[2]],
                    status: rest[3],
                    data: rest[4..].to_vec(),
                }
            }
            TX_IPV4 => {
                need(12)?;
                Frame::TxIpv4 {
                    frame_id: rest[0],
                    dest: ipv4(&rest[1..5]),
                    dest_port: port(&rest[5..7]),
                    src_port: port(&rest[7..9]),
                    protocol: rest[9].into(),
                    options: rest[10],
                    payload: rest[11..].to_vec(),
                }
            }
            TX_STATUS => {
                need(3)?;
                Frame::TxStatus {
                    frame_id: rest[0],
                    status: rest[1],
                }
            }
            RX_IPV4 => {
                need(11)?;
                Frame::RxIpv4 {
                    source: ipv4(&rest[0..4]),
                    dest_port: port(&rest[4..6]),
                    src_port: port(&rest[6..8]),
                    protocol: rest[8].into(),
                    payload: rest[10..].to_vec(),
                }
            }
            other => Frame::Other {
                frame_type: other,
                data: rest.to_vec(),
            },
        };
        Ok(frame)
    }
}

/// Incremental frame reader over bytes arriving from the serial line.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    ///
    /// Bytes ahead of a start delimiter are discarded. A delimiter with an
    /// oversized length or a failing checksum is reported as an error and only
    /// the delimiter byte is dropped. A frame that passes its checksum but
    /// cannot be decoded is consumed and reported.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        let start = match self.buf.iter().position(|b| *b == START_DELIMITER) {
            Some(start) => start,
            None => {
                if !self.buf.is_empty() {
                    debug!(skipped = self.buf.len(), "discarding bytes outside a frame");
                    self.buf.clear();
                }
                return None;
            }
        };
        if start > 0 {
            debug!(skipped = start, "discarding bytes before start delimiter");
            self.buf.drain(..start);
        }
        if self.buf.len() < 3 {
            return None;
        }

        let len = port(&self.buf[1..3]) as usize;
        if len > MAX_FRAME_DATA {
            self.buf.drain(..1);
            return Some(Err(FrameError::TooLong {
                len,
                max: MAX_FRAME_DATA,
            }));
        }
        let total = len + 4;
        if self.buf.len() < total {
            return None;
        }

        let data = &self.buf[3..3 + len];
        let expected = checksum(data);
        let actual = self.buf[total - 1];
        if expected != actual {
            self.buf.drain(..1);
            return Some(Err(FrameError::Checksum { expected, actual }));
        }
        let frame: Vec<u8> = self.buf.drain(..total).collect();
        Some(Frame::parse(&frame[3..3 + len]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_command_matches_reference_bytes() {
        let frame = Frame::AtCommand {
            frame_id: 1,
            command: *b"NI",
            parameter: Vec::new(),
        };
        assert_eq!(frame.encode().unwrap(), vec![0x7E, 0x00, 0x04, 0x08, 0x01, 0x4E, 0x49, 0x5F]);
    }

    #[test]
    fn lookup_command_carries_domain_parameter() {
        let frame = Frame::AtCommand {
            frame_id: 7,
            command: *b"LA",
            parameter: b"example.com".to_vec(),
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(&bytes[1..3], &[0x00, 15]);
        assert_eq!(&bytes[3..7], &[0x08, 7, b'L', b'A']);
        assert_eq!(&bytes[7..18], b"example.com");
    }

    #[test]
    fn transmit_request_layout() {
        let frame = Frame::TxIpv4 {
            frame_id: 2,
            dest: Ipv4Addr::new(10, 0, 0, 1),
            dest_port: 443,
            src_port: 0,
            protocol: IpProtocol::TcpSsl,
            options: 0,
            payload: b"GET".to_vec(),
        };
        assert_eq!(
            frame.frame_data(),
            vec![0x20, 2, 10, 0, 0, 1, 0x01, 0xBB, 0, 0, 4, 0, b'G', b'E', b'T']
        );
    }

    #[test]
    fn decoder_skips_noise_and_splits_frames() {
        let status = Frame::TxStatus { frame_id: 3, status: 0 };
        let rx = Frame::RxIpv4 {
            source: Ipv4Addr::new(1, 2, 3, 4),
            dest_port: 9000,
            src_port: 443,
            protocol: IpProtocol::TcpSsl,
            payload: b"{\"ok\":true}".to_vec(),
        };
        let mut wire = b"\x00\x13noise".to_vec();
        wire.extend(status.encode().unwrap());
        wire.extend(rx.encode().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&wire[..10]);
        assert_eq!(decoder.next_frame(), None);
        decoder.push(&wire[10..]);
        assert_eq!(decoder.next_frame(), Some(Ok(status)));
        assert_eq!(decoder.next_frame(), Some(Ok(rx)));
        assert_eq!(decoder.next_frame(), None);
    }

    #[test]
    fn bad_checksum_is_reported_and_skipped() {
        let mut bytes = Frame::TxStatus { frame_id: 1, status: 0 }.encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        bytes.extend(Frame::TxStatus { frame_id: 2, status: 0 }.encode().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert!(matches!(decoder.next_frame(), Some(Err(FrameError::Checksum { .. }))));
        assert_eq!(
            decoder.next_frame(),
            Some(Ok(Frame::TxStatus { frame_id: 2, status: 0 }))
        );
    }

    #[test]
    fn false_delimiter_does_not_swallow_following_frames() {
        let first = Frame::TxStatus { frame_id: 1, status: 0 };
        let second = Frame::TxStatus { frame_id: 2, status: 0 };
        let mut bytes = vec![0x7E, 0x00, 0x08];
        bytes.extend(first.encode().unwrap());
        bytes.extend(second.encode().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        let mut decoded = Vec::new();
        while let Some(frame) = decoder.next_frame() {
            decoded.push(frame);
        }
        assert!(matches!(decoded[0], Err(FrameError::Checksum { .. })));
        assert_eq!(decoded[1..], [Ok(first), Ok(second)]);
    }

    #[test]
    fn oversized_length_is_rejected_without_waiting() {
        let status = Frame::TxStatus { frame_id: 4, status: 0 };
        let mut bytes = vec![0x7E, 0xFF, 0xF0];
        bytes.extend(status.encode().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(
            decoder.next_frame(),
            Some(Err(FrameError::TooLong {
                len: 0xFFF0,
                max: MAX_FRAME_DATA
            }))
        );
        assert_eq!(decoder.next_frame(), Some(Ok(status)));
    }

    #[test]
    fn encode_refuses_oversized_frame_data() {
        let frame = Frame::TxIpv4 {
            frame_id: 1,
            dest: Ipv4Addr::LOCALHOST,
            dest_port: 443,
            src_port: 0,
            protocol: IpProtocol::TcpSsl,
            options: 0,
            payload: vec![b'x'; 70_000],
        };
        assert_eq!(
            frame.encode(),
            Err(FrameError::TooLong {
                len: 70_012,
                max: MAX_FRAME_DATA
            })
        );
    }

    #[test]
    fn short_response_is_truncated() {
        assert_eq!(
            Frame::parse(&[0x88, 1, b'L']),
            Err(FrameError::Truncated { frame_type: 0x88, len: 3 })
        );
        assert_eq!(Frame::parse(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn unknown_frame_types_are_preserved() {
        let frame = Frame::parse(&[0x8A, 0x02]).unwrap();
        assert_eq!(frame, Frame::Other { frame_type: 0x8A, data: vec![0x02] });
    }
}
