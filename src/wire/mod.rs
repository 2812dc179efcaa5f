//! TCP segment wire format: header/options encode-decode and the Internet checksum.
//!
//! Field layout and flag bits follow RFC 793 / RFC 9293 exactly. A `byteorder`-driven cursor
//! handles the encode/decode split for this single fixed packet format (see DESIGN.md).

mod checksum;

pub use checksum::{pseudo_header_checksum, PseudoHeader};

use byteorder::{BigEndian as BE, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

bitflags::bitflags! {
    /// Control bits of a [`TcpSegment`]. Only `SYN, ACK, FIN, RST, PSH` are ever emitted by
    /// this engine; `CWR`/`ECE`/`URG` are accepted on the wire but never acted on.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const RST = 0b0000_0100;
        const PSH = 0b0000_1000;
        const ACK = 0b0001_0000;
        const URG = 0b0010_0000;
        const ECE = 0b0100_0000;
        const CWR = 0b1000_0000;
    }
}

impl std::fmt::Debug for TcpFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010b}", self.bits())
    }
}

/// Options subset this engine understands: End-of-Options (0), NOP (1), MSS (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOption {
    EndOfOptions,
    Nop,
    MaximumSegmentSize(u16),
}

/// A decoded TCP segment: header, options and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
    pub options: Vec<TcpOption>,
    pub payload: Vec<u8>,
}

const MIN_HEADER_WORDS: u8 = 5;

impl TcpSegment {
    /// Builds a zeroed header over `payload` with minimum data offset and a
    /// checksum of zero, ready for [`Self::calc_and_set_checksum`].
    pub fn build(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Self {
        TcpSegment {
            src_port,
            dst_port,
            seq: 0,
            ack: 0,
            flags: TcpFlags::empty(),
            window: 0,
            checksum: 0,
            urgent_ptr: 0,
            options: Vec::new(),
            payload,
        }
    }

    pub fn mss_option(&self) -> Option<u16> {
        self.options.iter().find_map(|o| match o {
            TcpOption::MaximumSegmentSize(mss) => Some(*mss),
            _ => None,
        })
    }

    fn options_len_bytes(&self) -> usize {
        self.options
            .iter()
            .map(|o| match o {
                TcpOption::EndOfOptions | TcpOption::Nop => 1,
                TcpOption::MaximumSegmentSize(_) => 4,
            })
            .sum()
    }

    fn data_offset_words(&self) -> u8 {
        let raw = 20 + self.options_len_bytes();
        let padded = (raw + 3) / 4 * 4;
        (padded / 4) as u8
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20 + self.options_len_bytes() + self.payload.len());
        buf.write_u16::<BE>(self.src_port).unwrap();
        buf.write_u16::<BE>(self.dst_port).unwrap();
        buf.write_u32::<BE>(self.seq).unwrap();
        buf.write_u32::<BE>(self.ack).unwrap();
        buf.write_u8(self.data_offset_words() << 4).unwrap();
        buf.write_u8(self.flags.bits()).unwrap();
        buf.write_u16::<BE>(self.window).unwrap();
        buf.write_u16::<BE>(self.checksum).unwrap();
        buf.write_u16::<BE>(self.urgent_ptr).unwrap();

        let options_start = buf.len();
        for opt in &self.options {
            match opt {
                TcpOption::EndOfOptions => buf.write_u8(0).unwrap(),
                TcpOption::Nop => buf.write_u8(1).unwrap(),
                TcpOption::MaximumSegmentSize(mss) => {
                    buf.write_u8(2).unwrap();
                    buf.write_u8(4).unwrap();
                    buf.write_u16::<BE>(*mss).unwrap();
                }
            }
        }
        let written = buf.len() - options_start;
        let padded = (self.data_offset_words() as usize) * 4 - 20;
        for _ in written..padded {
            buf.write_u8(1).unwrap(); // NOP padding
        }

        buf.write_all(&self.payload).unwrap();
        buf
    }

    pub fn from_bytes(raw: &[u8]) -> io::Result<Self> {
        if raw.len() < 20 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "segment shorter than a TCP header"));
        }
        let mut cur = Cursor::new(raw);
        let src_port = cur.read_u16::<BE>()?;
        let dst_port = cur.read_u16::<BE>()?;
        let seq = cur.read_u32::<BE>()?;
        let ack = cur.read_u32::<BE>()?;
        let data_offset = cur.read_u8()? >> 4;
        if data_offset < MIN_HEADER_WORDS {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "data offset shorter than a bare header"));
        }
        let flags = TcpFlags::from_bits_truncate(cur.read_u8()?);
        let window = cur.read_u16::<BE>()?;
        let checksum = cur.read_u16::<BE>()?;
        let urgent_ptr = cur.read_u16::<BE>()?;

        let options_len = data_offset as usize * 4 - 20;
        if raw.len() < 20 + options_len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated options"));
        }
        let mut options = Vec::new();
        let mut remaining = options_len;
        while remaining > 0 {
            let kind = cur.read_u8()?;
            remaining -= 1;
            match kind {
                0 => {
                    options.push(TcpOption::EndOfOptions);
                    break;
                }
                1 => options.push(TcpOption::Nop),
                2 => {
                    let len = cur.read_u8()?;
                    if len != 4 || remaining < 3 {
                        return Err(io::Error::new(io::ErrorKind::InvalidData, "malformed MSS option"));
                    }
                    let mss = cur.read_u16::<BE>()?;
                    options.push(TcpOption::MaximumSegmentSize(mss));
                    remaining -= 3;
                }
                _ => {
                    // Unknown option: skip by length byte, best-effort.
                    let len = cur.read_u8()? as usize;
                    let to_skip = len.saturating_sub(2).min(remaining.saturating_sub(1));
                    let mut sink = vec![0u8; to_skip];
                    cur.read_exact(&mut sink)?;
                    remaining = remaining.saturating_sub(1 + to_skip);
                }
            }
        }
        // consume any padding left after a short option list
        let consumed = cur.position() as usize;
        let header_end = 20 + options_len;
        if consumed < header_end {
            let mut sink = vec![0u8; header_end - consumed];
            cur.read_exact(&mut sink)?;
        }

        let mut payload = Vec::new();
        cur.read_to_end(&mut payload)?;

        Ok(TcpSegment {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window,
            checksum,
            urgent_ptr,
            options,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_a_plain_ack() {
        let mut seg = TcpSegment::build(1000, 2000, b"hello".to_vec());
        seg.seq = 42;
        seg.ack = 7;
        seg.flags = TcpFlags::ACK | TcpFlags::PSH;
        seg.window = 4096;

        let bytes = seg.to_bytes();
        let decoded = TcpSegment::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.src_port, 1000);
        assert_eq!(decoded.dst_port, 2000);
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.ack, 7);
        assert_eq!(decoded.flags, TcpFlags::ACK | TcpFlags::PSH);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn round_trips_mss_option() {
        let mut seg = TcpSegment::build(1, 2, Vec::new());
        seg.flags = TcpFlags::SYN;
        seg.options.push(TcpOption::MaximumSegmentSize(1220));
        seg.options.push(TcpOption::EndOfOptions);

        let bytes = seg.to_bytes();
        assert_eq!(bytes.len() % 4, 0, "header must be a whole number of 32-bit words");
        let decoded = TcpSegment::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.mss_option(), Some(1220));
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(TcpSegment::from_bytes(&[0u8; 10]).is_err());
    }
}
