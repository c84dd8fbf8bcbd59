//! Line framing of the remote protocol.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Longest accepted request line.
pub const MAX_LINE_LENGTH: usize = 4096;

/// One decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete line, invalid UTF-8 replaced by U+FFFD.
    Line(String),
    /// A line longer than [`MAX_LINE_LENGTH`]; its bytes are dropped up to
    /// the next newline.
    Overlong,
}

/// Reads newline terminated lines and writes CRLF terminated ones.
///
/// A trailing `\r` on incoming lines is stripped. Neither bad encoding nor
/// an overlong line is a stream error, so one broken request never ends
/// the connection.
#[derive(Debug, Default)]
pub struct CrlfLinesCodec {
    /// Bytes of `src` already searched for a newline.
    next_index: usize,
    discarding: bool,
}

impl CrlfLinesCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_line(mut bytes: BytesMut) -> String {
    if bytes.last() == Some(&b'\n') {
        bytes.truncate(bytes.len() - 1);
    }
    if bytes.last() == Some(&b'\r') {
        bytes.truncate(bytes.len() - 1);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

impl Decoder for CrlfLinesCodec {
    type Item = Inbound;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, io::Error> {
        loop {
            if self.discarding {
                match src.iter().position(|b| *b == b'\n') {
                    Some(offset) => {
                        src.advance(offset + 1);
                        self.discarding = false;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
                continue;
            }

            let read_to = src.len().min(MAX_LINE_LENGTH + 1);
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            return Ok(match newline {
                Some(offset) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    Some(Inbound::Line(to_line(src.split_to(end + 1))))
                }
                None if src.len() > MAX_LINE_LENGTH => {
                    self.next_index = 0;
                    self.discarding = true;
                    Some(Inbound::Overlong)
                }
                None => {
                    self.next_index = read_to;
                    None
                }
            });
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, io::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if self.discarding || src.is_empty() {
            src.clear();
            return Ok(None);
        }
        Ok(Some(Inbound::Line(to_line(src.split()))))
    }
}

impl Encoder<String> for CrlfLinesCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(line.len() + 2);
        dst.extend_from_slice(line.as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(text: &str) -> Option<Inbound> {
        Some(Inbound::Line(text.to_string()))
    }

    #[test]
    fn decodes_lf_and_crlf_lines() {
        let mut codec = CrlfLinesCodec::new();
        let mut buf = BytesMut::from("list\r\nhelp\nadd-");

        assert_eq!(codec.decode(&mut buf).unwrap(), line("list"));
        assert_eq!(codec.decode(&mut buf).unwrap(), line("help"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), line("add-"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn line_split_across_reads() {
        let mut codec = CrlfLinesCodec::new();
        let mut buf = BytesMut::from("add-ffu --bus");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"=1 --id=2\r\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), line("add-ffu --bus=1 --id=2"));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut codec = CrlfLinesCodec::new();
        let mut buf = BytesMut::from(&b"list \xff\xfe\r\nhelp\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), line("list \u{fffd}\u{fffd}"));
        assert_eq!(codec.decode(&mut buf).unwrap(), line("help"));
    }

    #[test]
    fn overlong_line_is_skipped() {
        let mut codec = CrlfLinesCodec::new();
        let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_LENGTH + 1].as_slice());

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Overlong));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"aaaa\r\nlist\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), line("list"));
    }

    #[test]
    fn line_of_maximum_length_is_accepted() {
        let mut codec = CrlfLinesCodec::new();
        let mut bytes = vec![b'a'; MAX_LINE_LENGTH];
        bytes.push(b'\n');
        let mut buf = BytesMut::from(bytes.as_slice());

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            line(&"a".repeat(MAX_LINE_LENGTH))
        );
    }

    #[test]
    fn encodes_with_crlf() {
        let mut codec = CrlfLinesCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(String::from("Hello"), &mut buf).unwrap();
        codec.encode(String::from("FFU id=1 busID=0 rpm=0"), &mut buf).unwrap();

        assert_eq!(&buf[..], b"Hello\r\nFFU id=1 busID=0 rpm=0\r\n");
    }
}
