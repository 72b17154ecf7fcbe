// NETCONF message framing (RFC 6242).
//
// Base 1.0 terminates each message with `]]>]]>`; base 1.1 wraps it in
// length-prefixed chunks (`\n#<len>\n...` ending with `\n##\n`), which
// disambiguates payloads containing the 1.0 delimiter. The hello
// exchange always runs end-of-message framed; the session switches to
// the negotiated framing afterwards.

use bytes::{Bytes, BytesMut};

use crate::error::Error;

const EOM: &[u8] = b"]]>]]>";

/// Upper bound on one decoded message, to keep a misbehaving peer from
/// growing the buffer without limit.
const MAX_FRAME: usize = 32 * 1024 * 1024;

/// Longest run of digits accepted in a chunk-size header.
const MAX_SIZE_DIGITS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    EndOfMessage,
    Chunked,
}

/// Wrap one message for the wire.
pub(crate) fn encode(framing: Framing, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 24);
    match framing {
        Framing::EndOfMessage => {
            out.extend_from_slice(payload);
            out.extend_from_slice(EOM);
        }
        Framing::Chunked => {
            out.extend_from_slice(format!("\n#{}\n", payload.len()).as_bytes());
            out.extend_from_slice(payload);
            out.extend_from_slice(b"\n##\n");
        }
    }
    out.freeze()
}

/// Incremental frame extractor. Feed arbitrary byte chunks with
/// [`FrameDecoder::extend`], then drain complete messages with
/// [`FrameDecoder::next_frame`].
pub(crate) struct FrameDecoder {
    framing: Framing,
    buf: BytesMut,
}

impl FrameDecoder {
    pub(crate) fn new(framing: Framing) -> Self {
        Self { framing, buf: BytesMut::new() }
    }

    /// Switch framings after the hello exchange. Any buffered bytes
    /// are reinterpreted under the new framing.
    pub(crate) fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete message, or `None` while the buffer holds only a
    /// partial frame.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Bytes>, Error> {
        if self.buf.len() > MAX_FRAME {
            return Err(Error::malformed("NETCONF framing", "frame exceeds size limit"));
        }
        match self.framing {
            Framing::EndOfMessage => self.next_eom(),
            Framing::Chunked => self.next_chunked(),
        }
    }

    fn next_eom(&mut self) -> Result<Option<Bytes>, Error> {
        let Some(at) = find(&self.buf, EOM) else {
            return Ok(None);
        };
        let message = self.buf.split_to(at).freeze();
        let _ = self.buf.split_to(EOM.len());
        Ok(Some(message))
    }

    fn next_chunked(&mut self) -> Result<Option<Bytes>, Error> {
        match parse_chunked(&self.buf)? {
            Some((consumed, message)) => {
                let _ = self.buf.split_to(consumed);
                Ok(Some(Bytes::from(message)))
            }
            None => Ok(None),
        }
    }
}

/// Parse one complete chunked message from the front of `buf`.
/// `Ok(None)` means more bytes are needed; errors are unrecoverable
/// framing violations.
fn parse_chunked(buf: &[u8]) -> Result<Option<(usize, Vec<u8>)>, Error> {
    let bad = |detail: &'static str| Error::malformed("NETCONF framing", detail);

    let mut pos = 0usize;
    let mut message = Vec::new();
    loop {
        // Chunk header opens with LF HASH.
        if buf.len() < pos + 2 {
            return Ok(None);
        }
        if &buf[pos..pos + 2] != b"\n#" {
            return Err(bad("chunk header must start with newline and '#'"));
        }
        pos += 2;

        match buf.get(pos) {
            // `\n##\n` closes the message.
            Some(b'#') => {
                match buf.get(pos + 1) {
                    Some(b'\n') => return Ok(Some((pos + 2, message))),
                    Some(_) => return Err(bad("malformed end-of-chunks marker")),
                    None => return Ok(None),
                }
            }
            Some(d) if d.is_ascii_digit() => {}
            Some(_) => return Err(bad("chunk size must be decimal digits")),
            None => return Ok(None),
        }

        let Some(header_len) = buf[pos..].iter().position(|b| *b == b'\n') else {
            if buf.len() - pos > MAX_SIZE_DIGITS {
                return Err(bad("chunk size header too long"));
            }
            return Ok(None);
        };
        let digits = &buf[pos..pos + header_len];
        if header_len > MAX_SIZE_DIGITS || !digits.iter().all(u8::is_ascii_digit) {
            return Err(bad("invalid chunk size header"));
        }
        let size: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("invalid chunk size header"))?;
        if size == 0 || message.len() + size > MAX_FRAME {
            return Err(bad("chunk size out of range"));
        }
        pos += header_len + 1;

        if buf.len() < pos + size {
            return Ok(None);
        }
        message.extend_from_slice(&buf[pos..pos + size]);
        pos += size;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn drain(decoder: &mut FrameDecoder) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().expect("well-formed input") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn eom_split_across_reads() {
        let mut decoder = FrameDecoder::new(Framing::EndOfMessage);
        decoder.extend(b"<rpc-reply/>]]");
        assert!(decoder.next_frame().expect("partial").is_none());
        decoder.extend(b">]]>");
        assert_eq!(drain(&mut decoder), vec![Bytes::from_static(b"<rpc-reply/>")]);
    }

    #[test]
    fn eom_extracts_back_to_back_messages() {
        let mut decoder = FrameDecoder::new(Framing::EndOfMessage);
        decoder.extend(b"<a/>]]>]]><b/>]]>]]>");
        assert_eq!(
            drain(&mut decoder),
            vec![Bytes::from_static(b"<a/>"), Bytes::from_static(b"<b/>")]
        );
    }

    #[test]
    fn chunked_round_trip_multichunk() {
        let mut decoder = FrameDecoder::new(Framing::Chunked);
        decoder.extend(b"\n#4\n<rpc\n#6\n-reply\n#2\n/>\n##\n");
        assert_eq!(drain(&mut decoder), vec![Bytes::from_static(b"<rpc-reply/>")]);
    }

    #[test]
    fn chunked_tolerates_partial_delivery() {
        let mut decoder = FrameDecoder::new(Framing::Chunked);
        let wire = encode(Framing::Chunked, b"<rpc message-id=\"1\"/>");
        for byte in wire.iter() {
            decoder.extend(&[*byte]);
        }
        assert_eq!(drain(&mut decoder), vec![Bytes::from_static(b"<rpc message-id=\"1\"/>")]);
    }

    #[test]
    fn chunked_payload_may_contain_eom_delimiter() {
        let mut decoder = FrameDecoder::new(Framing::Chunked);
        decoder.extend(&encode(Framing::Chunked, b"<data>]]>]]></data>"));
        assert_eq!(drain(&mut decoder), vec![Bytes::from_static(b"<data>]]>]]></data>")]);
    }

    #[test]
    fn chunked_rejects_garbage_header() {
        let mut decoder = FrameDecoder::new(Framing::Chunked);
        decoder.extend(b"\n#x4\nabcd\n##\n");
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn framing_switch_applies_to_subsequent_frames() {
        let mut decoder = FrameDecoder::new(Framing::EndOfMessage);
        decoder.extend(b"<hello/>]]>]]>");
        assert_eq!(drain(&mut decoder), vec![Bytes::from_static(b"<hello/>")]);
        decoder.set_framing(Framing::Chunked);
        decoder.extend(&encode(Framing::Chunked, b"<rpc/>"));
        assert_eq!(drain(&mut decoder), vec![Bytes::from_static(b"<rpc/>")]);
    }
}
