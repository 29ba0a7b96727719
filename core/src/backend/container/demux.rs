//! Split the engine's multiplexed output into stdout and stderr.
//!
//! Without a TTY the engine frames output as an 8-byte header followed by a
//! payload:
//!
//! ```text
//! [stream, 0, 0, 0, size (u32, big-endian)] payload[size]
//! ```
//!
//! `stream` is 0 (stdin, treated as stdout), 1 (stdout), 2 (stderr) or
//! 3 (an engine-side error whose payload is the message).

use std::io::{self, Read, Write};

use super::runtime::EngineError;

const HEADER_LEN: usize = 8;

/// Longest engine error message kept from a stream-3 frame.
const MAX_ERROR_MESSAGE: u64 = 64 * 1024;


/// Copy frames until a clean end of stream. Returns the payload bytes
/// written to both sinks.
pub fn demux<R, O, E>(mut reader: R, mut stdout: O, mut stderr: E) -> Result<u64, EngineError>
where
    R: Read,
    O: Write,
    E: Write,
{
    let mut header = [0u8; HEADER_LEN];
    let mut total = 0u64;

    while read_header(&mut reader, &mut header)? {
        let size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as u64;
        let mut payload = (&mut reader).take(size);

        let copied = match header[0] {
            0 | 1 => io::copy(&mut payload, &mut stdout)?,
            2 => io::copy(&mut payload, &mut stderr)?,
            3 => {
                let mut message = Vec::new();
                payload.take(MAX_ERROR_MESSAGE).read_to_end(&mut message)?;
                return Err(EngineError::Protocol(format!(
                    "engine reported: {}",
                    String::from_utf8_lossy(&message).trim()
                )));
            }
            other => {
                return Err(EngineError::Protocol(format!(
                    "unknown stream type {} in frame header",
                    other
                )))
            }
        };
        if copied < size {
            return Err(EngineError::Protocol(format!(
                "stream ended inside a {}-byte frame",
                size
            )));
        }
        total += size;
    }
    stdout.flush()?;
    stderr.flush()?;
    Ok(total)
}

/// Fill `header`. Returns false on EOF before the first byte.
fn read_header<R: Read>(reader: &mut R, header: &mut [u8; HEADER_LEN]) -> Result<bool, EngineError> {
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(EngineError::Protocol(
                    "stream ended inside a frame header".into(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::Io(e)),
        }
    }
    Ok(true)
}

/// Encode one frame. Used by fake engines in tests.
#[cfg(test)]
pub(crate) fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![stream, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: Vec<u8>) -> Result<(String, String), EngineError> {
        let mut out = Vec::new();
        let mut err = Vec::new();
        demux(&input[..], &mut out, &mut err)?;
        Ok((
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        ))
    }

    #[test]
    fn interleaved_frames_are_separated() {
        let mut input = frame(1, b"a\n");
        input.extend(frame(2, b"b\n"));
        input.extend(frame(1, b"c\n"));
        input.extend(frame(2, b"d\n"));
        let (out, err) = run(input).unwrap();
        assert_eq!(out, "a\nc\n");
        assert_eq!(err, "b\nd\n");
    }

    #[test]
    fn empty_stream_is_ok() {
        let (out, err) = run(Vec::new()).unwrap();
        assert!(out.is_empty() && err.is_empty());
    }

    #[test]
    fn zero_length_frame() {
        let mut input = frame(1, b"");
        input.extend(frame(1, b"x"));
        assert_eq!(run(input).unwrap().0, "x");
    }

    #[test]
    fn stdin_frames_go_to_stdout() {
        assert_eq!(run(frame(0, b"echo")).unwrap().0, "echo");
    }

    #[test]
    fn truncated_payload_is_protocol_error() {
        let mut input = frame(1, b"hello");
        input.truncate(HEADER_LEN + 2);
        assert!(matches!(run(input), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn oversized_length_with_short_payload() {
        let mut input = vec![1, 0, 0, 0];
        input.extend_from_slice(&u32::MAX.to_be_bytes());
        input.extend_from_slice(b"tiny");
        let mut out = Vec::new();
        let err = demux(&input[..], &mut out, io::sink()).unwrap_err();
        match err {
            EngineError::Protocol(msg) => assert!(msg.contains("4294967295-byte frame")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(out, b"tiny");
    }

    #[test]
    fn truncated_header_is_protocol_error() {
        let input = vec![1, 0, 0];
        assert!(matches!(run(input), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn system_error_frame() {
        let mut input = frame(1, b"partial");
        input.extend(frame(3, b"exec failed: no such file\n"));
        match run(input) {
            Err(EngineError::Protocol(msg)) => assert!(msg.contains("no such file")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_stream_type() {
        assert!(matches!(run(frame(9, b"?")), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn byte_count() {
        let mut input = frame(1, b"abc");
        input.extend(frame(2, b"de"));
        let total = demux(&input[..], io::sink(), io::sink()).unwrap();
        assert_eq!(total, 5);
    }
}
