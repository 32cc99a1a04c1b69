//! Request protocol
//!
//! A request is one chunk of ASCII text holding three whitespace-separated
//! fields:
//!
//! ```text
//! <region_name> <offset> <length>
//! ```
//!
//! The response is either the raw region bytes (clamped to the end of the
//! region) or the 5-byte marker `ERROR`. There is no framing; the client
//! must know how many bytes to expect.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use crate::context::BramContext;
use crate::error::{BramError, BramResult};

/// Literal response for every per-request failure
pub const ERROR_MARKER: &[u8] = b"ERROR";

/// Largest request accepted in a single receive
pub const MAX_REQUEST_LEN: usize = 127;

/// A parsed read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub region: String,
    pub offset: u64,
    pub length: u64,
}

impl Request {
    pub fn new(region: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            region: region.into(),
            offset,
            length,
        }
    }

    /// Parse one received chunk. Bytes after the first NUL are ignored.
    pub fn parse(raw: &[u8]) -> BramResult<Self> {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let text = std::str::from_utf8(&raw[..end])
            .map_err(|_| BramError::MalformedRequest("request is not valid UTF-8".to_string()))?;

        let fields: Vec<&str> = text.split_whitespace().collect();
        let [region, offset, length] = fields.as_slice() else {
            return Err(BramError::MalformedRequest(format!(
                "expected 3 fields, got {}",
                fields.len()
            )));
        };

        Ok(Self {
            region: region.to_string(),
            offset: parse_field("offset", offset)?,
            length: parse_field("length", length)?,
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.region, self.offset, self.length)
    }
}

fn parse_field(label: &str, value: &str) -> BramResult<u64> {
    value
        .parse()
        .map_err(|_| BramError::MalformedRequest(format!("invalid {} '{}'", label, value)))
}

/// Result of handling one request
#[derive(Debug)]
pub enum Outcome {
    /// Region bytes to send, possibly fewer than requested
    Data(Vec<u8>),
    /// Answered with [`ERROR_MARKER`]
    Error(BramError),
}

impl Outcome {
    /// Bytes that go on the wire
    pub fn payload(&self) -> &[u8] {
        match self {
            Outcome::Data(bytes) => bytes,
            Outcome::Error(_) => ERROR_MARKER,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

/// Validates requests against the context and produces responses
#[derive(Clone)]
pub struct RequestHandler {
    ctx: Arc<BramContext>,
}

impl RequestHandler {
    pub fn new(ctx: Arc<BramContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &BramContext {
        &self.ctx
    }

    /// Compute the response for a read of `length` bytes at `offset`
    ///
    /// - unknown or unmapped region: error
    /// - `offset >= size`: error, even for zero-length reads
    /// - `offset + length > size`: length clamped to `size - offset`
    pub fn handle(&self, region: &str, offset: u64, length: u64) -> Outcome {
        let Some((descriptor, window)) = self.ctx.resolve(region) else {
            return Outcome::Error(BramError::UnknownRegion(region.to_string()));
        };

        let size = descriptor.size;
        let offset = match usize::try_from(offset) {
            Ok(o) if o < size => o,
            _ => {
                return Outcome::Error(BramError::OffsetOutOfRange {
                    name: region.to_string(),
                    offset,
                    size,
                })
            }
        };

        let available = size - offset;
        let length = usize::try_from(length).map_or(available, |l| l.min(available));

        match self.ctx.serializer().read(window, offset, length) {
            Ok(bytes) => Outcome::Data(bytes),
            Err(e) => Outcome::Error(e),
        }
    }

    /// Parse `raw`, handle it and write the response to `writer`
    ///
    /// Malformed input is answered with the error marker like any other
    /// per-request failure. Only write errors are returned.
    pub fn respond<W: Write>(&self, writer: &mut W, raw: &[u8]) -> io::Result<Outcome> {
        let outcome = match Request::parse(raw) {
            Ok(request) => {
                let outcome = self.handle(&request.region, request.offset, request.length);
                if let Outcome::Data(ref bytes) = outcome {
                    tracing::debug!(
                        region = %request.region,
                        offset = request.offset,
                        requested = request.length,
                        sent = bytes.len(),
                        "read"
                    );
                }
                outcome
            }
            Err(e) => Outcome::Error(e),
        };

        if let Outcome::Error(ref e) = outcome {
            if e.is_recoverable() {
                tracing::warn!("Rejected request: {}", e);
            } else {
                tracing::error!("Request failed: {}", e);
            }
        }

        let payload = outcome.payload();
        if !payload.is_empty() {
            writer.write_all(payload)?;
            writer.flush()?;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedRegion;
    use crate::table::RegionTable;

    fn handler() -> (RequestHandler, Arc<SimulatedRegion>) {
        let synth: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
        let synth = Arc::new(SimulatedRegion::from_bytes("synth0_0", synth));
        let cnt = Arc::new(SimulatedRegion::from_bytes("acc_cnt", vec![0x2a, 0, 0, 0]));

        let ctx = BramContext::new(RegionTable::rfsoc4x2_spectrometer())
            .with_region("synth0_0", synth.clone())
            .with_region("acc_cnt", cnt);
        (RequestHandler::new(Arc::new(ctx)), synth)
    }

    #[test]
    fn test_parse_request() {
        let req = Request::parse(b"synth0_3 2048 1024").unwrap();
        assert_eq!(req, Request::new("synth0_3", 2048, 1024));

        // Extra whitespace, trailing newline and NUL padding are tolerated
        let req = Request::parse(b"  acc_cnt\t0   4\n\0\0garbage").unwrap();
        assert_eq!(req, Request::new("acc_cnt", 0, 4));
        assert_eq!(req.to_string(), "acc_cnt 0 4");
    }

    #[test]
    fn test_parse_malformed() {
        for raw in [
            &b""[..],
            b"acc_cnt",
            b"acc_cnt 0",
            b"acc_cnt 0 4 extra",
            b"acc_cnt zero 4",
            b"acc_cnt 0 -4",
            b"acc_cnt 0x10 4",
            b"\xff\xfe 0 4",
        ] {
            let err = Request::parse(raw).unwrap_err();
            assert!(matches!(err, BramError::MalformedRequest(_)), "{:?}", raw);
        }
    }

    #[test]
    fn test_handle_full_read() {
        let (handler, synth) = handler();
        match handler.handle("synth0_0", 0, 4096) {
            Outcome::Data(bytes) => assert_eq!(bytes, synth.snapshot()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_handle_clamps_overrun() {
        let (handler, synth) = handler();
        let outcome = handler.handle("synth0_0", 4000, 1000);
        assert_eq!(outcome.payload().len(), 96);
        assert_eq!(outcome.payload(), &synth.snapshot()[4000..]);

        let outcome = handler.handle("acc_cnt", 2, u64::MAX);
        assert_eq!(outcome.payload(), &[0, 0]);
    }

    #[test]
    fn test_handle_offset_at_size_is_error() {
        let (handler, _) = handler();
        let outcome = handler.handle("synth0_0", 4096, 1);
        assert!(matches!(outcome, Outcome::Error(BramError::OffsetOutOfRange { .. })));
        assert_eq!(outcome.payload(), ERROR_MARKER);

        assert!(handler.handle("acc_cnt", 4, 0).is_error());
        assert!(handler.handle("acc_cnt", u64::MAX, 4).is_error());
    }

    #[test]
    fn test_handle_unknown_region() {
        let (handler, _) = handler();
        assert!(matches!(
            handler.handle("synth9_9", 0, 4),
            Outcome::Error(BramError::UnknownRegion(_))
        ));
        // In the table but not mapped
        assert!(handler.handle("synth0_1", 0, 4).is_error());
    }

    #[test]
    fn test_handle_zero_length() {
        let (handler, _) = handler();
        let outcome = handler.handle("synth0_0", 10, 0);
        assert!(!outcome.is_error());
        assert!(outcome.payload().is_empty());
    }

    #[test]
    fn test_respond_writes_payload() {
        let (handler, _) = handler();
        let mut wire = Vec::new();

        handler.respond(&mut wire, b"acc_cnt 0 4").unwrap();
        assert_eq!(wire, vec![0x2a, 0, 0, 0]);

        wire.clear();
        let outcome = handler.respond(&mut wire, b"acc_cnt 0").unwrap();
        assert!(outcome.is_error());
        assert_eq!(wire, b"ERROR");

        wire.clear();
        handler.respond(&mut wire, b"synth0_0 0 0").unwrap();
        assert!(wire.is_empty());
    }

    #[test]
    fn test_reads_live_contents() {
        let (handler, synth) = handler();
        synth.store(0, &[9, 9, 9, 9]).unwrap();
        assert_eq!(handler.handle("synth0_0", 0, 4).payload(), &[9, 9, 9, 9]);
    }
}
