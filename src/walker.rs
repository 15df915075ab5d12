use std::io::{self, Read, Seek, SeekFrom};

use tracing::trace;

use crate::{
    demux::Demux,
    marshal::{BoxHeader, Error, Result},
    registry::{BoxDecoder, BoxKind, BoxRegistry},
};

/// Depth at which nesting is considered hostile rather than structural.
pub const MAX_DEPTH: usize = 64;

/// Recursive descent over a box tree, dispatching on the registry.
pub struct Walker<'a> {
    registry: &'a BoxRegistry,
}

impl<'a> Walker<'a> {
    pub fn new(registry: &'a BoxRegistry) -> Self {
        Self { registry }
    }

    /// Processes the sibling boxes from the current position of `input` up
    /// to `end`. On success the position of `input` is exactly `end`.
    pub fn walk<R: Read + Seek>(&self, input: &mut R, end: u64, demux: &mut Demux) -> Result<()> {
        self.walk_region(input, end, 0, demux)
    }

    fn walk_region<R: Read + Seek>(
        &self,
        input: &mut R,
        end: u64,
        depth: usize,
        demux: &mut Demux,
    ) -> Result<()> {
        loop {
            let offset = input.stream_position()?;
            if offset >= end {
                return Ok(());
            }
            if depth > MAX_DEPTH {
                return Err(Error::NestingTooDeep { offset });
            }

            let header = BoxHeader::read(input, offset)?;
            let body_start = offset + header.header_length;
            let body_end = match header.declared_size {
                0 if depth == 0 => end,
                0 => {
                    return Err(Error::InvalidSize {
                        offset,
                        size: 0,
                        header_length: header.header_length,
                    })
                }
                size => offset.checked_add(size).unwrap_or(u64::MAX),
            };
            if body_end > end || body_start > body_end {
                return Err(Error::BoxOverflow {
                    tag: header.tag,
                    offset,
                    end: body_end.max(body_start),
                    region_end: end,
                });
            }
            trace!(offset, tag = %header.tag, size = body_end - offset, depth, "box");

            if let Some(entry) = self.registry.lookup(header.tag) {
                match entry.kind {
                    BoxKind::Container { preamble } => {
                        if preamble > body_end - body_start {
                            return Err(Error::RegistryMiss {
                                tag: header.tag,
                                offset,
                            });
                        }
                        if let Some(decode) = entry.decode {
                            decode_body(input, decode, &header, offset, preamble, demux)?;
                        }
                        input.seek(SeekFrom::Start(body_start + preamble))?;
                        self.walk_region(input, body_end, depth + 1, demux)?;
                    }
                    BoxKind::Leaf => {
                        if let Some(decode) = entry.decode {
                            let length = body_end - body_start;
                            decode_body(input, decode, &header, offset, length, demux)?;
                        }
                    }
                }
            }

            input.seek(SeekFrom::Start(body_end))?;
        }
    }
}

/// Reads the next `length` bytes of the box at `offset` and hands them to
/// `decode`. Running out of bytes is reported at the body's offset.
fn decode_body<R: Read>(
    input: &mut R,
    decode: BoxDecoder,
    header: &BoxHeader,
    offset: u64,
    length: u64,
    demux: &mut Demux,
) -> Result<()> {
    let body_offset = offset + header.header_length;
    let mut body = Vec::new();
    input.take(length).read_to_end(&mut body)?;
    if (body.len() as u64) < length {
        return Err(Error::TruncatedStream {
            offset: body_offset,
        });
    }

    decode(&mut body.as_slice(), demux).map_err(|error| match error {
        Error::Io(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
            Error::TruncatedStream {
                offset: body_offset,
            }
        }
        error => Error::MalformedBox {
            tag: header.tag,
            offset,
            source: Box::new(error),
        },
    })
}
