use crate::error::IpsError;
use std::io::{self, Read, Seek, SeekFrom, Write};

const HEADER: &[u8; 5] = b"PATCH";
const TRAILER: &[u8; 3] = b"EOF";

/// `offset` (3 bytes) followed by `size` (2 bytes).
const RECORD_HEADER_LEN: usize = 5;

const COPY_BUFFER_SIZE: usize = 4096;

/// Enough to tell "only the trailer is left" apart from "a record follows".
const LOOKAHEAD: usize = TRAILER.len() + 1;

// The record loop stops once no more than a trailer's worth of bytes remain.
// That is only sound while every record is longer than the trailer.
const _: () = assert!(RECORD_HEADER_LEN > TRAILER.len());

/// A decoded record header. Literal payloads stay in the patch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Literal { offset: u32, size: u16 },
    Fill { offset: u32, size: u16, value: u8 },
}

impl Record {
    pub fn offset(&self) -> u32 {
        match *self {
            Record::Literal { offset, .. } | Record::Fill { offset, .. } => offset,
        }
    }

    /// Number of bytes the record writes into the target.
    pub fn target_len(&self) -> usize {
        match *self {
            Record::Literal { size, .. } | Record::Fill { size, .. } => usize::from(size),
        }
    }
}

fn read_u16_be(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

fn read_u24_be(bytes: [u8; 3]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// Patch stream wrapper that can tell how many bytes are left before the
/// end without needing `Seek` on the source.
struct PatchReader<R> {
    inner: R,
    peeked: [u8; LOOKAHEAD],
    start: usize,
    end: usize,
}

impl<R: Read> PatchReader<R> {
    fn new(inner: R) -> Self {
        PatchReader {
            inner,
            peeked: [0; LOOKAHEAD],
            start: 0,
            end: 0,
        }
    }

    /// Whether strictly more than `n` unread bytes remain.
    fn has_more_than(&mut self, n: usize) -> io::Result<bool> {
        debug_assert!(n < LOOKAHEAD);

        if self.start > 0 {
            self.peeked.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        while self.end <= n {
            match self.inner.read(&mut self.peeked[self.end..]) {
                Ok(0) => return Ok(false),
                Ok(read) => self.end += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Reads until `buf` is full or the stream ends. Returns the byte count.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn field<const N: usize>(&mut self, name: &'static str) -> Result<[u8; N], IpsError> {
        let mut buf = [0; N];
        let got = self.fill(&mut buf)?;
        if got < N {
            return Err(IpsError::Truncated {
                field: name,
                expected: N,
                got,
            });
        }
        Ok(buf)
    }

    fn next_record(&mut self) -> Result<Record, IpsError> {
        let offset = read_u24_be(self.field("offset")?);
        let size = read_u16_be(self.field("size")?);
        if size > 0 {
            return Ok(Record::Literal { offset, size });
        }

        let size = read_u16_be(self.field("rle_size")?);
        let [value] = self.field::<1>("rle_value")?;
        Ok(Record::Fill {
            offset,
            size,
            value,
        })
    }
}

impl<R: Read> Read for PatchReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.start < self.end {
            let n = buf.len().min(self.end - self.start);
            buf[..n].copy_from_slice(&self.peeked[self.start..self.start + n]);
            self.start += n;
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

/// Checks the header, hands every record to `visit` and checks the trailer.
///
/// `visit` must consume the payload of literal records from the reader.
fn for_each_record<S, F>(source: S, mut visit: F) -> Result<usize, IpsError>
where
    S: Read,
    F: FnMut(Record, &mut PatchReader<S>) -> Result<(), IpsError>,
{
    let mut reader = PatchReader::new(source);

    let mut magic = [0; HEADER.len()];
    if reader.fill(&mut magic)? != HEADER.len() || &magic != HEADER {
        return Err(IpsError::InvalidPatch("bad header"));
    }

    let mut count = 0;
    while reader.has_more_than(TRAILER.len())? {
        let record = reader.next_record()?;
        match record {
            Record::Literal { offset, size } => {
                log::debug!("DATA : {:x}, {:x}", offset, size);
            }
            Record::Fill {
                offset,
                size,
                value,
            } => {
                log::debug!("RLE  : {:x}, {:x}, {:x}", offset, size, value);
            }
        }
        visit(record, &mut reader)?;
        count += 1;
    }

    let mut eof = [0; TRAILER.len()];
    if reader.fill(&mut eof)? != TRAILER.len() || &eof != TRAILER {
        return Err(IpsError::InvalidPatch("missing trailer"));
    }

    Ok(count)
}

/// Streams `size` payload bytes through `buffer` into `destination`.
fn copy_literal<R, W>(
    reader: &mut PatchReader<R>,
    destination: &mut W,
    size: u16,
    buffer: &mut [u8],
) -> Result<(), IpsError>
where
    R: Read,
    W: Write + ?Sized,
{
    let expected = usize::from(size);
    let mut remaining = expected;
    while remaining > 0 {
        let len = remaining.min(buffer.len());
        let chunk = &mut buffer[..len];
        let got = reader.fill(chunk)?;
        if got < chunk.len() {
            return Err(IpsError::Truncated {
                field: "data",
                expected,
                got: expected - remaining + got,
            });
        }
        destination.write_all(chunk)?;
        remaining -= got;
    }
    Ok(())
}

fn check_readable<R: Read + ?Sized>(source: &mut R) -> Result<(), IpsError> {
    source
        .read(&mut [0; 0])
        .map(drop)
        .map_err(|source| IpsError::Precondition {
            requirement: "patch stream must be readable",
            source,
        })
}

fn check_target<W: Write + Seek + ?Sized>(destination: &mut W) -> Result<(), IpsError> {
    destination
        .write(&[0; 0])
        .map_err(|source| IpsError::Precondition {
            requirement: "target stream must be writeable",
            source,
        })?;
    destination
        .stream_position()
        .map(drop)
        .map_err(|source| IpsError::Precondition {
            requirement: "target stream must be seekable",
            source,
        })
}

/// Applies the IPS patch read from `source` to `destination` in place.
///
/// Records may point past the current end of `destination`; the gap is
/// left to the stream to zero-fill, as files and `Cursor<Vec<u8>>` do.
/// `destination` is never read. On error, records already applied stay
/// applied.
pub fn apply<R, W>(source: &mut R, destination: &mut W) -> Result<(), IpsError>
where
    R: Read + ?Sized,
    W: Write + Seek + ?Sized,
{
    check_readable(source)?;
    check_target(destination)?;

    let mut buffer = [0; COPY_BUFFER_SIZE];
    let mut written = 0;
    let records = for_each_record(&mut *source, |record, reader| {
        destination.seek(SeekFrom::Start(u64::from(record.offset())))?;
        match record {
            Record::Literal { size, .. } => {
                copy_literal(reader, &mut *destination, size, &mut buffer)?;
            }
            Record::Fill { size, value, .. } => {
                io::copy(&mut io::repeat(value).take(u64::from(size)), &mut *destination)?;
            }
        }
        written += record.target_len();
        Ok(())
    })?;

    log::info!("Applied {} records, {} bytes written", records, written);
    Ok(())
}

/// Decodes every record of the patch in `source` without applying it.
pub fn list<R: Read + ?Sized>(source: &mut R) -> Result<Vec<Record>, IpsError> {
    check_readable(source)?;

    let mut buffer = [0; COPY_BUFFER_SIZE];
    let mut records = Vec::new();
    for_each_record(&mut *source, |record, reader| {
        if let Record::Literal { size, .. } = record {
            copy_literal(reader, &mut io::sink(), size, &mut buffer)?;
        }
        records.push(record);
        Ok(())
    })?;

    Ok(records)
}
