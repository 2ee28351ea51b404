use crate::entities::{self, EntitySplit};
use crate::{BspHeader, HEADER_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use zerocopy::FromBytes;

#[derive(Error, Debug)]
pub enum BulwarkError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Map file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Invalid Map: ident mismatch (found {found:?}, expected \"VBSP\")")]
    FormatMismatch { found: [u8; 4] },
    #[error("Lump out of bounds: offset {offset}, length {length}, file size {file_size}")]
    LumpOutOfBounds {
        offset: i64,
        length: i64,
        file_size: u64,
    },
    #[error("Malformed entity lump: no closing brace for the worldspawn entity")]
    MalformedEntityLump,
    #[error("Spawn point needs {needed} bytes but only {available} follow the worldspawn entity")]
    SpawnPointOverflow { needed: usize, available: usize },
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("Short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },
    #[error("Invalid map path: {}", .0.display())]
    InvalidMapPath(PathBuf),
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },
    #[error("Ciphertext length {len} is not a multiple of the {block_size}-byte block")]
    UnalignedCiphertext { len: usize, block_size: usize },
}

pub type Result<T> = std::result::Result<T, BulwarkError>;

/// Fills `buf` completely or reports how far the source got.
pub(crate) fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(BulwarkError::ShortRead {
                    expected: buf.len(),
                    actual: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Writes all of `bytes` or reports how many the sink accepted.
pub(crate) fn write_full<W: Write>(sink: &mut W, bytes: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        match sink.write(&bytes[written..]) {
            Ok(0) => {
                return Err(BulwarkError::ShortWrite {
                    expected: bytes.len(),
                    actual: written,
                })
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WriteZero => {
                return Err(BulwarkError::ShortWrite {
                    expected: bytes.len(),
                    actual: written,
                })
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Reads and validates the fixed header from the start of `source`.
///
/// Only the ident is checked. The format version has drifted across engine
/// releases, so any version is accepted.
pub fn read_header<R: Read>(source: &mut R) -> Result<BspHeader> {
    let mut header_buffer = [0u8; HEADER_SIZE];
    read_full(source, &mut header_buffer)?;

    let header = BspHeader::read_from(&header_buffer[..])
        .ok_or(io::Error::new(io::ErrorKind::InvalidData, "Header too short"))?;

    if header.ident != crate::VBSP_MAGIC {
        return Err(BulwarkError::FormatMismatch {
            found: header.ident,
        });
    }

    debug!(
        version = header.version(),
        map_revision = header.map_revision(),
        "read map header"
    );
    Ok(header)
}

/// A map container opened for in-place patching.
pub struct MapFile<F = File> {
    file: F,
    header: BspHeader,
    file_size: u64,
}

impl MapFile<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => BulwarkError::FileNotFound(path.to_path_buf()),
                _ => e.into(),
            })?;
        Self::from_handle(file)
    }
}

impl<F: Read + Write + Seek> MapFile<F> {
    pub fn from_handle(mut file: F) -> Result<Self> {
        let file_size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        let header = read_header(&mut file)?;

        Ok(Self {
            file,
            header,
            file_size,
        })
    }

    pub fn header(&self) -> &BspHeader {
        &self.header
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Byte range of the entity lump, checked against the file size.
    pub fn entity_lump_span(&self) -> Result<(u64, usize)> {
        let lump = self.header.entity_lump();
        let (offset, length) = (i64::from(lump.offset()), i64::from(lump.length()));
        let out_of_bounds = BulwarkError::LumpOutOfBounds {
            offset,
            length,
            file_size: self.file_size,
        };

        if offset < 0 || length < 0 {
            return Err(out_of_bounds);
        }
        // Both values fit in 31 bits, so the sum cannot overflow.
        let (offset, length) = (offset as u64, length as u64);
        if offset + length > self.file_size {
            return Err(out_of_bounds);
        }
        Ok((offset, length as usize))
    }

    /// Reads the whole entity lump, including its trailing terminator.
    pub fn read_entity_lump(&mut self) -> Result<Vec<u8>> {
        let (offset, length) = self.entity_lump_span()?;
        debug!(offset, length, "reading entity lump");

        self.file.seek(SeekFrom::Start(offset))?;
        let mut lump = vec![0u8; length];
        read_full(&mut self.file, &mut lump)?;
        Ok(lump)
    }

    /// Overwrites the entity lump's tail with the spawn point and null
    /// padding. Returns the padding length.
    pub fn inject_spawn_point(&mut self, split: &EntitySplit<'_>) -> Result<usize> {
        let (offset, _) = self.entity_lump_span()?;
        let tail_len = split.remainder.len();
        // Validate before seeking so an overflow leaves the file untouched.
        entities::padding_for(tail_len)?;

        let cursor = offset + split.boundary as u64;
        debug!(cursor, tail_len, "injecting spawn point");
        self.file.seek(SeekFrom::Start(cursor))?;
        let padding = entities::write_spawn_point(&mut self.file, tail_len)?;
        self.file.flush()?;
        Ok(padding)
    }

    pub fn into_inner(self) -> F {
        self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LumpDescriptor, HEADER_LUMPS};
    use std::io::Cursor;
    use zerocopy::byteorder::I32;
    use zerocopy::AsBytes;

    fn sample_header() -> BspHeader {
        let mut header = BspHeader::default();
        for (i, lump) in header.lumps.iter_mut().enumerate() {
            *lump = LumpDescriptor::new(HEADER_SIZE as i32 + i as i32 * 4, 4);
            lump.version = I32::new(i as i32 % 3);
            lump.four_cc = [i as u8, 0, 0, 0];
        }
        header.map_revision = I32::new(4242);
        header
    }

    fn container(header: &BspHeader, body: &[u8]) -> Cursor<Vec<u8>> {
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(body);
        Cursor::new(bytes)
    }

    #[test]
    fn reads_all_lump_descriptors() {
        let header = sample_header();
        let parsed = read_header(&mut Cursor::new(header.as_bytes().to_vec())).unwrap();

        assert_eq!(parsed.lumps.len(), HEADER_LUMPS);
        for (i, lump) in parsed.lumps.iter().enumerate() {
            assert_eq!(lump.offset(), HEADER_SIZE as i32 + i as i32 * 4);
            assert_eq!(lump.length(), 4);
            assert_eq!(lump.version.get(), i as i32 % 3);
            assert_eq!(lump.four_cc[0], i as u8);
        }
        assert_eq!(parsed.map_revision(), 4242);
    }

    #[test]
    fn rejects_wrong_ident() {
        let mut header = sample_header();
        header.ident = *b"IBSP";
        let err = read_header(&mut Cursor::new(header.as_bytes().to_vec())).unwrap_err();
        assert!(matches!(err, BulwarkError::FormatMismatch { found } if &found == b"IBSP"));
    }

    #[test]
    fn accepts_any_version() {
        for version in [0, 19, 20, 21, -7] {
            let mut header = sample_header();
            header.version = I32::new(version);
            let parsed = read_header(&mut Cursor::new(header.as_bytes().to_vec())).unwrap();
            assert_eq!(parsed.version(), version);
        }
    }

    #[test]
    fn truncated_header_is_a_short_read() {
        let bytes = sample_header().as_bytes()[..100].to_vec();
        let err = read_header(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            BulwarkError::ShortRead {
                expected: HEADER_SIZE,
                actual: 100
            }
        ));
    }

    #[test]
    fn partial_write_reports_bytes_accepted() {
        let mut buf = [0u8; 6];
        let mut sink = &mut buf[..];
        let err = write_full(&mut sink, b"worldspawn").unwrap_err();
        assert!(matches!(
            err,
            BulwarkError::ShortWrite {
                expected: 10,
                actual: 6
            }
        ));
        assert_eq!(&buf, b"worlds");
    }

    #[test]
    fn reads_entity_lump_bytes() {
        let mut header = BspHeader::default();
        header.lumps[0] = LumpDescriptor::new(HEADER_SIZE as i32 + 2, 5);
        let mut map = MapFile::from_handle(container(&header, b"xx{ab}\0yy")).unwrap();

        assert_eq!(map.read_entity_lump().unwrap(), b"{ab}\0");
    }

    #[test]
    fn lump_past_end_of_file_is_rejected() {
        let mut header = BspHeader::default();
        header.lumps[0] = LumpDescriptor::new(HEADER_SIZE as i32, 64);
        let mut map = MapFile::from_handle(container(&header, b"{}\n\0")).unwrap();

        let err = map.read_entity_lump().unwrap_err();
        assert!(matches!(err, BulwarkError::LumpOutOfBounds { length: 64, .. }));
    }

    #[test]
    fn negative_lump_offset_is_rejected() {
        let mut header = BspHeader::default();
        header.lumps[0] = LumpDescriptor::new(-4, 4);
        let mut map = MapFile::from_handle(container(&header, b"{}\n\0")).unwrap();

        assert!(matches!(
            map.read_entity_lump(),
            Err(BulwarkError::LumpOutOfBounds { offset: -4, .. })
        ));
    }

    #[test]
    fn missing_file_is_reported_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nowhere.bsp");
        match MapFile::open(&path) {
            Err(BulwarkError::FileNotFound(p)) => assert_eq!(p, path),
            other => panic!("expected FileNotFound, got {:?}", other.err()),
        }
    }
}
