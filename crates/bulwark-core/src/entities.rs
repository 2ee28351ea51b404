//! Splitting the entity lump after the worldspawn record and writing the
//! replacement spawn point.

use crate::reader::{write_full, BulwarkError, Result};
use std::io::Write;
use tracing::warn;

/// Entity written in place of everything after worldspawn.
pub const SPAWN_POINT_RECORD: &[u8] =
    b"\n{\n\"origin\" \"0 0 0\"\n\"angles\" \"0 0 0\"\n\"classname\" \"info_player_start\"\n}\n";

/// The entity lump cut after its first record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySplit<'a> {
    /// Offset of the first byte after worldspawn, relative to the lump start.
    pub boundary: usize,
    pub worldspawn: &'a [u8],
    pub remainder: &'a [u8],
}

/// Splits a raw entity lump (terminator included) after its first `}` and
/// the line break following it.
pub fn split_entities(lump: &[u8]) -> Result<EntitySplit<'_>> {
    let content = match lump.split_last() {
        Some((&0, content)) => content,
        Some((&last, content)) => {
            warn!(last, "entity lump does not end in a null terminator");
            content
        }
        None => return Err(BulwarkError::MalformedEntityLump),
    };

    let brace = content
        .iter()
        .position(|&b| b == b'}')
        .ok_or(BulwarkError::MalformedEntityLump)?;
    let boundary = brace + 2;
    if boundary > content.len() {
        return Err(BulwarkError::MalformedEntityLump);
    }

    let (worldspawn, remainder) = content.split_at(boundary);
    Ok(EntitySplit {
        boundary,
        worldspawn,
        remainder,
    })
}

/// Null bytes needed after the spawn point to fill `tail_len` bytes.
pub fn padding_for(tail_len: usize) -> Result<usize> {
    tail_len
        .checked_sub(SPAWN_POINT_RECORD.len())
        .ok_or(BulwarkError::SpawnPointOverflow {
            needed: SPAWN_POINT_RECORD.len(),
            available: tail_len,
        })
}

/// Writes the spawn point followed by null padding, `tail_len` bytes in
/// total. Returns the padding length.
pub fn write_spawn_point<W: Write>(sink: &mut W, tail_len: usize) -> Result<usize> {
    let padding = padding_for(tail_len)?;
    write_full(sink, SPAWN_POINT_RECORD)?;
    write_full(sink, &vec![0u8; padding])?;
    Ok(padding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn boundary_is_two_past_first_brace() {
        let lump = b"{\n\"classname\" \"worldspawn\"\n}\n{\n\"classname\" \"light\"\n}\n\0";
        let split = split_entities(lump).unwrap();

        let brace = lump.iter().position(|&b| b == b'}').unwrap();
        assert_eq!(split.boundary, brace + 2);
        assert_eq!(split.worldspawn, b"{\n\"classname\" \"worldspawn\"\n}\n");
        assert_eq!(split.remainder, b"{\n\"classname\" \"light\"\n}\n");
    }

    #[test]
    fn halves_rebuild_lump_without_terminator() {
        let lump = b"{\"classname\" \"worldspawn\"}\n{\"classname\" \"light\"}\0";
        let split = split_entities(lump).unwrap();

        let joined = [split.worldspawn, split.remainder].concat();
        assert_eq!(joined.as_slice(), &lump[..lump.len() - 1]);
        assert_eq!(split.worldspawn, b"{\"classname\" \"worldspawn\"}\n");
        assert_eq!(split.remainder, b"{\"classname\" \"light\"}");
    }

    #[test]
    fn lump_without_brace_is_malformed() {
        let lump = b"{\"classname\" \"worldspawn\"\n\0";
        assert!(matches!(
            split_entities(lump),
            Err(BulwarkError::MalformedEntityLump)
        ));
    }

    #[test]
    fn brace_in_terminator_slot_is_not_seen() {
        // The final byte is the terminator even when it is not NUL.
        assert!(matches!(
            split_entities(b"{abc}"),
            Err(BulwarkError::MalformedEntityLump)
        ));
    }

    #[test]
    fn brace_without_line_break_is_malformed() {
        assert!(matches!(
            split_entities(b"{abc}\0"),
            Err(BulwarkError::MalformedEntityLump)
        ));
    }

    #[test]
    fn empty_lump_is_malformed() {
        assert!(matches!(
            split_entities(b""),
            Err(BulwarkError::MalformedEntityLump)
        ));
        assert!(matches!(
            split_entities(b"\0"),
            Err(BulwarkError::MalformedEntityLump)
        ));
    }

    #[test]
    fn worldspawn_only_leaves_empty_remainder() {
        let split = split_entities(b"{}\n\0").unwrap();
        assert_eq!(split.worldspawn, b"{}\n");
        assert!(split.remainder.is_empty());
    }

    #[test]
    fn spawn_point_fills_exact_tail() {
        let tail_len = SPAWN_POINT_RECORD.len() + 29;
        let mut out = Vec::new();
        let padding = write_spawn_point(&mut out, tail_len).unwrap();

        assert_eq!(padding, 29);
        assert_eq!(SPAWN_POINT_RECORD.len() + padding, tail_len);
        assert_eq!(out.len(), tail_len);
        assert_eq!(&out[..SPAWN_POINT_RECORD.len()], SPAWN_POINT_RECORD);
        assert!(out[SPAWN_POINT_RECORD.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn spawn_point_larger_than_tail_writes_nothing() {
        let mut out = Vec::new();
        let err = write_spawn_point(&mut out, 21).unwrap_err();

        assert!(matches!(
            err,
            BulwarkError::SpawnPointOverflow {
                needed: 71,
                available: 21
            }
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn full_sink_is_a_short_write() {
        let mut buf = [0u8; 10];
        let mut sink = &mut buf[..];
        let err = write_spawn_point(&mut sink, 100).unwrap_err();
        assert!(matches!(
            err,
            BulwarkError::ShortWrite {
                expected: 71,
                actual: 10
            }
        ));
    }

    #[test]
    fn sink_full_during_padding_is_a_short_write() {
        let mut buf = [0xffu8; 80];
        let mut sink = &mut buf[..];
        let err = write_spawn_point(&mut sink, 100).unwrap_err();

        assert!(matches!(
            err,
            BulwarkError::ShortWrite {
                expected: 29,
                actual: 9
            }
        ));
        assert_eq!(&buf[..SPAWN_POINT_RECORD.len()], SPAWN_POINT_RECORD);
        assert!(buf[SPAWN_POINT_RECORD.len()..].iter().all(|&b| b == 0));
    }
}
