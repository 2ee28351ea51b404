use zerocopy::byteorder::{LittleEndian, I32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub mod cipher;
pub mod entities;
pub mod ice;
pub mod patcher;
pub mod reader;

pub use cipher::{BlockCipher, ENTITY_KEY};
pub use entities::{EntitySplit, SPAWN_POINT_RECORD};
pub use ice::IceKey;
pub use patcher::{patch_map, patch_map_with, MapPaths, PatchOptions, PatchReport, Stage};
pub use reader::{BulwarkError, MapFile, Result};

/// Magic bytes 'VBSP' to identify the map format.
pub const VBSP_MAGIC: [u8; 4] = *b"VBSP";

/// Number of entries in the lump directory.
pub const HEADER_LUMPS: usize = 64;

/// Directory slot holding the entity text lump.
pub const ENTITY_LUMP_INDEX: usize = 0;

/// ident + version + lump directory + map revision.
pub const HEADER_SIZE: usize = 4 + 4 + HEADER_LUMPS * 16 + 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, AsBytes, FromZeroes)]
pub struct LumpDescriptor {
    pub file_offset: I32<LittleEndian>,
    pub file_length: I32<LittleEndian>,
    pub version: I32<LittleEndian>,
    pub four_cc: [u8; 4],
}

impl LumpDescriptor {
    pub fn new(file_offset: i32, file_length: i32) -> Self {
        Self {
            file_offset: I32::new(file_offset),
            file_length: I32::new(file_length),
            version: I32::new(0),
            four_cc: [0; 4],
        }
    }

    pub fn offset(&self) -> i32 {
        self.file_offset.get()
    }

    pub fn length(&self) -> i32 {
        self.file_length.get()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, AsBytes, FromZeroes)]
pub struct BspHeader {
    pub ident: [u8; 4],
    pub version: I32<LittleEndian>,
    pub lumps: [LumpDescriptor; HEADER_LUMPS],
    pub map_revision: I32<LittleEndian>,
}

const _: () = assert!(std::mem::size_of::<BspHeader>() == HEADER_SIZE);

impl BspHeader {
    pub fn version(&self) -> i32 {
        self.version.get()
    }

    pub fn map_revision(&self) -> i32 {
        self.map_revision.get()
    }

    pub fn entity_lump(&self) -> &LumpDescriptor {
        &self.lumps[ENTITY_LUMP_INDEX]
    }
}

impl Default for BspHeader {
    fn default() -> Self {
        let mut header = Self::new_zeroed();
        header.ident = VBSP_MAGIC;
        header.version = I32::new(20);
        header
    }
}
