use crate::cipher::{encrypt_ecb, BlockCipher, ENTITY_KEY};
use crate::entities::split_entities;
use crate::ice::IceKey;
use crate::reader::{write_full, BulwarkError, MapFile, Result};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Steps of a patch run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    HeaderRead,
    EntityLumpRead,
    Split,
    Backup,
    InjectAndPad,
    EmitPlaintext,
    EmitCiphertext,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::HeaderRead => "header read",
            Stage::EntityLumpRead => "entity lump read",
            Stage::Split => "entity split",
            Stage::Backup => "backup",
            Stage::InjectAndPad => "spawn point injection",
            Stage::EmitPlaintext => "plaintext dump",
            Stage::EmitCiphertext => "encrypted dump",
        };
        f.write_str(name)
    }
}

/// Files touched by a patch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapPaths {
    pub container: PathBuf,
    pub plaintext: PathBuf,
    pub ciphertext: PathBuf,
}

impl MapPaths {
    /// Derives the sidecar paths from the map path by swapping its extension
    /// for `.entities.txt` and `.entities.ctx`.
    pub fn from_map_path<P: AsRef<Path>>(map: P) -> Result<Self> {
        let container = map.as_ref().to_path_buf();
        if container.extension().is_none() {
            return Err(BulwarkError::InvalidMapPath(container));
        }
        let base = container.with_extension("");

        Ok(Self {
            plaintext: with_suffix(&base, ".entities.txt"),
            ciphertext: with_suffix(&base, ".entities.ctx"),
            container,
        })
    }

    pub fn backup(&self) -> PathBuf {
        with_suffix(&self.container, ".bak")
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug, Clone, Default)]
pub struct PatchOptions {
    /// Copy the map aside before it is modified.
    pub backup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub lump_offset: u64,
    pub lump_length: usize,
    pub boundary: usize,
    pub remainder_len: usize,
    pub padding_len: usize,
    pub ciphertext_len: usize,
    pub backup: Option<PathBuf>,
}

fn at<T>(stage: Stage, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        error!(%stage, error = %e, "map patch aborted");
    }
    result
}

/// Creates (or truncates) `path` and writes `bytes` to it.
fn write_sidecar(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    write_full(&mut file, bytes)?;
    debug!(path = %path.display(), len = bytes.len(), "wrote sidecar");
    Ok(())
}

/// Patches the map with the engine's Thin-ICE entity key.
pub fn patch_map(paths: &MapPaths, options: &PatchOptions) -> Result<PatchReport> {
    let cipher = IceKey::new(0, &ENTITY_KEY)?;
    patch_map_with(paths, options, &cipher)
}

/// Moves every entity after worldspawn out of the map into the plaintext and
/// encrypted dumps, leaving a lone spawn point behind.
///
/// Stages run in [`Stage`] order and stop at the first failure. Work already
/// committed is not rolled back: a failure while writing the dumps leaves the
/// map patched.
pub fn patch_map_with<C: BlockCipher + ?Sized>(
    paths: &MapPaths,
    options: &PatchOptions,
    cipher: &C,
) -> Result<PatchReport> {
    let mut map = at(Stage::HeaderRead, MapFile::open(&paths.container))?;
    let (lump_offset, lump_length) = at(Stage::EntityLumpRead, map.entity_lump_span())?;
    let lump = at(Stage::EntityLumpRead, map.read_entity_lump())?;

    let split = at(Stage::Split, split_entities(&lump))?;
    info!(
        boundary = split.boundary,
        remainder = split.remainder.len(),
        "split entity lump after worldspawn"
    );

    let backup = if options.backup {
        let target = paths.backup();
        at(Stage::Backup, fs::copy(&paths.container, &target).map_err(BulwarkError::from))?;
        info!(path = %target.display(), "backed up map");
        Some(target)
    } else {
        None
    };

    let padding_len = at(Stage::InjectAndPad, map.inject_spawn_point(&split))?;
    drop(map);
    info!(padding = padding_len, "injected spawn point");

    at(Stage::EmitPlaintext, write_sidecar(&paths.plaintext, split.remainder))?;

    let ciphertext = encrypt_ecb(cipher, split.remainder);
    at(Stage::EmitCiphertext, write_sidecar(&paths.ciphertext, &ciphertext))?;
    info!(len = ciphertext.len(), "wrote encrypted entities");

    Ok(PatchReport {
        lump_offset,
        lump_length,
        boundary: split.boundary,
        remainder_len: split.remainder.len(),
        padding_len,
        ciphertext_len: ciphertext.len(),
        backup,
    })
}
