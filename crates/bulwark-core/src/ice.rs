//! ICE (Information Concealment Engine), the 64-bit block cipher the engine
//! uses for encrypted `.ctx` files.
//!
//! Level 0 is Thin-ICE: 8 rounds and an 8-byte key. Level `n >= 1` runs
//! `16 * n` rounds with an `8 * n`-byte key.

use crate::cipher::BlockCipher;
use crate::reader::{BulwarkError, Result};
use std::sync::OnceLock;

pub const ICE_BLOCK_SIZE: usize = 8;

const SMOD: [[u32; 4]; 4] = [
    [333, 313, 505, 369],
    [379, 375, 319, 391],
    [361, 445, 451, 397],
    [397, 425, 395, 505],
];

const SXOR: [[u32; 4]; 4] = [
    [0x83, 0x85, 0x9b, 0xcd],
    [0xcc, 0xa7, 0xad, 0x41],
    [0x4b, 0x2e, 0xd4, 0x33],
    [0xea, 0xcb, 0x2e, 0x04],
];

const PBOX: [u32; 32] = [
    0x0000_0001, 0x0000_0080, 0x0000_0400, 0x0000_2000,
    0x0008_0000, 0x0020_0000, 0x0100_0000, 0x4000_0000,
    0x0000_0008, 0x0000_0020, 0x0000_0100, 0x0000_4000,
    0x0001_0000, 0x0080_0000, 0x0400_0000, 0x2000_0000,
    0x0000_0004, 0x0000_0010, 0x0000_0200, 0x0000_8000,
    0x0002_0000, 0x0040_0000, 0x0800_0000, 0x1000_0000,
    0x0000_0002, 0x0000_0040, 0x0000_0800, 0x0000_1000,
    0x0004_0000, 0x0010_0000, 0x0200_0000, 0x8000_0000,
];

const KEYROT: [usize; 16] = [0, 1, 2, 3, 2, 1, 3, 0, 1, 3, 2, 0, 3, 1, 0, 2];

type SBoxes = [[u32; 1024]; 4];

/// Multiplication in GF(2^8) modulo `m`.
fn gf_mult(mut a: u32, mut b: u32, m: u32) -> u32 {
    let mut res = 0;
    while b != 0 {
        if b & 1 != 0 {
            res ^= a;
        }
        a <<= 1;
        b >>= 1;
        if a >= 256 {
            a ^= m;
        }
    }
    res
}

fn gf_exp7(b: u32, m: u32) -> u32 {
    if b == 0 {
        return 0;
    }
    let x = gf_mult(b, b, m);
    let x = gf_mult(b, x, m);
    let x = gf_mult(x, x, m);
    gf_mult(b, x, m)
}

fn perm32(mut x: u32) -> u32 {
    let mut res = 0;
    let mut bit = 0;
    while x != 0 {
        if x & 1 != 0 {
            res |= PBOX[bit];
        }
        bit += 1;
        x >>= 1;
    }
    res
}

fn sboxes() -> &'static SBoxes {
    static SBOXES: OnceLock<SBoxes> = OnceLock::new();
    SBOXES.get_or_init(|| {
        let mut sbox = [[0u32; 1024]; 4];
        for i in 0..1024u32 {
            let col = (i >> 1) & 0xff;
            let row = ((i & 0x1) | ((i & 0x200) >> 8)) as usize;
            let idx = i as usize;
            sbox[0][idx] = perm32(gf_exp7(col ^ SXOR[0][row], SMOD[0][row]) << 24);
            sbox[1][idx] = perm32(gf_exp7(col ^ SXOR[1][row], SMOD[1][row]) << 16);
            sbox[2][idx] = perm32(gf_exp7(col ^ SXOR[2][row], SMOD[2][row]) << 8);
            sbox[3][idx] = perm32(gf_exp7(col ^ SXOR[3][row], SMOD[3][row]));
        }
        sbox
    })
}

/// Round function. Expands the 32-bit half to two 20-bit halves, salts,
/// keys, then substitutes and permutes.
fn round(p: u32, subkey: &[u32; 3]) -> u32 {
    let tl = ((p >> 16) & 0x3ff) | (((p >> 14) | (p << 18)) & 0xffc00);
    let tr = (p & 0x3ff) | ((p << 2) & 0xffc00);

    let mut al = subkey[2] & (tl ^ tr);
    let mut ar = al ^ tr;
    al ^= tl;

    al ^= subkey[0];
    ar ^= subkey[1];

    let sbox = sboxes();
    sbox[0][(al >> 10) as usize]
        | sbox[1][(al & 0x3ff) as usize]
        | sbox[2][(ar >> 10) as usize]
        | sbox[3][(ar & 0x3ff) as usize]
}

#[derive(Clone)]
pub struct IceKey {
    size: usize,
    schedule: Vec<[u32; 3]>,
}

impl std::fmt::Debug for IceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceKey")
            .field("size", &self.size)
            .field("rounds", &self.schedule.len())
            .finish_non_exhaustive()
    }
}

impl IceKey {
    /// Key length in bytes for the given level.
    pub fn key_size(level: usize) -> usize {
        level.max(1) * 8
    }

    pub fn new(level: usize, key: &[u8]) -> Result<Self> {
        let expected = Self::key_size(level);
        if key.len() != expected {
            return Err(BulwarkError::InvalidKeySize {
                expected,
                actual: key.len(),
            });
        }

        let (size, rounds) = match level {
            0 => (1, 8),
            n => (n, n * 16),
        };
        let mut ice = Self {
            size,
            schedule: vec![[0; 3]; rounds],
        };
        ice.set_key(key);
        Ok(ice)
    }

    pub fn rounds(&self) -> usize {
        self.schedule.len()
    }

    fn set_key(&mut self, key: &[u8]) {
        let rounds = self.rounds();
        if rounds == 8 {
            let mut kb = Self::key_words(&key[..8]);
            self.build_schedule(&mut kb, 0, &KEYROT[..8]);
            return;
        }

        for i in 0..self.size {
            let mut kb = Self::key_words(&key[i * 8..i * 8 + 8]);
            self.build_schedule(&mut kb, i * 8, &KEYROT[..8]);
            self.build_schedule(&mut kb, rounds - 8 - i * 8, &KEYROT[8..]);
        }
    }

    fn key_words(key: &[u8]) -> [u16; 4] {
        let mut kb = [0u16; 4];
        for i in 0..4 {
            kb[3 - i] = u16::from_be_bytes([key[i * 2], key[i * 2 + 1]]);
        }
        kb
    }

    fn build_schedule(&mut self, kb: &mut [u16; 4], start: usize, keyrot: &[usize]) {
        for (i, &kr) in keyrot.iter().enumerate() {
            let subkey = &mut self.schedule[start + i];
            *subkey = [0; 3];

            for j in 0..15 {
                let current = &mut subkey[j % 3];
                for k in 0..4 {
                    let word = &mut kb[(kr + k) & 3];
                    let bit = *word & 1;
                    *current = (*current << 1) | u32::from(bit);
                    *word = (*word >> 1) | ((bit ^ 1) << 15);
                }
            }
        }
    }

    fn load(block: &[u8]) -> (u32, u32) {
        let l = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
        let r = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
        (l, r)
    }

    fn store(block: &mut [u8], l: u32, r: u32) {
        block[..4].copy_from_slice(&r.to_be_bytes());
        block[4..8].copy_from_slice(&l.to_be_bytes());
    }
}

impl BlockCipher for IceKey {
    fn block_size(&self) -> usize {
        ICE_BLOCK_SIZE
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let (mut l, mut r) = Self::load(block);
        for pair in self.schedule.chunks_exact(2) {
            l ^= round(r, &pair[0]);
            r ^= round(l, &pair[1]);
        }
        Self::store(block, l, r);
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let (mut l, mut r) = Self::load(block);
        for pair in self.schedule.rchunks_exact(2) {
            l ^= round(r, &pair[1]);
            r ^= round(l, &pair[0]);
        }
        Self::store(block, l, r);
    }
}
