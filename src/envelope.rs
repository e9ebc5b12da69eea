//! Envelope (spec 4.3): the in-memory shape of a key block followed by a
//! preamble, and the serialize/verify facade over the primitives in
//! `primitives.rs`. All serialization is little-endian and packed, with
//! sizes drawn from in-band size fields, as spec 4.3 requires.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ed25519_dalek::VerifyingKey;
use std::io::Cursor;
use std::path::Path;

use crate::error::{Result, SignError};
use crate::primitives::{self, PrivateKey, PUBLIC_KEY_LEN, SIGNATURE_LEN};

pub const KEY_BLOCK_MAGIC: &[u8; 8] = b"VBKEYBLK";
pub const FW_PREAMBLE_MAGIC: &[u8; 8] = b"VBFWPRE0";
pub const KERNEL_PREAMBLE_MAGIC: &[u8; 8] = b"VBKPRE00";

/// Header-only fixed part of a key block: magic + its own total size.
const KEY_BLOCK_HEADER_LEN: usize = 32;
/// Kernel preambles carry a flags field starting at this header version;
/// spec 4.3 calls this "controlled by a version gate".
const KERNEL_PREAMBLE_FLAGS_VERSION: u32 = 2;

/// Self-describing wrapper around a public "data key", signed by a
/// higher-level signing key. Parsed as a borrowed view into a mapped or
/// owned buffer -- no allocation beyond the owned variant used when
/// freshly created.
#[derive(Debug, Clone)]
pub struct KeyBlock {
    pub key_block_size: u32,
    pub data_key_version: u32,
    pub flags: u32,
    pub data_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl KeyBlock {
    pub fn peek_magic(buf: &[u8]) -> bool {
        buf.len() >= 8 && &buf[0..8] == KEY_BLOCK_MAGIC
    }

    /// Structural parse: magic correct, size fields self-consistent, and
    /// `key_block_size` fits within `buf`. Mirrors `KeyBlockRead` minus any
    /// cryptographic check.
    pub fn parse(buf: &[u8]) -> Result<KeyBlock> {
        if buf.len() < KEY_BLOCK_HEADER_LEN {
            return Err(SignError::FormatError("buffer too short for a key block header".into()));
        }
        let mut c = Cursor::new(buf);
        let mut magic = [0u8; 8];
        std::io::Read::read_exact(&mut c, &mut magic)?;
        if &magic != KEY_BLOCK_MAGIC {
            return Err(SignError::FormatError("bad key block magic".into()));
        }
        let key_block_size = c.read_u32::<LittleEndian>()?;
        let _data_key_algorithm = c.read_u32::<LittleEndian>()?;
        let data_key_version = c.read_u32::<LittleEndian>()?;
        let flags = c.read_u32::<LittleEndian>()?;
        let data_key_len = c.read_u32::<LittleEndian>()? as usize;
        let signature_len = c.read_u32::<LittleEndian>()? as usize;

        let expected = KEY_BLOCK_HEADER_LEN + data_key_len + signature_len;
        if expected as u32 != key_block_size {
            return Err(SignError::FormatError("key block size fields are inconsistent".into()));
        }
        if key_block_size as usize > buf.len() {
            return Err(SignError::FormatError("key block size exceeds its containing region".into()));
        }

        let data_key = buf[KEY_BLOCK_HEADER_LEN..KEY_BLOCK_HEADER_LEN + data_key_len].to_vec();
        let sig_start = KEY_BLOCK_HEADER_LEN + data_key_len;
        let signature = buf[sig_start..sig_start + signature_len].to_vec();

        Ok(KeyBlock { key_block_size, data_key_version, flags, data_key, signature })
    }

    /// The bytes that are covered by `signature` -- header plus data key.
    fn signed_region(bytes: &[u8]) -> &[u8] {
        let data_key_len_offset = 24;
        let data_key_len =
            u32::from_le_bytes(bytes[data_key_len_offset..data_key_len_offset + 4].try_into().unwrap())
                as usize;
        &bytes[..KEY_BLOCK_HEADER_LEN + data_key_len]
    }

    /// Full cryptographic verification against `root_pubkey`: used by
    /// testable property 5 ("verification of a freshly produced envelope
    /// against the paired public key succeeds").
    pub fn verify_signature(raw: &[u8], root_pubkey: &VerifyingKey) -> Result<()> {
        let kb = KeyBlock::parse(raw)?;
        if kb.signature.is_empty() {
            return Err(SignError::FormatError("key block has no signature".into()));
        }
        primitives::verify(KeyBlock::signed_region(raw), &kb.signature, root_pubkey)
    }

    pub fn data_key_as_verifying(&self) -> Result<VerifyingKey> {
        primitives::bytes_to_verifying_key(&self.data_key, Path::new("<embedded data key>"))
    }
}

fn write_u32_all(out: &mut Vec<u8>, v: u32) {
    out.write_u32::<LittleEndian>(v).unwrap();
}

/// `create_keyblock(pubkey, signer, flags) -> bytes`.
pub fn create_keyblock(pubkey: &[u8], signer: Option<&PrivateKey>, flags: u32) -> Result<Vec<u8>> {
    if pubkey.len() != PUBLIC_KEY_LEN {
        return Err(SignError::FormatError(format!(
            "public key must be {PUBLIC_KEY_LEN} bytes, got {}",
            pubkey.len()
        )));
    }
    let signature_len = if signer.is_some() { SIGNATURE_LEN } else { 0 };
    let key_block_size = KEY_BLOCK_HEADER_LEN + pubkey.len() + signature_len;

    let mut out = Vec::with_capacity(key_block_size);
    out.extend_from_slice(KEY_BLOCK_MAGIC);
    write_u32_all(&mut out, key_block_size as u32);
    write_u32_all(&mut out, 0); // data_key_algorithm: 0 = Ed25519
    write_u32_all(&mut out, 0); // data_key_version
    write_u32_all(&mut out, flags);
    write_u32_all(&mut out, pubkey.len() as u32);
    write_u32_all(&mut out, signature_len as u32);
    out.extend_from_slice(pubkey);

    if let Some(signer) = signer {
        let sig = primitives::sign(&out, signer);
        out.extend_from_slice(&sig);
    }

    Ok(out)
}

/// `create_keyblock_external(pubkey, pem_path, algo, flags, helper_program) -> bytes`.
/// Delegates signature computation to an external helper; `pem_path`'s
/// private key never needs to be loaded into this process.
pub fn create_keyblock_external(
    pubkey: &[u8],
    _pem_path: &Path,
    _algo: u32,
    flags: u32,
    helper_program: &Path,
) -> Result<Vec<u8>> {
    if pubkey.len() != PUBLIC_KEY_LEN {
        return Err(SignError::FormatError(format!(
            "public key must be {PUBLIC_KEY_LEN} bytes, got {}",
            pubkey.len()
        )));
    }
    let key_block_size = KEY_BLOCK_HEADER_LEN + pubkey.len() + SIGNATURE_LEN;
    let mut unsigned = Vec::with_capacity(key_block_size);
    unsigned.extend_from_slice(KEY_BLOCK_MAGIC);
    write_u32_all(&mut unsigned, key_block_size as u32);
    write_u32_all(&mut unsigned, 0);
    write_u32_all(&mut unsigned, 0);
    write_u32_all(&mut unsigned, flags);
    write_u32_all(&mut unsigned, pubkey.len() as u32);
    write_u32_all(&mut unsigned, SIGNATURE_LEN as u32);
    unsigned.extend_from_slice(pubkey);

    let sig = primitives::sign_external(&unsigned, helper_program)?;
    unsigned.extend_from_slice(&sig);
    Ok(unsigned)
}

/// A firmware preamble: names the next key in the chain (the kernel
/// subkey), signs a body, and carries version/flags metadata.
#[derive(Debug, Clone)]
pub struct FirmwarePreamble {
    pub preamble_size: u32,
    pub version: u32,
    pub flags: u32,
    pub body_data_size: u32,
    pub body_signature: Vec<u8>,
}

const FW_PREAMBLE_HEADER_LEN: usize = 36;

impl FirmwarePreamble {
    pub fn peek_magic(buf: &[u8]) -> bool {
        buf.len() >= 8 && &buf[0..8] == FW_PREAMBLE_MAGIC
    }

    pub fn parse(buf: &[u8]) -> Result<FirmwarePreamble> {
        if buf.len() < FW_PREAMBLE_HEADER_LEN {
            return Err(SignError::FormatError("buffer too short for a firmware preamble".into()));
        }
        let mut c = Cursor::new(buf);
        let mut magic = [0u8; 8];
        std::io::Read::read_exact(&mut c, &mut magic)?;
        if &magic != FW_PREAMBLE_MAGIC {
            return Err(SignError::FormatError("bad firmware preamble magic".into()));
        }
        let preamble_size = c.read_u32::<LittleEndian>()?;
        let version = c.read_u32::<LittleEndian>()?;
        let flags = c.read_u32::<LittleEndian>()?;
        let kernel_subkey_len = c.read_u32::<LittleEndian>()? as usize;
        let body_data_size = c.read_u32::<LittleEndian>()?;
        let body_sig_len = c.read_u32::<LittleEndian>()? as usize;
        let preamble_sig_len = c.read_u32::<LittleEndian>()? as usize;

        let expected = FW_PREAMBLE_HEADER_LEN + kernel_subkey_len + body_sig_len + preamble_sig_len;
        if expected as u32 != preamble_size {
            return Err(SignError::FormatError("firmware preamble size fields are inconsistent".into()));
        }
        let body_sig_start = FW_PREAMBLE_HEADER_LEN + kernel_subkey_len;
        let body_signature = buf[body_sig_start..body_sig_start + body_sig_len].to_vec();

        Ok(FirmwarePreamble { preamble_size, version, flags, body_data_size, body_signature })
    }
}

/// `create_firmware_preamble(version, kernel_subkey, body_signature, signer, flags) -> bytes`.
pub fn create_firmware_preamble(
    version: u32,
    kernel_subkey: &[u8],
    body_signature: &[u8],
    body_data_size: u32,
    signer: &PrivateKey,
    flags: u32,
) -> Result<Vec<u8>> {
    let preamble_size =
        FW_PREAMBLE_HEADER_LEN + kernel_subkey.len() + body_signature.len() + SIGNATURE_LEN;

    let mut unsigned = Vec::with_capacity(preamble_size - SIGNATURE_LEN);
    unsigned.extend_from_slice(FW_PREAMBLE_MAGIC);
    write_u32_all(&mut unsigned, preamble_size as u32);
    write_u32_all(&mut unsigned, version);
    write_u32_all(&mut unsigned, flags);
    write_u32_all(&mut unsigned, kernel_subkey.len() as u32);
    write_u32_all(&mut unsigned, body_data_size);
    write_u32_all(&mut unsigned, body_signature.len() as u32);
    write_u32_all(&mut unsigned, SIGNATURE_LEN as u32);
    unsigned.extend_from_slice(kernel_subkey);
    unsigned.extend_from_slice(body_signature);

    let sig = primitives::sign(&unsigned, signer);
    let mut out = unsigned;
    out.extend_from_slice(&sig);
    Ok(out)
}

/// A kernel preamble: names the load address, signs a kernel blob body,
/// and optionally carries a flags field (version-gated).
#[derive(Debug, Clone)]
pub struct KernelPreamble {
    pub preamble_size: u32,
    pub kernel_version: u32,
    pub body_load_address: u32,
    pub body_data_size: u32,
    pub header_version: u32,
    pub flags: u32,
}

const KERNEL_PREAMBLE_HEADER_LEN: usize = 40;

impl KernelPreamble {
    pub fn peek_magic(buf: &[u8]) -> bool {
        buf.len() >= 8 && &buf[0..8] == KERNEL_PREAMBLE_MAGIC
    }

    pub fn has_flags(&self) -> bool {
        self.header_version >= KERNEL_PREAMBLE_FLAGS_VERSION
    }

    pub fn parse(buf: &[u8]) -> Result<KernelPreamble> {
        if buf.len() < KERNEL_PREAMBLE_HEADER_LEN {
            return Err(SignError::FormatError("buffer too short for a kernel preamble".into()));
        }
        let mut c = Cursor::new(buf);
        let mut magic = [0u8; 8];
        std::io::Read::read_exact(&mut c, &mut magic)?;
        if &magic != KERNEL_PREAMBLE_MAGIC {
            return Err(SignError::FormatError("bad kernel preamble magic".into()));
        }
        let preamble_size = c.read_u32::<LittleEndian>()?;
        let header_version = c.read_u32::<LittleEndian>()?;
        let kernel_version = c.read_u32::<LittleEndian>()?;
        let body_load_address = c.read_u32::<LittleEndian>()?;
        let body_data_size = c.read_u32::<LittleEndian>()?;
        let body_sig_len = c.read_u32::<LittleEndian>()? as usize;
        let flags = c.read_u32::<LittleEndian>()?;
        let preamble_sig_len = c.read_u32::<LittleEndian>()? as usize;

        let expected = KERNEL_PREAMBLE_HEADER_LEN + body_sig_len + preamble_sig_len;
        if expected as u32 != preamble_size {
            return Err(SignError::FormatError("kernel preamble size fields are inconsistent".into()));
        }

        Ok(KernelPreamble {
            preamble_size,
            kernel_version,
            body_load_address,
            body_data_size,
            header_version,
            flags,
        })
    }
}

/// `sign_kernel_blob(blob, padding, version, load_addr, keyblock, signer, flags) -> vblock_bytes`.
///
/// Builds a keyblock-less preamble signed by `signer`, prepends `keyblock`
/// verbatim, and zero-pads the result out to `padding` bytes. Fails with a
/// `SizingError` if keyblock + preamble don't fit in `padding`.
pub fn sign_kernel_blob(
    blob: &[u8],
    padding: u32,
    version: u32,
    load_addr: u32,
    keyblock: &[u8],
    signer: &PrivateKey,
    flags: u32,
) -> Result<Vec<u8>> {
    let body_sig = primitives::sign(blob, signer);

    let preamble_size = KERNEL_PREAMBLE_HEADER_LEN + SIGNATURE_LEN + SIGNATURE_LEN;
    let mut unsigned = Vec::with_capacity(preamble_size - SIGNATURE_LEN);
    unsigned.extend_from_slice(KERNEL_PREAMBLE_MAGIC);
    write_u32_all(&mut unsigned, preamble_size as u32);
    write_u32_all(&mut unsigned, KERNEL_PREAMBLE_FLAGS_VERSION);
    write_u32_all(&mut unsigned, version);
    write_u32_all(&mut unsigned, load_addr);
    write_u32_all(&mut unsigned, blob.len() as u32);
    write_u32_all(&mut unsigned, SIGNATURE_LEN as u32);
    write_u32_all(&mut unsigned, flags);
    write_u32_all(&mut unsigned, SIGNATURE_LEN as u32);
    unsigned.extend_from_slice(&body_sig);

    let preamble_sig = primitives::sign(&unsigned, signer);
    let mut preamble = unsigned;
    preamble.extend_from_slice(&preamble_sig);

    let vblock_len = keyblock.len() + preamble.len();
    if vblock_len > padding as usize {
        return Err(SignError::SizingError(format!(
            "keyblock ({} bytes) + preamble ({} bytes) exceed padding ({} bytes)",
            keyblock.len(),
            preamble.len(),
            padding
        )));
    }

    let mut vblock = Vec::with_capacity(padding as usize);
    vblock.extend_from_slice(keyblock);
    vblock.extend_from_slice(&preamble);
    vblock.resize(padding as usize, 0);
    Ok(vblock)
}

/// `unpack_kernel_partition(buf, padding) -> (keyblock, preamble, blob_slice)`.
/// Borrowed views into `buf`; no allocation.
pub fn unpack_kernel_partition<'a>(
    buf: &'a [u8],
    padding: u32,
) -> Result<(KeyBlock, KernelPreamble, &'a [u8])> {
    let padding = padding as usize;
    if buf.len() < padding {
        return Err(SignError::FormatError("partition shorter than the vblock padding".into()));
    }
    let keyblock = KeyBlock::parse(buf)?;
    let preamble_buf = &buf[keyblock.key_block_size as usize..];
    let preamble = KernelPreamble::parse(preamble_buf)?;

    let blob_start = padding;
    let blob_end = blob_start
        .checked_add(preamble.body_data_size as usize)
        .ok_or_else(|| SignError::FormatError("kernel body size overflows".into()))?;
    if blob_end > buf.len() {
        return Err(SignError::FormatError("kernel body extends past end of partition".into()));
    }
    let blob = &buf[blob_start..blob_end];

    Ok((keyblock, preamble, blob))
}

/// `verify_keyblock(buf, max_len) -> ok/invalid`: structural check only
/// (magic, internal size consistency, fits within `max_len`), the way
/// `KeyBlockVerify(key_block, len, NULL, 1)` validates a key block without
/// a root public key to check the outer signature against.
pub fn verify_keyblock(buf: &[u8], max_len: usize) -> Result<KeyBlock> {
    if buf.len() > max_len {
        return KeyBlock::parse(&buf[..max_len]);
    }
    KeyBlock::parse(buf)
}
