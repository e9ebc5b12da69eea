//! FirmwareImageSigner (spec 4.8): the heart of the core. Walks the
//! regions of a full firmware image, diffs A vs B, and writes new vblocks.
//! All size-fitting checks happen before any write so a failure leaves the
//! image unchanged (spec 4.8's closing "Design intent").

use std::path::{Path, PathBuf};

#[cfg(test)]
use crate::envelope::KeyBlock;
use crate::envelope;
use crate::error::{Result, SignError};
use crate::io_util;
use crate::params::SigningParams;
use crate::primitives;
use crate::regionmap::{self, Area};

/// Maximum LOEM side-output path length before it's treated as fatal
/// (spec 4.8 step 7, "path must fit a fixed buffer").
const LOEM_PATH_MAX: usize = 4096;

struct Regions {
    fw_a: Area,
    fw_b: Area,
    vblock_a: Area,
    vblock_b: Area,
}

fn locate_regions(buf: &[u8]) -> Result<Regions> {
    let map = regionmap::find_map(buf)?;
    let image_len = buf.len();

    let fw_a = regionmap::find_area(&map, regionmap::FW_MAIN_A, image_len);
    let fw_b = regionmap::find_area(&map, regionmap::FW_MAIN_B, image_len);
    let vblock_a = regionmap::find_area(&map, regionmap::VBLOCK_A, image_len);
    let vblock_b = regionmap::find_area(&map, regionmap::VBLOCK_B, image_len);

    match (fw_a, fw_b, vblock_a, vblock_b) {
        (Some(fw_a), Some(fw_b), Some(vblock_a), Some(vblock_b)) => {
            Ok(Regions { fw_a, fw_b, vblock_a, vblock_b })
        }
        _ => Err(SignError::FormatError(
            "image is missing one of FW_MAIN_A/FW_MAIN_B/VBLOCK_A/VBLOCK_B; not changing anything".into(),
        )),
    }
}

/// Result of inspecting one VBLOCK_{A,B} area's existing content.
struct Inspection {
    /// Shrunk `FW_MAIN_{A,B}` length, if the existing preamble was valid.
    fw_len: Option<u32>,
    /// The existing preamble's flags, only meaningful for VBLOCK_A.
    flags: Option<u32>,
}

/// Verifies the existing key block/preamble inside a vblock area and, if
/// valid, reads `body_signature.data_size` to learn the real firmware
/// size. Invalid key blocks are downgraded to a warning by the caller;
/// this function only distinguishes "valid" from "invalid".
fn inspect_vblock(name: &str, vblock_bytes: &[u8], fw_area_len: u32) -> Result<Inspection> {
    let kb = match envelope::verify_keyblock(vblock_bytes, vblock_bytes.len()) {
        Ok(kb) => kb,
        Err(_) => {
            log::warn!("{name} keyblock is invalid. Signing the entire FW FMAP region...");
            return Ok(Inspection { fw_len: None, flags: None });
        }
    };
    if kb.data_key_as_verifying().is_err() {
        log::warn!("{name} public key is invalid. Signing the entire FW FMAP region...");
        return Ok(Inspection { fw_len: None, flags: None });
    }

    let preamble_buf = &vblock_bytes[kb.key_block_size as usize..];
    let preamble = match envelope::FirmwarePreamble::parse(preamble_buf) {
        Ok(p) => p,
        Err(_) => {
            log::warn!("{name} preamble is invalid. Signing the entire FW FMAP region...");
            return Ok(Inspection { fw_len: None, flags: None });
        }
    };

    if preamble.body_data_size > fw_area_len {
        return Err(SignError::SizingError(format!(
            "{name} says the firmware is larger than we have"
        )));
    }

    Ok(Inspection { fw_len: Some(preamble.body_data_size), flags: Some(preamble.flags) })
}

struct SignerPair {
    private_key_path: PathBuf,
    keyblock_path: PathBuf,
}

fn build_new_vblock(
    fw_body: &[u8],
    signer: &SignerPair,
    kernel_subkey_pub: &[u8],
    version: u32,
    flags: u32,
) -> Result<Vec<u8>> {
    let sign_key = primitives::read_private(&signer.private_key_path)?;
    let keyblock_bytes = io_util::read_whole_file(&signer.keyblock_path)?;

    let body_sig = primitives::sign(fw_body, &sign_key);
    let preamble = envelope::create_firmware_preamble(
        version,
        kernel_subkey_pub,
        &body_sig,
        fw_body.len() as u32,
        &sign_key,
        flags,
    )?;

    let mut out = keyblock_bytes;
    out.extend_from_slice(&preamble);
    Ok(out)
}

/// Signs a memory-mapped firmware image in place. `buf` is the whole
/// image; regions are located inside it via the embedded region map.
pub fn sign(buf: &mut [u8], params: &SigningParams) -> Result<()> {
    let regions = locate_regions(buf)?;

    let vblock_a_bytes = buf[region_range(regions.vblock_a)].to_vec();
    let vblock_b_bytes = buf[region_range(regions.vblock_b)].to_vec();

    let inspection_a = inspect_vblock("VBLOCK_A", &vblock_a_bytes, regions.fw_a.size)?;
    let inspection_b = inspect_vblock("VBLOCK_B", &vblock_b_bytes, regions.fw_b.size)?;

    let fw_a_len = inspection_a.fw_len.unwrap_or(regions.fw_a.size);
    let fw_b_len = inspection_b.fw_len.unwrap_or(regions.fw_b.size);

    // Flag inheritance happens only from VBLOCK_A, and only when its key
    // block was valid -- an invalid (untrusted) preamble never contributes
    // flags, per spec 4.9's resolution of the open question.
    let flags = params.flags.or(inspection_a.flags).unwrap_or(0);
    let version = params.version_or(1);

    let fw_a_range = regions.fw_a.offset as usize..(regions.fw_a.offset + fw_a_len) as usize;
    let fw_b_range = regions.fw_b.offset as usize..(regions.fw_b.offset + fw_b_len) as usize;
    let differ = buf[fw_a_range.clone()] != buf[fw_b_range.clone()];

    let normal_signer = SignerPair {
        private_key_path: params.sign_private.clone().expect("ArgContract guarantees sign_private"),
        keyblock_path: params.keyblock.clone().expect("ArgContract guarantees keyblock"),
    };
    let a_signer = if differ {
        match (&params.dev_sign_private, &params.dev_keyblock) {
            (Some(sp), Some(kb)) => {
                SignerPair { private_key_path: sp.clone(), keyblock_path: kb.clone() }
            }
            _ => {
                return Err(SignError::PolicyError(
                    "FW A & B differ. DEV keys are required.".into(),
                ));
            }
        }
    } else {
        SignerPair {
            private_key_path: normal_signer.private_key_path.clone(),
            keyblock_path: normal_signer.keyblock_path.clone(),
        }
    };

    let kernel_subkey = primitives::read_public(
        params.kernel_subkey.as_deref().expect("ArgContract guarantees kernel_subkey"),
    )?;
    let kernel_subkey_bytes = kernel_subkey.to_bytes();

    let new_vblock_a =
        build_new_vblock(&buf[fw_a_range], &a_signer, &kernel_subkey_bytes, version, flags)?;
    // FW B is always signed with the normal keys.
    let new_vblock_b =
        build_new_vblock(&buf[fw_b_range], &normal_signer, &kernel_subkey_bytes, version, flags)?;

    if new_vblock_a.len() > regions.vblock_a.size as usize {
        return Err(SignError::SizingError("new VBLOCK_A content exceeds its region".into()));
    }
    if new_vblock_b.len() > regions.vblock_b.size as usize {
        return Err(SignError::SizingError("new VBLOCK_B content exceeds its region".into()));
    }

    let loem_paths = if let Some(loem_id) = &params.loem_id {
        let dir = params.loem_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        Some((loem_filename(&dir, "A", loem_id)?, loem_filename(&dir, "B", loem_id)?))
    } else {
        None
    };

    // Every precondition is verified; commit the writes.
    let a_start = regions.vblock_a.offset as usize;
    buf[a_start..a_start + new_vblock_a.len()].copy_from_slice(&new_vblock_a);
    let b_start = regions.vblock_b.offset as usize;
    buf[b_start..b_start + new_vblock_b.len()].copy_from_slice(&new_vblock_b);

    if let Some((path_a, path_b)) = loem_paths {
        let full_a = buf[region_range(regions.vblock_a)].to_vec();
        let full_b = buf[region_range(regions.vblock_b)].to_vec();
        io_util::write_whole_file(&path_a, &[&full_a])?;
        io_util::write_whole_file(&path_b, &[&full_b])?;
    }

    Ok(())
}

fn region_range(area: Area) -> std::ops::Range<usize> {
    area.offset as usize..(area.offset + area.size) as usize
}

fn loem_filename(dir: &Path, side: &str, loem_id: &str) -> Result<PathBuf> {
    let name = format!("vblock_{side}.{loem_id}");
    let path = dir.join(&name);
    let rendered = path.to_string_lossy();
    if rendered.len() >= LOEM_PATH_MAX {
        return Err(SignError::IoError("LOEM args produce a path that is too long".into()));
    }
    Ok(path)
}
