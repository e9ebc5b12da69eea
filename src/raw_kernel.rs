//! RawKernelPacker + KernelBlobSigner (spec 4.6): vmlinuz + cmdline +
//! bootloader + arch -> kernel blob -> vblock.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::envelope;
use crate::error::{Result, SignError};
use crate::io_util;
use crate::params::{Arch, SigningParams};
use crate::primitives;

const BLOB_MAGIC: &[u8; 8] = b"VBKBLOB0";
const BLOB_HEADER_LEN: usize = 32;
/// Reserved command-line slot inside the blob, fixed regardless of the
/// actual command-line length so a later resign can grow the command line
/// without moving the bootloader stub (mirrors the original tool's
/// `CROS_CONFIG_SIZE` convention).
const CONFIG_REGION_SIZE: u32 = 4096;

/// Maximum total blob size each architecture's boot protocol permits.
fn max_blob_len(arch: Arch) -> usize {
    match arch {
        Arch::X86 | Arch::Unspecified => 0x1000_0000, // 256 MiB
        Arch::Arm => 0x0800_0000,                     // 128 MiB
        Arch::Mips => 0x0800_0000,
    }
}

/// `pack(vmlinuz, arch, load_addr, config, bootloader) -> kernel_blob`.
/// Given the same inputs, always produces a byte-identical blob.
pub fn pack(vmlinuz: &[u8], arch: Arch, load_addr: u32, config: &[u8], bootloader: &[u8]) -> Result<Vec<u8>> {
    if config.len() as u32 > CONFIG_REGION_SIZE {
        return Err(SignError::SizingError(format!(
            "command line ({} bytes) exceeds the {} byte reserved slot",
            config.len(),
            CONFIG_REGION_SIZE
        )));
    }

    let total = BLOB_HEADER_LEN + vmlinuz.len() + CONFIG_REGION_SIZE as usize + bootloader.len();
    if total > max_blob_len(arch) {
        return Err(SignError::SizingError(format!(
            "kernel blob ({total} bytes) exceeds the maximum {} bytes for this architecture",
            max_blob_len(arch)
        )));
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(BLOB_MAGIC);
    out.write_u32::<LittleEndian>(arch as u32).unwrap();
    out.write_u32::<LittleEndian>(load_addr).unwrap();
    out.write_u32::<LittleEndian>(vmlinuz.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(config.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(CONFIG_REGION_SIZE).unwrap();
    out.write_u32::<LittleEndian>(bootloader.len() as u32).unwrap();

    out.extend_from_slice(vmlinuz);
    out.extend_from_slice(config);
    out.resize(out.len() + (CONFIG_REGION_SIZE as usize - config.len()), 0);
    out.extend_from_slice(bootloader);

    Ok(out)
}

struct BlobHeader {
    vmlinuz_len: u32,
    config_len: u32,
    config_region_size: u32,
    bootloader_len: u32,
}

fn parse_header(blob: &[u8]) -> Result<BlobHeader> {
    if blob.len() < BLOB_HEADER_LEN || &blob[0..8] != BLOB_MAGIC {
        return Err(SignError::FormatError("not a kernel blob produced by this engine".into()));
    }
    let mut c = Cursor::new(&blob[8..]);
    let _arch = c.read_u32::<LittleEndian>()?;
    let _load_addr = c.read_u32::<LittleEndian>()?;
    let vmlinuz_len = c.read_u32::<LittleEndian>()?;
    let config_len = c.read_u32::<LittleEndian>()?;
    let config_region_size = c.read_u32::<LittleEndian>()?;
    let bootloader_len = c.read_u32::<LittleEndian>()?;
    Ok(BlobHeader { vmlinuz_len, config_len, config_region_size, bootloader_len })
}

/// Extracts the command line currently stored in `blob`.
pub fn unpack_config(blob: &[u8]) -> Result<&[u8]> {
    let h = parse_header(blob)?;
    let start = BLOB_HEADER_LEN + h.vmlinuz_len as usize;
    Ok(&blob[start..start + h.config_len as usize])
}

/// `update_blob_config(blob, new_config)`: overwrites the command-line
/// section in place. Fails if `new_config` doesn't fit in the reserved
/// slot (spec 4.7 step 3).
pub fn update_blob_config(blob: &mut [u8], new_config: &[u8]) -> Result<()> {
    let h = parse_header(blob)?;
    if new_config.len() as u32 > h.config_region_size {
        return Err(SignError::SizingError(format!(
            "new command line ({} bytes) exceeds the {} byte reserved slot",
            new_config.len(),
            h.config_region_size
        )));
    }
    let region_start = BLOB_HEADER_LEN + h.vmlinuz_len as usize;
    let region = &mut blob[region_start..region_start + h.config_region_size as usize];
    region.fill(0);
    region[..new_config.len()].copy_from_slice(new_config);

    // Update the recorded config_len field (offset 20 in the blob).
    (&mut blob[20..24]).write_u32::<LittleEndian>(new_config.len() as u32).unwrap();
    let _ = h.bootloader_len; // header fields besides config are untouched
    Ok(())
}

/// `ft_sign_raw_kernel`: packs a fresh kernel blob and signs it. Always
/// writes to a fresh output file; in-place is not supported for this kind.
pub fn sign(vmlinuz: &[u8], params: &SigningParams) -> Result<()> {
    let sign_key = primitives::read_private(
        params.sign_private.as_deref().expect("ArgContract guarantees sign_private"),
    )?;
    let keyblock = io_util::read_whole_file(
        params.keyblock.as_deref().expect("ArgContract guarantees keyblock"),
    )?;
    let bootloader = params.bootloader.as_deref().expect("ArgContract guarantees bootloader");
    let config = params.config.as_deref().expect("ArgContract guarantees config");
    let load_addr = params.kload_addr_or_arch_default();

    let blob = pack(vmlinuz, params.arch, load_addr, config, bootloader)?;
    let vblock = envelope::sign_kernel_blob(
        &blob,
        params.padding,
        params.version_or(1),
        load_addr,
        &keyblock,
        &sign_key,
        params.flags_or(0),
    )?;

    let outfile = params.outfile.as_deref().expect("ArgContract guarantees outfile is set");
    if params.vblock_only {
        io_util::write_whole_file(outfile, &[&vblock])
    } else {
        io_util::write_whole_file(outfile, &[&vblock, &blob])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_is_deterministic() {
        let a = pack(b"vmlinuz-bytes", Arch::X86, 0x0010_0000, b"console=ttyS0", b"boot-stub").unwrap();
        let b = pack(b"vmlinuz-bytes", Arch::X86, 0x0010_0000, b"console=ttyS0", b"boot-stub").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unpack_config_round_trips() {
        let blob = pack(b"vmlinuz", Arch::Arm, 0x0008_0000, b"root=/dev/sda1", b"stub").unwrap();
        assert_eq!(unpack_config(&blob).unwrap(), b"root=/dev/sda1");
    }

    #[test]
    fn bootloader_region_is_byte_equal() {
        let bootloader = b"a bootloader stub payload";
        let blob = pack(b"vmlinuz", Arch::Mips, 0x0010_0000, b"quiet", bootloader).unwrap();
        assert_eq!(&blob[blob.len() - bootloader.len()..], bootloader);
    }

    #[test]
    fn update_config_replaces_in_place() {
        let mut blob = pack(b"vmlinuz", Arch::X86, 0x0010_0000, b"console=ttyS0", b"stub").unwrap();
        update_blob_config(&mut blob, b"console=ttyS1 debug").unwrap();
        assert_eq!(unpack_config(&blob).unwrap(), b"console=ttyS1 debug");
    }

    #[test]
    fn update_config_too_large_is_sizing_error() {
        let mut blob = pack(b"vmlinuz", Arch::X86, 0x0010_0000, b"short", b"stub").unwrap();
        let huge = vec![b'x'; CONFIG_REGION_SIZE as usize + 1];
        assert!(matches!(update_blob_config(&mut blob, &huge), Err(SignError::SizingError(_))));
    }

    #[test]
    fn pack_rejects_oversized_config() {
        let huge = vec![b'x'; CONFIG_REGION_SIZE as usize + 1];
        assert!(matches!(
            pack(b"vmlinuz", Arch::X86, 0, &huge, b"stub"),
            Err(SignError::SizingError(_))
        ));
    }
}
