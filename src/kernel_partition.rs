//! KernelPartitionResigner (spec 4.7): read an existing signed kernel
//! partition, preserve selected fields, optionally substitute the command
//! line, and re-sign.

use crate::envelope;
use crate::error::Result;
use crate::io_util;
use crate::params::SigningParams;
use crate::primitives;
use crate::raw_kernel;

/// `buf` is the existing partition contents. Returns the bytes to write
/// when `create_new_outfile`, or the pieces the pipeline must write back
/// into the mapped buffer otherwise (this function only borrows `buf`, so
/// it can't mutate it itself). `InPlace::blob` is always returned even
/// when unchanged, so the pipeline has one way to write back regardless
/// of whether `--config` substituted it.
pub enum Outcome {
    NewFile(Vec<u8>),
    InPlace { vblock: Vec<u8>, blob: Vec<u8> },
}

pub fn resign(buf: &[u8], params: &SigningParams) -> Result<Outcome> {
    let (existing_keyblock, existing_preamble, blob) =
        envelope::unpack_kernel_partition(buf, params.padding)?;

    // body_load_address is always taken from the existing preamble, even
    // if the caller passed --kloadaddr (spec invariant 3, section 9's
    // documented bug-compatibility).
    let load_addr = existing_preamble.body_load_address;

    let version = params.version.unwrap_or(existing_preamble.kernel_version);

    let flags = if existing_preamble.has_flags() {
        params.flags.unwrap_or(existing_preamble.flags)
    } else {
        params.flags_or(0)
    };

    let mut blob_owned;
    let blob: &[u8] = if let Some(new_config) = &params.config {
        blob_owned = blob.to_vec();
        raw_kernel::update_blob_config(&mut blob_owned, new_config)?;
        &blob_owned
    } else {
        blob
    };

    let keyblock: Vec<u8> = if let Some(path) = &params.keyblock {
        io_util::read_whole_file(path)?
    } else {
        // Re-serialize the existing key block verbatim.
        reserialize_keyblock(&existing_keyblock)
    };

    let sign_key = primitives::read_private(
        params.sign_private.as_deref().expect("ArgContract guarantees sign_private"),
    )?;

    let vblock = envelope::sign_kernel_blob(blob, params.padding, version, load_addr, &keyblock, &sign_key, flags)?;

    if params.create_new_outfile {
        if params.vblock_only {
            Ok(Outcome::NewFile(vblock))
        } else {
            let mut out = vblock;
            out.extend_from_slice(blob);
            Ok(Outcome::NewFile(out))
        }
    } else {
        Ok(Outcome::InPlace { vblock, blob: blob.to_vec() })
    }
}

/// Rebuilds the on-disk bytes of an already-parsed key block so it can be
/// copied verbatim into a new vblock without re-reading the original file.
fn reserialize_keyblock(kb: &envelope::KeyBlock) -> Vec<u8> {
    use byteorder::{LittleEndian, WriteBytesExt};
    let mut out = Vec::with_capacity(kb.key_block_size as usize);
    out.extend_from_slice(envelope::KEY_BLOCK_MAGIC);
    out.write_u32::<LittleEndian>(kb.key_block_size).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.write_u32::<LittleEndian>(kb.data_key_version).unwrap();
    out.write_u32::<LittleEndian>(kb.flags).unwrap();
    out.write_u32::<LittleEndian>(kb.data_key.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(kb.signature.len() as u32).unwrap();
    out.extend_from_slice(&kb.data_key);
    out.extend_from_slice(&kb.signature);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::PrivateKey;
    use ed25519_dalek::SigningKey;
    use tempfile::tempdir;

    fn make_partition(padding: u32, version: u32, flags: u32, load_addr: u32) -> (Vec<u8>, PrivateKey) {
        let signer = PrivateKey { signing_key: SigningKey::from_bytes(&[21u8; 32]) };
        let keyblock =
            envelope::create_keyblock(&signer.public_bytes(), Some(&signer), 0).unwrap();
        let blob = crate::raw_kernel::pack(
            b"vmlinuz",
            crate::params::Arch::X86,
            load_addr,
            b"console=ttyS0",
            b"stub",
        )
        .unwrap();
        let vblock = envelope::sign_kernel_blob(&blob, padding, version, load_addr, &keyblock, &signer, flags)
            .unwrap();
        let mut partition = vblock;
        partition.extend_from_slice(&blob);
        (partition, signer)
    }

    #[test]
    fn preserves_load_address_even_if_caller_supplies_one() {
        let (partition, signer) = make_partition(65536, 3, 0, 0x0010_0000);
        let dir = tempdir().unwrap();
        let mut params = SigningParams::new("kpart".into());
        params.padding = 65536;
        params.sign_private = {
            let path = dir.path().join("signpriv-a");
            std::fs::write(&path, signer.signing_key.to_bytes()).unwrap();
            Some(path)
        };
        params.kload_addr = Some(0xDEAD_BEEF); // should be ignored
        params.create_new_outfile = false;

        let outcome = resign(&partition, &params).unwrap();
        let vblock = match outcome {
            Outcome::InPlace { vblock, .. } => vblock,
            _ => panic!("expected in-place outcome"),
        };
        let (_, preamble, _) = envelope::unpack_kernel_partition(
            &{
                let mut full = vblock.clone();
                full.extend_from_slice(&partition[65536..]);
                full
            },
            65536,
        )
        .unwrap();
        assert_eq!(preamble.body_load_address, 0x0010_0000);
    }

    #[test]
    fn preserves_version_and_flags_when_not_specified() {
        let (partition, signer) = make_partition(65536, 7, 42, 0x0010_0000);
        let dir = tempdir().unwrap();
        let mut params = SigningParams::new("kpart".into());
        params.padding = 65536;
        let path = dir.path().join("signpriv-b");
        std::fs::write(&path, signer.signing_key.to_bytes()).unwrap();
        params.sign_private = Some(path);

        let outcome = resign(&partition, &params).unwrap();
        let vblock = match outcome {
            Outcome::InPlace { vblock, .. } => vblock,
            _ => panic!("expected in-place outcome"),
        };
        let mut full = vblock;
        full.extend_from_slice(&partition[65536..]);
        let (_, preamble, _) = envelope::unpack_kernel_partition(&full, 65536).unwrap();
        assert_eq!(preamble.kernel_version, 7);
        assert_eq!(preamble.flags, 42);
    }

    #[test]
    fn in_place_outcome_carries_the_substituted_config() {
        let (partition, signer) = make_partition(65536, 1, 0, 0x0010_0000);
        let dir = tempdir().unwrap();
        let mut params = SigningParams::new("kpart".into());
        params.padding = 65536;
        let path = dir.path().join("signpriv-c");
        std::fs::write(&path, signer.signing_key.to_bytes()).unwrap();
        params.sign_private = Some(path);
        params.config = Some(b"console=ttyS1 debug".to_vec());

        let outcome = resign(&partition, &params).unwrap();
        let (vblock, blob) = match outcome {
            Outcome::InPlace { vblock, blob } => (vblock, blob),
            _ => panic!("expected in-place outcome"),
        };
        assert_eq!(vblock.len(), 65536);
        assert_eq!(raw_kernel::unpack_config(&blob).unwrap(), b"console=ttyS1 debug");
    }
}
