//! RawFirmwareSigner (spec 4.5): raw firmware body -> preamble file.

use crate::envelope;
use crate::error::{Result, SignError};
use crate::io_util;
use crate::params::SigningParams;
use crate::primitives;

/// `buf` is the raw `FW_MAIN_A`/`FW_MAIN_B` body. Emits `keyblock ||
/// preamble` to `outfile`.
pub fn sign(buf: &[u8], params: &SigningParams) -> Result<()> {
    let sign_key = primitives::read_private(
        params.sign_private.as_deref().expect("ArgContract guarantees sign_private"),
    )?;
    let keyblock = io_util::read_whole_file(
        params.keyblock.as_deref().expect("ArgContract guarantees keyblock"),
    )?;
    let kernel_subkey = primitives::read_public(
        params.kernel_subkey.as_deref().expect("ArgContract guarantees kernel_subkey"),
    )?;

    let body_sig = primitives::sign(buf, &sign_key);
    if body_sig.iter().all(|&b| b == 0) {
        return Err(SignError::CryptoError("body signature came back null".into()));
    }

    let preamble = envelope::create_firmware_preamble(
        params.version_or(1),
        kernel_subkey.as_bytes(),
        &body_sig,
        buf.len() as u32,
        &sign_key,
        params.flags_or(0),
    )?;

    let outfile = params.outfile.as_deref().expect("ArgContract guarantees outfile is set");
    io_util::write_whole_file(outfile, &[&keyblock, &preamble])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{FirmwarePreamble, KeyBlock};
    use crate::primitives::PrivateKey;
    use ed25519_dalek::SigningKey;
    use tempfile::tempdir;

    #[test]
    fn signs_raw_firmware_body() {
        let dir = tempdir().unwrap();
        let signer = PrivateKey { signing_key: SigningKey::from_bytes(&[11u8; 32]) };
        let kernel_key = PrivateKey { signing_key: SigningKey::from_bytes(&[12u8; 32]) };

        let priv_path = dir.path().join("fw.priv");
        std::fs::write(&priv_path, signer.signing_key.to_bytes()).unwrap();
        let keyblock_bytes =
            envelope::create_keyblock(&signer.public_bytes(), Some(&signer), 0).unwrap();
        let keyblock_path = dir.path().join("fw.keyblock");
        std::fs::write(&keyblock_path, &keyblock_bytes).unwrap();
        let kernel_pub_path = dir.path().join("kernel.vbpubk");
        std::fs::write(&kernel_pub_path, kernel_key.public_bytes()).unwrap();

        let mut params = SigningParams::new(dir.path().join("fw_main.bin"));
        params.sign_private = Some(priv_path);
        params.keyblock = Some(keyblock_path);
        params.kernel_subkey = Some(kernel_pub_path);
        params.version = Some(1);
        params.outfile = Some(dir.path().join("vblock.bin"));

        let body = vec![0xABu8; 512 * 1024];
        sign(&body, &params).unwrap();

        let out = std::fs::read(params.outfile.unwrap()).unwrap();
        let kb = KeyBlock::parse(&out).unwrap();
        assert_eq!(out.len(), keyblock_bytes.len() + {
            let preamble = FirmwarePreamble::parse(&out[kb.key_block_size as usize..]).unwrap();
            preamble.preamble_size as usize
        });
        let preamble = FirmwarePreamble::parse(&out[kb.key_block_size as usize..]).unwrap();
        assert_eq!(preamble.body_data_size, 512 * 1024);
    }
}
