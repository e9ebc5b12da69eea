//! The low-level asymmetric primitives spec section 1 treats as an external
//! collaborator: `sign`, `verify_keyblock`, `read_private`, `read_public`,
//! `read_keyblock`. Kept behind this narrow surface so the core modules
//! (`envelope`, `pubkey_wrapper`, ...) never reach past it, the way
//! `cmd_sign.c` never touches RSA/SHA internals directly and instead calls
//! into `vboot_common`/`host_common`.
//!
//! Signatures are Ed25519 (`ed25519-dalek`), the asymmetric primitive the
//! teacher repo's bootloader (`loader/src/secboot.rs`) and its signed-image
//! tooling (`tools/Cargo.toml`'s `ed25519-dalek` dependency) already use.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pkcs8::DecodePrivateKey;
use zeroize::Zeroizing;

use crate::error::{Result, SignError};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// A loaded private signing key plus its public counterpart, the pair
/// `VbPrivateKey` bundles in the original `host_common` headers. The
/// `"zeroize"` feature on `ed25519-dalek` makes `SigningKey` wipe its
/// secret scalar on drop, so key material doesn't outlive the pipeline
/// that loaded it (spec section 5).
pub struct PrivateKey {
    pub signing_key: SigningKey,
}

impl PrivateKey {
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }
}

/// `read_private(path)`: loads a private signing key. Accepts either a
/// 32-byte raw seed file (the `.vbprivk`-equivalent format this engine
/// writes and reads) or a PEM-encoded PKCS#8 key (the `--pem_signpriv`
/// path), detected by sniffing for the PEM `-----BEGIN` marker.
pub fn read_private(path: &Path) -> Result<PrivateKey> {
    let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
        std::fs::read(path).map_err(|e| SignError::IoError(format!("{}: {e}", path.display())))?,
    );
    if bytes.starts_with(b"-----BEGIN") {
        return read_private_pem_bytes(&bytes);
    }
    read_private_raw(&bytes, path)
}

fn read_private_raw(bytes: &[u8], path: &Path) -> Result<PrivateKey> {
    let seed: [u8; 32] = bytes.try_into().map_err(|_| {
        SignError::FormatError(format!("{}: expected a 32-byte private key", path.display()))
    })?;
    Ok(PrivateKey { signing_key: SigningKey::from_bytes(&seed) })
}

/// `pem_algo` is accepted for CLI-compatibility with the original signing
/// tool's algorithm table, but this engine supports only Ed25519; any value
/// is accepted and ignored at the crypto layer (algorithm selection is a
/// concern of the external primitives library spec section 1 delegates to).
pub fn read_private_pem(path: &Path, _pem_algo: u32) -> Result<PrivateKey> {
    let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
        std::fs::read(path).map_err(|e| SignError::IoError(format!("{}: {e}", path.display())))?,
    );
    read_private_pem_bytes(&bytes)
}

fn read_private_pem_bytes(bytes: &[u8]) -> Result<PrivateKey> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| SignError::FormatError("PEM file is not valid UTF-8".into()))?;
    let signing_key = SigningKey::from_pkcs8_pem(text)
        .map_err(|e| SignError::FormatError(format!("invalid PEM private key: {e}")))?;
    Ok(PrivateKey { signing_key })
}

/// `read_public(path)`: loads a bare 32-byte public key, the `.vbpubk`
/// equivalent.
pub fn read_public(path: &Path) -> Result<VerifyingKey> {
    let bytes = std::fs::read(path).map_err(|e| SignError::IoError(format!("{}: {e}", path.display())))?;
    bytes_to_verifying_key(&bytes, path)
}

pub fn bytes_to_verifying_key(bytes: &[u8], path: &Path) -> Result<VerifyingKey> {
    let arr: [u8; PUBLIC_KEY_LEN] = bytes
        .try_into()
        .map_err(|_| SignError::FormatError(format!("{}: expected a 32-byte public key", path.display())))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| SignError::FormatError(format!("malformed public key: {e}")))
}

/// `sign(bytes, priv) -> signature`.
pub fn sign(bytes: &[u8], key: &PrivateKey) -> [u8; SIGNATURE_LEN] {
    key.signing_key.sign(bytes).to_bytes()
}

/// Verifies `sig` over `bytes` under `pubkey`.
pub fn verify(bytes: &[u8], sig: &[u8], pubkey: &VerifyingKey) -> Result<()> {
    let sig_arr: [u8; SIGNATURE_LEN] =
        sig.try_into().map_err(|_| SignError::FormatError("malformed signature length".into()))?;
    pubkey
        .verify(bytes, &Signature::from_bytes(&sig_arr))
        .map_err(|_| SignError::FormatError("signature verification failed".into()))
}

/// Invokes the external signing helper named by `--pem_external`, handing
/// it the canonical bytes to sign on stdin and reading the signature back
/// from stdout. The helper's stdout length is validated against the
/// expected signature size before the bytes are spliced into the key
/// block -- the external process is a trust boundary (spec section 9).
pub fn sign_external(bytes: &[u8], helper: &Path) -> Result<[u8; SIGNATURE_LEN]> {
    let mut child = Command::new(helper)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| SignError::IoError(format!("spawning {}: {e}", helper.display())))?;

    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(bytes)
        .map_err(|e| SignError::IoError(format!("writing to {}: {e}", helper.display())))?;

    let output = child
        .wait_with_output()
        .map_err(|e| SignError::IoError(format!("waiting for {}: {e}", helper.display())))?;

    if !output.status.success() {
        return Err(SignError::CryptoError(format!(
            "external signer {} exited with {}",
            helper.display(),
            output.status
        )));
    }

    output.stdout.as_slice().try_into().map_err(|_| {
        SignError::CryptoError(format!(
            "external signer {} returned {} bytes, expected {SIGNATURE_LEN}",
            helper.display(),
            output.stdout.len()
        ))
    })
}
