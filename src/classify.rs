//! ArtifactClassifier (spec 4.1): maps an input path plus explicit override
//! to one of the five `ArtifactKind`s.

use crate::envelope;
use crate::error::{Result, SignError};
use crate::params::{Arch, ArtifactKind, SigningParams};
use crate::regionmap;

/// Peek at the file to detect one of the five shapes, then fall back to
/// inference from parameters. Fails with a `FormatError` ("UnknownKind" in
/// spec terms) if nothing matches.
pub fn classify(buf: &[u8], params: &SigningParams) -> Result<ArtifactKind> {
    if let Some(kind) = params.explicit_type {
        return Ok(kind);
    }

    if let Some(kind) = detect_from_header(buf) {
        return Ok(kind);
    }

    if params.bootloader.is_some() || params.config.is_some() || params.arch != Arch::Unspecified {
        return Ok(ArtifactKind::RawKernel);
    }
    if params.kernel_subkey.is_some() || params.fv_specified {
        return Ok(ArtifactKind::RawFirmware);
    }

    Err(SignError::FormatError(format!(
        "unable to determine artifact type for {}; pass --type explicitly",
        params.infile.display()
    )))
}

/// Header-magic / region-map detection, in the order the legacy
/// `futil_file_type` probes them: key block, then kernel preamble, then a
/// region map (firmware image). A bare public key and a raw kernel/firmware
/// blob have no recognizable magic of their own and fall through to
/// parameter-based inference.
fn detect_from_header(buf: &[u8]) -> Option<ArtifactKind> {
    if regionmap::find_map(buf).is_ok() {
        return Some(ArtifactKind::FirmwareImage);
    }
    if envelope::KeyBlock::peek_magic(buf) {
        // A lone key block with a trailing kernel preamble is a signed
        // kernel partition; a lone key block with nothing recognizable
        // after it could still be either, but in this engine a standalone
        // key block file is never itself the *input* to `sign` (it's an
        // *output*), so seeing one here means we're looking at a kernel
        // partition.
        if let Ok(kb) = envelope::KeyBlock::parse(buf) {
            if envelope::KernelPreamble::peek_magic(&buf[kb.key_block_size as usize..]) {
                return Some(ArtifactKind::KernelPartition);
            }
        }
    }
    None
}
