//! ArgContract (spec 4.2): per-kind required/optional/forbidden argument
//! matrix and defaulting rules.

use crate::error::{ErrorAccumulator, Result};
use crate::params::{Arch, ArtifactKind, SigningParams};

/// Validates `params` against the requirements of `kind`, accumulating one
/// error line per missing/conflicting argument before failing (spec 4.2,
/// 7). Also derives `create_new_outfile` per spec invariant 5.
pub fn validate(kind: ArtifactKind, params: &mut SigningParams) -> Result<()> {
    let mut errs = ErrorAccumulator::new();

    match kind {
        ArtifactKind::BarePubkey => {
            params.create_new_outfile = true;
            let has_raw = params.sign_private.is_some();
            let has_pem = params.pem_sign_private.is_some();
            if has_raw && has_pem {
                errs.push("Only one of --signprivate and --pem_signpriv can be specified");
            }
            if params.pem_algo.is_some() != has_pem {
                errs.push("--pem_algo must be used with --pem_signpriv");
            }
            if params.pem_external.is_some() && !has_pem {
                errs.push("--pem_external must be used with --pem_signpriv");
            }
        }
        ArtifactKind::FirmwareImage => {
            errs.require(params.sign_private.is_some(), "signprivate");
            errs.require(params.keyblock.is_some(), "keyblock");
            errs.require(params.kernel_subkey.is_some(), "kernelkey");
            // Dev counterparts are required only if A/B bodies differ,
            // checked at signing time (spec 4.2).
        }
        ArtifactKind::KernelPartition => {
            errs.require(params.sign_private.is_some(), "signprivate");
            let inout_file_count = 1 + params.outfile.is_some() as u32;
            if params.vblock_only || inout_file_count > 1 {
                params.create_new_outfile = true;
            }
        }
        ArtifactKind::RawFirmware => {
            params.create_new_outfile = true;
            errs.require(params.sign_private.is_some(), "signprivate");
            errs.require(params.keyblock.is_some(), "keyblock");
            errs.require(params.kernel_subkey.is_some(), "kernelkey");
            errs.require(params.version.is_some(), "version");
        }
        ArtifactKind::RawKernel => {
            params.create_new_outfile = true;
            errs.require(params.sign_private.is_some(), "signprivate");
            errs.require(params.keyblock.is_some(), "keyblock");
            errs.require(params.version.is_some(), "version");
            errs.require(params.bootloader.is_some(), "bootloader");
            errs.require(params.config.is_some(), "config");
            errs.require(params.arch != Arch::Unspecified, "arch");
        }
    }

    // Missing outfile: fatal if we must produce a fresh file, else in-place.
    if params.outfile.is_none() {
        if params.create_new_outfile {
            errs.push("Missing output filename");
        } else {
            params.outfile = Some(params.infile.clone());
        }
    }

    errs.into_result()
}
