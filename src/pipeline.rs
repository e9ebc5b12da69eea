//! Pipeline (spec 4.9): classify -> validate -> map the files -> sign ->
//! unmap. The single entry point the binary calls once per invocation.

use crate::classify;
use crate::contract;
use crate::error::{Result, SignError};
use crate::firmware_image;
use crate::io_util::{self, MappedFile};
use crate::kernel_partition::{self, Outcome};
use crate::params::{ArtifactKind, SigningParams};
use crate::pubkey_wrapper;
use crate::raw_firmware;
use crate::raw_kernel;

/// Runs one sign invocation end to end. Returns `Ok(())` once the output
/// has been written and synced, or the first fatal error encountered.
pub fn run(mut params: SigningParams) -> Result<()> {
    let probe = io_util::read_whole_file(&params.infile)?;
    let kind = classify::classify(&probe, &params)?;
    log::debug!("classified {} as {}", params.infile.display(), kind.name());

    contract::validate(kind, &mut params)?;

    if kind == ArtifactKind::KernelPartition
        && params.vblock_only
        && params.outfile.as_deref() == Some(params.infile.as_path())
    {
        return Err(SignError::PolicyError(
            "--vblock_only requires an output file distinct from the input file".into(),
        ));
    }

    match kind {
        ArtifactKind::BarePubkey => sign_fresh_output(&probe, kind, &params, pubkey_wrapper::sign),
        ArtifactKind::RawFirmware => sign_fresh_output(&probe, kind, &params, raw_firmware::sign),
        ArtifactKind::RawKernel => sign_fresh_output(&probe, kind, &params, raw_kernel::sign),
        ArtifactKind::FirmwareImage => sign_in_place(&params, |buf| firmware_image::sign(buf, &params)),
        ArtifactKind::KernelPartition => sign_kernel_partition(&probe, &params),
    }
}

/// Kinds that always emit a brand-new file: read the input read-only, hand
/// the signer a borrowed slice, done. No mapping of the output is needed
/// because the signer writes it directly via `io_util::write_whole_file`.
fn sign_fresh_output(
    buf: &[u8],
    kind: ArtifactKind,
    params: &SigningParams,
    signer: impl FnOnce(&[u8], &SigningParams) -> Result<()>,
) -> Result<()> {
    debug_assert!(params.create_new_outfile, "{} must create a fresh outfile", kind.name());
    signer(buf, params)
}

/// Kinds that edit in place: copy infile to outfile first when they're
/// distinct paths, then map the result read-write and mutate it (spec 4.9
/// step 3-5).
fn sign_in_place(params: &SigningParams, signer: impl FnOnce(&mut [u8]) -> Result<()>) -> Result<()> {
    let outfile = params.outfile.as_deref().expect("contract guarantees an outfile");

    if outfile != params.infile.as_path() {
        io_util::atomic_copy(&params.infile, outfile)?;
    }

    let mut mapped = MappedFile::open_rw(outfile)?;
    let buf = mapped.as_mut_slice().expect("opened read-write");
    signer(buf)?;
    mapped.sync()
}

/// `KernelPartitionResigner` either mutates in place or produces a fresh
/// blob depending on `create_new_outfile`/`vblock_only`, so it needs its
/// own dispatch rather than fitting the two generic helpers above.
fn sign_kernel_partition(probe: &[u8], params: &SigningParams) -> Result<()> {
    let outfile = params.outfile.as_deref().expect("contract guarantees an outfile");

    if params.create_new_outfile {
        let outcome = kernel_partition::resign(probe, params)?;
        let bytes = match outcome {
            Outcome::NewFile(bytes) => bytes,
            Outcome::InPlace { vblock, blob } => {
                let mut out = vblock;
                out.extend_from_slice(&blob);
                out
            }
        };
        return io_util::write_whole_file(outfile, &[&bytes]);
    }

    if outfile != params.infile.as_path() {
        io_util::atomic_copy(&params.infile, outfile)?;
    }
    let mut mapped = MappedFile::open_rw(outfile)?;
    let outcome = kernel_partition::resign(mapped.as_slice(), params)?;
    let (vblock, blob) = match outcome {
        Outcome::InPlace { vblock, blob } => (vblock, blob),
        Outcome::NewFile(bytes) => (bytes, Vec::new()),
    };
    let buf = mapped.as_mut_slice().expect("opened read-write");
    let body_start = params.padding as usize;
    if vblock.len() > body_start || body_start + blob.len() > buf.len() {
        return Err(SignError::SizingError("resigned vblock/body no longer fit the partition".into()));
    }
    buf[..vblock.len()].copy_from_slice(&vblock);
    buf[body_start..body_start + blob.len()].copy_from_slice(&blob);
    mapped.sync()
}

/// Maps a clamped process exit code the binary returns: 0 on success, 1 if
/// any diagnostic was produced, matching the original tool's convention of
/// "1 on any failure, however many errors accumulated" (spec 7).
pub fn exit_code_for(result: &Result<()>) -> i32 {
    if result.is_ok() { 0 } else { 1 }
}
