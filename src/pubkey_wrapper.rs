//! PubkeyWrapper (spec 4.4): bare public-key file -> key-block file.

use std::path::Path;

use crate::envelope;
use crate::error::Result;
use crate::io_util;
use crate::params::SigningParams;
use crate::primitives;

/// `buf` is the bare public key (exactly `primitives::PUBLIC_KEY_LEN`
/// bytes). Writes the resulting key block to `params.outfile` atomically.
pub fn sign(buf: &[u8], params: &SigningParams) -> Result<()> {
    let outfile = params.outfile.as_deref().expect("ArgContract guarantees outfile is set");
    let flags = params.flags_or(0);

    let keyblock = if let Some(pem_path) = &params.pem_sign_private {
        if let Some(helper) = &params.pem_external {
            log::info!("wrapping {} via external signer {}", display(&params.infile), display(helper));
            envelope::create_keyblock_external(
                buf,
                pem_path,
                params.pem_algo.unwrap_or(0),
                flags,
                helper,
            )?
        } else {
            let key = primitives::read_private_pem(pem_path, params.pem_algo.unwrap_or(0))?;
            envelope::create_keyblock(buf, Some(&key), flags)?
        }
    } else if let Some(priv_path) = &params.sign_private {
        let key = primitives::read_private(priv_path)?;
        envelope::create_keyblock(buf, Some(&key), flags)?
    } else {
        log::warn!("no signing key supplied; writing an unsigned key block");
        envelope::create_keyblock(buf, None, flags)?
    };

    io_util::write_whole_file(outfile, &[&keyblock])
}

fn display(p: &Path) -> String {
    p.display().to_string()
}
