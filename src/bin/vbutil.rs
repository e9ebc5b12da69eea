//! `vbutil sign` command-line front end. Parses arguments with `clap`,
//! assembles a [`vbutil_sign::SigningParams`], and hands off to the
//! pipeline, mirroring the `vaultbackup-rs` host-tool idiom: `anyhow`
//! at the binary boundary, `env_logger` for diagnostics, a typed error
//! enum underneath.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use vbutil_sign::{params::Arch, ArtifactKind, SigningParams};

#[derive(Parser)]
#[command(name = "vbutil", version, about = "Verified-boot artifact signing engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign or re-sign a verified-boot artifact.
    Sign(SignArgs),
}

#[derive(clap::Args)]
struct SignArgs {
    /// Path to the private signing key (raw 32-byte seed or PEM via --pem_signpriv).
    #[arg(short = 's', long = "signprivate")]
    signprivate: Option<PathBuf>,

    /// Path to the key block that wraps the corresponding public key.
    #[arg(short = 'b', long = "keyblock")]
    keyblock: Option<PathBuf>,

    /// Path to the public key that signs the next link in the chain.
    #[arg(short = 'k', long = "kernelkey")]
    kernelkey: Option<PathBuf>,

    /// Developer private key, used when a firmware image's A/B bodies differ.
    #[arg(short = 'S', long = "devsign")]
    devsign: Option<PathBuf>,

    /// Developer key block, paired with --devsign.
    #[arg(short = 'B', long = "devkeyblock")]
    devkeyblock: Option<PathBuf>,

    /// Version number stamped into the preamble (default 1 where required).
    #[arg(short = 'v', long = "version", value_parser = parse_num)]
    version: Option<u32>,

    /// Preamble flags word (default 0).
    #[arg(short = 'f', long = "flags", value_parser = parse_num)]
    flags: Option<u32>,

    /// Directory to drop LOEM-specific vblock copies into.
    #[arg(short = 'd', long = "loemdir")]
    loemdir: Option<PathBuf>,

    /// LOEM identifier; when set, each signed vblock is also written to
    /// `<loemdir>/vblock_<A|B>.<loemid>`.
    #[arg(short = 'l', long = "loemid")]
    loemid: Option<String>,

    /// Treat the input as a raw firmware volume body for kind inference.
    #[arg(long = "fv")]
    fv: bool,

    /// Alias for INFILE, used by callers that think in terms of a bare public key.
    #[arg(long = "datapubkey")]
    datapubkey: Option<PathBuf>,

    /// Alias for INFILE, used by callers packing a raw kernel.
    #[arg(long = "vmlinuz")]
    vmlinuz: Option<PathBuf>,

    /// Alias for INFILE.
    #[arg(long = "infile")]
    infile_flag: Option<PathBuf>,

    /// Path to a bootloader stub, embedded verbatim in a raw kernel blob.
    #[arg(long = "bootloader")]
    bootloader: Option<PathBuf>,

    /// Path to a file holding the kernel command line.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Target architecture: x86, arm, or mips (case-insensitive, prefix-matched).
    #[arg(long = "arch")]
    arch: Option<String>,

    /// Kernel body load address (defaults to the architecture's standard address).
    #[arg(long = "kloadaddr", value_parser = parse_num)]
    kloadaddr: Option<u32>,

    /// Total vblock size to pad the signature block out to (default 65536).
    #[arg(long = "pad", value_parser = parse_num)]
    pad: Option<u32>,

    /// PEM-encoded PKCS#8 private key, used instead of --signprivate.
    #[arg(long = "pem_signpriv")]
    pem_signpriv: Option<PathBuf>,

    /// Algorithm identifier paired with --pem_signpriv (accepted, ignored at the crypto layer).
    #[arg(long = "pem_algo", value_parser = parse_num)]
    pem_algo: Option<u32>,

    /// External program to invoke for the actual signing step, given --pem_signpriv.
    #[arg(long = "pem_external")]
    pem_external: Option<PathBuf>,

    /// Explicit artifact kind, bypassing detection. Pass `help` to list the kinds.
    #[arg(long = "type")]
    kind: Option<String>,

    /// Emit only the signature block, not the full signed artifact.
    #[arg(long = "vblockonly")]
    vblockonly: bool,

    /// Input artifact.
    infile: Option<PathBuf>,

    /// Output path. Defaults to INFILE for kinds that sign in place.
    outfile: Option<PathBuf>,
}

/// Parses a `--flags`/`--version`/`--kloadaddr`/... numeric argument,
/// accepting a `0x`-prefixed hex literal the same way the original tool's
/// `strtoul(optarg, 0, 0)` does.
fn parse_num(s: &str) -> Result<u32, String> {
    let lower = s.trim();
    if let Some(hex) = lower.strip_prefix("0x").or_else(|| lower.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        lower.parse::<u32>().map_err(|e| e.to_string())
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let Command::Sign(args) = cli.command;

    match run(args) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("vbutil: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: SignArgs) -> anyhow::Result<u8> {
    if args.kind.as_deref() == Some("help") {
        for kind in ArtifactKind::all() {
            println!("{}", kind.help_line());
        }
        return Ok(0);
    }

    let infile = args
        .infile
        .or(args.infile_flag)
        .or(args.datapubkey)
        .or(args.vmlinuz)
        .context("missing INFILE")?;

    let mut params = SigningParams::new(infile);
    params.sign_private = args.signprivate;
    params.keyblock = args.keyblock;
    params.kernel_subkey = args.kernelkey;
    params.dev_sign_private = args.devsign;
    params.dev_keyblock = args.devkeyblock;
    params.pem_sign_private = args.pem_signpriv;
    params.pem_algo = args.pem_algo;
    params.pem_external = args.pem_external;
    params.version = args.version;
    params.flags = args.flags;
    params.loem_dir = args.loemdir;
    params.loem_id = args.loemid;
    params.kload_addr = args.kloadaddr;
    params.vblock_only = args.vblockonly;
    params.fv_specified = args.fv;
    params.outfile = args.outfile;
    if let Some(pad) = args.pad {
        params.padding = pad;
    }

    if let Some(path) = &args.bootloader {
        params.bootloader =
            Some(std::fs::read(path).with_context(|| format!("reading {}", path.display()))?);
    }
    if let Some(path) = &args.config {
        params.config =
            Some(std::fs::read(path).with_context(|| format!("reading {}", path.display()))?);
    }
    if let Some(arch) = &args.arch {
        params.arch = Arch::parse(arch).with_context(|| format!("unrecognized --arch value {arch:?}"))?;
    }
    if let Some(kind) = &args.kind {
        params.explicit_type =
            Some(ArtifactKind::from_name(kind).with_context(|| format!("unrecognized --type value {kind:?}"))?);
    }

    let result = vbutil_sign::pipeline::run(params);
    if let Err(e) = &result {
        eprintln!("vbutil: {e}");
    }
    Ok(vbutil_sign::pipeline::exit_code_for(&result) as u8)
}

