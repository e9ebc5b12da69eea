//! The configuration object threaded through the pipeline (spec section 3).
//!
//! The legacy `futility` implementation this engine replaces kept all of
//! this in a single file-scope `static struct local_data_s option`. Here it
//! is an explicit, owned parameter object with no module-level singleton,
//! per spec section 9's "Global mutable params" redesign flag.

use std::path::PathBuf;

/// CPU architecture for a raw kernel pack, mirrors `enum arch_t` in the
/// original `cmd_sign.c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arch {
    #[default]
    Unspecified,
    X86,
    Arm,
    Mips,
}

impl Arch {
    /// `--arch` accepts `x86|amd64`, `arm|aarch64`, `mips`, case-insensitive,
    /// and matches `x86*` on just the first three characters (so `x86_64`
    /// also works), per spec section 6.
    pub fn parse(s: &str) -> Option<Arch> {
        let lower = s.to_ascii_lowercase();
        if lower.len() >= 3 && &lower[..3] == "x86" || lower == "amd64" {
            Some(Arch::X86)
        } else if lower == "arm" || lower == "aarch64" {
            Some(Arch::Arm)
        } else if lower == "mips" {
            Some(Arch::Mips)
        } else {
            None
        }
    }

    /// Architecture-standard default load address, used when the caller
    /// doesn't supply `--kloadaddr`.
    pub fn default_load_addr(self) -> u32 {
        match self {
            Arch::Unspecified | Arch::X86 => 0x0010_0000,
            Arch::Arm => 0x0008_0000,
            Arch::Mips => 0x0010_0000,
        }
    }
}

/// One of the five artifact shapes the engine knows how to sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    BarePubkey,
    RawFirmware,
    FirmwareImage,
    RawKernel,
    KernelPartition,
}

impl ArtifactKind {
    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::BarePubkey => "pubkey",
            ArtifactKind::RawFirmware => "raw_firmware",
            ArtifactKind::FirmwareImage => "bios_image",
            ArtifactKind::RawKernel => "raw_kernel",
            ArtifactKind::KernelPartition => "kern_preamble",
        }
    }

    pub fn from_name(s: &str) -> Option<ArtifactKind> {
        Some(match s {
            "pubkey" => ArtifactKind::BarePubkey,
            "raw_firmware" => ArtifactKind::RawFirmware,
            "bios_image" => ArtifactKind::FirmwareImage,
            "raw_kernel" => ArtifactKind::RawKernel,
            "kern_preamble" => ArtifactKind::KernelPartition,
            _ => return None,
        })
    }

    pub fn all() -> [ArtifactKind; 5] {
        [
            ArtifactKind::BarePubkey,
            ArtifactKind::RawFirmware,
            ArtifactKind::FirmwareImage,
            ArtifactKind::RawKernel,
            ArtifactKind::KernelPartition,
        ]
    }

    /// Short per-kind help line, printed by `--type help`.
    pub fn help_line(self) -> &'static str {
        match self {
            ArtifactKind::BarePubkey => {
                "pubkey        wrap a bare public key into a keyblock (--signprivate or --pem_signpriv)"
            }
            ArtifactKind::RawFirmware => {
                "raw_firmware  sign a raw FW_MAIN_A/B blob (--signprivate --keyblock --kernelkey --version)"
            }
            ArtifactKind::FirmwareImage => {
                "bios_image    sign a full firmware image in place (--signprivate --keyblock --kernelkey)"
            }
            ArtifactKind::RawKernel => {
                "raw_kernel    pack+sign a vmlinuz into a kernel partition (--signprivate --keyblock --version --bootloader --config --arch)"
            }
            ArtifactKind::KernelPartition => {
                "kern_preamble resign an existing kernel partition (--signprivate)"
            }
        }
    }
}

/// An overridable numeric parameter, paired with whether the caller set it
/// explicitly. Modeled as `Option<u32>` rather than a value+bool pair, per
/// spec section 9's "specified shadow flags" redesign note.
pub type Specified<T> = Option<T>;

/// Configuration passed down from the command layer. Owned by the pipeline
/// for the duration of one invocation (spec section 3, "Lifecycle").
#[derive(Debug, Default)]
pub struct SigningParams {
    pub sign_private: Option<PathBuf>,
    pub keyblock: Option<PathBuf>,
    pub kernel_subkey: Option<PathBuf>,
    pub dev_sign_private: Option<PathBuf>,
    pub dev_keyblock: Option<PathBuf>,

    pub pem_sign_private: Option<PathBuf>,
    pub pem_algo: Specified<u32>,
    pub pem_external: Option<PathBuf>,

    pub version: Specified<u32>,
    pub flags: Specified<u32>,

    pub loem_dir: Option<PathBuf>,
    pub loem_id: Option<String>,

    pub bootloader: Option<Vec<u8>>,
    pub config: Option<Vec<u8>>,
    pub arch: Arch,
    pub kload_addr: Specified<u32>,
    pub padding: u32,

    pub vblock_only: bool,
    pub fv_specified: bool,

    pub infile: PathBuf,
    pub outfile: Option<PathBuf>,
    pub create_new_outfile: bool,

    pub explicit_type: Option<ArtifactKind>,
}

impl SigningParams {
    pub fn new(infile: PathBuf) -> Self {
        SigningParams { infile, padding: 65536, ..Default::default() }
    }

    pub fn version_or(&self, default: u32) -> u32 {
        self.version.unwrap_or(default)
    }

    pub fn flags_or(&self, default: u32) -> u32 {
        self.flags.unwrap_or(default)
    }

    pub fn kload_addr_or_arch_default(&self) -> u32 {
        self.kload_addr.unwrap_or_else(|| self.arch.default_load_addr())
    }
}
