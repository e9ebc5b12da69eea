//! End-to-end scenarios driven through `pipeline::run`, covering the
//! documented per-kind behaviors: a fresh key-block wrap, a raw firmware
//! body, a raw kernel pack, a full firmware image with matching and
//! diverging A/B bodies, and an in-place kernel partition resign.

use std::path::PathBuf;

use ed25519_dalek::SigningKey;
use tempfile::tempdir;

use vbutil_sign::envelope::{self, FirmwarePreamble, KeyBlock, KernelPreamble};
use vbutil_sign::params::Arch;
use vbutil_sign::primitives::PrivateKey;
use vbutil_sign::{pipeline, ArtifactKind, SignError, SigningParams};

fn write_key(dir: &std::path::Path, name: &str, seed: u8) -> (PathBuf, PrivateKey) {
    let signer = PrivateKey { signing_key: SigningKey::from_bytes(&[seed; 32]) };
    let path = dir.join(name);
    std::fs::write(&path, signer.signing_key.to_bytes()).unwrap();
    (path, signer)
}

fn write_keyblock(dir: &std::path::Path, name: &str, signer: &PrivateKey) -> PathBuf {
    let bytes = envelope::create_keyblock(&signer.public_bytes(), Some(signer), 0).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn wraps_a_bare_public_key_into_a_keyblock() {
    let dir = tempdir().unwrap();
    let (priv_path, signer) = write_key(dir.path(), "root.priv", 1);
    let (data_priv, data_signer) = write_key(dir.path(), "data.priv", 2);
    let _ = data_priv;

    let pubkey_path = dir.path().join("data.vbpubk");
    std::fs::write(&pubkey_path, data_signer.public_bytes()).unwrap();
    let outfile = dir.path().join("data.keyblock");

    let mut params = SigningParams::new(pubkey_path);
    params.explicit_type = Some(ArtifactKind::BarePubkey);
    params.sign_private = Some(priv_path);
    params.outfile = Some(outfile.clone());

    pipeline::run(params).unwrap();

    let written = std::fs::read(&outfile).unwrap();
    let kb = KeyBlock::parse(&written).unwrap();
    assert_eq!(kb.data_key, data_signer.public_bytes());
    KeyBlock::verify_signature(&written, &signer.signing_key.verifying_key()).unwrap();
}

#[test]
fn signs_a_raw_firmware_body() {
    let dir = tempdir().unwrap();
    let (priv_path, _signer) = write_key(dir.path(), "fw.priv", 3);
    let signer_for_block = PrivateKey { signing_key: SigningKey::from_bytes(&[3u8; 32]) };
    let keyblock_path = write_keyblock(dir.path(), "fw.keyblock", &signer_for_block);
    let (kernel_pub, kernel_signer) = write_key(dir.path(), "kernel.priv", 4);
    let _ = kernel_pub;
    let kernel_pubkey_path = dir.path().join("kernel.vbpubk");
    std::fs::write(&kernel_pubkey_path, kernel_signer.public_bytes()).unwrap();

    let body_path = dir.path().join("fw_main.bin");
    std::fs::write(&body_path, vec![0x42u8; 512 * 1024]).unwrap();
    let outfile = dir.path().join("vblock.bin");

    let mut params = SigningParams::new(body_path);
    params.explicit_type = Some(ArtifactKind::RawFirmware);
    params.sign_private = Some(priv_path);
    params.keyblock = Some(keyblock_path);
    params.kernel_subkey = Some(kernel_pubkey_path);
    params.version = Some(1);
    params.flags = Some(0);
    params.outfile = Some(outfile.clone());

    pipeline::run(params).unwrap();

    let written = std::fs::read(&outfile).unwrap();
    let kb = KeyBlock::parse(&written).unwrap();
    let preamble = FirmwarePreamble::parse(&written[kb.key_block_size as usize..]).unwrap();
    assert_eq!(preamble.body_data_size, 512 * 1024);
    assert_eq!(preamble.version, 1);
}

#[test]
fn packs_and_signs_a_raw_kernel_vblock_only() {
    let dir = tempdir().unwrap();
    let (priv_path, _signer) = write_key(dir.path(), "kern.priv", 5);
    let signer_for_block = PrivateKey { signing_key: SigningKey::from_bytes(&[5u8; 32]) };
    let keyblock_path = write_keyblock(dir.path(), "kern.keyblock", &signer_for_block);

    let vmlinuz_path = dir.path().join("vmlinuz");
    std::fs::write(&vmlinuz_path, vec![0x11u8; 2 * 1024 * 1024]).unwrap();
    let config_path = dir.path().join("cmdline.txt");
    std::fs::write(&config_path, vec![b'c'; 4000]).unwrap();
    let bootloader_path = dir.path().join("bootloader.bin");
    std::fs::write(&bootloader_path, vec![0x99u8; 8 * 1024]).unwrap();
    let outfile = dir.path().join("vblock_only.bin");

    let mut params = SigningParams::new(vmlinuz_path);
    params.explicit_type = Some(ArtifactKind::RawKernel);
    params.sign_private = Some(priv_path);
    params.keyblock = Some(keyblock_path);
    params.version = Some(1);
    params.arch = Arch::X86;
    params.kload_addr = Some(0x0010_0000);
    params.padding = 0x10000;
    params.bootloader = Some(std::fs::read(&bootloader_path).unwrap());
    params.config = Some(std::fs::read(&config_path).unwrap());
    params.vblock_only = true;
    params.outfile = Some(outfile.clone());

    pipeline::run(params).unwrap();

    let written = std::fs::read(&outfile).unwrap();
    assert_eq!(written.len(), 0x10000);
    let kb = KeyBlock::parse(&written).unwrap();
    let preamble = KernelPreamble::parse(&written[kb.key_block_size as usize..]).unwrap();
    assert_eq!(preamble.body_load_address, 0x0010_0000);
}

#[test]
fn firmware_image_signs_both_sides_when_a_equals_b() {
    let dir = tempdir().unwrap();
    let (priv_path, signer) = write_key(dir.path(), "fw.priv", 6);
    let keyblock_path = write_keyblock(dir.path(), "fw.keyblock", &signer);
    let (kernel_pub_path, kernel_signer) = write_key(dir.path(), "kernel.priv", 7);
    let _ = kernel_pub_path;
    let kernel_pubkey_path = dir.path().join("kernel.vbpubk");
    std::fs::write(&kernel_pubkey_path, kernel_signer.public_bytes()).unwrap();

    let image_path = build_firmware_image(dir.path(), &[0x55u8; 4096], &[0x55u8; 4096]);

    let mut params = SigningParams::new(image_path.clone());
    params.explicit_type = Some(ArtifactKind::FirmwareImage);
    params.sign_private = Some(priv_path);
    params.keyblock = Some(keyblock_path);
    params.kernel_subkey = Some(kernel_pubkey_path);

    pipeline::run(params).unwrap();

    let image = std::fs::read(&image_path).unwrap();
    assert_eq!(&image[0..16], [0u8; 16]);
}

#[test]
fn firmware_image_requires_dev_keys_when_ab_diverge() {
    let dir = tempdir().unwrap();
    let (priv_path, signer) = write_key(dir.path(), "fw.priv", 8);
    let keyblock_path = write_keyblock(dir.path(), "fw.keyblock", &signer);
    let (kernel_pub_path, kernel_signer) = write_key(dir.path(), "kernel.priv", 9);
    let _ = kernel_pub_path;
    let kernel_pubkey_path = dir.path().join("kernel.vbpubk");
    std::fs::write(&kernel_pubkey_path, kernel_signer.public_bytes()).unwrap();

    let image_path = build_firmware_image(dir.path(), &[0xAAu8; 4096], &[0xBBu8; 4096]);
    let before = std::fs::read(&image_path).unwrap();

    let mut params = SigningParams::new(image_path.clone());
    params.explicit_type = Some(ArtifactKind::FirmwareImage);
    params.sign_private = Some(priv_path);
    params.keyblock = Some(keyblock_path);
    params.kernel_subkey = Some(kernel_pubkey_path);

    let err = pipeline::run(params).unwrap_err();
    assert!(matches!(err, SignError::PolicyError(_)));
    assert_eq!(std::fs::read(&image_path).unwrap(), before);
}

#[test]
fn kernel_partition_resign_keeps_load_address_and_updates_config() {
    let dir = tempdir().unwrap();
    let (priv_path, signer) = write_key(dir.path(), "kern.priv", 10);

    let keyblock_bytes = envelope::create_keyblock(&signer.public_bytes(), Some(&signer), 0).unwrap();
    let blob = vbutil_sign::raw_kernel::pack(b"vmlinuz", Arch::X86, 0x0010_0000, b"console=ttyS0", b"stub")
        .unwrap();
    let vblock = envelope::sign_kernel_blob(&blob, 65536, 2, 0x0010_0000, &keyblock_bytes, &signer, 0)
        .unwrap();
    let mut partition = vblock;
    partition.extend_from_slice(&blob);

    let partition_path = dir.path().join("kernel_partition.bin");
    std::fs::write(&partition_path, &partition).unwrap();
    let new_config_path = dir.path().join("new_cmdline.txt");
    std::fs::write(&new_config_path, b"console=ttyS1 debug").unwrap();

    let mut params = SigningParams::new(partition_path.clone());
    params.explicit_type = Some(ArtifactKind::KernelPartition);
    params.sign_private = Some(priv_path);
    params.padding = 65536;
    params.config = Some(std::fs::read(&new_config_path).unwrap());
    params.kload_addr = Some(0xDEAD_BEEF); // must be ignored

    pipeline::run(params).unwrap();

    let resigned = std::fs::read(&partition_path).unwrap();
    let (_, preamble, blob) = envelope::unpack_kernel_partition(&resigned, 65536).unwrap();
    assert_eq!(preamble.body_load_address, 0x0010_0000);
    assert_eq!(vbutil_sign::raw_kernel::unpack_config(blob).unwrap(), b"console=ttyS1 debug");
}

fn build_firmware_image(dir: &std::path::Path, fw_a: &[u8], fw_b: &[u8]) -> PathBuf {
    use byteorder::{LittleEndian, WriteBytesExt};
    use vbutil_sign::regionmap;

    let region_size = fw_a.len() as u32;
    let mut image = vec![0u8; 16];
    let fw_a_off = image.len() as u32;
    image.extend_from_slice(fw_a);
    let fw_b_off = image.len() as u32;
    image.extend_from_slice(fw_b);
    let vblock_a_off = image.len() as u32;
    image.extend_from_slice(&vec![0u8; region_size as usize]);
    let vblock_b_off = image.len() as u32;
    image.extend_from_slice(&vec![0u8; region_size as usize]);

    image.extend_from_slice(regionmap::MAP_MAGIC);
    image.write_u32::<LittleEndian>(4).unwrap();
    for (name, off, size) in [
        ("FW_MAIN_A", fw_a_off, region_size),
        ("FW_MAIN_B", fw_b_off, region_size),
        ("VBLOCK_A", vblock_a_off, region_size),
        ("VBLOCK_B", vblock_b_off, region_size),
    ] {
        let mut name_buf = [0u8; 32];
        name_buf[..name.len()].copy_from_slice(name.as_bytes());
        image.extend_from_slice(&name_buf);
        image.write_u32::<LittleEndian>(off).unwrap();
        image.write_u32::<LittleEndian>(size).unwrap();
    }

    let path = dir.join("bios.bin");
    std::fs::write(&path, &image).unwrap();
    path
}
