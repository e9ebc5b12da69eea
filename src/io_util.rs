//! File I/O helpers spec section 1 calls out as external collaborators:
//! whole-file reads, map/unmap, and atomic copy. Grounded on the teacher's
//! `xtask` crate, which uses `tempfile` for scratch-then-rename writes, and
//! enriched with `memmap2` (used elsewhere in the retrieval pack for this
//! exact purpose, e.g. `wasmer`/`samply`) since no tool in the teacher repo
//! itself memory-maps a host file for in-place editing.

use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{Result, SignError};

fn io_err(path: &Path, e: std::io::Error) -> SignError {
    SignError::IoError(format!("{}: {e}", path.display()))
}

/// Reads a whole file into an owned buffer.
pub fn read_whole_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| io_err(path, e))
}

/// Atomically copies `src` to `dst`: write to a temp file in `dst`'s
/// directory, then rename over the destination. Used before opening an
/// in-place-capable kind read-write when both `infile` and `outfile` are
/// distinct paths (spec 4.9 step 3).
pub fn atomic_copy(src: &Path, dst: &Path) -> Result<()> {
    let bytes = read_whole_file(src)?;
    let dir = dst.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_err(dst, e))?;
    tmp.write_all(&bytes).map_err(|e| io_err(dst, e))?;
    tmp.persist(dst).map_err(|e| io_err(dst, e.error))?;
    Ok(())
}

/// Writes `parts` (concatenated) to `path` atomically: single writer,
/// truncate + full write (spec 4.4's "atomically" requirement for
/// `PubkeyWrapper`, generalized for every signer that emits a fresh file).
pub fn write_whole_file(path: &Path, parts: &[&[u8]]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_err(path, e))?;
    for part in parts {
        tmp.write_all(part).map_err(|e| io_err(path, e))?;
    }
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

/// A memory-mapped input, read-only or read-write, matching the `MAP_RO`
/// vs `MAP_RW` distinction `futil_map_file` makes in the original. Unmap
/// (on `Drop`) flushes any in-place mutation to disk, per spec section 4.9
/// step 5 and section 5's "persistence to disk is guaranteed by the unmap
/// step".
pub enum MappedFile {
    ReadOnly { _file: File, map: Mmap },
    ReadWrite { _file: File, map: MmapMut },
}

impl MappedFile {
    pub fn open_ro(path: &Path) -> Result<MappedFile> {
        let file = File::open(path).map_err(|e| io_err(path, e))?;
        let map = unsafe { Mmap::map(&file) }.map_err(|e| io_err(path, e))?;
        Ok(MappedFile::ReadOnly { _file: file, map })
    }

    pub fn open_rw(path: &Path) -> Result<MappedFile> {
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(|e| io_err(path, e))?;
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| io_err(path, e))?;
        Ok(MappedFile::ReadWrite { _file: file, map })
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            MappedFile::ReadOnly { map, .. } => map,
            MappedFile::ReadWrite { map, .. } => map,
        }
    }

    /// `None` for a read-only mapping; signers that need to mutate in
    /// place must have opened via `open_rw`.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            MappedFile::ReadOnly { .. } => None,
            MappedFile::ReadWrite { map, .. } => Some(map),
        }
    }

    /// Explicit sync before the mapping is dropped. `MmapMut::flush`
    /// already guarantees this on platforms where drop-time flush isn't
    /// otherwise guaranteed (spec section 9's reimplementation note).
    pub fn sync(&self) -> Result<()> {
        if let MappedFile::ReadWrite { map, .. } = self {
            map.flush().map_err(|e| SignError::IoError(e.to_string()))?;
        }
        Ok(())
    }
}
