//! The region-map parser spec section 1 treats as an external collaborator:
//! `find_map(buf) -> map`, `find_area(map, name) -> (offset, size)`. Models
//! the `FMAP` area table that `fmap_find`/`fmap_find_by_name` walk in the
//! original `cmd_sign.c`.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Result, SignError};

pub const MAP_MAGIC: &[u8; 8] = b"__FMAP__";
const NAME_LEN: usize = 32;

/// One named byte range inside the image.
#[derive(Debug, Clone, Copy)]
pub struct Area {
    pub offset: u32,
    pub size: u32,
}

/// An ordered list of named byte ranges inside a firmware image.
#[derive(Debug, Clone)]
pub struct RegionMap {
    areas: Vec<(String, Area)>,
}

/// The four area names spec section 3 recognizes, each with a legacy alias.
pub const FW_MAIN_A: (&str, &str) = ("FW_MAIN_A", "RW_SECTION_A");
pub const FW_MAIN_B: (&str, &str) = ("FW_MAIN_B", "RW_SECTION_B");
pub const VBLOCK_A: (&str, &str) = ("VBLOCK_A", "RW_VBLOCK_A");
pub const VBLOCK_B: (&str, &str) = ("VBLOCK_B", "RW_VBLOCK_B");

/// `find_map(buf) -> map`. Scans for the `__FMAP__` magic at any 8-byte
/// aligned offset, the way `fmap_find` scans the whole image rather than
/// assuming a fixed location.
pub fn find_map(buf: &[u8]) -> Result<RegionMap> {
    let mut pos = None;
    let mut off = 0usize;
    while off + 8 <= buf.len() {
        if &buf[off..off + 8] == MAP_MAGIC {
            pos = Some(off);
            break;
        }
        off += 8;
    }
    let start = pos.ok_or_else(|| SignError::FormatError("no region map found in image".into()))?;

    let mut c = Cursor::new(&buf[start + 8..]);
    let count = c.read_u32::<LittleEndian>()? as usize;
    let mut areas = Vec::with_capacity(count);
    for _ in 0..count {
        let mut name_buf = [0u8; NAME_LEN];
        std::io::Read::read_exact(&mut c, &mut name_buf)?;
        let name_len = name_buf.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&name_buf[..name_len]).into_owned();
        let offset = c.read_u32::<LittleEndian>()?;
        let size = c.read_u32::<LittleEndian>()?;
        areas.push((name, Area { offset, size }));
    }
    Ok(RegionMap { areas })
}

/// `find_area(map, name) -> (offset, size)`. Accepts either the primary or
/// the legacy alias name. The returned area's length is truncated to fit
/// within `image_len` if the file is shorter than the map claims (spec
/// 4.8 step 1, "truncation of the last area ... is permitted and
/// recorded").
pub fn find_area(map: &RegionMap, names: (&str, &str), image_len: usize) -> Option<Area> {
    let mut area = map
        .areas
        .iter()
        .find(|(n, _)| n == names.0 || n == names.1)
        .map(|(_, a)| *a)?;

    if area.offset as usize >= image_len {
        return None;
    }
    let available = image_len - area.offset as usize;
    if (area.size as usize) > available {
        area.size = available as u32;
    }
    Some(area)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn build_map(areas: &[(&str, u32, u32)]) -> Vec<u8> {
        let mut buf = vec![0u8; 16]; // leading junk, map not at offset 0
        buf.extend_from_slice(MAP_MAGIC);
        buf.write_u32::<LittleEndian>(areas.len() as u32).unwrap();
        for (name, offset, size) in areas {
            let mut name_buf = [0u8; NAME_LEN];
            name_buf[..name.len()].copy_from_slice(name.as_bytes());
            buf.extend_from_slice(&name_buf);
            buf.write_u32::<LittleEndian>(*offset).unwrap();
            buf.write_u32::<LittleEndian>(*size).unwrap();
        }
        buf
    }

    #[test]
    fn finds_map_and_areas() {
        let buf = build_map(&[("FW_MAIN_A", 0x1000, 0x2000), ("RW_VBLOCK_A", 0x3000, 0x1000)]);
        let map = find_map(&buf).unwrap();
        let a = find_area(&map, FW_MAIN_A, buf.len()).unwrap();
        assert_eq!((a.offset, a.size), (0x1000, 0x2000));
        let v = find_area(&map, VBLOCK_A, buf.len()).unwrap();
        assert_eq!((v.offset, v.size), (0x3000, 0x1000));
    }

    #[test]
    fn truncates_area_to_file_length() {
        let buf = build_map(&[("FW_MAIN_A", 0x10, 0x1000)]);
        let short_len = 0x20;
        let a = find_area(&find_map(&buf).unwrap(), FW_MAIN_A, short_len).unwrap();
        assert_eq!(a.offset, 0x10);
        assert_eq!(a.size, (short_len - 0x10) as u32);
    }

    #[test]
    fn missing_area_is_none() {
        let buf = build_map(&[("FW_MAIN_A", 0x10, 0x1000)]);
        let map = find_map(&buf).unwrap();
        assert!(find_area(&map, FW_MAIN_B, buf.len()).is_none());
    }
}
