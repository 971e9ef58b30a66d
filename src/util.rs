use byteorder::{ByteOrder, LittleEndian};

/// Number of catalog slots ( and buffer pools ) per database.
pub const MAX_TABLES: usize = 256;

/// Extract u16 from byte data.
pub fn getu16(data: &[u8], off: usize) -> u16 {
    LittleEndian::read_u16(&data[off..off + 2])
}

/// Store u16 to byte data.
pub fn setu16(data: &mut [u8], off: usize, val: u16) {
    LittleEndian::write_u16(&mut data[off..off + 2], val);
}

/// Extract u32 from byte data.
pub fn getu32(data: &[u8], off: usize) -> u32 {
    LittleEndian::read_u32(&data[off..off + 4])
}

/// Store u32 to byte data.
pub fn setu32(data: &mut [u8], off: usize, val: u32) {
    LittleEndian::write_u32(&mut data[off..off + 4], val);
}

/// Extract u64 from byte data.
pub fn getu64(data: &[u8], off: usize) -> u64 {
    LittleEndian::read_u64(&data[off..off + 8])
}

/// Store u64 to byte data.
pub fn setu64(data: &mut [u8], off: usize, val: u64) {
    LittleEndian::write_u64(&mut data[off..off + 8], val);
}

/// Extract i32 from byte data.
pub fn geti32(data: &[u8], off: usize) -> i32 {
    LittleEndian::read_i32(&data[off..off + 4])
}

/// Store i32 to byte data.
pub fn seti32(data: &mut [u8], off: usize, val: i32) {
    LittleEndian::write_i32(&mut data[off..off + 4], val);
}

/// Extract i64 from byte data.
pub fn geti64(data: &[u8], off: usize) -> i64 {
    LittleEndian::read_i64(&data[off..off + 8])
}

/// Store i64 to byte data.
pub fn seti64(data: &mut [u8], off: usize, val: i64) {
    LittleEndian::write_i64(&mut data[off..off + 8], val);
}

/// Extract f32 from byte data.
pub fn getf32(data: &[u8], off: usize) -> f32 {
    LittleEndian::read_f32(&data[off..off + 4])
}

/// Extract f64 from byte data.
pub fn getf64(data: &[u8], off: usize) -> f64 {
    LittleEndian::read_f64(&data[off..off + 8])
}

/// Case-sensitive FNV-1a hash of a table or column name, reduced modulo `modulus`.
///
/// This hash is part of the on-disk format: it selects the schema-file offset
/// slot and names per-column index files, so it must not change.
pub fn fnv1a(name: &str, modulus: u32) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in name.as_bytes() {
        h ^= *b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h % modulus
}

/// Full-width FNV-1a, used to name per-column B-tree files.
pub fn fnv1a_full(name: &str) -> u32 {
    fnv1a(name, u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_roundtrip() {
        let mut buf = [0u8; 16];
        setu64(&mut buf, 3, 0xdead_beef_cafe_f00d);
        assert_eq!(getu64(&buf, 3), 0xdead_beef_cafe_f00d);
        seti32(&mut buf, 0, -123456);
        assert_eq!(geti32(&buf, 0), -123456);
    }

    #[test]
    fn fnv_is_stable() {
        // Slot assignment is on-disk; these values must never change.
        assert_eq!(fnv1a("jb_tables", 256), fnv1a("jb_tables", 256));
        assert_ne!(fnv1a("jb_tables", 256), fnv1a("jb_attribute", 256));
        assert!(fnv1a("employees", 256) < 256);
    }
}
