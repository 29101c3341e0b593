//! SQLite variable-length integers.
//!
//! Big-endian groups of seven bits with the high bit as continuation flag.
//! A ninth byte, if reached, contributes all eight bits.

/// Maximum encoded length of a varint.
pub const MAX_VARINT_LEN: usize = 9;

/// Reads a varint from the start of `data`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// input ends before the varint does.
pub fn read(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for i in 0..8 {
        let byte = *data.get(i)?;
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    let byte = *data.get(8)?;
    value = (value << 8) | u64::from(byte);
    Some((value, MAX_VARINT_LEN))
}

/// Appends the varint encoding of `value` to `out`.
pub fn write(out: &mut Vec<u8>, mut value: u64) {
    if value & (0xff00_0000_u64 << 32) != 0 {
        let mut buf = [0u8; MAX_VARINT_LEN];
        buf[8] = value as u8;
        value >>= 8;
        for slot in buf[..8].iter_mut().rev() {
            *slot = ((value & 0x7f) as u8) | 0x80;
            value >>= 7;
        }
        out.extend_from_slice(&buf);
        return;
    }

    let mut groups = Vec::with_capacity(MAX_VARINT_LEN);
    loop {
        groups.push(((value & 0x7f) as u8) | 0x80);
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    groups[0] &= 0x7f;
    out.extend(groups.iter().rev());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encoded(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write(&mut out, value);
        out
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(0x7f), vec![0x7f]);
        assert_eq!(encoded(0x80), vec![0x81, 0x00]);
        assert_eq!(encoded(300), vec![0x82, 0x2c]);
        assert_eq!(encoded(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn truncated_input() {
        assert_eq!(read(&[]), None);
        assert_eq!(read(&[0x81]), None);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        assert_eq!(read(&[0x82, 0x2c, 0xff]), Some((300, 2)));
    }

    proptest! {
        #[test]
        fn read_inverts_write(value in any::<u64>()) {
            let bytes = encoded(value);
            prop_assert_eq!(read(&bytes), Some((value, bytes.len())));
        }
    }
}
