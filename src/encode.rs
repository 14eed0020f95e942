//! Binary-lite wire codec primitives.
//!
//! The legacy-lite encoding used by [`PartitionSet`](crate::partition::PartitionSet)
//! stores small integers in a variable-length "packed" form: the first byte
//! carries six data bits, a sign bit (`0x40`) and a continuation bit (`0x80`);
//! each subsequent byte carries seven data bits plus a continuation bit. A
//! 32-bit value therefore occupies one to five bytes depending on magnitude.
//!
//! All readers are length-checked and fail with
//! [`Error::TruncatedStream`](crate::error::Error::TruncatedStream) instead of
//! panicking on short input.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Entities that round-trip through the binary-lite wire format.
pub trait WireCodec: Sized {
    /// Serialize into the provided buffer.
    fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()>;

    /// Deserialize from the provided buffer, consuming exactly the bytes the
    /// encoder produced.
    fn read_from<B: Buf>(buf: &mut B) -> Result<Self>;
}

/// Write a packed 32-bit integer.
pub fn put_packed_i32<B: BufMut>(buf: &mut B, value: i32) {
    let mut n = value;
    let mut b: u8 = 0;

    if n < 0 {
        b = 0x40;
        n = !n;
    }

    // first byte holds six data bits
    b |= (n & 0x3F) as u8;
    n = ((n as u32) >> 6) as i32;

    while n != 0 {
        buf.put_u8(b | 0x80);
        b = (n & 0x7F) as u8;
        n = ((n as u32) >> 7) as i32;
    }

    buf.put_u8(b);
}

/// Read a packed 32-bit integer.
pub fn get_packed_i32<B: Buf>(buf: &mut B) -> Result<i32> {
    let mut b = get_u8(buf)?;
    let mut n: i32 = (b & 0x3F) as i32;
    let mut bits = 6u32;
    let negative = b & 0x40 != 0;

    while b & 0x80 != 0 {
        b = get_u8(buf)?;
        if bits < 32 {
            n |= ((b & 0x7F) as i32) << bits;
        }
        bits += 7;
    }

    Ok(if negative { !n } else { n })
}

/// Read a single byte, checking the remaining length.
pub fn get_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(Error::TruncatedStream { needed: 1 });
    }
    Ok(buf.get_u8())
}

/// Read a big-endian u16, checking the remaining length.
pub fn get_u16<B: Buf>(buf: &mut B) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(Error::TruncatedStream {
            needed: 2 - buf.remaining(),
        });
    }
    Ok(buf.get_u16())
}

/// Read a big-endian u64, checking the remaining length.
pub fn get_u64<B: Buf>(buf: &mut B) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(Error::TruncatedStream {
            needed: 8 - buf.remaining(),
        });
    }
    Ok(buf.get_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(value: i32) -> (usize, i32) {
        let mut buf = BytesMut::new();
        put_packed_i32(&mut buf, value);
        let len = buf.len();
        let mut read = buf.freeze();
        (len, get_packed_i32(&mut read).unwrap())
    }

    #[test]
    fn packed_int_round_trip() {
        for value in [
            0,
            1,
            -1,
            0x3F,
            0x40,
            127,
            128,
            8191,
            8192,
            i32::MAX,
            i32::MIN,
            -8192,
        ] {
            let (_, decoded) = round_trip(value);
            assert_eq!(decoded, value, "round trip failed for {value}");
        }
    }

    #[test]
    fn packed_int_lengths() {
        // 6 bits in the first byte, 7 in each continuation
        assert_eq!(round_trip(0x3F).0, 1);
        assert_eq!(round_trip(0x40).0, 2);
        assert_eq!(round_trip(-1).0, 1);
        assert_eq!(round_trip(i32::MAX).0, 5);
    }

    #[test]
    fn truncated_read_is_an_error() {
        let mut buf = BytesMut::new();
        put_packed_i32(&mut buf, i32::MAX);
        let mut short = buf.freeze().slice(0..2);
        assert!(matches!(
            get_packed_i32(&mut short),
            Err(Error::TruncatedStream { .. })
        ));
    }
}
