//! Wire encoding of `f64` payloads (native endianness, ranks share a host
//! architecture).

use bytes::Bytes;

/// Copy `v` into an owned byte message.
pub fn encode(v: &[f64]) -> Bytes {
    Bytes::copy_from_slice(bytemuck::cast_slice(v))
}

/// Number of doubles carried by `msg`.
#[inline]
pub fn count(msg: &[u8]) -> usize {
    msg.len() / std::mem::size_of::<f64>()
}

/// Decode `msg` into the front of `dst`; returns the number of values written.
/// The message may be unaligned. Callers check `count(msg) <= dst.len()`.
pub fn decode_into(msg: &[u8], dst: &mut [f64]) -> usize {
    let mut n = 0;
    for (d, chunk) in dst
        .iter_mut()
        .zip(msg.chunks_exact(std::mem::size_of::<f64>()))
    {
        *d = bytemuck::pod_read_unaligned(chunk);
        n += 1;
    }
    n
}

/// Decode a whole message.
pub fn decode(msg: &[u8]) -> Vec<f64> {
    let mut out = vec![0.0; count(msg)];
    decode_into(msg, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_from_an_unaligned_slice() {
        let v = [1.5, -2.0, f64::MAX];
        let msg = encode(&v);
        let mut shifted = vec![0u8; msg.len() + 1];
        shifted[1..].copy_from_slice(&msg);
        assert_eq!(decode(&shifted[1..]), v.to_vec());

        let mut short = [0.0; 2];
        assert_eq!(decode_into(&msg, &mut short), 2);
        assert_eq!(short, [1.5, -2.0]);
    }
}
