//! Minimal ABI word codec for the game contract's call surface.
//!
//! The contract ABI is small and static enough that we encode calldata
//! and decode return words by hand instead of pulling in a full ABI
//! library. Every value is a 32-byte big-endian word; dynamic `bytes[]`
//! arguments only ever carry a single oracle payload.

use super::client::ChainError;

pub const WORD: usize = 32;

/// Returns the `i`-th 32-byte word of an ABI-encoded return blob.
pub fn word_at(data: &[u8], i: usize) -> Result<&[u8], ChainError> {
    let start = i * WORD;
    let end = start + WORD;
    if data.len() < end {
        return Err(ChainError::Rpc(format!(
            "return data too short: {} bytes, wanted word {}",
            data.len(),
            i
        )));
    }
    Ok(&data[start..end])
}

pub fn u64_at(data: &[u8], i: usize) -> Result<u64, ChainError> {
    let w = word_at(data, i)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[24..32]);
    Ok(u64::from_be_bytes(buf))
}

pub fn u128_at(data: &[u8], i: usize) -> Result<u128, ChainError> {
    let w = word_at(data, i)?;
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..32]);
    Ok(u128::from_be_bytes(buf))
}

pub fn bool_at(data: &[u8], i: usize) -> Result<bool, ChainError> {
    Ok(u64_at(data, i)? != 0)
}

/// Decodes an address word into its canonical lowercase hex form.
pub fn address_at(data: &[u8], i: usize) -> Result<String, ChainError> {
    let w = word_at(data, i)?;
    Ok(format!("0x{}", hex::encode(&w[12..32])))
}

/// Decodes a returned `address[]`: offset word, length word, then one
/// word per element.
pub fn address_array(data: &[u8]) -> Result<Vec<String>, ChainError> {
    let offset = u64_at(data, 0)? as usize;
    if offset % WORD != 0 {
        return Err(ChainError::Rpc(format!("misaligned array offset {offset}")));
    }
    let len_index = offset / WORD;
    let len = u64_at(data, len_index)? as usize;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(address_at(data, len_index + 1 + i)?);
    }
    Ok(out)
}

pub fn push_u64(calldata: &mut Vec<u8>, value: u64) {
    let mut w = [0u8; WORD];
    w[24..32].copy_from_slice(&value.to_be_bytes());
    calldata.extend_from_slice(&w);
}

pub fn push_address(calldata: &mut Vec<u8>, address: &str) -> Result<(), ChainError> {
    let raw = hex::decode(address.trim_start_matches("0x"))
        .map_err(|e| ChainError::Rpc(format!("bad address {address}: {e}")))?;
    if raw.len() != 20 {
        return Err(ChainError::Rpc(format!(
            "bad address length {} for {address}",
            raw.len()
        )));
    }
    let mut w = [0u8; WORD];
    w[12..32].copy_from_slice(&raw);
    calldata.extend_from_slice(&w);
    Ok(())
}

/// Appends a `bytes[]` argument holding exactly one payload, the only
/// shape the game and oracle contracts accept from this operator.
///
/// `head_words` is the number of static argument words preceding this
/// one, needed to compute the tail offset.
pub fn push_single_bytes_array(calldata: &mut Vec<u8>, head_words: usize, payload: &[u8]) {
    // Offset from the start of the argument block to the array tail.
    push_u64(calldata, ((head_words + 1) * WORD) as u64);
    // Array length.
    push_u64(calldata, 1);
    // Offset from the array body to element 0's data.
    push_u64(calldata, WORD as u64);
    // Element 0: byte length then right-padded data.
    push_u64(calldata, payload.len() as u64);
    calldata.extend_from_slice(payload);
    let rem = payload.len() % WORD;
    if rem != 0 {
        calldata.extend_from_slice(&vec![0u8; WORD - rem]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(words: &[[u8; 32]]) -> Vec<u8> {
        words.iter().flatten().copied().collect()
    }

    fn u64_word(v: u64) -> [u8; 32] {
        let mut w = [0u8; 32];
        w[24..32].copy_from_slice(&v.to_be_bytes());
        w
    }

    #[test]
    fn decodes_scalar_words() {
        let data = blob(&[u64_word(42), u64_word(1), u64_word(0)]);
        assert_eq!(u64_at(&data, 0).unwrap(), 42);
        assert!(bool_at(&data, 1).unwrap());
        assert!(!bool_at(&data, 2).unwrap());
        assert!(u64_at(&data, 3).is_err());
    }

    #[test]
    fn decodes_address_array() {
        let mut addr = [0u8; 32];
        addr[12..32].copy_from_slice(&[0xab; 20]);
        let data = blob(&[u64_word(32), u64_word(2), addr, addr]);
        let out = address_array(&data).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], format!("0x{}", "ab".repeat(20)));
    }

    #[test]
    fn empty_address_array_decodes_empty() {
        let data = blob(&[u64_word(32), u64_word(0)]);
        assert!(address_array(&data).unwrap().is_empty());
    }

    #[test]
    fn single_bytes_array_layout() {
        let mut calldata = Vec::new();
        push_single_bytes_array(&mut calldata, 0, &[0xde, 0xad, 0xbe, 0xef]);
        // offset, len, element offset, element len, padded data.
        assert_eq!(u64_at(&calldata, 0).unwrap(), 32);
        assert_eq!(u64_at(&calldata, 1).unwrap(), 1);
        assert_eq!(u64_at(&calldata, 2).unwrap(), 32);
        assert_eq!(u64_at(&calldata, 3).unwrap(), 4);
        assert_eq!(calldata.len(), 5 * 32);
        assert_eq!(&calldata[4 * 32..4 * 32 + 4], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn push_address_round_trips() {
        let addr = format!("0x{}", "11".repeat(20));
        let mut calldata = Vec::new();
        push_address(&mut calldata, &addr).unwrap();
        assert_eq!(address_at(&calldata, 0).unwrap(), addr);
        assert!(push_address(&mut Vec::new(), "0x1234").is_err());
    }
}
