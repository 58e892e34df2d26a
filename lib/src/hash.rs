use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash. This matches Solidity's keccak256() opcode.
/// Note: tiny_keccak::Keccak is pre-standard Keccak-256 (NOT SHA3-256).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// keccak256 over several slices without building an intermediate buffer.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Hash a pair of 32-byte nodes. Matches Solidity:
///   keccak256(abi.encodePacked(left, right))
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    keccak256(&data)
}

/// Left-pad a 20-byte address into a 32-byte ABI word.
pub fn pad_address(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

/// Encode a `u128` as a big-endian uint256 ABI word.
pub fn u128_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_of_zero_bytes() {
        // keccak256(bytes32(0)), the empty leaf of the pool contract's tree
        let expected = [
            0x29, 0x0d, 0xec, 0xd9, 0x54, 0x8b, 0x62, 0xa8, 0xd6, 0x03, 0x45, 0xa9, 0x88, 0x38,
            0x6f, 0xc8, 0x4b, 0xa6, 0xbc, 0x95, 0x48, 0x40, 0x08, 0xf6, 0x36, 0x2f, 0x93, 0x16,
            0x0e, 0xf3, 0xe5, 0x63,
        ];
        assert_eq!(keccak256(&[0u8; 32]), expected);
    }

    #[test]
    fn test_concat_matches_single_buffer() {
        let a = [0x11u8; 32];
        let b = [0x22u8; 33];
        let mut joined = [0u8; 65];
        joined[..32].copy_from_slice(&a);
        joined[32..].copy_from_slice(&b);
        assert_eq!(keccak256_concat(&[&a, &b]), keccak256(&joined));
    }

    #[test]
    fn test_abi_words() {
        let word = pad_address(&[0xAB; 20]);
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(&word[12..], &[0xAB; 20]);

        let fee = u128_word(10_000_000_000_000_000);
        assert_eq!(&fee[..16], &[0u8; 16]);
        assert_eq!(u128::from_be_bytes(fee[16..].try_into().unwrap()), 10_000_000_000_000_000);
    }
}
