//! FNV-1a hashes used for map snapshots and rule identifiers.

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

const FNV128_OFFSET: u128 = 0x6c62_272e_07bb_0142_62b8_2175_6295_c58d;
const FNV128_PRIME: u128 = 0x0000_0000_0100_0000_0000_0000_0000_013b;

/// FNV-64a of `data`.
pub fn fnv64a(data: &[u8]) -> u64 {
    data.iter().fold(FNV64_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV64_PRIME)
    })
}

/// FNV-128a of `data`.
pub fn fnv128a(data: &[u8]) -> u128 {
    data.iter().fold(FNV128_OFFSET, |hash, byte| {
        (hash ^ u128::from(*byte)).wrapping_mul(FNV128_PRIME)
    })
}

/// Lower-case hex of the FNV-128a hash, 32 characters.
pub fn fnv128a_hex(data: &[u8]) -> String {
    format!("{:032x}", fnv128a(data))
}

/// Lower-case hex of the FNV-64a hash, 16 characters.
pub fn fnv64a_hex(data: &[u8]) -> String {
    format!("{:016x}", fnv64a(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv64a_known_vectors() {
        assert_eq!(fnv64a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv64a(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv64a_hex(b"foobar"), "85944171f73967e8");
    }

    #[test]
    fn test_fnv128a_known_vectors() {
        assert_eq!(fnv128a_hex(b""), "6c62272e07bb014262b821756295c58d");
        assert_eq!(fnv128a_hex(b"a"), "d228cb696f1a8caf78912b704e4a8964");
    }
}
