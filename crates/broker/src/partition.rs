//! Key-to-partition mapping.
//!
//! All envelopes for one recipient land on one partition stream, which is what
//! keeps their delivery order intact. The hash is FNV-1a (32-bit) so the mapping
//! is identical across processes, builds and Rust versions.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn fnv1a32(key: &[u8]) -> u32 {
    key.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Partition index for `key` in a topic with `partitions` partitions.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    fnv1a32(key.as_bytes()) % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
    }

    #[test]
    fn test_partition_is_stable_and_in_range() {
        for key in ["a@example.com", "b@example.com", "someone@else.org"] {
            let first = partition_for(key, 4);
            assert!(first < 4);
            assert_eq!(first, partition_for(key, 4));
        }
    }

    #[test]
    fn test_single_partition() {
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }
}
