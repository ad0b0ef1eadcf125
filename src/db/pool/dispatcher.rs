use sha1::{Digest, Sha1};

/// Map a uid onto one of `partitions` shards.
///
/// All traffic for a uid lands on the same partition, so writes to one user
/// funnel through one store while different users spread across partitions.
/// The index must be stable across restarts: it is derived from the SHA-1 of
/// the uid, taking the last two digest bytes as a big-endian u16.
pub fn partition_index(uid: &str, partitions: usize) -> usize {
    let digest = Sha1::digest(uid.as_bytes());
    u16::from_be_bytes([digest[18], digest[19]]) as usize % partitions
}

#[cfg(test)]
mod tests {
    use super::partition_index;

    #[test]
    fn stable_and_in_range() {
        for partitions in [1, 2, 7, 16] {
            for uid in ["1", "12345", "deadbeef", "7ffa"] {
                let index = partition_index(uid, partitions);
                assert!(index < partitions);
                assert_eq!(index, partition_index(uid, partitions));
            }
        }
    }

    #[test]
    fn known_value() {
        // SHA-1("123456") = 7c4a8d09ca3762af61e59520943dc26494f8941b
        // bytes [18..20] = 0x941b = 37915
        assert_eq!(partition_index("123456", 1 << 16), 0x941b);
    }
}
