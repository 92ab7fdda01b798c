// packages/engine/src/utils/ids.rs
//! Random identifiers for runs, volumes and container labels

use rand::RngCore;

/// Number of random bytes in every run / volume identifier
pub const ID_BYTES: usize = 20;

/// Hex-encode `n` bytes from the thread-local CSPRNG
pub fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Fresh identifier for a run or a standby container
pub fn new_id() -> String {
    random_hex(ID_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shape() {
        let id = new_id();
        assert_eq!(id.len(), ID_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ids_differ() {
        assert_ne!(new_id(), new_id());
    }
}
