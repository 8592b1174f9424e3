//! Name and content hashing.
//!
//! Ids are SHA-512 digests, which is exactly why the raw id width is 64
//! bytes. When the session carries a namespace, the namespace bytes are fed
//! into the digest ahead of the name so equal names in different namespaces
//! land on different ids.

use elliptics_proto::RawId;
use sha2::{Digest, Sha512};

/// Hashes a textual name into a raw id under an optional namespace.
pub fn transform_name(namespace: Option<&str>, name: &str) -> RawId {
    transform_data(namespace, name.as_bytes())
}

/// Hashes arbitrary content into a raw id. Also produces the content
/// checksums compare-and-swap writes are conditioned on.
pub fn transform_data(namespace: Option<&str>, data: &[u8]) -> RawId {
    let mut hasher = Sha512::new();
    if let Some(ns) = namespace {
        hasher.update(ns.as_bytes());
    }
    hasher.update(data);
    let digest = hasher.finalize();
    let mut raw = [0u8; elliptics_proto::ID_SIZE];
    raw.copy_from_slice(&digest);
    RawId::new(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_is_pure() {
        assert_eq!(transform_name(None, "key"), transform_name(None, "key"));
        assert_ne!(transform_name(None, "key"), transform_name(None, "other"));
    }

    #[test]
    fn test_namespace_separates_ids() {
        let plain = transform_name(None, "object");
        let ns_a = transform_name(Some("a"), "object");
        let ns_b = transform_name(Some("b"), "object");
        assert_ne!(plain, ns_a);
        assert_ne!(ns_a, ns_b);
    }

    #[test]
    fn test_name_and_data_agree() {
        assert_eq!(
            transform_name(None, "abc"),
            transform_data(None, b"abc")
        );
    }
}
