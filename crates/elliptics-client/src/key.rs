//! User-facing object keys.
//!
//! A key is either a textual name, to be hashed into an id by the session's
//! transform, or a pre-computed group-scoped id. By-name keys materialize
//! their id lazily: the first use under a session runs the transform and the
//! result is cached in the key itself.

use std::sync::OnceLock;

use elliptics_proto::DnetId;

use crate::error::{Error, Result};
use crate::transform;

#[derive(Debug, Clone)]
pub struct Key {
    remote: Option<String>,
    id: OnceLock<DnetId>,
    type_tag: i32,
}

impl Key {
    pub fn from_name(name: impl Into<String>) -> Key {
        Key {
            remote: Some(name.into()),
            id: OnceLock::new(),
            type_tag: 0,
        }
    }

    pub fn from_id(id: DnetId) -> Key {
        let cell = OnceLock::new();
        let _ = cell.set(id);
        Key {
            remote: None,
            id: cell,
            type_tag: id.type_tag,
        }
    }

    pub fn with_type(mut self, type_tag: i32) -> Key {
        self.type_tag = type_tag;
        self
    }

    /// The textual name, for by-name keys.
    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    /// True when the key was built from an explicit id.
    pub fn is_by_id(&self) -> bool {
        self.remote.is_none()
    }

    /// The cached id, if already materialized.
    pub fn id(&self) -> Option<DnetId> {
        self.id.get().copied()
    }

    pub fn type_tag(&self) -> i32 {
        self.type_tag
    }

    /// Materializes the id, hashing the name under `namespace` on first use.
    /// Idempotent: a by-id key or an already-resolved key returns the cached
    /// id without rehashing.
    pub fn resolve(&self, namespace: Option<&str>) -> Result<DnetId> {
        if let Some(id) = self.id.get() {
            return Ok(*id);
        }
        let name = self.remote.as_deref().ok_or_else(|| {
            Error::invalid_argument("key carries neither a name nor an id")
        })?;
        let raw = transform::transform_name(namespace, name);
        let id = DnetId::new(raw, 0).with_type(self.type_tag);
        // A concurrent resolve may have won the race; both computed the same
        // value, so either cell content is correct.
        let _ = self.id.set(id);
        Ok(*self.id.get().expect("id cell was just populated"))
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Key {
        Key::from_name(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Key {
        Key::from_name(name)
    }
}

impl From<DnetId> for Key {
    fn from(id: DnetId) -> Key {
        Key::from_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elliptics_proto::RawId;

    #[test]
    fn test_by_name_resolves_lazily() {
        let key = Key::from_name("object");
        assert!(key.id().is_none());
        assert!(!key.is_by_id());

        let id = key.resolve(None).unwrap();
        assert_eq!(key.id(), Some(id));
        // Second resolve returns the cached id.
        assert_eq!(key.resolve(None).unwrap(), id);
    }

    #[test]
    fn test_by_id_resolve_is_noop() {
        let id = DnetId::new(RawId::ZERO, 7).with_type(2);
        let key = Key::from_id(id);
        assert!(key.is_by_id());
        assert_eq!(key.resolve(Some("ns")).unwrap(), id);
        assert_eq!(key.type_tag(), 2);
    }

    #[test]
    fn test_namespace_affects_resolution() {
        let plain = Key::from_name("object").resolve(None).unwrap();
        let scoped = Key::from_name("object").resolve(Some("ns")).unwrap();
        assert_ne!(plain.id, scoped.id);
    }

    #[test]
    fn test_resolution_caches_first_namespace() {
        let key = Key::from_name("object");
        let first = key.resolve(Some("a")).unwrap();
        // The cached id wins even under a different namespace.
        assert_eq!(key.resolve(Some("b")).unwrap(), first);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Key::from("name").remote(), Some("name"));
        assert_eq!(Key::from("name".to_string()).remote(), Some("name"));
        assert!(Key::from(DnetId::new(RawId::ZERO, 1)).is_by_id());
    }
}
