//! Property-based tests over the wire data model.
