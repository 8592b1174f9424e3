//! Test cluster harness.
//!
//! Wraps the in-memory simulated cluster together with a session pointed at
//! it, plus payload builders for scripted replies.

use std::sync::Arc;

use elliptics_client::sim::SimCluster;
use elliptics_client::{Key, Session};
use elliptics_proto::{DnetId, FileInfo, IoAttr, RawId};

/// A simulated cluster with one state per group and a session bound to it.
pub struct TestCluster {
    cluster: Arc<SimCluster>,
    session: Session,
}

impl TestCluster {
    /// Builds a cluster with the given groups; the session targets all of
    /// them in order.
    pub fn new(groups: &[u32]) -> TestCluster {
        let cluster = Arc::new(SimCluster::new());
        for group in groups {
            cluster.add_group(*group);
        }
        let session = Session::new(cluster.clone());
        session.set_groups(groups.to_vec());
        TestCluster { cluster, session }
    }

    pub fn cluster(&self) -> &SimCluster {
        &self.cluster
    }

    /// A fresh handle sharing the cluster session's policy bag.
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    /// Resolves a by-name key under the session's namespace.
    pub fn resolve(&self, name: &str) -> DnetId {
        self.session
            .resolve(&Key::from_name(name))
            .expect("by-name keys always resolve")
    }

    /// Stores an object under the id `name` hashes to.
    pub fn store(&self, group: u32, name: &str, data: &[u8], mtime: (u64, u64)) {
        let id = self.resolve(name);
        self.cluster.insert_object(group, id.id, data.to_vec(), mtime);
    }

    /// Read-reply payload: an io-attr echo followed by the file bytes, the
    /// shape `ReadEntry::file` slices.
    pub fn read_payload(id: RawId, data: &[u8]) -> Vec<u8> {
        let echo = IoAttr {
            id,
            size: data.len() as u64,
            ..IoAttr::default()
        };
        let mut payload = echo.encode();
        payload.extend_from_slice(data);
        payload
    }

    /// Lookup/write-ack payload: an encoded file-info record.
    pub fn file_info_payload(mtime: (u64, u64), size: u64) -> Vec<u8> {
        FileInfo {
            mtime_sec: mtime.0,
            mtime_nsec: mtime.1,
            size,
            checksum: RawId::ZERO,
            path: "/sim/blob".to_string(),
        }
        .encode()
    }

    /// Range-ack payload: an io-attr whose `num` carries the matched count.
    pub fn range_ack_payload(num: u64) -> Vec<u8> {
        IoAttr {
            num,
            ..IoAttr::default()
        }
        .encode()
    }
}
