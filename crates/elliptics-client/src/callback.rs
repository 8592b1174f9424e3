//! Per-operation state machines.
//!
//! Each machine owns its transaction control, its target order and its
//! result sender, and runs as one spawned task. The transport may deliver
//! frames on any thread; all shared accounting funnels through the sender's
//! internal lock. Frames arriving after the terminal status are discarded
//! by the sender.

use std::sync::Arc;

use elliptics_proto::command::{cflags, Command};
use elliptics_proto::{DnetId, IoAttr, TransactionControl};
use tracing::{debug, trace};

use crate::entry::{Entry, ReadEntry, ReplyData};
use crate::error::{op_context, Error};
use crate::result::ResultSender;
use crate::session::PolicySnapshot;
use crate::transport::{ReplyEvent, Transport};

/// Drives one dispatched transaction to completion: frames are converted to
/// entries and filtered into the stream, terminal acknowledgements (frames
/// without the more-flag) are accounted for the checker.
pub(crate) async fn drive_one<T: Entry>(
    transport: &Arc<dyn Transport>,
    snap: &PolicySnapshot,
    sender: &ResultSender<T>,
    ctl: TransactionControl,
) -> bool {
    let mut positive = false;
    match transport.dispatch(ctl, snap.timeout).await {
        Ok(mut rx) => {
            while let Some(event) = rx.recv().await {
                match event {
                    ReplyEvent::Reply(frame) => {
                        if !frame.more {
                            sender.account(frame.header.clone());
                        }
                        if frame.header.status == 0 && !frame.payload.is_empty() {
                            positive = true;
                        }
                        let entry =
                            T::from(ReplyData::new(frame.header, frame.addr, frame.payload));
                        sender.process_filtered(entry);
                    }
                    ReplyEvent::Final(status) => {
                        trace!(status, "transaction finished");
                        break;
                    }
                }
            }
        }
        Err(e) => {
            debug!(error = %e, "dispatch refused");
            sender.fail(e);
        }
    }
    positive
}

/// Fail-over read: groups are tried in order, and the next group is queried
/// only when the previous attempt produced no positive reply. An ack with an
/// empty payload does not stop the rotation.
pub(crate) struct ReadMachine<T: Entry = ReadEntry> {
    pub transport: Arc<dyn Transport>,
    pub snap: PolicySnapshot,
    pub sender: ResultSender<T>,
    pub id: DnetId,
    pub groups: Vec<u32>,
    pub io: IoAttr,
    pub cmd: Command,
}

impl<T: Entry> ReadMachine<T> {
    pub(crate) async fn run(self) {
        let context = op_context(
            &self.id,
            format!(
                "READ: offset: {}, size: {}",
                self.io.offset, self.io.size
            ),
        );
        if self.groups.is_empty() {
            self.sender
                .complete(Err(Error::ExhaustedGroups { context }));
            return;
        }

        let mut attempts = 0usize;
        for (index, group) in self.groups.iter().enumerate() {
            attempts += 1;
            let id = self.id.with_group(*group);
            let ctl = TransactionControl::new(id, self.cmd)
                .with_cflags(cflags::NEED_ACK | self.snap.cflags)
                .with_io(self.io);

            let positive = drive_one(&self.transport, &self.snap, &self.sender, ctl).await;
            if positive {
                trace!(group, "read complete");
                break;
            }
            if index + 1 < self.groups.len() {
                debug!(
                    group,
                    next = self.groups[index + 1],
                    "no positive reply, rotating to next group"
                );
            }
        }
        self.sender.finalize(attempts, &context);
    }
}

/// Concurrent fan-out across all target groups with no fail-over: every
/// group is attempted independently and the checker decides overall success.
pub(crate) struct FanoutMachine<T: Entry> {
    pub transport: Arc<dyn Transport>,
    pub snap: PolicySnapshot,
    pub sender: ResultSender<T>,
    pub ctl: TransactionControl,
    pub groups: Vec<u32>,
    pub context: String,
}

impl<T: Entry> FanoutMachine<T> {
    pub(crate) async fn run(self) {
        let total = self.groups.len();
        if total == 0 {
            self.sender.complete(Err(Error::ExhaustedGroups {
                context: self.context,
            }));
            return;
        }

        let mut handles = Vec::with_capacity(total);
        for group in self.groups {
            let mut ctl = self.ctl.clone();
            ctl.id.group = group;
            let transport = Arc::clone(&self.transport);
            let snap = self.snap.clone();
            let sender = self.sender.clone();
            handles.push(tokio::spawn(async move {
                drive_one(&transport, &snap, &sender, ctl).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.sender.finalize(total, &self.context);
    }
}

/// Broadcast: one transaction per connected state, addressed directly.
pub(crate) struct BroadcastMachine<T: Entry> {
    pub transport: Arc<dyn Transport>,
    pub snap: PolicySnapshot,
    pub sender: ResultSender<T>,
    pub ctl: TransactionControl,
    pub context: String,
}

impl<T: Entry> BroadcastMachine<T> {
    pub(crate) async fn run(self) {
        let states = self.transport.known_states();
        if states.is_empty() {
            self.sender.complete(Err(Error::Transport {
                context: self.context,
                message: "no connected states".to_string(),
            }));
            return;
        }

        let total = states.len();
        let mut handles = Vec::with_capacity(total);
        for addr in states {
            let ctl = self.ctl.clone().with_direct(addr);
            let transport = Arc::clone(&self.transport);
            let snap = self.snap.clone();
            let sender = self.sender.clone();
            handles.push(tokio::spawn(async move {
                drive_one(&transport, &snap, &sender, ctl).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.sender.finalize(total, &self.context);
    }
}

/// A single routed transaction: iterator streams and targeted exec requests.
pub(crate) struct SingleDispatchMachine<T: Entry> {
    pub transport: Arc<dyn Transport>,
    pub snap: PolicySnapshot,
    pub sender: ResultSender<T>,
    pub ctl: TransactionControl,
    pub context: String,
}

impl<T: Entry> SingleDispatchMachine<T> {
    pub(crate) async fn run(self) {
        let flags = self.ctl.cflags | cflags::NEED_ACK;
        let ctl = self.ctl.with_cflags(flags);
        drive_one(&self.transport, &self.snap, &self.sender, ctl).await;
        self.sender.finalize(1, &self.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::predicate::{Checker, Filter};
    use crate::session::Session;
    use crate::sim::SimCluster;
    use elliptics_proto::DataBuffer;

    fn cluster(groups: &[u32]) -> (Arc<SimCluster>, Session) {
        let cluster = Arc::new(SimCluster::new());
        for g in groups {
            cluster.add_group(*g);
        }
        let session = Session::new(cluster.clone());
        session.set_groups(groups.to_vec());
        (cluster, session)
    }

    #[tokio::test]
    async fn test_read_succeeds_from_first_group() {
        let (cluster, session) = cluster(&[1, 2]);
        let key = Key::from_name("object");
        let id = session.resolve(&key).unwrap();
        cluster.insert_object(1, id.id, b"payload".to_vec(), (10, 0));

        let result = session.read_data(&key, vec![1, 2], 0, 0);
        let entries = result.get().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file().as_slice(), b"payload");
        // The second group was never queried.
        assert_eq!(cluster.dispatch_count(2, Command::Read), 0);
    }

    #[tokio::test]
    async fn test_read_rotates_on_missing_object() {
        let (cluster, session) = cluster(&[1, 2]);
        let key = Key::from_name("object");
        let id = session.resolve(&key).unwrap();
        cluster.insert_object(2, id.id, b"fallback".to_vec(), (10, 0));

        let result = session.read_data(&key, vec![1, 2], 0, 0);
        let entries = result.get().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file().as_slice(), b"fallback");
        assert_eq!(cluster.dispatch_count(1, Command::Read), 1);
        assert_eq!(cluster.dispatch_count(2, Command::Read), 1);
    }

    #[tokio::test]
    async fn test_read_exhausts_all_groups() {
        let (cluster, session) = cluster(&[1, 2, 3]);
        let key = Key::from_name("missing");

        let result = session.read_data(&key, vec![1, 2, 3], 0, 0);
        result.wait_done().await;
        assert!(result.error().is_some());
        assert!(result.entries().is_empty());
        assert_eq!(cluster.dispatch_count(3, Command::Read), 1);
    }

    #[tokio::test]
    async fn test_read_empty_group_list() {
        let (_cluster, session) = cluster(&[1]);
        let result = session.read_data(&Key::from_name("x"), vec![], 0, 0);
        result.wait_done().await;
        assert!(matches!(
            result.error(),
            Some(Error::ExhaustedGroups { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_fans_out_to_all_groups() {
        let (cluster, session) = cluster(&[1, 2, 3]);
        let key = Key::from_name("object");
        let id = session.resolve(&key).unwrap();

        let result = session.write_data(&key, DataBuffer::from("data"), 0);
        result.wait().await.unwrap();

        for g in [1, 2, 3] {
            assert_eq!(cluster.dispatch_count(g, Command::Write), 1);
            assert_eq!(cluster.object(g, &id.id), Some(b"data".to_vec()));
        }
        // Every group's ack passed the positive filter (write acks carry
        // file-info payloads).
        assert_eq!(result.entries().len(), 3);
    }

    #[tokio::test]
    async fn test_lookup_by_id_targets_single_group() {
        let (cluster, session) = cluster(&[1, 2]);
        let raw = crate::transform::transform_name(None, "object");
        cluster.insert_object(2, raw, b"x".to_vec(), (5, 0));

        let key = Key::from_id(elliptics_proto::DnetId::new(raw, 2));
        let entries = session.lookup(&key).get().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(cluster.dispatch_count(1, Command::Lookup), 0);
    }

    #[tokio::test]
    async fn test_broadcast_stat_reaches_every_state() {
        let (cluster, session) = cluster(&[1, 2, 3]);
        session.set_filter(Filter::all_with_ack());
        session.set_checker(Checker::no_check());

        let entries = session.stat_log().get().await.unwrap();
        assert_eq!(entries.len(), 3);
        for g in [1, 2, 3] {
            assert_eq!(cluster.dispatch_count(g, Command::Stat), 1);
        }
    }

    #[tokio::test]
    async fn test_remove_missing_object_fails_checker() {
        let (_cluster, session) = cluster(&[1, 2]);
        let result = session.remove(&Key::from_name("missing"));
        result.wait_done().await;
        assert!(matches!(
            result.error(),
            Some(Error::PredicateFailed { .. })
        ));
    }
}
