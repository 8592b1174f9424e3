//! In-memory simulated cluster.
//!
//! Implements [`Transport`] over per-group object stores so the request
//! engine can be exercised end to end without sockets. Replies follow the
//! real shape: data frames carry the more-flag, the terminal
//! acknowledgement does not, and exactly one final status closes every
//! dispatch. Scripted replies, keyed by (group, id, command), override the
//! default store behavior for fault injection.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use elliptics_proto::command::{cflags, status};
use elliptics_proto::exec::{SPH_FLAGS_FINISH, SPH_FLAGS_REPLY};
use elliptics_proto::{
    Command, CommandHeader, DataBuffer, DnetId, ExecContext, FileInfo, IoAttr, RawId,
    TransactionControl,
};
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transform;
use crate::transport::{NodeStatus, ReplyEvent, ReplyFrame, StatusTarget, Transport};

/// One scripted reply frame.
#[derive(Debug, Clone)]
pub struct ScriptFrame {
    pub status: i32,
    pub payload: Vec<u8>,
    pub more: bool,
}

impl ScriptFrame {
    /// A data frame: status 0, more frames follow.
    pub fn data(payload: Vec<u8>) -> ScriptFrame {
        ScriptFrame {
            status: 0,
            payload,
            more: true,
        }
    }

    /// A terminal acknowledgement with the given status.
    pub fn ack(status: i32) -> ScriptFrame {
        ScriptFrame {
            status,
            payload: Vec::new(),
            more: false,
        }
    }

    /// A terminal acknowledgement carrying a payload (write/lookup shape).
    pub fn ack_with(status: i32, payload: Vec<u8>) -> ScriptFrame {
        ScriptFrame {
            status,
            payload,
            more: false,
        }
    }
}

/// Scripted reply for one dispatch, consumed in FIFO order per
/// (group, id, command) key.
#[derive(Debug, Clone)]
pub struct Script {
    pub frames: Vec<ScriptFrame>,
    pub final_status: i32,
    pub delay: Option<Duration>,
}

impl Script {
    pub fn reply(frames: Vec<ScriptFrame>) -> Script {
        Script {
            frames,
            final_status: 0,
            delay: None,
        }
    }

    /// A single failing acknowledgement.
    pub fn error(status: i32) -> Script {
        Script {
            frames: vec![ScriptFrame::ack(status)],
            final_status: status,
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Script {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    mtime: (u64, u64),
    checksum: RawId,
}

#[derive(Debug)]
struct SimGroup {
    addr: SocketAddr,
    objects: BTreeMap<RawId, StoredObject>,
    route_points: Vec<RawId>,
    node_status: NodeStatus,
}

/// The simulated cluster. Cheap to share behind an `Arc`; every group is a
/// single simulated state.
pub struct SimCluster {
    groups: Mutex<BTreeMap<u32, SimGroup>>,
    scripts: Mutex<HashMap<(u32, RawId, Command), VecDeque<Script>>>,
    dispatches: Mutex<HashMap<(u32, Command), usize>>,
    mix_order: Mutex<Option<Vec<u32>>>,
    shuffle: Mutex<bool>,
    clock: AtomicU64,
    trans: AtomicU64,
}

impl SimCluster {
    pub fn new() -> SimCluster {
        SimCluster {
            groups: Mutex::new(BTreeMap::new()),
            scripts: Mutex::new(HashMap::new()),
            dispatches: Mutex::new(HashMap::new()),
            mix_order: Mutex::new(None),
            shuffle: Mutex::new(false),
            clock: AtomicU64::new(1),
            trans: AtomicU64::new(1),
        }
    }

    fn group_addr(group: u32) -> SocketAddr {
        format!("127.0.0.1:{}", 1025 + group).parse().expect("static address")
    }

    pub fn add_group(&self, group: u32) {
        self.groups.lock().unwrap().insert(
            group,
            SimGroup {
                addr: Self::group_addr(group),
                objects: BTreeMap::new(),
                route_points: Vec::new(),
                node_status: NodeStatus::default(),
            },
        );
    }

    pub fn insert_object(&self, group: u32, id: RawId, data: Vec<u8>, mtime: (u64, u64)) {
        let checksum = transform::transform_data(None, &data);
        if let Some(g) = self.groups.lock().unwrap().get_mut(&group) {
            g.objects.insert(
                id,
                StoredObject {
                    data,
                    mtime,
                    checksum,
                },
            );
        }
    }

    pub fn object(&self, group: u32, id: &RawId) -> Option<Vec<u8>> {
        self.groups
            .lock()
            .unwrap()
            .get(&group)
            .and_then(|g| g.objects.get(id))
            .map(|o| o.data.clone())
    }

    pub fn remove_object(&self, group: u32, id: &RawId) -> bool {
        self.groups
            .lock()
            .unwrap()
            .get_mut(&group)
            .map(|g| g.objects.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Registers a routing boundary for `search_range`.
    pub fn add_route_point(&self, group: u32, id: RawId) {
        if let Some(g) = self.groups.lock().unwrap().get_mut(&group) {
            g.route_points.push(id);
            g.route_points.sort();
        }
    }

    /// Queues a scripted reply for the next dispatch matching the key.
    pub fn script(&self, group: u32, id: RawId, cmd: Command, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry((group, id, cmd))
            .or_default()
            .push_back(script);
    }

    /// Pins the group order returned by `mix_states`.
    pub fn set_mix_order(&self, order: Vec<u32>) {
        *self.mix_order.lock().unwrap() = Some(order);
    }

    /// Randomizes `mix_states` instead of returning sorted group ids.
    pub fn set_shuffle(&self, shuffle: bool) {
        *self.shuffle.lock().unwrap() = shuffle;
    }

    /// Number of transactions dispatched to `group` with `cmd`.
    pub fn dispatch_count(&self, group: u32, cmd: Command) -> usize {
        self.dispatches
            .lock()
            .unwrap()
            .get(&(group, cmd))
            .copied()
            .unwrap_or(0)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn file_info(&self, group: u32, object: &StoredObject) -> FileInfo {
        FileInfo {
            mtime_sec: object.mtime.0,
            mtime_nsec: object.mtime.1,
            size: object.data.len() as u64,
            checksum: object.checksum,
            path: format!("/sim/{}/blob", group),
        }
    }

    /// Default (unscripted) reply for one transaction against the store.
    fn default_frames(&self, group: u32, ctl: &TransactionControl) -> (Vec<ScriptFrame>, i32) {
        let mut groups = self.groups.lock().unwrap();
        let state = match groups.get_mut(&group) {
            Some(state) => state,
            None => return (vec![ScriptFrame::ack(status::ENOENT)], status::ENOENT),
        };
        let io = ctl.io.unwrap_or_default();

        match ctl.cmd {
            Command::Read => match state.objects.get(&ctl.id.id) {
                Some(object) => {
                    let data = &object.data;
                    let from = (io.offset as usize).min(data.len());
                    let to = if io.size == 0 {
                        data.len()
                    } else {
                        (from + io.size as usize).min(data.len())
                    };
                    let slice = &data[from..to];
                    let echo = IoAttr {
                        id: ctl.id.id,
                        offset: io.offset,
                        size: slice.len() as u64,
                        ..IoAttr::default()
                    };
                    let mut payload = echo.encode();
                    payload.extend_from_slice(slice);
                    (
                        vec![ScriptFrame::data(payload), ScriptFrame::ack(0)],
                        0,
                    )
                }
                None => (vec![ScriptFrame::ack(status::ENOENT)], status::ENOENT),
            },

            Command::Write => {
                if io.flags & elliptics_proto::command::ioflags::COMPARE_AND_SWAP != 0 {
                    let current = state
                        .objects
                        .get(&ctl.id.id)
                        .map(|o| o.checksum)
                        .unwrap_or_else(|| transform::transform_data(None, b""));
                    if current != io.parent {
                        return (vec![ScriptFrame::ack(status::EINVAL)], status::EINVAL);
                    }
                }
                let data = ctl.payload.to_vec();
                let checksum = transform::transform_data(None, &data);
                let object = StoredObject {
                    data,
                    mtime: (self.tick(), 0),
                    checksum,
                };
                let info = self.file_info(group, &object);
                state.objects.insert(ctl.id.id, object);
                (vec![ScriptFrame::ack_with(0, info.encode())], 0)
            }

            Command::Lookup => match state.objects.get(&ctl.id.id) {
                Some(object) => {
                    let info = self.file_info(group, object);
                    (vec![ScriptFrame::ack_with(0, info.encode())], 0)
                }
                None => (vec![ScriptFrame::ack(status::ENOENT)], status::ENOENT),
            },

            Command::Remove => {
                if state.objects.remove(&ctl.id.id).is_some() {
                    (vec![ScriptFrame::ack(0)], 0)
                } else {
                    (vec![ScriptFrame::ack(status::ENOENT)], status::ENOENT)
                }
            }

            Command::ReadRange | Command::DelRange => {
                let matched: Vec<(RawId, StoredObject)> = if io.id > io.parent {
                    Vec::new()
                } else {
                    state
                        .objects
                        .range(io.id..=io.parent)
                        .map(|(k, v)| (*k, v.clone()))
                        .collect()
                };
                let from = (io.start as usize).min(matched.len());
                let to = if io.num == 0 {
                    from
                } else {
                    (from + io.num as usize).min(matched.len())
                };
                let window = &matched[from..to];

                let mut frames = Vec::with_capacity(window.len() + 1);
                for (raw, object) in window {
                    let echo = IoAttr {
                        id: *raw,
                        size: object.data.len() as u64,
                        ..IoAttr::default()
                    };
                    let mut payload = echo.encode();
                    payload.extend_from_slice(&object.data);
                    frames.push(ScriptFrame::data(payload));
                }
                if ctl.cmd == Command::DelRange {
                    for (raw, _) in window {
                        state.objects.remove(raw);
                    }
                }
                let rep = IoAttr {
                    num: matched.len() as u64,
                    ..IoAttr::default()
                };
                frames.push(ScriptFrame::ack_with(0, rep.encode()));
                (frames, 0)
            }

            Command::BulkRead => {
                let mut frames = Vec::new();
                let chunks = ctl.payload.to_vec();
                for chunk in chunks.chunks(IoAttr::WIRE_SIZE) {
                    let Ok(request) = IoAttr::decode(&DataBuffer::copy_from(chunk)) else {
                        continue;
                    };
                    if let Some(object) = state.objects.get(&request.id) {
                        let echo = IoAttr {
                            id: request.id,
                            size: object.data.len() as u64,
                            ..IoAttr::default()
                        };
                        let mut payload = echo.encode();
                        payload.extend_from_slice(&object.data);
                        frames.push(ScriptFrame::data(payload));
                    }
                }
                frames.push(ScriptFrame::ack(0));
                (frames, 0)
            }

            Command::Exec => match ExecContext::parse(&ctl.payload) {
                Ok(ctx) => {
                    // Echo the invocation back as a finished reply.
                    let reply = ExecContext::copy(&ctx, ctx.event(), ctx.data().clone())
                        .with_flags(ctx.flags() | SPH_FLAGS_REPLY | SPH_FLAGS_FINISH);
                    (
                        vec![
                            ScriptFrame::data(reply.serialize().to_vec()),
                            ScriptFrame::ack(0),
                        ],
                        0,
                    )
                }
                Err(_) => (vec![ScriptFrame::ack(status::EINVAL)], status::EINVAL),
            },

            Command::Iterator => {
                let mut frames = Vec::new();
                for (raw, object) in state.objects.iter() {
                    let echo = IoAttr {
                        id: *raw,
                        size: object.data.len() as u64,
                        ..IoAttr::default()
                    };
                    let mut payload = echo.encode();
                    payload.extend_from_slice(&object.data);
                    frames.push(ScriptFrame::data(payload));
                }
                frames.push(ScriptFrame::ack(0));
                (frames, 0)
            }

            Command::Stat | Command::StatCount => {
                (vec![ScriptFrame::ack_with(0, vec![0u8; 64])], 0)
            }

            _ => (vec![ScriptFrame::ack(0)], 0),
        }
    }

    fn target_group(&self, ctl: &TransactionControl) -> Option<u32> {
        match ctl.direct {
            Some(addr) => self
                .groups
                .lock()
                .unwrap()
                .iter()
                .find(|(_, g)| g.addr == addr)
                .map(|(id, _)| *id),
            None => Some(ctl.id.group),
        }
    }
}

impl Default for SimCluster {
    fn default() -> Self {
        SimCluster::new()
    }
}

#[async_trait]
impl Transport for SimCluster {
    async fn dispatch(
        &self,
        ctl: TransactionControl,
        timeout: Duration,
    ) -> Result<mpsc::UnboundedReceiver<ReplyEvent>> {
        let group = self.target_group(&ctl).ok_or_else(|| Error::Transport {
            context: format!("{}", ctl.id),
            message: "no state at the requested address".to_string(),
        })?;

        *self
            .dispatches
            .lock()
            .unwrap()
            .entry((group, ctl.cmd))
            .or_insert(0) += 1;

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(group, ctl.id.id, ctl.cmd))
            .and_then(|queue| queue.pop_front());

        let (frames, final_status, delay) = match script {
            Some(script) => (script.frames, script.final_status, script.delay),
            None => {
                let (frames, final_status) = self.default_frames(group, &ctl);
                (frames, final_status, None)
            }
        };

        let addr = self
            .groups
            .lock()
            .unwrap()
            .get(&group)
            .map(|g| g.addr)
            .unwrap_or_else(|| Self::group_addr(group));

        let timed_out = delay.map(|d| d >= timeout).unwrap_or(false);
        let trans = self.trans.fetch_add(1, Ordering::SeqCst);
        let id = DnetId::new(ctl.id.id, group).with_type(ctl.id.type_tag);
        let cmd = ctl.cmd;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d.min(timeout)).await;
            }
            if timed_out {
                let header = CommandHeader {
                    id,
                    status: status::ETIMEDOUT,
                    cmd,
                    flags: 0,
                    trans,
                    size: 0,
                };
                let _ = tx.send(ReplyEvent::Reply(ReplyFrame {
                    header,
                    addr,
                    payload: DataBuffer::empty(),
                    more: false,
                }));
                let _ = tx.send(ReplyEvent::Final(status::ETIMEDOUT));
                return;
            }
            for frame in frames {
                let header = CommandHeader {
                    id,
                    status: frame.status,
                    cmd,
                    flags: if frame.more { cflags::MORE } else { 0 },
                    trans,
                    size: frame.payload.len() as u64,
                };
                let _ = tx.send(ReplyEvent::Reply(ReplyFrame {
                    header,
                    addr,
                    payload: DataBuffer::from_vec(frame.payload),
                    more: frame.more,
                }));
            }
            let _ = tx.send(ReplyEvent::Final(final_status));
        });
        Ok(rx)
    }

    fn route(&self, id: &DnetId) -> Result<SocketAddr> {
        self.groups
            .lock()
            .unwrap()
            .get(&id.group)
            .map(|g| g.addr)
            .ok_or_else(|| Error::Transport {
                context: format!("{}", id),
                message: format!("no such group: {}", id.group),
            })
    }

    fn mix_states(&self, _id: Option<&RawId>) -> Vec<u32> {
        if let Some(order) = self.mix_order.lock().unwrap().clone() {
            return order;
        }
        let mut groups: Vec<u32> = self.groups.lock().unwrap().keys().copied().collect();
        if *self.shuffle.lock().unwrap() {
            groups.shuffle(&mut rand::thread_rng());
        }
        groups
    }

    fn search_range(&self, id: &DnetId) -> Result<(RawId, RawId)> {
        let groups = self.groups.lock().unwrap();
        let state = groups.get(&id.group).ok_or_else(|| Error::Transport {
            context: format!("{}", id),
            message: format!("no such group: {}", id.group),
        })?;
        let start = state
            .route_points
            .iter()
            .filter(|p| **p <= id.id)
            .max()
            .copied()
            .unwrap_or(RawId::ZERO);
        let next = state
            .route_points
            .iter()
            .filter(|p| **p > id.id)
            .min()
            .copied()
            .unwrap_or(start);
        Ok((start, next))
    }

    fn lookup_addr(&self, id: &DnetId) -> Result<String> {
        self.route(id).map(|addr| addr.to_string())
    }

    fn get_routes(&self) -> Vec<(DnetId, SocketAddr)> {
        let groups = self.groups.lock().unwrap();
        let mut routes = Vec::new();
        for (group, state) in groups.iter() {
            if state.route_points.is_empty() {
                routes.push((DnetId::new(RawId::ZERO, *group), state.addr));
            }
            for point in state.route_points.iter() {
                routes.push((DnetId::new(*point, *group), state.addr));
            }
        }
        routes
    }

    async fn update_status(&self, target: StatusTarget, node_status: NodeStatus) -> Result<i32> {
        let mut groups = self.groups.lock().unwrap();
        let state = match target {
            StatusTarget::Id(id) => groups.get_mut(&id.group),
            StatusTarget::Addr(addr) => groups.values_mut().find(|g| g.addr == addr),
        };
        match state {
            Some(state) => {
                state.node_status = node_status;
                Ok(0)
            }
            None => Err(Error::Transport {
                context: "update_status".to_string(),
                message: "no matching state".to_string(),
            }),
        }
    }

    async fn add_state(&self, addr: SocketAddr) -> Result<()> {
        let mut groups = self.groups.lock().unwrap();
        let group = groups.keys().max().map(|g| g + 1).unwrap_or(1);
        groups.insert(
            group,
            SimGroup {
                addr,
                objects: BTreeMap::new(),
                route_points: Vec::new(),
                node_status: NodeStatus::default(),
            },
        );
        Ok(())
    }

    fn state_num(&self) -> usize {
        self.groups.lock().unwrap().len()
    }

    fn known_states(&self) -> Vec<SocketAddr> {
        self.groups.lock().unwrap().values().map(|g| g.addr).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(b: u8) -> RawId {
        let mut bytes = [0u8; elliptics_proto::ID_SIZE];
        bytes[0] = b;
        RawId::new(bytes)
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<ReplyEvent>) -> (Vec<ReplyFrame>, i32) {
        let mut frames = Vec::new();
        let mut final_status = i32::MIN;
        while let Some(event) = rx.recv().await {
            match event {
                ReplyEvent::Reply(frame) => frames.push(frame),
                ReplyEvent::Final(status) => {
                    final_status = status;
                    break;
                }
            }
        }
        (frames, final_status)
    }

    #[tokio::test]
    async fn test_read_returns_io_attr_and_data() {
        let sim = SimCluster::new();
        sim.add_group(1);
        sim.insert_object(1, raw(1), b"hello".to_vec(), (1, 0));

        let ctl = TransactionControl::new(DnetId::new(raw(1), 1), Command::Read)
            .with_io(IoAttr::default());
        let rx = sim.dispatch(ctl, Duration::from_secs(1)).await.unwrap();
        let (frames, final_status) = collect(rx).await;

        assert_eq!(final_status, 0);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].more);
        assert!(!frames[1].more);
        assert_eq!(&frames[0].payload.as_slice()[IoAttr::WIRE_SIZE..], b"hello");
    }

    #[tokio::test]
    async fn test_missing_object_reports_enoent() {
        let sim = SimCluster::new();
        sim.add_group(1);
        let ctl = TransactionControl::new(DnetId::new(raw(9), 1), Command::Read)
            .with_io(IoAttr::default());
        let (frames, final_status) =
            collect(sim.dispatch(ctl, Duration::from_secs(1)).await.unwrap()).await;
        assert_eq!(final_status, status::ENOENT);
        assert_eq!(frames[0].header.status, status::ENOENT);
    }

    #[tokio::test]
    async fn test_cas_write_checks_parent_checksum() {
        let sim = SimCluster::new();
        sim.add_group(1);
        sim.insert_object(1, raw(1), b"old".to_vec(), (1, 0));

        let mismatch = IoAttr {
            parent: raw(0xff),
            flags: elliptics_proto::command::ioflags::COMPARE_AND_SWAP,
            ..IoAttr::default()
        };
        let ctl = TransactionControl::new(DnetId::new(raw(1), 1), Command::Write)
            .with_io(mismatch)
            .with_payload(DataBuffer::from("new"));
        let (_, final_status) =
            collect(sim.dispatch(ctl, Duration::from_secs(1)).await.unwrap()).await;
        assert_eq!(final_status, status::EINVAL);
        assert_eq!(sim.object(1, &raw(1)), Some(b"old".to_vec()));

        let matching = IoAttr {
            parent: transform::transform_data(None, b"old"),
            flags: elliptics_proto::command::ioflags::COMPARE_AND_SWAP,
            ..IoAttr::default()
        };
        let ctl = TransactionControl::new(DnetId::new(raw(1), 1), Command::Write)
            .with_io(matching)
            .with_payload(DataBuffer::from("new"));
        let (_, final_status) =
            collect(sim.dispatch(ctl, Duration::from_secs(1)).await.unwrap()).await;
        assert_eq!(final_status, 0);
        assert_eq!(sim.object(1, &raw(1)), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_scripts_consumed_in_order() {
        let sim = SimCluster::new();
        sim.add_group(1);
        sim.insert_object(1, raw(1), b"stored".to_vec(), (1, 0));
        sim.script(1, raw(1), Command::Read, Script::error(status::EAGAIN));

        let ctl = TransactionControl::new(DnetId::new(raw(1), 1), Command::Read)
            .with_io(IoAttr::default());
        let (_, first) = collect(
            sim.dispatch(ctl.clone(), Duration::from_secs(1))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(first, status::EAGAIN);

        // Script queue drained; the store answers next.
        let (_, second) =
            collect(sim.dispatch(ctl, Duration::from_secs(1)).await.unwrap()).await;
        assert_eq!(second, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_script_times_out() {
        let sim = SimCluster::new();
        sim.add_group(1);
        sim.script(
            1,
            raw(1),
            Command::Read,
            Script::reply(vec![ScriptFrame::ack(0)]).delayed(Duration::from_secs(60)),
        );
        let ctl = TransactionControl::new(DnetId::new(raw(1), 1), Command::Read);
        let (frames, final_status) =
            collect(sim.dispatch(ctl, Duration::from_secs(1)).await.unwrap()).await;
        assert_eq!(final_status, status::ETIMEDOUT);
        assert_eq!(frames[0].header.status, status::ETIMEDOUT);
    }

    #[tokio::test]
    async fn test_search_range_uses_route_points() {
        let sim = SimCluster::new();
        sim.add_group(1);
        sim.add_route_point(1, raw(0x10));
        sim.add_route_point(1, raw(0x20));

        let (start, next) = sim.search_range(&DnetId::new(raw(0x15), 1)).unwrap();
        assert_eq!(start, raw(0x10));
        assert_eq!(next, raw(0x20));

        // Past the last point: next collapses onto start.
        let (start, next) = sim.search_range(&DnetId::new(raw(0x30), 1)).unwrap();
        assert_eq!(start, raw(0x20));
        assert_eq!(next, raw(0x20));
    }

    #[tokio::test]
    async fn test_mix_states_order() {
        let sim = SimCluster::new();
        sim.add_group(3);
        sim.add_group(1);
        sim.add_group(2);
        assert_eq!(sim.mix_states(None), vec![1, 2, 3]);
        sim.set_mix_order(vec![2, 3, 1]);
        assert_eq!(sim.mix_states(None), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_range_window_and_rep_count() {
        let sim = SimCluster::new();
        sim.add_group(1);
        for b in 1..=4u8 {
            sim.insert_object(1, raw(b), vec![b], (1, 0));
        }
        let io = IoAttr {
            id: raw(1),
            parent: raw(4),
            start: 1,
            num: 2,
            ..IoAttr::default()
        };
        let ctl =
            TransactionControl::new(DnetId::new(raw(1), 1), Command::ReadRange).with_io(io);
        let (frames, _) =
            collect(sim.dispatch(ctl, Duration::from_secs(1)).await.unwrap()).await;
        // Two data frames (start skipped one, num capped at two) plus the
        // range ack carrying the matched count.
        assert_eq!(frames.len(), 3);
        let rep = IoAttr::decode(&frames[2].payload).unwrap();
        assert_eq!(rep.num, 4);
    }
}
