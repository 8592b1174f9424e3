//! The session: routing policy, reply predicates and operation factories.
//!
//! A session is a cheap handle over a shared policy bag. Clones observe each
//! other's mutations; in-flight operations do not, because every factory
//! snapshots the bag at launch.

use std::ops::BitOr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use elliptics_proto::command::{cflags, Command};
use elliptics_proto::exec::{SPH_FLAGS_FINISH, SPH_FLAGS_REPLY, SPH_FLAGS_SRC_BLOCK};
use elliptics_proto::{
    DataBuffer, DnetId, ExecContext, IoAttr, IteratorRequest, RawId, TransactionControl,
};

use crate::callback::{BroadcastMachine, FanoutMachine, ReadMachine, SingleDispatchMachine};
use crate::config::ClientConfig;
use crate::entry::{
    Entry, ExecEntry, GenericEntry, IteratorEntry, LookupEntry, ReadEntry, StatEntry, WriteEntry,
};
use crate::error::{op_context, Error, Result};
use crate::key::Key;
use crate::predicate::{Checker, Filter};
use crate::result::{AsyncResult, ResultSender};
use crate::transform;
use crate::transport::{NodeStatus, StatusTarget, Transport};
use crate::{bulk, cas, latest, range};

/// Bitmask controlling when errors surface synchronously.
///
/// `NO_EXCEPTIONS` dominates: when set, both throw bits are ignored and
/// errors surface only through the result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionsPolicy(u32);

impl ExceptionsPolicy {
    /// Argument-validation failures are returned from the factory call.
    pub const THROW_AT_START: ExceptionsPolicy = ExceptionsPolicy(0x1);
    /// Terminal errors are returned from synchronous waits.
    pub const THROW_AT_WAIT: ExceptionsPolicy = ExceptionsPolicy(0x2);
    /// Suppress both; errors are observable on the stream only.
    pub const NO_EXCEPTIONS: ExceptionsPolicy = ExceptionsPolicy(0x4);
    pub const DEFAULT: ExceptionsPolicy = ExceptionsPolicy(0x1 | 0x2);

    pub fn contains(self, other: ExceptionsPolicy) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn throw_at_start(self) -> bool {
        self.contains(Self::THROW_AT_START) && !self.contains(Self::NO_EXCEPTIONS)
    }

    pub fn throw_at_wait(self) -> bool {
        self.contains(Self::THROW_AT_WAIT) && !self.contains(Self::NO_EXCEPTIONS)
    }
}

impl Default for ExceptionsPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for ExceptionsPolicy {
    type Output = ExceptionsPolicy;

    fn bitor(self, rhs: ExceptionsPolicy) -> ExceptionsPolicy {
        ExceptionsPolicy(self.0 | rhs.0)
    }
}

/// Immutable copy of the session policy taken at operation launch.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub groups: Vec<u32>,
    pub cflags: u64,
    pub ioflags: u32,
    pub namespace: Option<String>,
    pub timeout: Duration,
    pub filter: Filter,
    pub checker: Checker,
    pub policy: ExceptionsPolicy,
}

#[derive(Debug)]
struct PolicyBag {
    groups: Vec<u32>,
    cflags: u64,
    ioflags: u32,
    namespace: Option<String>,
    timeout: Duration,
    filter: Filter,
    checker: Checker,
    policy: ExceptionsPolicy,
}

/// Stateful handle for launching operations against a cluster.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    bag: Arc<RwLock<PolicyBag>>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>) -> Session {
        Session {
            transport,
            bag: Arc::new(RwLock::new(PolicyBag {
                groups: Vec::new(),
                cflags: 0,
                ioflags: 0,
                namespace: None,
                timeout: Duration::from_secs(5),
                filter: Filter::default(),
                checker: Checker::default(),
                policy: ExceptionsPolicy::DEFAULT,
            })),
        }
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: &ClientConfig) -> Session {
        let session = Session::new(transport);
        session.set_groups(config.groups.clone());
        session.set_namespace(config.namespace.clone());
        session.set_timeout(Duration::from_secs(config.wait_timeout_secs));
        session
    }

    pub fn set_groups(&self, groups: Vec<u32>) {
        self.bag.write().unwrap().groups = groups;
    }

    pub fn groups(&self) -> Vec<u32> {
        self.bag.read().unwrap().groups.clone()
    }

    pub fn set_cflags(&self, cflags: u64) {
        self.bag.write().unwrap().cflags = cflags;
    }

    pub fn cflags(&self) -> u64 {
        self.bag.read().unwrap().cflags
    }

    pub fn set_ioflags(&self, ioflags: u32) {
        self.bag.write().unwrap().ioflags = ioflags;
    }

    pub fn ioflags(&self) -> u32 {
        self.bag.read().unwrap().ioflags
    }

    pub fn set_namespace(&self, namespace: Option<String>) {
        self.bag.write().unwrap().namespace = namespace;
    }

    pub fn namespace(&self) -> Option<String> {
        self.bag.read().unwrap().namespace.clone()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.bag.write().unwrap().timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.bag.read().unwrap().timeout
    }

    pub fn set_filter(&self, filter: Filter) {
        self.bag.write().unwrap().filter = filter;
    }

    pub fn filter(&self) -> Filter {
        self.bag.read().unwrap().filter.clone()
    }

    pub fn set_checker(&self, checker: Checker) {
        self.bag.write().unwrap().checker = checker;
    }

    pub fn checker(&self) -> Checker {
        self.bag.read().unwrap().checker.clone()
    }

    pub fn set_exceptions_policy(&self, policy: ExceptionsPolicy) {
        self.bag.write().unwrap().policy = policy;
    }

    pub fn exceptions_policy(&self) -> ExceptionsPolicy {
        self.bag.read().unwrap().policy
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        let bag = self.bag.read().unwrap();
        PolicySnapshot {
            groups: bag.groups.clone(),
            cflags: bag.cflags,
            ioflags: bag.ioflags,
            namespace: bag.namespace.clone(),
            timeout: bag.timeout,
            filter: bag.filter.clone(),
            checker: bag.checker.clone(),
            policy: bag.policy,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Materializes a key's id under this session's namespace.
    pub fn resolve(&self, key: &Key) -> Result<DnetId> {
        key.resolve(self.namespace().as_deref())
    }

    /// Content checksum under this session's namespace, as used by
    /// compare-and-swap writes.
    pub fn transform_data(&self, data: &[u8]) -> RawId {
        transform::transform_data(self.namespace().as_deref(), data)
    }

    fn pair<T: Entry>(snap: &PolicySnapshot) -> (AsyncResult<T>, ResultSender<T>) {
        AsyncResult::pair(snap.filter.clone(), snap.checker.clone(), snap.policy)
    }

    fn failed<T: Entry>(snap: &PolicySnapshot, err: Error) -> AsyncResult<T> {
        AsyncResult::failed(snap.filter.clone(), snap.checker.clone(), snap.policy, err)
    }

    /// Validation failure at operation start: either returned synchronously
    /// (`throw_at_start`) or surfaced as a pre-completed stream.
    pub(crate) fn start_failure<T: Entry>(
        snap: &PolicySnapshot,
        err: Error,
    ) -> Result<AsyncResult<T>> {
        if snap.policy.throw_at_start() {
            Err(err)
        } else {
            Ok(Self::failed(snap, err))
        }
    }

    fn resolved<T: Entry>(
        &self,
        key: &Key,
        snap: &PolicySnapshot,
    ) -> std::result::Result<DnetId, AsyncResult<T>> {
        match key.resolve(snap.namespace.as_deref()) {
            Ok(id) => Ok(id),
            Err(e) => Err(Self::failed(snap, e)),
        }
    }

    // --- reads ---------------------------------------------------------

    /// Reads `size` bytes at `offset`, trying `groups` in order with
    /// fail-over: the next group is queried only when the previous one
    /// produced no positive reply.
    pub fn read_data(
        &self,
        key: &Key,
        groups: Vec<u32>,
        offset: u64,
        size: u64,
    ) -> AsyncResult<ReadEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let io = IoAttr {
            id: id.id,
            parent: id.id,
            offset,
            size,
            flags: snap.ioflags,
            type_tag: id.type_tag,
            ..IoAttr::default()
        };
        self.read_io(id, groups, io, Command::Read)
    }

    /// Single-group read.
    pub fn read_data_from(
        &self,
        key: &Key,
        group: u32,
        offset: u64,
        size: u64,
    ) -> AsyncResult<ReadEntry> {
        self.read_data(key, vec![group], offset, size)
    }

    /// Read using the mixed group preference order.
    pub fn read_data_any(&self, key: &Key, offset: u64, size: u64) -> AsyncResult<ReadEntry> {
        let snap = self.snapshot();
        let groups = match self.mix_states_for(key) {
            Ok(groups) => groups,
            Err(e) => return Self::failed(&snap, e),
        };
        self.read_data(key, groups, offset, size)
    }

    /// Fail-over read with an explicit I/O attribute and command; the range
    /// sweep drives `ReadRange`/`DelRange` through here.
    pub(crate) fn read_io(
        &self,
        id: DnetId,
        groups: Vec<u32>,
        io: IoAttr,
        cmd: Command,
    ) -> AsyncResult<ReadEntry> {
        let snap = self.snapshot();
        let (result, sender) = Self::pair(&snap);
        let machine = ReadMachine {
            transport: Arc::clone(&self.transport),
            snap,
            sender,
            id,
            groups,
            io,
            cmd,
        };
        tokio::spawn(machine.run());
        result
    }

    /// Orders `groups` by replica freshness, then reads from the best one.
    pub fn read_latest(&self, key: &Key, offset: u64, size: u64) -> AsyncResult<ReadEntry> {
        latest::read_latest(self, key, offset, size)
    }

    /// Looks up `key` in `groups` and emits the replies ordered by replica
    /// freshness, the caller's preferred group promoted on ties.
    pub fn prepare_latest(&self, key: &Key, groups: &[u32]) -> AsyncResult<LookupEntry> {
        latest::prepare_latest(self, key, groups)
    }

    // --- writes --------------------------------------------------------

    /// Writes a prepared transaction control, fanning out across the
    /// session groups. Used directly by bulk writes; ordinary callers go
    /// through the typed variants below.
    pub fn write_ctl(&self, mut ctl: TransactionControl) -> AsyncResult<WriteEntry> {
        let snap = self.snapshot();
        ctl.cmd = Command::Write;
        ctl.cflags |= cflags::NEED_ACK;
        if let Some(io) = ctl.io.as_mut() {
            io.id = ctl.id.id;
        }
        let context = op_context(
            &ctl.id,
            format!(
                "WRITE: offset: {}, size: {}",
                ctl.io.map(|io| io.offset).unwrap_or(0),
                ctl.payload.len()
            ),
        );
        let groups = snap.groups.clone();
        let (result, sender) = Self::pair(&snap);
        let machine = FanoutMachine {
            transport: Arc::clone(&self.transport),
            snap,
            sender,
            ctl,
            groups,
            context,
        };
        tokio::spawn(machine.run());
        result
    }

    pub fn write_data(
        &self,
        key: &Key,
        data: DataBuffer,
        remote_offset: u64,
    ) -> AsyncResult<WriteEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let io = IoAttr {
            offset: remote_offset,
            size: data.len() as u64,
            num: data.len() as u64 + remote_offset,
            flags: snap.ioflags,
            type_tag: id.type_tag,
            ..IoAttr::default()
        };
        self.write_ctl(
            TransactionControl::new(id, Command::Write)
                .with_cflags(snap.cflags)
                .with_io(io)
                .with_payload(data),
        )
    }

    /// Write conditioned on the stored content's checksum.
    pub fn write_cas(
        &self,
        key: &Key,
        data: DataBuffer,
        old_csum: RawId,
        remote_offset: u64,
    ) -> AsyncResult<WriteEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let io = IoAttr {
            parent: old_csum,
            offset: remote_offset,
            size: data.len() as u64,
            num: data.len() as u64 + remote_offset,
            flags: snap.ioflags | elliptics_proto::command::ioflags::COMPARE_AND_SWAP,
            type_tag: id.type_tag,
            ..IoAttr::default()
        };
        self.write_ctl(
            TransactionControl::new(id, Command::Write)
                .with_cflags(snap.cflags)
                .with_io(io)
                .with_payload(data),
        )
    }

    /// Read-modify-write loop: reads the latest value, applies `converter`,
    /// writes back conditioned on the read content's checksum, and retries
    /// (up to `retries` times) only when the store reports a checksum
    /// mismatch.
    pub fn write_cas_with<F>(
        &self,
        key: &Key,
        converter: F,
        remote_offset: u64,
        retries: usize,
    ) -> AsyncResult<WriteEntry>
    where
        F: Fn(&DataBuffer) -> DataBuffer + Send + Sync + 'static,
    {
        cas::write_cas_with(self, key, converter, remote_offset, retries)
    }

    /// Reserves `psize` bytes ahead of a multi-part upload.
    pub fn write_prepare(
        &self,
        key: &Key,
        data: DataBuffer,
        remote_offset: u64,
        psize: u64,
    ) -> AsyncResult<WriteEntry> {
        self.write_flagged(
            key,
            data,
            remote_offset,
            elliptics_proto::command::ioflags::PREPARE
                | elliptics_proto::command::ioflags::PLAIN_WRITE,
            Some(psize),
        )
    }

    /// Writes a chunk of a multi-part upload without touching metadata.
    pub fn write_plain(
        &self,
        key: &Key,
        data: DataBuffer,
        remote_offset: u64,
    ) -> AsyncResult<WriteEntry> {
        self.write_flagged(
            key,
            data,
            remote_offset,
            elliptics_proto::command::ioflags::PLAIN_WRITE,
            None,
        )
    }

    /// Seals a multi-part upload at `csize` committed bytes.
    pub fn write_commit(
        &self,
        key: &Key,
        data: DataBuffer,
        remote_offset: u64,
        csize: u64,
    ) -> AsyncResult<WriteEntry> {
        self.write_flagged(
            key,
            data,
            remote_offset,
            elliptics_proto::command::ioflags::COMMIT
                | elliptics_proto::command::ioflags::PLAIN_WRITE,
            Some(csize),
        )
    }

    /// Writes into the server cache with a lifetime in seconds.
    pub fn write_cache(
        &self,
        key: &Key,
        data: DataBuffer,
        lifetime_secs: u64,
    ) -> AsyncResult<WriteEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let io = IoAttr {
            start: lifetime_secs,
            size: data.len() as u64,
            num: data.len() as u64,
            flags: snap.ioflags | elliptics_proto::command::ioflags::CACHE,
            type_tag: id.type_tag,
            ..IoAttr::default()
        };
        self.write_ctl(
            TransactionControl::new(id, Command::Write)
                .with_cflags(snap.cflags)
                .with_io(io)
                .with_payload(data),
        )
    }

    fn write_flagged(
        &self,
        key: &Key,
        data: DataBuffer,
        remote_offset: u64,
        extra_ioflags: u32,
        num: Option<u64>,
    ) -> AsyncResult<WriteEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let io = IoAttr {
            offset: remote_offset,
            size: data.len() as u64,
            num: num.unwrap_or(0),
            flags: snap.ioflags | extra_ioflags,
            type_tag: id.type_tag,
            ..IoAttr::default()
        };
        self.write_ctl(
            TransactionControl::new(id, Command::Write)
                .with_cflags(snap.cflags)
                .with_io(io)
                .with_payload(data),
        )
    }

    // --- lookup / remove ----------------------------------------------

    /// Fans a lookup out across the key's preferred groups.
    pub fn lookup(&self, key: &Key) -> AsyncResult<LookupEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let groups = if key.is_by_id() {
            vec![id.group]
        } else {
            self.transport.mix_states(Some(&id.id))
        };
        let context = op_context(&id, "LOOKUP");
        let ctl = TransactionControl::new(id, Command::Lookup).with_cflags(snap.cflags);
        let (result, sender) = Self::pair(&snap);
        let machine = FanoutMachine {
            transport: Arc::clone(&self.transport),
            snap,
            sender,
            ctl,
            groups,
            context,
        };
        tokio::spawn(machine.run());
        result
    }

    /// Removes the object from every session group.
    pub fn remove(&self, key: &Key) -> AsyncResult<GenericEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let context = op_context(&id, "REMOVE");
        let ctl = TransactionControl::new(id, Command::Remove).with_cflags(snap.cflags);
        let groups = snap.groups.clone();
        let (result, sender) = Self::pair(&snap);
        let machine = FanoutMachine {
            transport: Arc::clone(&self.transport),
            snap,
            sender,
            ctl,
            groups,
            context,
        };
        tokio::spawn(machine.run());
        result
    }

    // --- ranges / bulk -------------------------------------------------

    /// Sweeps the id interval `[io.id, io.parent]` in `group`, streaming
    /// matching entries.
    pub fn read_data_range(&self, io: IoAttr, group: u32) -> Result<AsyncResult<ReadEntry>> {
        range::start_range(self, io, group, Command::ReadRange)
    }

    /// Like [`Session::read_data_range`] with deletion; every reply is
    /// surfaced and an empty sweep reports not-found.
    pub fn remove_data_range(&self, io: IoAttr, group: u32) -> Result<AsyncResult<ReadEntry>> {
        range::start_range(self, io, group, Command::DelRange)
    }

    /// Reads many keys in one pass: a single sorted, deduplicated bulk
    /// transaction per target state.
    pub fn bulk_read(&self, ios: Vec<IoAttr>) -> Result<AsyncResult<ReadEntry>> {
        bulk::bulk_read(self, ios)
    }

    /// Bulk read addressed by names.
    pub fn bulk_read_names(&self, names: &[String]) -> Result<AsyncResult<ReadEntry>> {
        let namespace = self.namespace();
        let ios = names
            .iter()
            .map(|name| IoAttr {
                id: transform::transform_name(namespace.as_deref(), name),
                ..IoAttr::default()
            })
            .collect();
        bulk::bulk_read(self, ios)
    }

    /// Independent writes for every (io, data) pair, aggregated into one
    /// stream.
    pub fn bulk_write(
        &self,
        ios: Vec<IoAttr>,
        data: Vec<DataBuffer>,
    ) -> Result<AsyncResult<WriteEntry>> {
        bulk::bulk_write(self, ios, data)
    }

    // --- stat / cmd / iterator ----------------------------------------

    /// Requests statistics from every connected state.
    pub fn stat_log(&self) -> AsyncResult<StatEntry> {
        self.broadcast(Command::Stat, "STAT")
    }

    /// Requests statistics from the state serving `key`.
    pub fn stat_log_key(&self, key: &Key) -> AsyncResult<StatEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let context = op_context(&id, "STAT");
        let ctl = TransactionControl::new(id, Command::Stat).with_cflags(snap.cflags);
        self.single(snap, ctl, context)
    }

    /// Requests command counters from every connected state.
    pub fn stat_log_count(&self) -> AsyncResult<StatEntry> {
        self.broadcast(Command::StatCount, "STAT_COUNT")
    }

    /// Broadcasts a raw transaction to every connected state.
    pub fn request_cmd(&self, ctl: TransactionControl) -> AsyncResult<GenericEntry> {
        let snap = self.snapshot();
        let context = op_context(&ctl.id, format!("{:?}", ctl.cmd));
        let (result, sender) = Self::pair(&snap);
        let machine = BroadcastMachine {
            transport: Arc::clone(&self.transport),
            snap,
            sender,
            ctl,
            context,
        };
        tokio::spawn(machine.run());
        result
    }

    /// Starts a long-running keyspace iterator on the state serving `key`.
    pub fn start_iterator(&self, key: &Key, request: IteratorRequest) -> AsyncResult<IteratorEntry> {
        let snap = self.snapshot();
        let id = match self.resolved(key, &snap) {
            Ok(id) => id,
            Err(failed) => return failed,
        };
        let context = op_context(&id, "ITERATOR");
        let ctl = TransactionControl::new(id, Command::Iterator)
            .with_cflags(snap.cflags)
            .with_payload(DataBuffer::from_vec(request.encode()));
        self.single(snap, ctl, context)
    }

    fn broadcast<T: Entry>(&self, cmd: Command, name: &str) -> AsyncResult<T> {
        let snap = self.snapshot();
        let id = DnetId::new(RawId::ZERO, 0);
        let context = op_context(&id, name);
        let ctl = TransactionControl::new(id, cmd).with_cflags(snap.cflags);
        let (result, sender) = Self::pair(&snap);
        let machine = BroadcastMachine {
            transport: Arc::clone(&self.transport),
            snap,
            sender,
            ctl,
            context,
        };
        tokio::spawn(machine.run());
        result
    }

    fn single<T: Entry>(
        &self,
        snap: PolicySnapshot,
        ctl: TransactionControl,
        context: String,
    ) -> AsyncResult<T> {
        let (result, sender) = Self::pair(&snap);
        let machine = SingleDispatchMachine {
            transport: Arc::clone(&self.transport),
            snap,
            sender,
            ctl,
            context,
        };
        tokio::spawn(machine.run());
        result
    }

    // --- exec ----------------------------------------------------------

    /// Invokes a server-side script, blocking the server on the reply.
    /// Without an id the invocation is broadcast to every state.
    pub fn exec(&self, id: Option<&DnetId>, event: &str, data: DataBuffer) -> AsyncResult<ExecEntry> {
        self.exec_inner(id, event, data, false)
    }

    /// [`Session::exec`] without taking the per-object server lock.
    pub fn exec_unlocked(
        &self,
        id: Option<&DnetId>,
        event: &str,
        data: DataBuffer,
    ) -> AsyncResult<ExecEntry> {
        self.exec_inner(id, event, data, true)
    }

    fn exec_inner(
        &self,
        id: Option<&DnetId>,
        event: &str,
        data: DataBuffer,
        nolock: bool,
    ) -> AsyncResult<ExecEntry> {
        let mut ctx = ExecContext::new(event, data).with_flags(SPH_FLAGS_SRC_BLOCK);
        if let Some(id) = id {
            ctx = ctx.with_src(id.id);
        }
        self.request_exec(id.copied(), ctx, nolock)
    }

    /// Fire-and-forget script invocation: the server does not block.
    pub fn push(
        &self,
        id: Option<&DnetId>,
        base: &ExecContext,
        event: &str,
        data: DataBuffer,
    ) -> AsyncResult<ExecEntry> {
        self.push_inner(id, base, event, data, false)
    }

    /// [`Session::push`] without taking the per-object server lock.
    pub fn push_unlocked(
        &self,
        id: Option<&DnetId>,
        base: &ExecContext,
        event: &str,
        data: DataBuffer,
    ) -> AsyncResult<ExecEntry> {
        self.push_inner(id, base, event, data, true)
    }

    fn push_inner(
        &self,
        id: Option<&DnetId>,
        base: &ExecContext,
        event: &str,
        data: DataBuffer,
        nolock: bool,
    ) -> AsyncResult<ExecEntry> {
        let flags = base.flags() & !SPH_FLAGS_SRC_BLOCK;
        let ctx = ExecContext::copy(base, event, data).with_flags(flags);
        self.request_exec(id.copied(), ctx, nolock)
    }

    /// Replies to a script invocation, routing back to its source id.
    /// `final_reply` marks the last reply of the invocation.
    pub fn reply(
        &self,
        base: &ExecContext,
        data: DataBuffer,
        final_reply: bool,
    ) -> AsyncResult<ExecEntry> {
        let mut flags = (base.flags() | SPH_FLAGS_REPLY) & !SPH_FLAGS_SRC_BLOCK;
        if final_reply {
            flags |= SPH_FLAGS_FINISH;
        } else {
            flags &= !SPH_FLAGS_FINISH;
        }
        let ctx = ExecContext::copy(base, base.event(), data).with_flags(flags);
        let target = DnetId::new(base.src(), 0);
        self.request_exec(Some(target), ctx, false)
    }

    fn request_exec(
        &self,
        id: Option<DnetId>,
        ctx: ExecContext,
        nolock: bool,
    ) -> AsyncResult<ExecEntry> {
        let snap = self.snapshot();
        // cflags are computed per transaction; the shared session state is
        // never mutated for the nolock variants.
        let mut flags = snap.cflags;
        if nolock {
            flags |= cflags::NOLOCK;
        }
        let payload = ctx.serialize();
        match id {
            Some(id) => {
                let context = op_context(&id, format!("EXEC: event: {}", ctx.event()));
                let ctl = TransactionControl::new(id, Command::Exec)
                    .with_cflags(flags)
                    .with_payload(payload);
                self.single(snap, ctl, context)
            }
            None => {
                let id = DnetId::new(RawId::ZERO, 0);
                let context = op_context(&id, format!("EXEC: event: {}", ctx.event()));
                let ctl = TransactionControl::new(id, Command::Exec)
                    .with_cflags(flags)
                    .with_payload(payload);
                let (result, sender) = Self::pair(&snap);
                let machine = BroadcastMachine {
                    transport: Arc::clone(&self.transport),
                    snap,
                    sender,
                    ctl,
                    context,
                };
                tokio::spawn(machine.run());
                result
            }
        }
    }

    // --- cluster passthroughs -----------------------------------------

    /// Human-readable address of the state serving `key` in `group`.
    pub fn lookup_address(&self, key: &Key, group: u32) -> Result<String> {
        let id = self.resolve(key)?.with_group(group);
        self.transport.lookup_addr(&id)
    }

    pub fn get_routes(&self) -> Vec<(DnetId, std::net::SocketAddr)> {
        self.transport.get_routes()
    }

    pub async fn update_status(&self, target: StatusTarget, status: NodeStatus) -> Result<i32> {
        self.transport.update_status(target, status).await
    }

    pub async fn update_status_key(&self, key: &Key, status: NodeStatus) -> Result<i32> {
        let id = self.resolve(key)?;
        self.transport
            .update_status(StatusTarget::Id(id), status)
            .await
    }

    pub async fn add_state(&self, addr: std::net::SocketAddr) -> Result<()> {
        self.transport.add_state(addr).await
    }

    pub fn state_num(&self) -> usize {
        self.transport.state_num()
    }

    /// Mixed group preference order for anonymous requests.
    pub fn mix_states(&self) -> Vec<u32> {
        self.transport.mix_states(None)
    }

    /// Mixed group preference order for `key`; a by-id key pins its own
    /// group.
    pub fn mix_states_for(&self, key: &Key) -> Result<Vec<u32>> {
        let id = self.resolve(key)?;
        if key.is_by_id() {
            Ok(vec![id.group])
        } else {
            Ok(self.transport.mix_states(Some(&id.id)))
        }
    }
}

/// Drop guard capturing {filter, checker, exceptions policy} and restoring
/// them unconditionally on every exit path. Composite operations mutate the
/// session only through the lifetime of one of these.
pub struct ScopedPolicy {
    session: Session,
    filter: Filter,
    checker: Checker,
    policy: ExceptionsPolicy,
}

impl ScopedPolicy {
    pub fn new(session: &Session) -> ScopedPolicy {
        ScopedPolicy {
            session: session.clone(),
            filter: session.filter(),
            checker: session.checker(),
            policy: session.exceptions_policy(),
        }
    }
}

impl Drop for ScopedPolicy {
    fn drop(&mut self) {
        self.session.set_filter(self.filter.clone());
        self.session.set_checker(self.checker.clone());
        self.session.set_exceptions_policy(self.policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCluster;

    fn session() -> Session {
        let cluster = SimCluster::new();
        cluster.add_group(1);
        Session::new(Arc::new(cluster))
    }

    #[test]
    fn test_policy_bits() {
        let p = ExceptionsPolicy::DEFAULT;
        assert!(p.throw_at_start());
        assert!(p.throw_at_wait());

        let suppressed = p | ExceptionsPolicy::NO_EXCEPTIONS;
        assert!(!suppressed.throw_at_start());
        assert!(!suppressed.throw_at_wait());

        assert!(!ExceptionsPolicy::THROW_AT_WAIT.throw_at_start());
        assert!(ExceptionsPolicy::THROW_AT_WAIT.throw_at_wait());
    }

    #[tokio::test]
    async fn test_clones_share_policy() {
        let a = session();
        let b = a.clone();
        a.set_groups(vec![1, 2, 3]);
        assert_eq!(b.groups(), vec![1, 2, 3]);
        b.set_cflags(cflags::NOLOCK);
        assert_eq!(a.cflags(), cflags::NOLOCK);
    }

    #[tokio::test]
    async fn test_snapshot_isolated_from_later_mutation() {
        let sess = session();
        sess.set_groups(vec![5]);
        let snap = sess.snapshot();
        sess.set_groups(vec![9]);
        assert_eq!(snap.groups, vec![5]);
        assert_eq!(sess.groups(), vec![9]);
    }

    #[tokio::test]
    async fn test_scoped_policy_restores() {
        let sess = session();
        {
            let _scope = ScopedPolicy::new(&sess);
            sess.set_checker(Checker::no_check());
            sess.set_filter(Filter::all_with_ack());
            sess.set_exceptions_policy(ExceptionsPolicy::NO_EXCEPTIONS);
            assert!(!sess.exceptions_policy().throw_at_wait());
        }
        assert_eq!(format!("{:?}", sess.checker()), "Checker(at_least_one)");
        assert_eq!(format!("{:?}", sess.filter()), "Filter(positive)");
        assert!(sess.exceptions_policy().throw_at_wait());
    }

    #[tokio::test]
    async fn test_scoped_policy_restores_on_early_exit() {
        let sess = session();
        let attempt = || -> Result<()> {
            let _scope = ScopedPolicy::new(&sess);
            sess.set_exceptions_policy(ExceptionsPolicy::NO_EXCEPTIONS);
            Err(Error::invalid_argument("abort"))
        };
        assert!(attempt().is_err());
        assert!(sess.exceptions_policy().throw_at_wait());
    }

    #[tokio::test]
    async fn test_resolve_caches_namespace_hash() {
        let sess = session();
        sess.set_namespace(Some("ns".into()));
        let key = Key::from_name("object");
        let id = sess.resolve(&key).unwrap();
        assert_eq!(
            id.id,
            crate::transform::transform_name(Some("ns"), "object")
        );
    }
}
