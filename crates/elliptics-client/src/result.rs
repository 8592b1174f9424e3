//! The async result pipeline.
//!
//! Every operation returns an [`AsyncResult`]: a stream of reply entries
//! followed by exactly one terminal status. The operation side holds the
//! matching [`ResultSender`], pushes entries as frames arrive, accounts
//! command headers for the checker, and finalizes once fan-out completes.
//!
//! Handlers registered through `connect` run under the stream's internal
//! lock: they must never call back into the same stream (calling into a
//! different stream, as the aggregator does, is fine).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use elliptics_proto::command::status;
use elliptics_proto::CommandHeader;
use tokio::sync::Notify;
use tracing::debug;

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::predicate::{Checker, Filter};
use crate::session::ExceptionsPolicy;

type EntryHandler<T> = Arc<dyn Fn(&T) + Send + Sync>;
type FinalHandler<T> = Arc<dyn Fn(&[T], &Result<()>) + Send + Sync>;

struct State<T> {
    entries: Vec<T>,
    headers: Vec<CommandHeader>,
    last_error: Option<Error>,
    terminal: Option<Result<()>>,
    entry_handlers: Vec<EntryHandler<T>>,
    final_handlers: Vec<FinalHandler<T>>,
}

struct Shared<T> {
    filter: Filter,
    checker: Checker,
    policy: ExceptionsPolicy,
    done: Notify,
    state: Mutex<State<T>>,
}

/// Consumer half: the stream of entries plus the terminal status.
pub struct AsyncResult<T: Entry> {
    shared: Arc<Shared<T>>,
}

/// Producer half owned by the operation state machine.
pub struct ResultSender<T: Entry> {
    shared: Arc<Shared<T>>,
}

impl<T: Entry> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        AsyncResult {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Entry> Clone for ResultSender<T> {
    fn clone(&self) -> Self {
        ResultSender {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Entry> AsyncResult<T> {
    /// Creates a connected stream pair carrying the launch-time predicate
    /// and policy snapshot.
    pub fn pair(
        filter: Filter,
        checker: Checker,
        policy: ExceptionsPolicy,
    ) -> (AsyncResult<T>, ResultSender<T>) {
        let shared = Arc::new(Shared {
            filter,
            checker,
            policy,
            done: Notify::new(),
            state: Mutex::new(State {
                entries: Vec::new(),
                headers: Vec::new(),
                last_error: None,
                terminal: None,
                entry_handlers: Vec::new(),
                final_handlers: Vec::new(),
            }),
        });
        (
            AsyncResult {
                shared: Arc::clone(&shared),
            },
            ResultSender { shared },
        )
    }

    /// A stream already completed with `err`; used to surface validation
    /// failures when exceptions are suppressed.
    pub fn failed(
        filter: Filter,
        checker: Checker,
        policy: ExceptionsPolicy,
        err: Error,
    ) -> AsyncResult<T> {
        let (result, sender) = AsyncResult::pair(filter, checker, policy);
        sender.complete(Err(err));
        result
    }

    /// Registers streaming handlers. Entries already buffered are replayed
    /// in order; if the stream is already complete the final handler fires
    /// immediately.
    pub fn connect<E, F>(&self, on_entry: E, on_final: F)
    where
        E: Fn(&T) + Send + Sync + 'static,
        F: Fn(&[T], &Result<()>) + Send + Sync + 'static,
    {
        let mut st = self.shared.state.lock().unwrap();
        for entry in st.entries.iter() {
            on_entry(entry);
        }
        if let Some(terminal) = st.terminal.clone() {
            on_final(&st.entries, &terminal);
            return;
        }
        st.entry_handlers.push(Arc::new(on_entry));
        st.final_handlers.push(Arc::new(on_final));
    }

    /// Registers only a completion handler.
    pub fn connect_final<F>(&self, on_final: F)
    where
        F: Fn(&[T], &Result<()>) + Send + Sync + 'static,
    {
        self.connect(|_| {}, on_final);
    }

    /// Awaits the terminal status without consulting the exception policy.
    pub async fn wait_done(&self) {
        loop {
            let notified = self.shared.done.notified();
            if self.shared.state.lock().unwrap().terminal.is_some() {
                return;
            }
            notified.await;
        }
    }

    /// Awaits completion. A terminal error is returned iff the session's
    /// `throw_at_wait` policy bit was set at launch.
    pub async fn wait(&self) -> Result<()> {
        self.wait_done().await;
        let terminal = self
            .shared
            .state
            .lock()
            .unwrap()
            .terminal
            .clone()
            .expect("stream completed");
        match terminal {
            Ok(()) => Ok(()),
            Err(e) if self.shared.policy.throw_at_wait() => Err(e),
            Err(_) => Ok(()),
        }
    }

    /// Awaits completion and returns the delivered entries, honoring the
    /// exception policy the way [`AsyncResult::wait`] does.
    pub async fn get(&self) -> Result<Vec<T>> {
        self.wait().await?;
        Ok(self.entries())
    }

    /// The terminal error, if the stream completed with one.
    pub fn error(&self) -> Option<Error> {
        match self.shared.state.lock().unwrap().terminal.as_ref() {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().unwrap().terminal.is_some()
    }

    /// Snapshot of the entries delivered so far.
    pub fn entries(&self) -> Vec<T> {
        self.shared.state.lock().unwrap().entries.clone()
    }
}

impl<T: Entry> ResultSender<T> {
    /// Delivers an entry unconditionally, in arrival order.
    pub fn process(&self, entry: T) {
        let mut st = self.shared.state.lock().unwrap();
        if st.terminal.is_some() {
            debug!("discarding reply frame received after terminal status");
            return;
        }
        for handler in st.entry_handlers.iter() {
            handler(&entry);
        }
        st.entries.push(entry);
    }

    /// Delivers an entry iff the stream's filter accepts it. Returns whether
    /// the entry was surfaced.
    pub fn process_filtered(&self, entry: T) -> bool {
        if self.shared.filter.check(entry.reply()) {
            self.process(entry);
            true
        } else {
            false
        }
    }

    /// Records a command header for the terminal checker, regardless of the
    /// filter. Non-zero statuses also update the last observed error.
    pub fn account(&self, header: CommandHeader) {
        let mut st = self.shared.state.lock().unwrap();
        if st.terminal.is_some() {
            return;
        }
        if header.status != 0 {
            let context = format!("{}: {:?}", header.id, header.cmd);
            st.last_error = Some(Error::from_wire(header.status, context));
        }
        st.headers.push(header);
    }

    /// Records an operation-level failure (dispatch refused, no route)
    /// without completing the stream.
    pub fn fail(&self, err: Error) {
        let mut st = self.shared.state.lock().unwrap();
        if st.terminal.is_some() {
            return;
        }
        st.last_error = Some(err);
    }

    /// Posts the terminal status. The first call wins; later calls are
    /// ignored so a stream completes at most once.
    pub fn complete(&self, result: Result<()>) {
        let mut st = self.shared.state.lock().unwrap();
        if st.terminal.is_some() {
            return;
        }
        st.terminal = Some(result.clone());
        let handlers = std::mem::take(&mut st.final_handlers);
        st.entry_handlers.clear();
        for handler in handlers.iter() {
            handler(&st.entries, &result);
        }
        drop(st);
        self.shared.done.notify_waiters();
    }

    /// Runs the checker over the accounted headers and completes: success
    /// when the checker passes, otherwise a predicate failure carrying the
    /// last observed wire status.
    pub fn finalize(&self, total: usize, context: &str) {
        let (passed, successes, code) = {
            let st = self.shared.state.lock().unwrap();
            if st.terminal.is_some() {
                return;
            }
            let passed = self.shared.checker.check(&st.headers, total);
            let successes = st.headers.iter().filter(|h| h.status == 0).count();
            let code = st
                .last_error
                .as_ref()
                .map(|e| e.code())
                .unwrap_or(status::ENOENT);
            (passed, successes, code)
        };
        if passed {
            self.complete(Ok(()));
        } else {
            self.complete(Err(Error::PredicateFailed {
                context: context.to_string(),
                code,
                successes,
                total,
            }));
        }
    }

    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().unwrap().terminal.is_some()
    }
}

/// Joins N input streams into one: entries forward in arrival order, and
/// one terminal status is emitted after every input has terminated. The
/// join succeeds if any input delivered an entry with status 0 and a
/// non-empty payload; otherwise it carries the last non-empty error.
pub fn aggregate<T: Entry>(
    filter: &Filter,
    checker: &Checker,
    policy: ExceptionsPolicy,
    inputs: Vec<AsyncResult<T>>,
) -> AsyncResult<T> {
    let (result, sender) = AsyncResult::pair(filter.clone(), checker.clone(), policy);
    if inputs.is_empty() {
        sender.complete(Ok(()));
        return result;
    }

    let remaining = Arc::new(Mutex::new(inputs.len()));
    let has_success = Arc::new(AtomicBool::new(false));
    let last_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

    for input in inputs.iter() {
        let fwd_sender = sender.clone();
        let fwd_success = Arc::clone(&has_success);
        let fin_sender = sender.clone();
        let fin_success = Arc::clone(&has_success);
        let fin_remaining = Arc::clone(&remaining);
        let fin_error = Arc::clone(&last_error);

        input.connect(
            move |entry: &T| {
                let reply = entry.reply();
                if reply.status() == 0 && reply.is_valid() {
                    fwd_success.store(true, Ordering::SeqCst);
                }
                fwd_sender.process(entry.clone());
            },
            move |_entries, terminal| {
                if let Err(e) = terminal {
                    *fin_error.lock().unwrap() = Some(e.clone());
                }
                let finished = {
                    let mut left = fin_remaining.lock().unwrap();
                    *left -= 1;
                    *left == 0
                };
                if finished {
                    let outcome = if fin_success.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        match fin_error.lock().unwrap().take() {
                            Some(e) => Err(e),
                            None => Ok(()),
                        }
                    };
                    fin_sender.complete(outcome);
                }
            },
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{GenericEntry, ReplyData};
    use elliptics_proto::{Command, DataBuffer, DnetId, RawId};
    use std::sync::atomic::AtomicUsize;

    fn entry(status: i32, len: usize) -> GenericEntry {
        let header =
            CommandHeader::new(DnetId::new(RawId::ZERO, 1), Command::Write).with_status(status);
        GenericEntry::from(ReplyData::new(
            header,
            "127.0.0.1:1025".parse().unwrap(),
            DataBuffer::from_vec(vec![7u8; len]),
        ))
    }

    fn pair() -> (AsyncResult<GenericEntry>, ResultSender<GenericEntry>) {
        AsyncResult::pair(
            Filter::all_with_ack(),
            Checker::at_least_one(),
            ExceptionsPolicy::DEFAULT,
        )
    }

    #[tokio::test]
    async fn test_entries_then_terminal() {
        let (result, sender) = pair();
        sender.process(entry(0, 3));
        sender.process(entry(-2, 0));
        sender.account(entry(0, 3).command().clone());
        sender.finalize(1, "test");

        assert!(result.is_complete());
        assert!(result.error().is_none());
        assert_eq!(result.get().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_terminal_posted_once() {
        let (result, sender) = pair();
        sender.complete(Err(Error::invalid_argument("first")));
        sender.complete(Ok(()));
        assert_eq!(result.error(), Some(Error::invalid_argument("first")));
    }

    #[tokio::test]
    async fn test_frames_discarded_after_terminal() {
        let (result, sender) = pair();
        sender.complete(Ok(()));
        sender.process(entry(0, 3));
        assert!(result.entries().is_empty());
    }

    #[tokio::test]
    async fn test_filter_applied_by_process_filtered() {
        let (result, sender) = AsyncResult::<GenericEntry>::pair(
            Filter::positive(),
            Checker::no_check(),
            ExceptionsPolicy::DEFAULT,
        );
        assert!(sender.process_filtered(entry(0, 3)));
        assert!(!sender.process_filtered(entry(-2, 3)));
        assert!(!sender.process_filtered(entry(0, 0)));
        sender.complete(Ok(()));
        assert_eq!(result.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_predicate_failure() {
        let (result, sender) = pair();
        sender.account(entry(-2, 0).command().clone());
        sender.finalize(1, "ab12cd: WRITE");
        match result.error() {
            Some(Error::PredicateFailed {
                code,
                successes,
                total,
                ..
            }) => {
                assert_eq!(code, -2);
                assert_eq!(successes, 0);
                assert_eq!(total, 1);
            }
            other => panic!("unexpected terminal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_policy() {
        let (result, sender) = AsyncResult::<GenericEntry>::pair(
            Filter::default(),
            Checker::default(),
            ExceptionsPolicy::NO_EXCEPTIONS,
        );
        sender.complete(Err(Error::invalid_argument("boom")));
        // Suppressed: wait succeeds, the error is still observable.
        assert!(result.wait().await.is_ok());
        assert!(result.error().is_some());

        let (result, sender) = pair();
        sender.complete(Err(Error::invalid_argument("boom")));
        assert!(result.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_replays_buffered_entries() {
        let (result, sender) = pair();
        sender.process(entry(0, 1));
        sender.process(entry(0, 2));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_entries = Arc::clone(&seen);
        let finals = Arc::new(AtomicUsize::new(0));
        let seen_finals = Arc::clone(&finals);
        result.connect(
            move |_| {
                seen_entries.fetch_add(1, Ordering::SeqCst);
            },
            move |entries, terminal| {
                assert_eq!(entries.len(), 3);
                assert!(terminal.is_ok());
                seen_finals.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        sender.process(entry(0, 3));
        sender.complete(Ok(()));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(finals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_unblocks_from_other_task() {
        let (result, sender) = pair();
        let waiter = tokio::spawn({
            let result = result.clone();
            async move { result.wait().await }
        });
        tokio::task::yield_now().await;
        sender.complete(Ok(()));
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_aggregate_or_success() {
        let (a, sa) = pair();
        let (b, sb) = pair();
        let agg = aggregate(
            &Filter::all_with_ack(),
            &Checker::no_check(),
            ExceptionsPolicy::DEFAULT,
            vec![a, b],
        );

        sa.process(entry(-2, 0));
        sa.complete(Err(Error::from_wire(-2, "a")));
        assert!(!agg.is_complete());

        sb.process(entry(0, 4));
        sb.complete(Ok(()));
        assert!(agg.is_complete());
        assert!(agg.error().is_none());
        assert_eq!(agg.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_aggregate_carries_last_error() {
        let (a, sa) = pair();
        let (b, sb) = pair();
        let agg = aggregate(
            &Filter::all_with_ack(),
            &Checker::no_check(),
            ExceptionsPolicy::DEFAULT,
            vec![a, b],
        );
        sa.complete(Err(Error::from_wire(-2, "a")));
        sb.complete(Err(Error::from_wire(-110, "b")));
        assert_eq!(agg.error().map(|e| e.code()), Some(-110));
    }

    #[tokio::test]
    async fn test_aggregate_empty_inputs() {
        let agg: AsyncResult<GenericEntry> = aggregate(
            &Filter::default(),
            &Checker::default(),
            ExceptionsPolicy::DEFAULT,
            vec![],
        );
        assert!(agg.is_complete());
        assert!(agg.error().is_none());
    }
}
