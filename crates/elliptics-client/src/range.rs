//! Ranged reads and deletes.
//!
//! A range operation sweeps the id interval `[io.id, io.parent]` one covered
//! sub-range at a time: the router supplies the boundary of the sub-range
//! containing the cursor, a ranged transaction runs against the current
//! group, and the per-range acknowledgement (an io-attr whose `num` is the
//! key count the sub-range produced) drives the residual `start`/`num`
//! accounting until the interval is exhausted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use elliptics_proto::{Command, DnetId, IoAttr, RawId};
use tracing::debug;

use crate::entry::{Entry, ReadEntry};
use crate::error::{op_context, Error, Result};
use crate::predicate::{Checker, Filter};
use crate::result::{AsyncResult, ResultSender};
use crate::session::{ExceptionsPolicy, ScopedPolicy, Session};

pub(crate) fn start_range(
    sess: &Session,
    io: IoAttr,
    group: u32,
    cmd: Command,
) -> Result<AsyncResult<ReadEntry>> {
    let snap = sess.snapshot();
    let cursor = DnetId::new(io.id, group).with_type(io.type_tag);

    // The first boundary query runs synchronously so a routing failure can
    // honor throw_at_start.
    if let Err(e) = sess.transport().search_range(&cursor) {
        let context = op_context(
            &cursor,
            format!(
                "{:?}: group: {}, size: {}",
                cmd, group, io.size
            ),
        );
        return Session::start_failure(
            &snap,
            Error::Transport {
                context,
                message: e.to_string(),
            },
        );
    }

    let (result, handler) =
        AsyncResult::pair(snap.filter.clone(), snap.checker.clone(), snap.policy);
    let machine = RangeMachine {
        sess: sess.clone(),
        handler,
        io,
        cursor,
        end: io.parent,
        size: io.size,
        group,
        cmd,
        delete: cmd == Command::DelRange,
        any_seen: false,
        last_error: None,
    };
    tokio::spawn(machine.run());
    Ok(result)
}

struct RangeMachine {
    sess: Session,
    handler: ResultSender<ReadEntry>,
    io: IoAttr,
    cursor: DnetId,
    end: RawId,
    /// Requested size, re-applied to every sub-range transaction.
    size: u64,
    group: u32,
    cmd: Command,
    delete: bool,
    any_seen: bool,
    last_error: Option<Error>,
}

impl RangeMachine {
    async fn run(mut self) {
        loop {
            let (start, mut next) = match self.sess.transport().search_range(&self.cursor) {
                Ok(bounds) => bounds,
                Err(e) => {
                    self.handler.complete(Err(e));
                    return;
                }
            };

            // Clamp to the requested end once the router runs out of covered
            // sub-ranges or steps past it.
            let mut last_iteration = false;
            if self.cursor.id > next || start == next || next > self.end {
                next = self.end;
                last_iteration = true;
            }
            debug!(
                id = %self.cursor.id,
                start = %start,
                next = %next,
                end = %self.end,
                size = self.size,
                "range iteration"
            );

            self.io.id = self.cursor.id;
            self.io.parent = next;
            self.io.size = self.size;

            let sub = {
                let _scope = ScopedPolicy::new(&self.sess);
                self.sess.set_filter(Filter::all_with_ack());
                self.sess.set_checker(Checker::no_check());
                self.sess
                    .set_exceptions_policy(ExceptionsPolicy::NO_EXCEPTIONS);
                self.sess
                    .read_io(self.cursor, vec![self.group], self.io, self.cmd)
            };

            let rep_cell: Arc<Mutex<Option<IoAttr>>> = Arc::new(Mutex::new(None));
            let seen = Arc::new(AtomicBool::new(false));
            {
                let rep_cell = Arc::clone(&rep_cell);
                let seen = Arc::clone(&seen);
                let forward = self.handler.clone();
                let delete = self.delete;
                sub.connect(
                    move |entry: &ReadEntry| {
                        seen.store(true, Ordering::SeqCst);
                        let is_range_ack = entry.status() == 0
                            && entry.reply().payload.len() == IoAttr::WIRE_SIZE;
                        if is_range_ack {
                            *rep_cell.lock().unwrap() = entry.io_attr().ok();
                            // Deletes surface every reply, the range ack
                            // included.
                            if delete {
                                forward.process(entry.clone());
                            }
                        } else {
                            forward.process(entry.clone());
                        }
                    },
                    |_, _| {},
                );
            }
            sub.wait_done().await;

            match sub.error() {
                Some(e) => {
                    self.last_error = Some(e);
                }
                None if self.delete => {
                    // Deletes track coverage only; the residual arithmetic
                    // below is a read-range concern.
                }
                None => {
                    let rep = rep_cell.lock().unwrap().take().unwrap_or_default();
                    if self.io.start < rep.num {
                        let produced = rep.num - self.io.start;
                        self.io.start = 0;
                        self.io.num = self.io.num.saturating_sub(produced);
                        self.last_error = None;
                        if self.io.num == 0 {
                            self.handler.complete(Ok(()));
                            return;
                        }
                    } else {
                        self.io.start -= rep.num;
                    }
                }
            }
            if seen.load(Ordering::SeqCst) {
                self.any_seen = true;
            }

            self.cursor.id = next;
            if last_iteration {
                break;
            }
        }

        if self.delete && !self.any_seen {
            let context = op_context(
                &self.cursor,
                format!(
                    "DEL_RANGE: group: {}, size: {}",
                    self.group, self.size
                ),
            );
            self.handler.complete(Err(Error::NotFound { context }));
            return;
        }
        match self.last_error.take() {
            Some(e) => self.handler.complete(Err(e)),
            None => self.handler.complete(Ok(())),
        }
    }
}
