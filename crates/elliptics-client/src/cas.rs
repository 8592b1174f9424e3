//! Compare-and-swap write loop.
//!
//! Reads the latest value, runs the caller's converter over it, and writes
//! the result back conditioned on the checksum of what was read. A checksum
//! mismatch reported by the store means somebody wrote in between: the loop
//! re-reads and retries, up to the caller's bound. Every other outcome,
//! success or error, terminates the loop.

use std::sync::Arc;

use elliptics_proto::command::status;
use elliptics_proto::DataBuffer;
use tracing::trace;

use crate::entry::WriteEntry;
use crate::error::{op_context, Error};
use crate::key::Key;
use crate::result::AsyncResult;
use crate::session::{ExceptionsPolicy, ScopedPolicy, Session};

pub(crate) fn write_cas_with<F>(
    sess: &Session,
    key: &Key,
    converter: F,
    remote_offset: u64,
    retries: usize,
) -> AsyncResult<WriteEntry>
where
    F: Fn(&DataBuffer) -> DataBuffer + Send + Sync + 'static,
{
    let snap = sess.snapshot();
    let (result, handler) =
        AsyncResult::pair(snap.filter.clone(), snap.checker.clone(), snap.policy);
    let sess = sess.clone();
    let key = key.clone();
    let converter = Arc::new(converter);

    tokio::spawn(async move {
        for attempt in 0..retries.max(1) {
            let read = {
                let _scope = ScopedPolicy::new(&sess);
                sess.set_exceptions_policy(ExceptionsPolicy::NO_EXCEPTIONS);
                sess.read_latest(&key, remote_offset, 0)
            };
            read.wait_done().await;

            let current = match read.error() {
                // Absent objects read as empty; anything else is terminal.
                Some(e) if e.code() == status::ENOENT => DataBuffer::empty(),
                Some(e) => {
                    handler.complete(Err(e));
                    return;
                }
                None => read
                    .entries()
                    .first()
                    .map(|entry| entry.file())
                    .unwrap_or_default(),
            };

            let next = converter(&current);
            if next.same_region(&current) {
                // Converter kept the value; nothing to write.
                handler.complete(Ok(()));
                return;
            }

            let csum = sess.transform_data(current.as_slice());
            let write = {
                let _scope = ScopedPolicy::new(&sess);
                sess.set_exceptions_policy(ExceptionsPolicy::NO_EXCEPTIONS);
                sess.write_cas(&key, next, csum, remote_offset)
            };
            write.wait_done().await;

            match write.error() {
                Some(e) if e.code() == status::EINVAL => {
                    trace!(attempt, "cas checksum mismatch, retrying");
                    continue;
                }
                outcome => {
                    for entry in write.entries() {
                        handler.process(entry);
                    }
                    handler.complete(match outcome {
                        Some(e) => Err(e),
                        None => Ok(()),
                    });
                    return;
                }
            }
        }

        let context = match sess.resolve(&key) {
            Ok(id) => op_context(&id, format!("WRITE_CAS: retries exhausted: {}", retries)),
            Err(_) => format!("WRITE_CAS: retries exhausted: {}", retries),
        };
        handler.complete(Err(Error::ChecksumMismatch { context }));
    });
    result
}
