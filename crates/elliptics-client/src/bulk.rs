//! Bulk reads and writes.
//!
//! A bulk read collapses many keys into one sorted, deduplicated io-attr
//! set and issues a single bulk transaction per target state; the replies
//! multiplex into one stream. A bulk write is N independent writes run
//! under a scoped ack-everything/no-check policy and joined by the
//! aggregator.

use std::net::SocketAddr;
use std::sync::Arc;

use elliptics_proto::command::cflags;
use elliptics_proto::{Command, DataBuffer, DnetId, IoAttr, TransactionControl};

use crate::callback::drive_one;
use crate::entry::{ReadEntry, WriteEntry};
use crate::error::{op_context, Error, Result};
use crate::predicate::{Checker, Filter};
use crate::result::{aggregate, AsyncResult};
use crate::session::{ExceptionsPolicy, ScopedPolicy, Session};

pub(crate) fn bulk_read(sess: &Session, ios: Vec<IoAttr>) -> Result<AsyncResult<ReadEntry>> {
    let snap = sess.snapshot();
    if ios.is_empty() {
        return Session::start_failure(
            &snap,
            Error::invalid_argument("bulk_read failed: ios list is empty"),
        );
    }

    // One sorted, deduplicated set keyed by raw id.
    let mut ios = ios;
    ios.sort_by(|a, b| a.id.cmp(&b.id));
    ios.dedup_by(|a, b| a.id == b.id);

    let groups = sess.mix_states();
    let group = match groups.first() {
        Some(group) => *group,
        None => {
            let id = DnetId::new(ios[0].id, 0);
            return Session::start_failure(
                &snap,
                Error::ExhaustedGroups {
                    context: op_context(&id, "BULK_READ"),
                },
            );
        }
    };

    // Partition by the state serving each id within the chosen group.
    let mut per_state: Vec<(SocketAddr, Vec<IoAttr>)> = Vec::new();
    for io in ios {
        let addr = match sess.transport().route(&DnetId::new(io.id, group)) {
            Ok(addr) => addr,
            Err(e) => return Session::start_failure(&snap, e),
        };
        match per_state.iter_mut().find(|(a, _)| *a == addr) {
            Some((_, batch)) => batch.push(io),
            None => per_state.push((addr, vec![io])),
        }
    }

    let context = op_context(&DnetId::new(per_state[0].1[0].id, group), "BULK_READ");
    let (result, sender) = AsyncResult::pair(snap.filter.clone(), snap.checker.clone(), snap.policy);
    let transport = Arc::clone(sess.transport());

    tokio::spawn(async move {
        let total = per_state.len();
        let mut handles = Vec::with_capacity(total);
        for (addr, batch) in per_state {
            let mut payload = Vec::with_capacity(batch.len() * IoAttr::WIRE_SIZE);
            for io in batch.iter() {
                payload.extend_from_slice(&io.encode());
            }
            let ctl = TransactionControl::new(DnetId::new(batch[0].id, group), Command::BulkRead)
                .with_cflags(cflags::NEED_ACK | snap.cflags)
                .with_payload(DataBuffer::from_vec(payload))
                .with_direct(addr);

            let transport = Arc::clone(&transport);
            let snap = snap.clone();
            let sender = sender.clone();
            handles.push(tokio::spawn(async move {
                drive_one(&transport, &snap, &sender, ctl).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        sender.finalize(total, &context);
    });
    Ok(result)
}

pub(crate) fn bulk_write(
    sess: &Session,
    ios: Vec<IoAttr>,
    data: Vec<DataBuffer>,
) -> Result<AsyncResult<WriteEntry>> {
    let snap = sess.snapshot();
    if ios.len() != data.len() {
        return Session::start_failure(
            &snap,
            Error::invalid_argument(format!(
                "BULK_WRITE: ios doesn't match data: io.size: {}, data.size: {}",
                ios.len(),
                data.len()
            )),
        );
    }

    // Predicates apply to the aggregated request only; the per-key writes
    // run wide open.
    let writes: Vec<AsyncResult<WriteEntry>> = {
        let _scope = ScopedPolicy::new(sess);
        sess.set_filter(Filter::all_with_ack());
        sess.set_checker(Checker::no_check());
        sess.set_exceptions_policy(ExceptionsPolicy::NO_EXCEPTIONS);

        ios.into_iter()
            .zip(data)
            .map(|(io, payload)| {
                let id = DnetId::new(io.id, 0).with_type(io.type_tag);
                sess.write_ctl(
                    TransactionControl::new(id, Command::Write)
                        .with_cflags(snap.cflags)
                        .with_io(io)
                        .with_payload(payload),
                )
            })
            .collect()
    };

    Ok(aggregate(&snap.filter, &snap.checker, snap.policy, writes))
}
