//! Freshness-ordered lookups and reads.
//!
//! `prepare_latest` fans lookups out across a group list and orders the
//! replies by a 3-level key: reply kind (file-info bearing, bare ack,
//! failure), then modification time descending, with the caller's preferred
//! group promoted to the front only when it ties with the best candidate.
//! `read_latest` turns that order into a fail-over read.

use std::cmp::Ordering;

use tracing::debug;

use crate::entry::{Entry, LookupEntry, ReadEntry};
use crate::key::Key;
use crate::predicate::{Checker, Filter};
use crate::result::{aggregate, AsyncResult};
use crate::session::{ExceptionsPolicy, ScopedPolicy, Session};

fn rank(entry: &LookupEntry) -> i32 {
    if entry.has_file_info() {
        return 0;
    }
    if entry.status() == 0 {
        return 1;
    }
    2
}

fn mtime(entry: &LookupEntry) -> (u64, u64) {
    entry
        .file_info()
        .map(|info| (info.mtime_sec, info.mtime_nsec))
        .unwrap_or((0, 0))
}

/// Freshest-first ordering: file-info replies before bare acks before
/// failures, newest mtime first within the file-info class.
fn compare(a: &LookupEntry, b: &LookupEntry) -> Ordering {
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    if ra == 0 {
        return mtime(b).cmp(&mtime(a));
    }
    Ordering::Equal
}

pub(crate) fn prepare_latest(
    sess: &Session,
    key: &Key,
    groups: &[u32],
) -> AsyncResult<LookupEntry> {
    let snap = sess.snapshot();
    let (result, handler) =
        AsyncResult::pair(snap.filter.clone(), snap.checker.clone(), snap.policy);
    if groups.is_empty() {
        handler.complete(Ok(()));
        return result;
    }
    let id = match sess.resolve(key) {
        Ok(id) => id,
        Err(e) => {
            handler.complete(Err(e));
            return result;
        }
    };
    let preferred = id.group;

    // Predicates and policy are overridden only for the fan-out itself; the
    // aggregated request runs under the caller's settings.
    let lookups: Vec<AsyncResult<LookupEntry>> = {
        let _scope = ScopedPolicy::new(sess);
        sess.set_filter(Filter::all_with_ack());
        sess.set_checker(Checker::no_check());
        sess.set_exceptions_policy(ExceptionsPolicy::NO_EXCEPTIONS);
        groups
            .iter()
            .map(|group| sess.lookup(&Key::from_id(id.with_group(*group))))
            .collect()
    };

    let joined = aggregate(
        &Filter::all_with_ack(),
        &Checker::no_check(),
        ExceptionsPolicy::NO_EXCEPTIONS,
        lookups,
    );
    joined.connect_final(move |entries, terminal| {
        let mut ordered = entries.to_vec();
        ordered.sort_by(compare);

        // Prefer the caller's group, but only when it carries the same
        // freshness as the current best candidate.
        for i in 1..ordered.len() {
            if ordered[i].command().id.group == preferred {
                if compare(&ordered[i], &ordered[0]) == Ordering::Equal {
                    ordered.swap(0, i);
                }
                break;
            }
        }

        for entry in ordered {
            handler.process(entry);
        }
        handler.complete(terminal.clone());
    });
    result
}

pub(crate) fn read_latest(
    sess: &Session,
    key: &Key,
    offset: u64,
    size: u64,
) -> AsyncResult<ReadEntry> {
    let snap = sess.snapshot();
    let (result, handler) =
        AsyncResult::pair(snap.filter.clone(), snap.checker.clone(), snap.policy);
    let initial_groups = match sess.mix_states_for(key) {
        Ok(groups) => groups,
        Err(e) => {
            handler.complete(Err(e));
            return result;
        }
    };

    let prepared = {
        let _scope = ScopedPolicy::new(sess);
        sess.set_filter(Filter::positive());
        sess.set_checker(Checker::no_check());
        sess.prepare_latest(key, &initial_groups)
    };

    let sess = sess.clone();
    let key = key.clone();
    prepared.connect_final(move |entries, terminal| {
        let groups: Vec<u32> = if terminal.is_ok() && !entries.is_empty() {
            entries.iter().map(|e| e.command().id.group).collect()
        } else {
            initial_groups.clone()
        };
        debug!(?groups, "read_latest group preference");

        let read = {
            let _scope = ScopedPolicy::new(&sess);
            sess.set_exceptions_policy(ExceptionsPolicy::NO_EXCEPTIONS);
            sess.read_data(&key, groups, offset, size)
        };
        let forward = handler.clone();
        let finish = handler.clone();
        read.connect(
            move |entry: &ReadEntry| forward.process(entry.clone()),
            move |_, terminal| finish.complete(terminal.clone()),
        );
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ReplyData;
    use elliptics_proto::{
        Command, CommandHeader, DataBuffer, DnetId, FileInfo, RawId,
    };

    fn lookup_entry(group: u32, mtime: Option<(u64, u64)>, status: i32) -> LookupEntry {
        let header =
            CommandHeader::new(DnetId::new(RawId::ZERO, group), Command::Lookup).with_status(status);
        let payload = match mtime {
            Some((sec, nsec)) => DataBuffer::from_vec(
                FileInfo {
                    mtime_sec: sec,
                    mtime_nsec: nsec,
                    size: 1,
                    checksum: RawId::ZERO,
                    path: "/blob".into(),
                }
                .encode(),
            ),
            None => DataBuffer::empty(),
        };
        LookupEntry::from(ReplyData::new(
            header,
            "127.0.0.1:1025".parse().unwrap(),
            payload,
        ))
    }

    #[test]
    fn test_compare_ranks_kinds() {
        let info = lookup_entry(1, Some((10, 0)), 0);
        let ack = lookup_entry(2, None, 0);
        let failure = lookup_entry(3, None, -2);
        assert_eq!(compare(&info, &ack), Ordering::Less);
        assert_eq!(compare(&ack, &failure), Ordering::Less);
        assert_eq!(compare(&failure, &info), Ordering::Greater);
    }

    #[test]
    fn test_compare_orders_mtime_descending() {
        let older = lookup_entry(1, Some((100, 0)), 0);
        let newer = lookup_entry(2, Some((100, 500)), 0);
        assert_eq!(compare(&newer, &older), Ordering::Less);
        let mut entries = vec![older, newer];
        entries.sort_by(compare);
        assert_eq!(entries[0].command().id.group, 2);
    }

    #[test]
    fn test_compare_equal_on_tied_mtime() {
        let a = lookup_entry(1, Some((100, 7)), 0);
        let b = lookup_entry(2, Some((100, 7)), 0);
        assert_eq!(compare(&a, &b), Ordering::Equal);
    }
}
