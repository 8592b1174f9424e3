//! Pluggable reply predicates.
//!
//! A [`Filter`] decides per entry whether the user sees it; a [`Checker`]
//! decides once, at terminal time, whether the aggregate operation
//! succeeded. Both are cheap clonable handles so a session snapshot can
//! carry them into spawned operation tasks.

use std::fmt;
use std::sync::Arc;

use elliptics_proto::CommandHeader;

use crate::entry::ReplyData;

type FilterFn = dyn Fn(&ReplyData) -> bool + Send + Sync;
type CheckerFn = dyn Fn(&[CommandHeader], usize) -> bool + Send + Sync;

/// Per-entry visibility predicate.
#[derive(Clone)]
pub struct Filter {
    name: &'static str,
    f: Arc<FilterFn>,
}

impl Filter {
    /// Status 0 and a non-empty payload.
    pub fn positive() -> Filter {
        Filter {
            name: "positive",
            f: Arc::new(|e| e.status() == 0 && !e.payload.is_empty()),
        }
    }

    /// Any non-zero status.
    pub fn negative() -> Filter {
        Filter {
            name: "negative",
            f: Arc::new(|e| e.status() != 0),
        }
    }

    /// Any entry with a payload, regardless of status.
    pub fn all() -> Filter {
        Filter {
            name: "all",
            f: Arc::new(|e| !e.payload.is_empty()),
        }
    }

    /// Every entry, acknowledgements included.
    pub fn all_with_ack() -> Filter {
        Filter {
            name: "all_with_ack",
            f: Arc::new(|_| true),
        }
    }

    pub fn custom<F>(f: F) -> Filter
    where
        F: Fn(&ReplyData) -> bool + Send + Sync + 'static,
    {
        Filter {
            name: "custom",
            f: Arc::new(f),
        }
    }

    pub fn check(&self, entry: &ReplyData) -> bool {
        (self.f)(entry)
    }
}

impl Default for Filter {
    fn default() -> Filter {
        Filter::positive()
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.name)
    }
}

/// Terminal aggregate predicate over the accounted command headers.
#[derive(Clone)]
pub struct Checker {
    name: &'static str,
    f: Arc<CheckerFn>,
}

impl Checker {
    /// Always passes.
    pub fn no_check() -> Checker {
        Checker {
            name: "no_check",
            f: Arc::new(|_, _| true),
        }
    }

    /// At least one header with status 0.
    pub fn at_least_one() -> Checker {
        Checker {
            name: "at_least_one",
            f: Arc::new(|headers, _| headers.iter().any(|h| h.status == 0)),
        }
    }

    /// Every header has status 0 and every expected reply arrived.
    pub fn all() -> Checker {
        Checker {
            name: "all",
            f: Arc::new(|headers, total| {
                let success = headers.iter().filter(|h| h.status == 0).count();
                success == total
            }),
        }
    }

    /// Strict majority of the expected total succeeded.
    pub fn quorum() -> Checker {
        Checker {
            name: "quorum",
            f: Arc::new(|headers, total| {
                let success = headers.iter().filter(|h| h.status == 0).count();
                success > total / 2
            }),
        }
    }

    pub fn custom<F>(f: F) -> Checker
    where
        F: Fn(&[CommandHeader], usize) -> bool + Send + Sync + 'static,
    {
        Checker {
            name: "custom",
            f: Arc::new(f),
        }
    }

    pub fn check(&self, headers: &[CommandHeader], total: usize) -> bool {
        (self.f)(headers, total)
    }
}

impl Default for Checker {
    fn default() -> Checker {
        Checker::at_least_one()
    }
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checker({})", self.name)
    }
}
