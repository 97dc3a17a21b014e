//! Logging hook for structural and record-level operations.
//!
//! The tree reports every state transition that a write-ahead log would
//! care about through the [`TreeLogger`] trait; the core never interprets
//! the records. The default implementation is a no-op, and
//! [`TracingLogger`] forwards events to the `tracing` ecosystem for
//! ad-hoc observability.

use std::fmt;

use crate::node::mgr::PageId;

/// Kind of a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Insert,
    Remove,
    Rebalance,
    Grow,
    Adopt,
}

/// Receives one record per logged operation.
///
/// `key` is the key the operation acted on, where one applies: the inserted
/// or removed key, the split key of a rebalance, or the separator of an
/// adoption. Growth carries no key.
pub trait TreeLogger: Send + Sync {
    fn log(&self, node: PageId, kind: LogKind, key: Option<&dyn fmt::Debug>);
}

/// Discards every record. The default for a freshly constructed tree.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl TreeLogger for NoopLogger {
    fn log(&self, _node: PageId, _kind: LogKind, _key: Option<&dyn fmt::Debug>) {}
}

/// Emits one `tracing` event at TRACE level per record.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl TreeLogger for TracingLogger {
    fn log(&self, node: PageId, kind: LogKind, key: Option<&dyn fmt::Debug>) {
        match key {
            Some(key) => tracing::trace!(node = %node, kind = ?kind, key = ?key, "tree op"),
            None => tracing::trace!(node = %node, kind = ?kind, "tree op"),
        }
    }
}

/// Logger handle plus the node an operation applies to. Threaded through
/// the node-level operations so they can report without knowing about the
/// tree.
#[derive(Clone, Copy)]
pub struct LogCtx<'a> {
    pub logger: &'a dyn TreeLogger,
    pub node: PageId,
}

impl<'a> LogCtx<'a> {
    pub fn new(logger: &'a dyn TreeLogger, node: PageId) -> Self {
        Self { logger, node }
    }

    pub fn log(&self, kind: LogKind, key: Option<&dyn fmt::Debug>) {
        self.logger.log(self.node, kind, key);
    }
}
