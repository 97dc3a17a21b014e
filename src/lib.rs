//! # fostree — Concurrent In-Memory Foster B-tree
//!
//! An ordered map from keys to values supporting point insertion, lookup,
//! removal, and single-node iteration, safe under concurrent readers and
//! writers without external locking.
//!
//! ## What Makes It a *Foster* B-tree
//!
//! A classic B-tree split must update two levels at once: the overflowing
//! node and its parent. Here a full node instead links a temporary
//! sibling (its *foster child*), moves half its records over, and keeps
//! serving requests; the parent absorbs the sibling as a regular child on
//! a later traversal (*adoption*). Every structural change therefore
//! touches one node at a time, which is what makes fine-grained latching
//! practical.
//!
//! ```text
//!        [branch]                  [branch]                  [branch']
//!           |          split          |          adoption     /    \
//!        [leaf]       ----->       [leaf]→[foster]  ----->  [leaf][child]
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Tree (traversal, put/get/remove)         │  tree
//! ├──────────────────────────────────────────┤
//! │ Adoption │ Foster protocol │ NodeManager │  tree::adoption, node
//! ├──────────────────────────────────────────┤
//! │ Node ops (insert/find/remove/move)       │  node::ops
//! ├──────────────────────────────────────────┤
//! │ Key/value codecs + PMNK extraction       │  encoding
//! ├──────────────────────────────────────────┤
//! │ Slotted page + PMNK binary search        │  page
//! └──────────────────────────────────────────┘
//!     Latch (one per page)                      latch
//! ```
//!
//! Each node is one fixed-size slotted page: a slot vector carrying
//! 2-byte key prefixes (poor man's normalized keys) grows from one end,
//! variable-length payloads from the other, and the fence/foster metadata
//! stays pinned at the payload top. Traversal descends with latch
//! coupling: child latched before parent released, sibling before
//! current, at most two latches held at any instant.
//!
//! ## Quick Start
//!
//! ```
//! use fostree::Tree;
//!
//! let tree: Tree<String, String> = Tree::new();
//! tree.put("vostok".into(), "1961".into(), false)?;
//! tree.put("mercury".into(), "1962".into(), false)?;
//!
//! assert_eq!(tree.get(&"vostok".to_string()), Some("1961".to_string()));
//! assert!(tree.remove(&"mercury".to_string()));
//! # Ok::<(), fostree::Error>(())
//! ```
//!
//! ## Scope
//!
//! Purely in-memory: no durability, recovery, or buffer pool. A logging
//! hook ([`TreeLogger`]) reports every operation a write-ahead log would
//! need; its default implementation discards them. Pages are never freed
//! and underfull siblings are not merged.

pub mod config;
pub mod encoding;
pub mod error;
pub mod latch;
pub mod logging;
pub mod node;
pub mod page;
pub mod tree;

pub use encoding::{KeyCodec, ValueCodec};
pub use error::{Error, Result};
pub use latch::Latch;
pub use logging::{LogKind, NoopLogger, TracingLogger, TreeLogger};
pub use node::{NodeManager, PageId};
pub use tree::Tree;
