//! # docmirror core
//!
//! Runtime-agnostic logic for docmirror: data models, content hashing,
//! chunking policies, catalog reconciliation, store/connector/indexer
//! abstractions, the sync engine, and webhook event mapping.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! connectors, the SQLite store, and the scheduler loop live in the
//! `docmirror` application crate and are handed to [`sync::SyncEngine`]
//! as trait objects.
//!
//! ```text
//! Connector ──▶ hash ──▶ catalog (diff + commit) ──▶ DocumentChange
//!                                                      │
//!                                      chunk ◀─────────┘
//!                                        │
//!                                        ▼
//!                                     Indexer
//! ```

pub mod catalog;
pub mod chunk;
pub mod connector;
pub mod error;
pub mod hash;
pub mod indexer;
pub mod models;
pub mod store;
pub mod sync;
pub mod webhook;
