//! # docmirror
//!
//! Keeps a local catalog and chunk index in step with external knowledge
//! sources: Confluence wikis, Jira projects, Bitbucket repositories, local
//! directories and JSON exports.
//!
//! The sync pipeline itself (reconciliation, chunking policies, the sync
//! engine, webhook mapping) lives in `docmirror-core`. This crate provides
//! the concrete connectors, SQLite persistence, the scheduler and the
//! `mirror` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Connectors  │──▶│  SyncEngine  │──▶│    SQLite     │
//! │ wiki/issues/ │   │ reconcile +  │   │ catalog, runs │
//! │ repos/fs     │   │ chunk        │   │ chunks + FTS5 │
//! └──────────────┘   └──────▲───────┘   └───────────────┘
//!                           │
//!        ┌──────────────────┼──────────────────┐
//!        │                  │                  │
//!  ┌───────────┐     ┌────────────┐     ┌───────────┐
//!  │ mirror    │     │ Scheduler  │     │ Webhooks  │
//!  │ sync      │     │ (poll)     │     │ (events)  │
//!  └───────────┘     └────────────┘     └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mirror init                   # create database
//! mirror sources                # list configured sources
//! mirror sync all               # sync every source once
//! mirror schedule               # keep syncing on schedule
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection and timestamp encoding |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite catalog store and sync ledger |
//! | [`index`] | SQLite chunk index |
//! | [`http`] | Shared HTTP client for remote connectors |
//! | [`connector_fs`] | Filesystem connector |
//! | [`connector_json`] | JSON export connector |
//! | [`connector_confluence`] | Confluence connector |
//! | [`connector_jira`] | Jira connector |
//! | [`connector_bitbucket`] | Bitbucket connector |
//! | [`sources`] | Builds sources from config |
//! | [`app`] | Wiring of store, engine and sources |
//! | [`scheduler`] | Background sync loop |
//! | [`webhook`] | Webhook verification and dispatch |
//! | [`sync_cmd`] | CLI command implementations |

pub mod app;
pub mod config;
pub mod connector_bitbucket;
pub mod connector_confluence;
pub mod connector_fs;
pub mod connector_jira;
pub mod connector_json;
pub mod db;
pub mod http;
pub mod index;
pub mod logging;
pub mod migrate;
pub mod scheduler;
pub mod sources;
pub mod sqlite_store;
pub mod sync_cmd;
pub mod webhook;
