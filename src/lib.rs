//! # Context Daemon
//!
//! A per-project background service that answers "what is relevant right
//! now?" by aggregating the project's work logs, documentation, code
//! annotations and memory notes, and ranking them against a query with
//! TF-IDF.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  spawn / signals   ┌──────────────────────────────┐
//! │  Supervisor  │───────────────────▶│         HTTP gateway         │
//! │ (ctxd start) │◀──── /health ──────│  auth gate ─▶ aggregate+rank │
//! └──────┬───────┘                    └──────────────┬───────────────┘
//!        │ pid / token / log                         │ fresh read per request
//!        ▼                                           ▼
//!   <root>/.ctxd/                     logs · docs · code · memory
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctxd start                    # spawn the daemon for the current project
//! ctxd status
//! curl -H "Authorization: Bearer $(cat .ctxd/daemon.token)" \
//!      -d '{"query":"deploy"}' http://127.0.0.1:4242/api/context
//! ctxd stop
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | `SourceReader` trait and reader registry |
//! | [`reader_log`] | Work-log reader |
//! | [`reader_docs`] | Documentation reader |
//! | [`reader_code`] | Code annotation reader |
//! | [`reader_memory`] | Memory note reader |
//! | [`context`] | Aggregation across readers |
//! | [`ranking`] | TF-IDF relevance ranking |
//! | [`auth`] | Bearer token gate |
//! | [`state`] | PID, token and log file locations |
//! | [`process`] | OS process and port plumbing |
//! | [`supervisor`] | Daemon lifecycle |
//! | [`server`] | HTTP gateway |
//! | [`search`] | One-shot local search |

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod process;
pub mod ranking;
pub mod reader_code;
pub mod reader_docs;
pub mod reader_log;
pub mod reader_memory;
pub mod scan;
pub mod search;
pub mod server;
pub mod state;
pub mod supervisor;
pub mod traits;
