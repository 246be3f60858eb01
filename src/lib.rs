//! # todo - Personal Task Tracker
//!
//! A small task tracker with a query engine, collection statistics, a watched
//! local store and JSON/text export.
//!
//! ## Key Features
//!
//! - **Filtering and Search**: filter modes (all, active, completed, high, overdue),
//!   case-insensitive text search and any-of tag selection
//! - **Sorting**: by creation time, priority, due date or text
//! - **Statistics**: completion rate, priority and category breakdowns, overdue and due-today counts
//! - **Watched Storage**: every change is written through to `<data dir>/<key>.json`;
//!   other processes writing the same key are picked up, newest revision wins
//! - **Import/Export**: lossless JSON and a one-line-per-task text report
//!
//! ## Quick Start
//!
//! ```bash
//! todo add "Write report" --priority high --category work --due friday --tag q3
//! todo list --filter active --sort priority
//! todo stats
//! todo export --format text
//! ```
//!
//! ## Layout
//!
//! - [`task`], [`fields`]: the record and its enumerations
//! - [`query`], [`stats`]: pure read-side operations over a collection
//! - [`db`]: validation and collection edits
//! - [`storage`], [`persist`]: the key/value store port and the mirrored state on top of it
//! - [`codec`]: import/export documents
//! - [`config`], [`cli`], [`cmd`]: the command-line surface

pub mod cli;
pub mod clock;
pub mod cmd;
pub mod codec;
pub mod config;
pub mod db;
pub mod fields;
pub mod persist;
pub mod query;
pub mod stats;
pub mod storage;
pub mod task;
