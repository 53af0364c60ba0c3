//! # Scribe Hub
//!
//! Knowledge base and shift schedule service for a medical scribe team.
//!
//! Scribe Hub stores a tree of rich-text pages (provider preferences,
//! procedures, smartphrases, scenarios, wiki articles) with fractional
//! sibling ordering, a trash, and full-text search. Next to it sits a shift
//! schedule kept in sync with an external scheduling system, a set of flat
//! reference lists, and landing-page banner messages. Everything lives in one
//! SQLite file and is served by a JSON HTTP API and a CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌─────────────┐   ┌────────────────┐
//! │ ScheduleSource │──▶│ shift_sync  │──▶│                │
//! │  HTTP / file   │   │ normalize + │   │     SQLite     │
//! └────────────────┘   │   upsert    │   │ pages + FTS5   │
//!                      └─────────────┘   │ shifts, users  │
//!                                        └───────┬────────┘
//!                      ┌─────────────────────────┤
//!                      ▼                         ▼
//!                ┌──────────┐             ┌──────────────┐
//!                │   CLI    │             │  HTTP (axum) │
//!                │ (scribe) │             │ session auth │
//!                └──────────┘             └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scribe init                                   # create database
//! scribe user add --email a@b.org --name Ana --role admin
//! scribe sync-shifts                            # pull the schedule
//! scribe search "chest pain"
//! scribe serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Shared data types |
//! | [`order_key`] | Fractional sibling keys |
//! | [`richtext`] | TipTap document handling |
//! | [`pages`] | Page tree, trash and restore |
//! | [`search`] | FTS5 page search |
//! | [`reference`] | Scribes, providers, physicians, terminology |
//! | [`messages`] | Animated banner messages |
//! | [`shifts`] | Shift store, board, duplicates |
//! | [`schedule_source`] | Where shift data comes from |
//! | [`shift_sync`] | Scrape and reconcile |
//! | [`auth`] | Users, sessions, route rules |
//! | [`server`] | JSON HTTP API |
//! | [`stats`] | Database overview |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod messages;
pub mod migrate;
pub mod models;
pub mod order_key;
pub mod pages;
pub mod reference;
pub mod richtext;
pub mod schedule_source;
pub mod search;
pub mod server;
pub mod shift_sync;
pub mod shifts;
pub mod slug;
pub mod stats;
