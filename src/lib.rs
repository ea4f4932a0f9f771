//! # MAG Player
//!
//! Upload, safely extract, catalog and play `.mag` narration packages.
//!
//! A `.mag` file is a zip archive with two top-level folders: `Depoimento/`
//! (the narration audio) and `Arquivos/` (attachments: markdown documents
//! and more audio). Each upload becomes a package: its entries are checked
//! against a policy, streamed to disk under size ceilings, classified, and
//! recorded in a SQLite catalog together with the references documents make
//! to other assets.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ validate │──▶│ extract  │──▶│ classify │──▶│ catalog  │──▶│   link   │
//! │ (policy) │   │ bounded  │   │ walkdir  │   │  SQLite  │   │  naive   │
//! └──────────┘   └──────────┘   └──────────┘   └────┬─────┘   └──────────┘
//!                                                   │
//!                                ┌──────────────────┤
//!                                ▼                  ▼
//!                           ┌──────────┐      ┌───────────┐
//!                           │   CLI    │      │   HTTP    │
//!                           │  (mag)   │      │ API + web │
//!                           └──────────┘      └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`policy`] | Allowed extensions, package folders, ceilings |
//! | [`validate`] | Archive inspection before anything is written |
//! | [`extract`] | Bounded extraction with rollback |
//! | [`classify`] | Audio / markdown inventory of a package |
//! | [`link`] | Document → asset reference detection |
//! | [`catalog`] | Packages, assets and references in SQLite |
//! | [`ingest`] | Upload pipeline |
//! | [`sweep`] | Retention sweeper for package directories |
//! | [`auth`] | Access-code login and tokens |
//! | [`server`] | HTTP API and static storage |
//! | [`player`] | HTML pages |
//! | [`search`], [`inspect`] | CLI catalog commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod inspect;
pub mod ingest;
pub mod link;
pub mod migrate;
pub mod models;
pub mod player;
pub mod policy;
pub mod search;
pub mod server;
pub mod sweep;
pub mod validate;
