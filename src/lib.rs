//! # restkit
//!
//! Backend toolkit for a REST service on PostgreSQL: a transactional
//! storage client with after-commit hooks, an in-process event dispatcher,
//! and a structured logger that redacts sensitive metadata.
//!
//! ## Architecture
//!
//! ```text
//! HTTP request
//!     │
//!     ├── Request scope (api/middleware): trace id, derived Client + Logger
//!     ├── REST Handlers (api/handlers)
//!     │
//!     ├── Client::with_tx (db/) ── commit ──► after-commit hooks
//!     │                                          │
//!     │                                          ▼
//!     ├── EventManager (events/) ── fan-out ──► handlers (audit, cache)
//!     │                                          │
//!     │                                          ▼ failures
//!     ├── AlertSink (alert)                   log + alert
//!     │
//!     └── Logger + Redactor (logging/) ── every query, error, event
//! ```

pub mod alert;
pub mod api;
pub mod app_state;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
