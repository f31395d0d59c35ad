//! Card ledger core: payment intents, statement allocation and exactly-once
//! settlement over a SQLite ledger.
//!
//! Data flow:
//!   intent_service        validates, records Payment(PENDING)
//!   outcome_simulator ─┐
//!   webhook_receiver  ─┴► settlement_finalizer ─► allocation (pure)
//!                              │ commit
//!                              └► notification (best-effort)

pub mod allocation;
pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod intent_service;
pub mod model;
pub mod notification;
pub mod outcome_simulator;
pub mod rng;
pub mod settlement_finalizer;
pub mod store;
pub mod types;
pub mod webhook_receiver;
