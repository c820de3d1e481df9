// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tangle Relay — Core Library
//!
//! A relay sits between light clients and a ledger node. Clients hand it
//! tryte-encoded transactions; the relay does the proof of work they cannot
//! afford, attaches the bundle to the tangle and broadcasts it. The client
//! gets an answer within a fixed deadline whether or not the node has
//! finished, because nobody should stare at a spinner while a phone-grade CPU
//! grinds through Curl.
//!
//! ## Architecture
//!
//! - **ternary** — Trits, trytes and the Curl-P-81 sponge. Base 3, for real.
//! - **pow** — Nonce search in three flavours, fastest one picked per host.
//! - **ledger** — Transaction codec, local attach and the node HTTP client.
//! - **dispatch** — The deadline-bounded broadcast dispatcher. The point of
//!   the whole crate.
//! - **report** — Out-of-band error reports for work that outlives its request.
//! - **stats** — Host CPU, load and memory from procfs.
//! - **config** — Wire layout constants and the resolved runtime config.
//!
//! ## Ground Rules
//!
//! 1. A batch decodes completely or not at all.
//! 2. A submission, once started, is never cancelled and never retried.
//! 3. Every background failure is reported exactly once.

pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod pow;
pub mod report;
pub mod stats;
pub mod ternary;
