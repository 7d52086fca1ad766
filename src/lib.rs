//! ringfence: robocall screening for analog phone lines
//!
//! This crate watches a Hayes-compatible voice modem attached to a serial
//! port, reconstructs each ringing call from the caller-ID traffic, and
//! classifies it against a set of concurrently raced filters. Blocked calls
//! are answered and immediately hung up before the handset rings a second
//! time; every screened call is appended to a durable journal that a small
//! HTTP endpoint exposes for observers.
//!
//! # Architecture
//!
//! - **Modem**: owns the serial port; serializes command transactions and
//!   demultiplexes unsolicited RING/NMBR/NAME traffic into [`call::Call`]s
//! - **Filters**: allow-class filters race first, then block-class; the
//!   first match wins and the losers are cancelled
//! - **Screener**: per-call classify, block, journal pipeline
//! - **Journal**: append-only CSV call log with change notification
//! - **Web**: `/calls` JSON endpoint over the journal
//!
//! # Safety Model
//!
//! Screening is fail-open: any failure on the classification path leaves the
//! phone ringing. Only an explicit block verdict ever answers the line.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod call;
pub mod cli;
pub mod config;
pub mod filter;
pub mod journal;
pub mod modem;
pub mod screen;
pub mod web;
