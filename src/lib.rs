//! clearkey-cdm - Rust ClearKey Content Decryption Module.
//!
//! This crate provides:
//! - Session lifecycle management with exactly-once promise completion.
//! - A key store mapping key ids to per-session keys (latest insertion wins).
//! - AES-128-CTR sample decryption, full-sample and subsample-partitioned.
//! - JSON Web Key Set parsing/serialization and ClearKey license requests.
//! - Init data parsing for `cenc`, `keyids` and `webm` init data types.
//!
//! Feature flags:
//! - `tracing`: enable tracing macros (default).
//! - `cli`: enable the `clearkey` CLI binary.
#![allow(clippy::result_large_err)]

#[macro_use]
mod macros;

/// Encrypted and decrypted media buffers.
pub mod buffer;
/// Core ClearKey CDM implementation.
pub mod cdm;
/// AES-128-CTR decryption.
pub mod cipher;
/// CDM configuration.
pub mod config;
/// Common error types and Result alias.
pub mod error;
/// Init data parsing.
pub mod init_data;
/// JSON Web Key Set and license request formats.
pub mod jwk;
/// Decryption keys and the session key store.
pub mod key;
/// Pending promise bookkeeping.
pub mod promise;
/// CDM session container.
pub mod session;
/// Subsample partitioning of encrypted buffers.
pub mod subsample;

pub use cdm::{ClearKeyCdm, ClearKeyDecryptor, Decryptor, SessionEventHandler, SessionManager};
pub use error::{CdmException, Error, ExceptionKind, Result};
