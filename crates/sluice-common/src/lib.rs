//! Sluice Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the Sluice workspace members.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Logging**: tracing subscriber bootstrap driven by `LOG_*` variables
//! - **Time**: watermark formats, detection and epoch/string conversion
//!
//! # Example
//!
//! ```no_run
//! use sluice_common::time::{self, TimeFormat};
//!
//! fn cutoff() -> sluice_common::Result<String> {
//!     let now = time::now_epoch();
//!     time::epoch_to_string(time::offset_epoch(now, -5)?, TimeFormat::DateTime)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod time;

pub use error::{CommonError, Result};
