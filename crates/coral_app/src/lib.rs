// SPDX-License-Identifier: MIT OR Apache-2.0
//! coral application layer.
//!
//! Everything above the engine that a front end needs: settings, the
//! inspector field model, the `coralIO` file format and the
//! [`AppContext`](context::AppContext) tying them to an open network.

pub mod context;
pub mod coral_io;
pub mod error;
pub mod inspector;
pub mod settings;

pub use context::AppContext;
pub use error::{AppError, Result};
pub use settings::Settings;
