//! qmk-hermit - build QMK firmware from out-of-tree keyboards and layouts.
//!
//! Out-of-tree sources are staged as symlinks into a private mirror of a QMK
//! checkout, the keyboard's `rules.mk` cascade is read the way make reads it,
//! and make is run inside the mirror. The user's QMK install is never written
//! to.

pub mod artifact;
pub mod config;
pub mod error;
pub mod identity;
pub mod layout;
pub mod pipeline;
pub mod rules;
pub mod runner;
pub mod signal;
pub mod source;
pub mod staging;
pub mod target;

pub use error::HermitError;
pub use identity::PathIdentity;
pub use pipeline::{BuildPlan, BuildReport, BuildRequest, Pipeline};
pub use target::FlashIntent;
