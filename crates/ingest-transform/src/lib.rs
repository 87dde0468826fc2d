//! Transform invoker.
//!
//! This crate provides:
//! - The `Transform` trait: turn a local input file into a local output file
//! - A command builder for the external transform program
//! - A runner that captures exit status and diagnostic output, with timeout

pub mod command;
pub mod error;
pub mod external;

pub use command::{check_program, TransformCommand, TransformReport, TransformRunner};
pub use error::{TransformError, TransformResult};
pub use external::{ExternalTransform, Transform, TransformConfig};
