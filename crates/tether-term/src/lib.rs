#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Terminal output primitives for tether frontends.
//!
//! This crate isolates terminal rendering and spinners so libtether can remain
//! UI-agnostic. Use these helpers in CLI frontends.

/// Terminal output abstractions and implementations.
mod output;

pub use output::{Output, OutputError, Quiet, Spinner, Terminal};
