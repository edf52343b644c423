//! benchcoin - benchmark identity, history and comparison
//!
//! Tracks repeated measurements of one long-running workload across machines,
//! revisions and configuration variants:
//! - [`matrix`] expands a declarative parameter matrix into named entries
//! - [`series`] normalizes machine and configuration metadata into a stable
//!   series key, label and chart color
//! - [`history`] is the append-only nightly store with deduplication and
//!   latest-for-series lookup
//! - [`compare`] computes speedups against history or a sibling baseline

#![forbid(unsafe_code)]
#![cfg_attr(
    test,
    allow(
        clippy::float_cmp,
        clippy::uninlined_format_args,
        clippy::missing_const_for_fn
    )
)]
#![allow(
    clippy::must_use_candidate,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss
)]

pub mod attributes;
pub mod benchmark_config;
pub mod cli;
pub mod compare;
pub mod config;
pub mod error;
pub mod harness;
pub mod history;
pub mod machine;
pub mod matrix;
pub mod series;

pub use error::{Error, Result};
