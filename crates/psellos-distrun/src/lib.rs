//! Psellos compiled dist-run importer
//!
//! Turns one compiled extraction run (`machine/`, `entities/`, optional
//! `indexes/`, `reports/` and narrative layer) into the deterministic artifact
//! set read by the API:
//! - canonical entities consolidated across per-type files,
//! - relationships extracted from arbitrarily nested documents, with duplicate
//!   ids resolved by an explainable score,
//! - narrative-layer rows folded into the same id space,
//! - derived layer/person indexes, a manifest, and content hashes.
//!
//! [`pipeline::run_import`] is the single entrypoint; every other module is a
//! pure stage it composes.

pub mod digest;
pub mod document;
pub mod entities;
pub mod error;
pub mod indexes;
pub mod layout;
pub mod narrative;
pub mod output;
pub mod pipeline;
pub mod relations;
pub mod report;
pub mod scoring;

pub use error::{ImportError, Result};
pub use pipeline::{build_import, run_import, ImportBuild, ImportOptions};
pub use report::{ConflictReport, RunMode, RunReport};
pub use scoring::ScoreWeights;
