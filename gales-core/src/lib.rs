#![allow(dead_code)]

use std::convert::TryFrom;
use serde::{Deserialize, Serialize};

mod error;
mod fasta;
mod gff;
mod stats;
mod slim;
mod cache;
mod command;
mod pipeline;

pub use error::{GalesError, Result};
pub use fasta::{Assembly, FastaReader};
pub use gff::{Annotation, Feature, FeatureKey, FeatureKind, FeatureTree, Molecule, Strand};
pub use stats::{FastaStats, GffStats};
pub use slim::{go_term_counts, map_to_slim, GoTermCounts, SlimCounts, SlimMap, UNKNOWN_BUCKET};
pub use cache::{CacheGate, CacheStatus};
pub use command::ToolCommand;
pub use pipeline::{InputLayout, Pipeline, PipelineConfig, PipelineReport, Toolchain, TrackKind, TrackLayout};

/// The three GO namespaces a slim map is split into.
#[derive(Debug, Hash, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Namespace {
    #[serde(rename = "biological_process")]
    BiologicalProcess,
    #[serde(rename = "molecular_function")]
    MolecularFunction,
    #[serde(rename = "cellular_component")]
    CellularComponent,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [
        Namespace::BiologicalProcess,
        Namespace::MolecularFunction,
        Namespace::CellularComponent,
    ];

    /// The top-level ontology term of this namespace.
    pub fn root_term(self) -> &'static str {
        match self {
            Namespace::BiologicalProcess => "GO:0008150",
            Namespace::MolecularFunction => "GO:0003674",
            Namespace::CellularComponent => "GO:0005575",
        }
    }

    pub fn is_root_term(go_id: &str) -> bool {
        Namespace::ALL.iter().any(|ns| ns.root_term() == go_id)
    }
}

impl TryFrom<&str> for Namespace {
    type Error = ();

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        let namespace = match value {
            "P" | "biological_process" => Namespace::BiologicalProcess,
            "F" | "molecular_function" => Namespace::MolecularFunction,
            "C" | "cellular_component" => Namespace::CellularComponent,
            _ => return Err(()),
        };
        Ok(namespace)
    }
}

/// Rejects hosts the external track toolchain is not built for.
///
/// Runs before the pipeline touches the filesystem.
pub fn check_platform() -> Result<()> {
    match std::env::consts::OS {
        "linux" | "macos" => Ok(()),
        other => Err(GalesError::UnsupportedPlatform(other.to_string())),
    }
}
