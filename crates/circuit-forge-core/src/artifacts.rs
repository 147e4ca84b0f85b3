//! Deterministic artifact locations for a circuit.
//!
//! Every path the pipeline reads or writes is derived here from the two
//! output roots and the circuit identity. The cache gate keys on these
//! paths, so nothing else may build them by hand.
//!
//! ## Layout
//!
//! ```text
//! {circuit_root}/{slug}/
//! ├── {name}.r1cs
//! ├── {name}.zkey
//! ├── {name}_zkey.log
//! ├── {name}_vkey.json
//! └── {name}_js/
//!     └── generate_inputs.js          # published copy
//!
//! {code_root}/{slug}/
//! ├── circuit/{name}.circom
//! ├── generate_inputs.js
//! └── generate_inputs_worker_bundled.js
//! ```

use std::path::{Path, PathBuf};

use crate::config::ForgeConfig;
use crate::identity::CircuitIdentity;

const INPUT_SCRIPT: &str = "generate_inputs.js";
const WORKER_SCRIPT: &str = "generate_inputs_worker_bundled.js";

/// All paths for one circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    circuit_dir: PathBuf,
    code_dir: PathBuf,
    name: String,
}

impl ArtifactLayout {
    pub fn new(config: &ForgeConfig, identity: &CircuitIdentity) -> Self {
        Self {
            circuit_dir: config.circuit_output_root.join(identity.slug()),
            code_dir: config.code_output_root.join(identity.slug()),
            name: identity.name().to_string(),
        }
    }

    /// Compiler output directory; the compile stage's cache key.
    pub fn circuit_dir(&self) -> &Path {
        &self.circuit_dir
    }

    pub fn r1cs(&self) -> PathBuf {
        self.circuit_dir.join(format!("{}.r1cs", self.name))
    }

    /// Witness-generator bundle emitted by the compiler.
    pub fn wasm_bundle_dir(&self) -> PathBuf {
        self.circuit_dir.join(format!("{}_js", self.name))
    }

    pub fn proving_key(&self) -> PathBuf {
        self.circuit_dir.join(format!("{}.zkey", self.name))
    }

    pub fn proving_key_log(&self) -> PathBuf {
        self.circuit_dir.join(format!("{}_zkey.log", self.name))
    }

    pub fn verification_key(&self) -> PathBuf {
        self.circuit_dir.join(format!("{}_vkey.json", self.name))
    }

    pub fn published_input_script(&self) -> PathBuf {
        self.wasm_bundle_dir().join(INPUT_SCRIPT)
    }

    pub fn circuit_source(&self) -> PathBuf {
        self.code_dir
            .join("circuit")
            .join(format!("{}.circom", self.name))
    }

    pub fn input_script_source(&self) -> PathBuf {
        self.code_dir.join(INPUT_SCRIPT)
    }

    /// Bundled worker script served by the publication endpoint.
    pub fn worker_script(&self) -> PathBuf {
        self.code_dir.join(WORKER_SCRIPT)
    }
}
