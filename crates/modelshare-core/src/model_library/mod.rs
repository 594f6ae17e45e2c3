//! Model Library - the central store and the flows into and out of it.
//!
//! ```text
//! CentralRegistry (records, JSON persistence)
//!     │
//!     ├── ModelImporter  - promote discovered models into the store
//!     │
//!     └── ModelInstaller - link/copy/create records into runtimes
//! ```

mod importer;
mod installer;
mod naming;
mod registry;
mod types;

pub use importer::{import_filename, ModelImporter};
pub use installer::ModelInstaller;
pub use naming::{
    derive_ollama_name, extract_parameters, extract_quantization, normalize_filename,
    normalize_name,
};
pub use registry::CentralRegistry;
pub use types::*;
