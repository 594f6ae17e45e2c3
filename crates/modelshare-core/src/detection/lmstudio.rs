//! Scanner for LM Studio's nested `publisher/model/file.gguf` tree.

use super::{DetectionResult, DiscoveredModel, ModelIntegrity};
use crate::config::{LmStudioLayout, OllamaLayout, RuntimeId};
use crate::model_library::{extract_parameters, extract_quantization};
use crate::model_library::ModelFormat;
use crate::storage::{EntryKind, StorageBackend};
use std::path::{Component, Path};
use tracing::debug;

fn has_weight_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(LmStudioLayout::WEIGHT_EXTENSION))
        .unwrap_or(false)
}

/// Descend into every directory except hidden ones and Ollama's blob store.
fn should_descend(dir: &Path) -> bool {
    match dir.file_name().map(|n| n.to_string_lossy()) {
        Some(name) => !name.starts_with('.') && name != OllamaLayout::BLOBS_DIR,
        None => true,
    }
}

/// `publisher/model` from the two directories above the file, else the
/// bare file name.
pub fn display_name(root: &Path, file: &Path) -> String {
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let dirs: Vec<String> = file
        .parent()
        .and_then(|p| p.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    if dirs.len() >= 2 {
        format!("{}/{}", dirs[dirs.len() - 2], dirs[dirs.len() - 1])
    } else {
        filename
    }
}

/// Scan an LM Studio storage root.
///
/// Files that resolve into `central_store` are already managed and left out.
pub fn scan(storage: &dyn StorageBackend, root: &Path, central_store: Option<&Path>) -> DetectionResult {
    let mut result = DetectionResult::new(RuntimeId::LmStudio, root);

    if !storage.is_dir(root) {
        return result;
    }
    result.exists = true;

    let central = central_store.and_then(|c| storage.canonicalize(c).ok());

    let entries = match storage.walk_files(root, &should_descend) {
        Ok(entries) => entries,
        Err(e) => {
            result.error = Some(format!("Failed to read {}: {}", root.display(), e));
            return result;
        }
    };

    for entry in entries {
        if entry.name.starts_with('.') || !has_weight_extension(&entry.path) {
            continue;
        }

        let is_link = entry.kind == EntryKind::Symlink;
        let canonical = match storage.canonicalize(&entry.path) {
            Ok(p) => p,
            Err(e) => {
                debug!("Skipping unresolvable {}: {}", entry.path.display(), e);
                continue;
            }
        };
        if let Some(central) = &central {
            if canonical.starts_with(central) {
                debug!("Skipping centrally managed {}", entry.path.display());
                continue;
            }
        }

        let meta = match storage.metadata(&entry.path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path.display(), e);
                continue;
            }
        };

        let name = display_name(root, &entry.path);
        result.models.push(DiscoveredModel {
            runtime: RuntimeId::LmStudio,
            quantization: extract_quantization(&entry.name),
            parameters: extract_parameters(&entry.name).or_else(|| extract_parameters(&name)),
            name,
            weight_path: entry.path.clone(),
            path: entry.path,
            size: meta.len,
            format: ModelFormat::Gguf,
            modified: meta.modified,
            is_link,
            digest: None,
            integrity: ModelIntegrity::Intact,
            blob_paths: Vec::new(),
            manifest: None,
        });
    }

    result.finish();
    debug!(
        "LM Studio scan of {} found {} models",
        root.display(),
        result.models.len()
    );
    result
}
