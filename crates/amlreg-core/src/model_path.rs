//! Model file selection.
//!
//! A configured value with more than one path segment is an exact path. A
//! bare file name selects the first listed file whose last segment
//! *contains* it, so `model.pkl` also matches `best_model.pkl` (and, less
//! helpfully, `othermodel.pkl.bak`).

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::domain::{RegisterError, Result};

/// Directories never searched for local artifacts.
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Picks the model file to register.
pub struct ModelPathResolver;

impl ModelPathResolver {
    /// Whether `value` names a path rather than a bare file name.
    pub fn is_explicit_path(value: &str) -> bool {
        Path::new(value).components().count() > 1
    }

    /// Select the model file from a run's file listing.
    pub fn resolve<S: AsRef<str>>(file_name_or_path: &str, listing: &[S]) -> Result<String> {
        if Self::is_explicit_path(file_name_or_path) {
            debug!(path = %file_name_or_path, "Using explicit model path");
            return Ok(file_name_or_path.to_string());
        }

        listing
            .iter()
            .map(AsRef::as_ref)
            .find(|path| file_name(path).contains(file_name_or_path))
            .map(str::to_string)
            .ok_or_else(|| not_found(file_name_or_path))
    }

    /// Select the model file from the checkout at `root`.
    ///
    /// Explicit paths are taken relative to `root` without walking it.
    pub fn resolve_local(file_name_or_path: &str, root: &Path) -> Result<PathBuf> {
        if Self::is_explicit_path(file_name_or_path) {
            debug!(path = %file_name_or_path, "Using explicit local model path");
            return Ok(root.join(file_name_or_path));
        }

        let listing = Self::list_local_files(root)?;
        let relative = Self::resolve(file_name_or_path, &listing)?;
        Ok(root.join(relative))
    }

    /// All regular files below `root`, relative, `/`-separated, sorted.
    pub fn list_local_files(root: &Path) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                RegisterError::configuration(format!(
                    "could not list files below {}: {}",
                    root.display(),
                    e
                ))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let joined = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(joined);
        }

        debug!(root = %root.display(), count = files.len(), "Listed local files");
        Ok(files)
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn not_found(file_name: &str) -> RegisterError {
    RegisterError::configuration(format!(
        "could not find a model file matching '{}'; provide the correct model_file_name \
         and make sure the model was saved",
        file_name
    ))
}
