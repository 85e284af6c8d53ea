use std::path::{Path, PathBuf};

/// Resolves the path of the program to launch.
///
/// A bare file name (e.g., `app.exe`) is looked up in the current directory
/// first, then in every directory of `PATH` (trying an `.exe` extension if
/// the name has none). Other paths are made absolute.
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    let is_bare_name = program
        .parent()
        .is_none_or(|parent| parent.as_os_str().is_empty());

    if !is_bare_name {
        return std::path::absolute(program).ok();
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();

    let search_dirs = std::env::current_dir()
        .into_iter()
        .chain(std::env::split_paths(&path_var));

    for dir in search_dirs {
        let candidate = dir.join(program);

        if candidate.is_file() {
            return Some(candidate);
        }

        if candidate.extension().is_none() {
            let candidate = candidate.with_extension("exe");

            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Returns whether the file at `path` is an executable PE image.
pub fn is_executable_image(path: &Path) -> bool {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "read image");
            return false;
        }
    };

    match goblin::pe::PE::parse(&bytes) {
        Ok(pe) => !pe.is_lib,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "parse image");
            false
        }
    }
}
