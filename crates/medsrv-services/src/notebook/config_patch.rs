//! Idempotent edits to `jupyter_notebook_config.py`.

use std::io;
use std::path::Path;

use tracing::info;

/// Lines the notebook config must contain so the desktop app can embed
/// the server without a token.
pub const REQUIRED_DIRECTIVES: [&str; 2] = [
    "c.ServerApp.allow_unauthenticated_access = True",
    "c.NotebookApp.tornado_settings={'headers': {'Content-Security-Policy': \"frame-ancestors 'self' http://localhost:8888;\"}}",
];

/// `existing` with every missing directive appended, or `None` if nothing is missing.
///
/// Presence is checked against the whole file, so a patched file patches to itself.
pub fn patch_config_text(existing: &str) -> Option<String> {
    let missing: Vec<&str> = REQUIRED_DIRECTIVES
        .iter()
        .copied()
        .filter(|directive| !existing.contains(directive))
        .collect();

    if missing.is_empty() {
        return None;
    }

    let mut patched = existing.to_string();
    if !patched.is_empty() && !patched.ends_with('\n') {
        patched.push('\n');
    }
    for directive in missing {
        patched.push_str(directive);
        patched.push('\n');
    }
    Some(patched)
}

/// Patch the file at `path` in place; returns whether it changed
pub fn apply_config_patch(path: &Path) -> io::Result<bool> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    match patch_config_text(&existing) {
        Some(patched) => {
            std::fs::write(path, patched)?;
            info!(path = %path.display(), "Patched notebook config");
            Ok(true)
        }
        None => Ok(false),
    }
}
