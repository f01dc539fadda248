use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::parser::{parse_file_stem, parse_identifier, Identifier};

/// Image extensions the loaders accept, in probe preference order.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Finds the best file in `directory` for `token`.
///
/// Strategies run in order and the first hit wins:
/// 1. identifier match against every listed image stem (shortest name wins),
/// 2. `directory/token` as an exact file name,
/// 3. `directory/token.{ext}` for each supported extension,
/// 4. raw prefix scan, only when `token` is not an identifier.
///
/// Missing or unreadable directories resolve to `None`.
pub fn resolve(directory: &Path, token: &str) -> Option<PathBuf> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if !directory.is_dir() {
        debug!(directory = %directory.display(), "resolve: directory missing");
        return None;
    }

    let identifier = parse_identifier(token);
    if let Some(identifier) = &identifier {
        if let Some(path) = match_identifier(directory, identifier) {
            debug!(token, path = %path.display(), "resolve: identifier match");
            return Some(path);
        }
    }

    let direct = directory.join(token);
    if direct.is_file() {
        debug!(token, path = %direct.display(), "resolve: direct match");
        return Some(direct);
    }

    if let Some(path) = probe_extensions(directory, token) {
        debug!(token, path = %path.display(), "resolve: extension probe");
        return Some(path);
    }

    if identifier.is_none() {
        return scan_prefix(directory, token);
    }
    None
}

/// Probes `{prefix}{index}.{ext}` and then the two-digit padded
/// `{prefix}{index:02}.{ext}` across every supported extension.
pub fn resolve_indexed(directory: &Path, prefix: &str, index: u32) -> Option<PathBuf> {
    let plain = format!("{prefix}{index}");
    let padded = format!("{prefix}{index:02}");
    let mut names = vec![plain];
    if padded != names[0] {
        names.push(padded);
    }
    names
        .iter()
        .find_map(|name| probe_extensions(directory, name))
}

fn probe_extensions(directory: &Path, name: &str) -> Option<PathBuf> {
    SUPPORTED_EXTENSIONS
        .iter()
        .map(|ext| directory.join(format!("{name}.{ext}")))
        .find(|candidate| candidate.is_file())
}

fn match_identifier(directory: &Path, identifier: &Identifier) -> Option<PathBuf> {
    let names = match sorted_file_names(directory) {
        Ok(names) => names,
        Err(err) => {
            warn!(directory = %directory.display(), error = %err, "failed to list directory");
            return None;
        }
    };

    names
        .into_iter()
        .filter(|name| has_supported_extension(Path::new(name)))
        .filter(|name| {
            Path::new(name)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(parse_file_stem)
                .as_ref()
                == Some(identifier)
        })
        .filter(|name| directory.join(name).is_file())
        .min_by_key(|name| name.chars().count())
        .map(|name| directory.join(name))
}

fn scan_prefix(directory: &Path, token: &str) -> Option<PathBuf> {
    let names = match sorted_file_names(directory) {
        Ok(names) => names,
        Err(err) => {
            warn!(directory = %directory.display(), error = %err, "failed to list directory");
            return None;
        }
    };
    let found = names
        .into_iter()
        .filter(|name| name.starts_with(token) && has_supported_extension(Path::new(name)))
        .map(|name| directory.join(name))
        .find(|path| path.is_file());
    if let Some(path) = &found {
        debug!(token, path = %path.display(), "resolve: prefix scan");
    }
    found
}

// Names that are not valid UTF-8 can never match a token and are skipped.
fn sorted_file_names(directory: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(directory)? {
        let Ok(entry) = entry else {
            continue;
        };
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
