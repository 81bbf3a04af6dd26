//! Helpers for the path-like names of triggers and shared scripts.
//!
//! Names look like `/lobby/buttons/on-click`. A shared script applies to a
//! trigger when the script sits directly inside one of the trigger's
//! ancestor directories (`/`, `/lobby`, `/lobby/buttons`).

/// Ancestor directories of a trigger path, shallowest first.
///
/// `/a/b/t` yields `["/", "/a", "/a/b"]`. A bare name with no leading slash
/// is treated as living in `/`.
pub fn ancestor_dirs(trigger_path: &str) -> Vec<String> {
    let segments: Vec<&str> = trigger_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let mut dirs = vec!["/".to_string()];
    let mut current = String::new();
    // The last segment is the trigger itself.
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(segment);
        dirs.push(current.clone());
    }
    dirs
}

/// Directory a path lives in: `/a/b/s` -> `/a/b`, `/s` -> `/`.
pub fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

/// Depth of a directory, `/` being 0.
pub fn depth(dir: &str) -> usize {
    dir.split('/').filter(|segment| !segment.is_empty()).count()
}
