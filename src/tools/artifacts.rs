//! Output file naming.

use std::path::{Path, PathBuf};

const MAX_STEM_CHARS: usize = 120;

const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Turn an item identity into a portable file stem.
pub fn sanitize_file_stem(identity: &str) -> String {
    let replaced: String = identity
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    let trimmed = collapsed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '.' || c == '_' || c == ' ')
        .to_string();

    let mut stem: String = trimmed.chars().take(MAX_STEM_CHARS).collect();
    stem = stem.trim_end().to_string();

    if stem.is_empty() {
        return "untitled".to_string();
    }
    if RESERVED_NAMES.contains(&stem.to_lowercase().as_str()) {
        stem.push('_');
    }
    stem
}

/// `<dir>/<stem><suffix>`, or the first free `<stem> (vN)<suffix>` from v2 up.
pub fn unique_artifact_path(dir: &Path, identity: &str, suffix: &str) -> PathBuf {
    let stem = sanitize_file_stem(identity);
    let first = dir.join(format!("{stem}{suffix}"));
    if !first.exists() {
        return first;
    }
    let mut version = 2u32;
    loop {
        let candidate = dir.join(format!("{stem} (v{version}){suffix}"));
        if !candidate.exists() {
            return candidate;
        }
        version += 1;
    }
}
