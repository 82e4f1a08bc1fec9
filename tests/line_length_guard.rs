//! Must not be skipped: keeps individual source files from growing past the
//! point where they should be split. Grounded on the teacher's own
//! `tests/line_length_guard.rs`.

use std::fs;
use std::path::{Path, PathBuf};

const THRESHOLD: usize = 600;

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            collect_rs_files(&path, out)?;
        } else if metadata.is_file() && path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
    Ok(())
}

#[test]
fn source_files_should_not_exceed_threshold() {
    let crate_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let src_root = crate_root.join("src");
    assert!(src_root.exists(), "missing src directory at {src_root:?}");

    let mut files = Vec::new();
    collect_rs_files(&src_root, &mut files).expect("failed to walk src directory");

    let mut over_limit: Vec<(String, usize)> = files
        .into_iter()
        .filter_map(|path| {
            let content = fs::read_to_string(&path).ok()?;
            let lines = content.lines().count();
            if lines > THRESHOLD {
                let relative = path.strip_prefix(crate_root).unwrap_or(&path).display().to_string();
                Some((relative, lines))
            } else {
                None
            }
        })
        .collect();

    over_limit.sort_by(|a, b| b.1.cmp(&a.1));

    if !over_limit.is_empty() {
        let details = over_limit
            .iter()
            .map(|(path, lines)| format!("{path}: {lines} lines ({} over)", lines - THRESHOLD))
            .collect::<Vec<_>>()
            .join("\n");
        panic!("the following files exceed the {THRESHOLD}-line budget and should be split:\n{details}");
    }
}
