//! Drives `PdfOptimiser` end-to-end against a mock `gs` shell script
//! standing in for Ghostscript, the way the teacher's own integration
//! tests mock ffmpeg rather than depending on the real tool being
//! installed on the test machine.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use clop_core::optimiser::{Optimiser, OptimiserContext, OptimiserRegistry};
use clop_core::pdf::PdfOptimiser;
use clop_core::path::FilePath;
use clop_core::request::{ItemType, Metadata, Request, Status};
use clop_core::settings::SettingsStore;
use tokio_util::sync::CancellationToken;

struct PathGuard {
    previous: Option<String>,
}

impl PathGuard {
    fn set(mock_dir: &std::path::Path) -> Self {
        let previous = std::env::var("PATH").ok();
        unsafe { std::env::set_var("PATH", mock_dir) };
        Self { previous }
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(v) => unsafe { std::env::set_var("PATH", v) },
            None => unsafe { std::env::remove_var("PATH") },
        }
    }
}

fn write_mock_gs(dir: &std::path::Path) {
    let script = dir.join("gs");
    std::fs::write(
        &script,
        r#"#!/bin/sh
out=""
for arg in "$@"; do
  case "$arg" in
    -o*) out="${arg#-o}" ;;
  esac
done
printf '%%PDF-1.4\nmock optimised\n' > "$out"
exit 0
"#,
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();
}

#[tokio::test]
#[cfg(unix)]
async fn optimises_a_pdf_via_the_mock_ghostscript_binary() {
    let mock_dir = tempfile::tempdir().unwrap();
    write_mock_gs(mock_dir.path());
    let _path_guard = PathGuard::set(mock_dir.path());

    let work_dir = tempfile::tempdir().unwrap();
    let source_path = work_dir.path().join("report.pdf");
    // Padded well past the mock's tiny output so the size-improvement guard passes.
    let mut source_contents = b"%PDF-1.4\n".to_vec();
    source_contents.extend(std::iter::repeat(b'A').take(4096));
    std::fs::write(&source_path, &source_contents).unwrap();

    let settings = SettingsStore::in_memory();
    let registry = Arc::new(OptimiserRegistry::new());
    let context = OptimiserContext { settings, registry };

    let request = Request {
        request_id: "pdf-mock-1".to_string(),
        item_type: ItemType::Pdf,
        source_path: FilePath::from_path(&source_path).unwrap(),
        metadata: Metadata::new(),
    };

    let optimiser = PdfOptimiser;
    let outcome = optimiser
        .optimise(&request, &context, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, Status::Succeeded);
    let output_path = outcome.output_path.expect("expected an output path on success");
    assert!(output_path.0.ends_with(".clop.pdf"));
    assert!(std::path::Path::new(&output_path.0).exists());
}
