//! Output Planner (component J). Grounded on the teacher's
//! `domain::output_policy`, narrowed from its three independent
//! container/directory/filename policies down to the single
//! replace-or-suffix decision spec §4.J actually calls for.

use crate::path::FilePath;
use crate::request::Metadata;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    pub destination: FilePath,
    pub delete_source: bool,
}

/// `(source, final_extension, metadata) -> (destination, delete_source)`.
///
/// - `output.replace_original` + same extension: in-place replace.
/// - `output.replace_original` + different extension: sibling with the new
///   extension, source optionally marked for deletion via
///   `output.delete_converted_source`.
/// - Otherwise: `<parent>/<stem>.clop.<ext>`, with the stem kept
///   single-suffixed even when `source` is itself already a `.clop.*` file.
pub fn plan_output(source: &FilePath, final_extension: &str, metadata: &Metadata) -> OutputPlan {
    let replace_original = metadata.get_bool("output.replace_original", false);
    let delete_converted_source = metadata.get_bool("output.delete_converted_source", false);
    let source_extension = source.extension().unwrap_or_default();

    if replace_original {
        if source_extension == final_extension {
            return OutputPlan {
                destination: source.clone(),
                delete_source: false,
            };
        }
        let stem = canonical_stem(source);
        let filename = format!("{stem}.{final_extension}");
        return OutputPlan {
            destination: source.with_file_name(&filename),
            delete_source: delete_converted_source,
        };
    }

    let stem = canonical_stem(source);
    let filename = format!("{stem}.clop.{final_extension}");
    OutputPlan {
        destination: source.with_file_name(&filename),
        delete_source: false,
    }
}

pub fn requires_source_deletion(plan: &OutputPlan, source: &FilePath) -> bool {
    plan.delete_source && plan.destination != *source
}

/// Strips a trailing `.clop` suffix from the stem so repeated optimisation
/// passes never stack `a.clop.clop.jpg`.
fn canonical_stem(source: &FilePath) -> String {
    let stem = source.stem().unwrap_or("file");
    stem.strip_suffix(".clop").unwrap_or(stem).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, bool)]) -> Metadata {
        let mut m = Metadata::new();
        for (k, v) in pairs {
            m.set(*k, *v);
        }
        m
    }

    #[test]
    fn default_plan_uses_clop_suffix() {
        let source = FilePath::from_str("/tmp/clop/photo.png").unwrap();
        let plan = plan_output(&source, "jpg", &Metadata::new());
        assert_eq!(plan.destination.to_string(), "/tmp/clop/photo.clop.jpg");
        assert!(!plan.delete_source);
    }

    #[test]
    fn repeated_runs_do_not_stack_clop_suffix() {
        let source = FilePath::from_str("/tmp/clop/photo.clop.jpg").unwrap();
        let plan = plan_output(&source, "jpg", &Metadata::new());
        assert_eq!(plan.destination.to_string(), "/tmp/clop/photo.clop.jpg");
    }

    #[test]
    fn replace_original_same_extension_is_in_place() {
        let source = FilePath::from_str("/tmp/clop/photo.jpg").unwrap();
        let meta = metadata(&[("output.replace_original", true)]);
        let plan = plan_output(&source, "jpg", &meta);
        assert_eq!(plan.destination, source);
        assert!(!plan.delete_source);
    }

    #[test]
    fn replace_original_different_extension_is_sibling_with_delete_flag() {
        let source = FilePath::from_str("/tmp/clop/doc.docx").unwrap();
        let meta = metadata(&[
            ("output.replace_original", true),
            ("output.delete_converted_source", true),
        ]);
        let plan = plan_output(&source, "pdf", &meta);
        assert_eq!(plan.destination.to_string(), "/tmp/clop/doc.pdf");
        assert!(plan.delete_source);
        assert!(requires_source_deletion(&plan, &source));
    }

    #[test]
    fn deletion_never_required_when_destination_equals_source() {
        let source = FilePath::from_str("/tmp/clop/photo.jpg").unwrap();
        let meta = metadata(&[
            ("output.replace_original", true),
            ("output.delete_converted_source", true),
        ]);
        let plan = plan_output(&source, "jpg", &meta);
        assert!(!requires_source_deletion(&plan, &source));
    }
}
