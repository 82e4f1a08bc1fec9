//! Document Optimiser (component I). Converts office documents to PDF via a
//! headless converter, then hands the result to the PDF optimiser. Grounded
//! on the same scratch-workspace-then-delegate shape as `pdf::try_linearise`,
//! using `process::run` for the external tool exactly as `pdf.rs`/`video`
//! already do.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use std::sync::Arc;

use crate::error::{ClopError, ClopResult};
use crate::optimiser::{BoxFuture, Optimiser, OptimiserContext, OptimiserRegistry};
use crate::output_planner::{plan_output, requires_source_deletion};
use crate::path::FilePath;
use crate::pdf;
use crate::process::{self, ProcessOptions};
use crate::request::{ItemType, OptimiseOutcome, Request};
use crate::settings::SettingsStore;

const CONVERTER_TOOL: &str = "soffice";

pub struct DocumentOptimiser;

impl Optimiser for DocumentOptimiser {
    fn item_type(&self) -> ItemType {
        ItemType::Document
    }

    fn optimise<'a>(
        &'a self,
        request: &'a Request,
        context: &'a OptimiserContext,
        cancellation: CancellationToken,
    ) -> BoxFuture<'a, ClopResult<OptimiseOutcome>> {
        Box::pin(async move { run(request, context, cancellation).await })
    }
}

async fn run(
    request: &Request,
    context: &OptimiserContext,
    cancellation: CancellationToken,
) -> ClopResult<OptimiseOutcome> {
    let started_at = Instant::now();
    let source = &request.source_path;

    if !source.exists() {
        return Err(ClopError::SourceNotFound(source.value().to_path_buf()));
    }
    let extension = source
        .extension()
        .ok_or_else(|| ClopError::UnsupportedType(source.value().to_path_buf()))?;
    if !crate::format::DOCUMENT_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ClopError::UnsupportedType(source.value().to_path_buf()));
    }

    if cancellation.is_cancelled() {
        return Err(ClopError::Cancelled);
    }

    let workspace = FilePath::temp_file("clop-document", "workspace", true);
    tokio::fs::create_dir_all(workspace.value()).await.map_err(ClopError::Io)?;

    let result = convert_and_optimise(request, context, source, &workspace, cancellation.clone()).await;

    if let Err(e) = tokio::fs::remove_dir_all(workspace.value()).await {
        warn!(workspace = %workspace, error = %e, "failed to clean up document conversion workspace");
    }

    let outcome = result?;

    let output_plan = plan_output(source, "pdf", &request.metadata);
    if output_plan.destination != outcome.output_path {
        if let Some(parent) = output_plan.destination.parent() {
            tokio::fs::create_dir_all(parent.value()).await.map_err(ClopError::Io)?;
        }
        tokio::fs::copy(outcome.output_path.value(), output_plan.destination.value())
            .await
            .map_err(ClopError::Io)?;
        let _ = tokio::fs::remove_file(outcome.output_path.value()).await;
    }
    if requires_source_deletion(&output_plan, source) {
        let _ = tokio::fs::remove_file(source.value()).await;
    }

    Ok(OptimiseOutcome::succeeded(
        request.request_id.clone(),
        &output_plan.destination,
        outcome.message,
        started_at.elapsed(),
    ))
}

async fn convert_and_optimise(
    request: &Request,
    context: &OptimiserContext,
    source: &FilePath,
    workspace: &FilePath,
    cancellation: CancellationToken,
) -> ClopResult<OptimiseOutcome> {
    let args = vec![
        "--headless".to_string(),
        "--convert-to".to_string(),
        "pdf".to_string(),
        "--outdir".to_string(),
        workspace.to_string(),
        source.to_string(),
    ];

    process::run(
        CONVERTER_TOOL,
        &args,
        &ProcessOptions {
            fail_on_nonzero: true,
            ..Default::default()
        },
        cancellation.clone(),
        None,
        None,
    )
    .await?;

    let stem = source
        .stem()
        .ok_or_else(|| ClopError::UnsupportedType(source.value().to_path_buf()))?;
    let converted_pdf = FilePath::from_path(&workspace.value().join(format!("{stem}.pdf")))?;
    if !converted_pdf.exists() {
        return Err(ClopError::ToolFailed {
            exit_code: None,
            stderr_snippet: "converter produced no PDF output".to_string(),
        });
    }

    let pdf_request = Request {
        request_id: request.request_id.clone(),
        item_type: ItemType::Pdf,
        source_path: converted_pdf,
        metadata: request.metadata.clone(),
    };

    let pdf_optimiser = pdf::PdfOptimiser;
    pdf_optimiser.optimise(&pdf_request, context, cancellation).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> OptimiserContext {
        OptimiserContext {
            settings: SettingsStore::in_memory(),
            registry: Arc::new(OptimiserRegistry::new()),
        }
    }

    #[tokio::test]
    async fn missing_source_yields_source_not_found() {
        let request = Request {
            request_id: "r1".to_string(),
            item_type: ItemType::Document,
            source_path: FilePath::from_str("/tmp/clop/does-not-exist.docx").unwrap(),
            metadata: crate::request::Metadata::new(),
        };
        let context = test_context();
        let err = run(&request, &context, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClopError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let request = Request {
            request_id: "r1".to_string(),
            item_type: ItemType::Document,
            source_path: FilePath::from_path(&path).unwrap(),
            metadata: crate::request::Metadata::new(),
        };
        let context = test_context();
        let err = run(&request, &context, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClopError::UnsupportedType(_)));
    }
}
