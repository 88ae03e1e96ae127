//! Wires generation, the session and the compiler together for the CLI.

use crate::config::{Config, CredentialStore};
use crate::http_client::ReqwestHttpClient;
use crate::llm_generator::{CodeGenerator, GeminiGenerator, GenerationRequest, MockGenerator};
use crate::preview_compiler::{compile, PreviewDocument};
use crate::providers::{Notifier, ToastVariant};
use crate::session::PreviewSession;
use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const SOURCE_FILE_NAME: &str = "component.jsx";
pub const PREVIEW_FILE_NAME: &str = "preview.html";

/// Picks the mock or the Gemini generator based on configuration.
pub fn build_generator(
    config: &Config,
    credentials: Arc<CredentialStore>,
    notifier: Arc<dyn Notifier>,
) -> Arc<dyn CodeGenerator> {
    if config.is_mock_mode() {
        Arc::new(MockGenerator::new(notifier))
    } else {
        Arc::new(
            GeminiGenerator::new(Arc::new(ReqwestHttpClient::new()), credentials, notifier)
                .with_api_base(config.api_base()),
        )
    }
}

/// Files written by [`Pipeline::generate_to_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFiles {
    pub source_path: PathBuf,
    pub preview_path: PathBuf,
}

pub struct Pipeline {
    generator: Arc<dyn CodeGenerator>,
    session: PreviewSession,
    model: String,
}

impl Pipeline {
    pub fn new(generator: Arc<dyn CodeGenerator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            session: PreviewSession::new(),
            model: model.into(),
        }
    }

    pub fn session(&self) -> &PreviewSession {
        &self.session
    }

    /// Runs one prompt through generation and compilation.
    ///
    /// Failures have already been reported through the generator's notifier
    /// when this returns `None`.
    pub async fn generate(&self, prompt: &str) -> Option<PreviewDocument> {
        let token = self.session.begin();
        let request = GenerationRequest::new(prompt).with_model(&self.model);

        match self.generator.generate_code(&request).await {
            Some(result) => {
                let document = self.session.complete(token, result)?;
                report_mount_plan(&document, self.generator.notifier());
                Some(document)
            }
            None => {
                self.session.abandon(token);
                None
            }
        }
    }

    /// Generates a component and writes its source and preview to `out_dir`.
    pub async fn generate_to_dir(&self, prompt: &str, out_dir: &Path) -> Result<GeneratedFiles> {
        let document = self
            .generate(prompt)
            .await
            .ok_or_else(|| anyhow!("Generation failed"))?;
        let source = self
            .session
            .current_source()
            .ok_or_else(|| anyhow!("Generation result was superseded"))?;

        fs::create_dir_all(out_dir)?;
        let files = GeneratedFiles {
            source_path: out_dir.join(SOURCE_FILE_NAME),
            preview_path: out_dir.join(PREVIEW_FILE_NAME),
        };
        fs::write(&files.source_path, source)?;
        fs::write(&files.preview_path, document.as_str())?;

        info!(
            "Wrote {} and {}",
            files.source_path.display(),
            files.preview_path.display()
        );
        Ok(files)
    }
}

/// Compiles an existing component file into a preview document.
///
/// Without `output` the document is written next to the input with an
/// `.html` extension. Returns the path written.
pub fn compile_file(
    input: &Path,
    output: Option<&Path>,
    notifier: &dyn Notifier,
) -> Result<PathBuf> {
    let source = fs::read_to_string(input)?;
    let document = compile(&source);
    report_mount_plan(&document, notifier);

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => input.with_extension("html"),
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output, document.as_str())?;
    info!("Compiled {} -> {}", input.display(), output.display());
    Ok(output)
}

fn report_mount_plan(document: &PreviewDocument, notifier: &dyn Notifier) {
    match document.plan.require_component() {
        Ok(candidate) => info!(
            "Preview will mount {} ({})",
            candidate.name,
            candidate.strategy.as_str()
        ),
        Err(e) => {
            warn!("{}", e);
            notifier.notify("Preview Warning", &e.to_string(), ToastVariant::Default);
        }
    }
}
