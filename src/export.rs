use std::path::PathBuf;

use anyhow::Context as _;

use crate::assets::{AssetStore, TRANSIENT_SCHEME, TransientStore, content_hash64};
use crate::driver::{CancelToken, RenderArtifact, RenderDriver};
use crate::error::{MontraError, MontraResult};
use crate::model::CompositionSpec;

/// Outcome reported to the caller of the server export path.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ExportConfig {
    /// Root directory durable source references resolve under.
    pub asset_root: PathBuf,
    /// Where staged copies of transient media land.
    pub staging_dir: PathBuf,
}

/// Validates and normalizes a composition, then hands it to a render driver
/// and maps the outcome into the caller-facing response shape.
pub struct ExportOrchestrator {
    cfg: ExportConfig,
    assets: AssetStore,
    transients: TransientStore,
}

impl ExportOrchestrator {
    pub fn new(cfg: ExportConfig) -> Self {
        let assets = AssetStore::new(cfg.asset_root.clone());
        Self {
            cfg,
            assets,
            transients: TransientStore::new(),
        }
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn transients(&self) -> &TransientStore {
        &self.transients
    }

    /// Produces the spec a driver actually renders: every transient `mem:`
    /// reference staged to a durable file, the export duration settled as
    /// `max(audio, timeline)`, and the frame count recomputed from it.
    ///
    /// Drivers may run in a different process or session than the one that
    /// created the references, so nothing session-scoped survives this step.
    pub fn normalize(&self, spec: &CompositionSpec) -> MontraResult<CompositionSpec> {
        spec.validate()?;

        let mut normalized = spec.clone();
        for item in &mut normalized.items {
            if item.source_ref.starts_with(TRANSIENT_SCHEME) {
                item.source_ref = self.stage_transient(&item.source_ref)?;
            }
        }
        if let Some(audio) = &mut normalized.audio
            && audio.source_ref.starts_with(TRANSIENT_SCHEME)
        {
            audio.source_ref = self.stage_transient(&audio.source_ref)?;
        }

        normalized.duration_ms = normalized.total_duration_ms();
        normalized.duration_in_frames = normalized.total_frames();
        Ok(normalized)
    }

    /// Writes one transient payload to a content-addressed staging file and
    /// returns its durable absolute path. Identical payloads share a file,
    /// and an already-staged payload is not rewritten.
    fn stage_transient(&self, source_ref: &str) -> MontraResult<String> {
        let bytes = self.transients.get(source_ref).ok_or_else(|| {
            MontraError::configuration(format!(
                "transient reference '{source_ref}' has no backing data in this session"
            ))
        })?;

        std::fs::create_dir_all(&self.cfg.staging_dir).with_context(|| {
            format!(
                "failed to create staging directory '{}'",
                self.cfg.staging_dir.display()
            )
        })?;

        let staged = self
            .cfg
            .staging_dir
            .join(format!("staged-{:016x}", content_hash64(&bytes)));
        if !staged.exists() {
            std::fs::write(&staged, bytes.as_slice())
                .with_context(|| format!("failed to stage '{}'", staged.display()))?;
        }
        staged
            .into_os_string()
            .into_string()
            .map_err(|_| MontraError::configuration("staging path is not valid UTF-8"))
    }

    /// Runs the full export: normalize, render, report monotonic progress.
    #[tracing::instrument(skip_all, fields(filename = %spec.filename))]
    pub fn export(
        &self,
        spec: &CompositionSpec,
        driver: &dyn RenderDriver,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(f64),
    ) -> MontraResult<RenderArtifact> {
        let normalized = self.normalize(spec)?;

        // Drivers may re-report a frame; the caller only ever sees the
        // percentage move forward.
        let mut last_percent = 0.0f64;
        let mut monotonic = |progress: crate::driver::RenderProgress| {
            let percent = progress.percent();
            if percent > last_percent {
                last_percent = percent;
                on_progress(percent);
            }
        };

        driver.render(&normalized, &self.assets, cancel, &mut monotonic)
    }

    /// Export mapped to the wire response: a file artifact becomes a URL
    /// under the rendered-output mount, a blob reports success without one,
    /// and any failure carries the structured error message.
    pub fn export_response(
        &self,
        spec: &CompositionSpec,
        driver: &dyn RenderDriver,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(f64),
    ) -> RenderResponse {
        match self.export(spec, driver, cancel, on_progress) {
            Ok(RenderArtifact::File { path, .. }) => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                RenderResponse {
                    success: true,
                    video_url: Some(format!("/rendered/{file_name}")),
                    error: None,
                }
            }
            Ok(RenderArtifact::Blob { .. }) => RenderResponse {
                success: true,
                video_url: None,
                error: None,
            },
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "export failed");
                RenderResponse {
                    success: false,
                    video_url: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
