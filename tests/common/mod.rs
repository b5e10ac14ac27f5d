//! Shared test doubles.

#![allow(dead_code)]

use glam::{Mat4, UVec2, Vec4};
use slotmap::SlotMap;

use myth_deferred::renderer::core::backend::{RenderBackend, TargetDesc, TargetId};
use myth_deferred::renderer::graph::near_far::NearFarSource;
use myth_deferred::renderer::graph::shader::ShaderState;
use myth_deferred::renderer::graph::texture::StageTexture;
use myth_deferred::scene::camera::{Camera, ClearSettings, Viewport};
use myth_deferred::scene::view::SceneRenderer;
use myth_deferred::TargetError;

/// A backend that records every call as a short event string.
#[derive(Default)]
pub struct RecordingBackend {
    pub events: Vec<String>,
    pub supports_targets: bool,
    /// Labels whose target creation fails.
    pub failing_labels: Vec<String>,
    /// Targets that report incomplete on validation.
    pub invalid_targets: Vec<TargetId>,
    targets: SlotMap<TargetId, (String, UVec2)>,
    pub transforms: Vec<(Mat4, Mat4)>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            supports_targets: true,
            ..Self::default()
        }
    }

    pub fn without_targets() -> Self {
        Self::default()
    }

    pub fn failing(labels: &[&str]) -> Self {
        Self {
            failing_labels: labels.iter().map(ToString::to_string).collect(),
            ..Self::new()
        }
    }

    pub fn target_label(&self, id: TargetId) -> Option<&str> {
        self.targets.get(id).map(|(l, _)| l.as_str())
    }

    pub fn target_size(&self, label: &str) -> Option<UVec2> {
        self.targets.values().find(|(l, _)| l == label).map(|(_, s)| *s)
    }

    /// Events starting with `prefix`.
    pub fn events_with(&self, prefix: &str) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events_with(prefix).len()
    }
}

impl RenderBackend for RecordingBackend {
    fn supports_render_targets(&self) -> bool {
        self.supports_targets
    }

    fn create_target(&mut self, desc: &TargetDesc<'_>) -> Result<TargetId, TargetError> {
        self.events.push(format!("create:{}", desc.label));
        if self.failing_labels.iter().any(|l| l == desc.label) {
            return Err(TargetError::IncompleteAttachment(desc.label.to_string()));
        }
        Ok(self.targets.insert((desc.label.to_string(), desc.size)))
    }

    fn validate_target(&self, target: TargetId) -> Result<(), TargetError> {
        if self.invalid_targets.contains(&target) {
            Err(TargetError::IncompleteAttachment("invalidated".to_string()))
        } else {
            Ok(())
        }
    }

    fn destroy_target(&mut self, target: TargetId) {
        if let Some((label, _)) = self.targets.remove(target) {
            self.events.push(format!("destroy:{label}"));
        }
    }

    fn begin_target(&mut self, target: Option<TargetId>, viewport: Viewport, _clear: &ClearSettings) {
        let label = target
            .and_then(|id| self.target_label(id))
            .unwrap_or("default")
            .to_string();
        self.events
            .push(format!("begin:{label}:{}x{}", viewport.width, viewport.height));
    }

    fn set_transform(&mut self, projection: Mat4, model_view: Mat4) {
        self.transforms.push((projection, model_view));
    }

    fn draw_screen_quad(&mut self, label: &str, _rect: Vec4, _state: &ShaderState) {
        self.events.push(format!("quad:{label}"));
    }

    fn end_target(&mut self) {
        self.events.push("end".to_string());
    }

    fn generate_mipmaps(&mut self, texture: &StageTexture) {
        self.events.push(format!("mipmaps:{}", texture.label()));
    }

    fn blit_depth(&mut self, source: &StageTexture, destination: Viewport) {
        self.events.push(format!(
            "blit:{}:{}x{}",
            source.label(),
            destination.width,
            destination.height
        ));
    }
}

/// A scene that draws nothing but records which cameras asked for it.
#[derive(Default)]
pub struct RecordingScene {
    pub drawn: Vec<(String, u32)>,
    pub depth_range: Option<(f32, f32)>,
}

impl NearFarSource for RecordingScene {
    fn scene_near_far(&self, _view: &Mat4) -> Option<(f32, f32)> {
        self.depth_range
    }
}

impl SceneRenderer<RecordingBackend> for RecordingScene {
    fn draw_scene(&mut self, backend: &mut RecordingBackend, camera: &Camera) {
        backend.events.push(format!("scene:{}", camera.name));
        self.drawn.push((camera.name.clone(), camera.cull_mask));
    }
}
