//! Host View
//!
//! A [`View`] is the host's window onto the scene: a main camera plus the
//! slave cameras the pipeline hands it. [`View::draw`] renders one frame:
//!
//! ```text
//!  slaves sorted by RenderOrder (stable)
//!     │
//!     ├─ PreRender(0..)   stage cameras (G-buffer, work stages, shadow casters)
//!     ├─ Nested           DefaultForward (deferred chain in its Pre slot)
//!     └─ PostRender(0..)  display stages
//!
//!  per camera:
//!     Initial hooks ─► Pre hooks ─► near/far + clamp ─► bind target
//!        ─► scene or screen quad ─► unbind ─► Post hooks ─► Final hooks
//! ```
//!
//! Relative cameras follow the main camera's matrices. Cameras whose target
//! cannot be created are skipped for the rest of the session.

use glam::{Mat4, UVec2};

use crate::renderer::core::backend::{RenderBackend, TargetDesc, TargetState};
use crate::renderer::graph::near_far::NearFarSource;
use crate::scene::camera::{
    Camera, CameraContent, DrawInfo, DrawPhase, ReferenceFrame, SharedCamera, SharedHook, Viewport,
};
use crate::scene::frame::FrameStamp;

/// Host-side scene drawing.
pub trait SceneRenderer<B: RenderBackend>: NearFarSource {
    /// Draws the scene content visible to `camera` into the bound target.
    fn draw_scene(&mut self, backend: &mut B, camera: &Camera);
}

/// A camera rendered by the view in addition to the main camera.
#[derive(Debug, Clone)]
pub struct Slave {
    pub camera: SharedCamera,
    /// Whether the camera renders the main scene.
    pub use_main_scene: bool,
}

#[derive(Debug)]
pub struct View {
    pub main_camera: Option<SharedCamera>,
    slaves: Vec<Slave>,
    size: UVec2,
}

impl View {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            main_camera: None,
            slaves: Vec::new(),
            size: UVec2::new(width.max(1), height.max(1)),
        }
    }

    #[must_use]
    pub fn with_main_camera(mut self, camera: SharedCamera) -> Self {
        self.main_camera = Some(camera);
        self
    }

    /// Size of the host's default target.
    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.size = UVec2::new(width.max(1), height.max(1));
    }

    pub fn add_slave(&mut self, camera: SharedCamera, use_main_scene: bool) {
        self.slaves.push(Slave { camera, use_main_scene });
    }

    pub fn remove_slave(&mut self, camera: &SharedCamera) -> bool {
        let before = self.slaves.len();
        self.slaves
            .retain(|s| !std::sync::Arc::ptr_eq(&s.camera, camera));
        before != self.slaves.len()
    }

    #[must_use]
    pub fn slaves(&self) -> &[Slave] {
        &self.slaves
    }

    pub fn clear_slaves(&mut self) {
        self.slaves.clear();
    }

    /// Slave cameras in execution order.
    #[must_use]
    pub fn render_order(&self) -> Vec<&Slave> {
        let mut ordered: Vec<&Slave> = self.slaves.iter().collect();
        ordered.sort_by_key(|s| s.camera.read().render_order);
        ordered
    }

    /// Renders every slave camera once.
    pub fn draw<B: RenderBackend>(&self, backend: &mut B, frame: FrameStamp, scene: &mut dyn SceneRenderer<B>) {
        let main_matrices = self
            .main_camera
            .as_ref()
            .map(|c| {
                let c = c.read();
                (c.view_matrix, c.projection_matrix)
            });

        for slave in self.render_order() {
            self.draw_camera(backend, frame, scene, &slave.camera, main_matrices);
        }
    }

    fn draw_camera<B: RenderBackend>(
        &self,
        backend: &mut B,
        frame: FrameStamp,
        scene: &mut dyn SceneRenderer<B>,
        shared: &SharedCamera,
        main_matrices: Option<(Mat4, Mat4)>,
    ) {
        let (name, hooks, view_matrix, mut projection, viewport) = {
            let mut camera = shared.write();
            if camera.reference_frame == ReferenceFrame::Relative
                && let Some((view, projection)) = main_matrices
            {
                camera.view_matrix = view;
                camera.projection_matrix = projection;
            }
            let viewport = camera.viewport.unwrap_or_else(|| {
                Viewport::from_size(camera.target_size().unwrap_or(self.size))
            });
            (
                camera.name.clone(),
                camera.hooks.clone(),
                camera.view_matrix,
                camera.projection_matrix,
                viewport,
            )
        };

        run_hooks(backend, hooks.slot(DrawPhase::Initial), &name, view_matrix, projection, viewport, frame);
        run_hooks(backend, hooks.slot(DrawPhase::Pre), &name, view_matrix, projection, viewport, frame);

        {
            let mut camera = shared.write();
            if camera.computes_near_far()
                && let Some(clamp) = camera.clamp.clone()
            {
                clamp
                    .tracker()
                    .cull_with_near_far(frame.frame_number, &view_matrix, &projection, &*scene);
                clamp.clamp(&mut projection);
            }

            if ensure_target(backend, &mut camera) {
                backend.begin_target(camera.target.id(), viewport, &camera.clear);
                backend.set_transform(projection, view_matrix);
                backend.set_raster_state(&camera.raster);
                match camera.content {
                    CameraContent::Scene => scene.draw_scene(backend, &camera),
                    CameraContent::ScreenQuad(rect) => {
                        let state = camera.state.read();
                        backend.draw_screen_quad(&camera.name, rect, &state);
                    }
                }
                backend.end_target();
            }
        }

        run_hooks(backend, hooks.slot(DrawPhase::Post), &name, view_matrix, projection, viewport, frame);
        run_hooks(backend, hooks.slot(DrawPhase::Final), &name, view_matrix, projection, viewport, frame);
    }
}

/// Creates the camera's off-screen target on first use. Returns whether the
/// camera can draw.
fn ensure_target<B: RenderBackend>(backend: &mut B, camera: &mut Camera) -> bool {
    if !camera.renders_to_texture() {
        return true;
    }
    match camera.target {
        TargetState::Ready(_) => true,
        TargetState::Failed => false,
        TargetState::Uncreated => {
            if !backend.supports_render_targets() {
                log::warn!("No FBO support, camera {} is skipped", camera.name);
                camera.target = TargetState::Failed;
                return false;
            }
            let size = camera.target_size().unwrap_or(UVec2::ONE);
            let desc = TargetDesc {
                label: &camera.name,
                size,
                attachments: &camera.attachments,
            };
            match backend.create_target(&desc) {
                Ok(id) => {
                    camera.target = TargetState::Ready(id);
                    true
                }
                Err(e) => {
                    log::warn!("Unable to setup FBO of name {}: {e}", camera.name);
                    camera.target = TargetState::Failed;
                    false
                }
            }
        }
    }
}

fn run_hooks<B: RenderBackend>(
    backend: &mut B,
    hooks: &[SharedHook],
    camera: &str,
    view_matrix: Mat4,
    projection_matrix: Mat4,
    viewport: Viewport,
    frame: FrameStamp,
) {
    if hooks.is_empty() {
        return;
    }
    let mut info = DrawInfo {
        backend,
        camera,
        view_matrix,
        projection_matrix,
        viewport,
        frame,
    };
    for hook in hooks {
        hook.lock().run(&mut info);
    }
}
