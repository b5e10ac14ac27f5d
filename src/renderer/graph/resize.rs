//! Resize Handling
//!
//! Host windows resize; off-screen stage targets do not. [`ResizeHandler`]
//! adjusts only the cameras that draw to the host's target and keeps their
//! aspect ratio correct:
//!
//! ```text
//!  viewport'   = viewport × (w' / w, h' / h)
//!  projection' = scale(1 / aspect_change, 1, 1) × projection
//! ```

use glam::{Mat4, UVec2, Vec2, Vec3};

use crate::renderer::graph::shader::{Uniform, UniformValue};
use crate::scene::view::View;

#[derive(Debug, Clone)]
pub struct ResizeHandler {
    size: UVec2,
    inv_resolution: Option<Uniform>,
}

impl ResizeHandler {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: UVec2::new(width, height),
            inv_resolution: None,
        }
    }

    /// Also keeps `InvScreenResolution` in step with the host size.
    #[must_use]
    pub fn with_inv_resolution(mut self, uniform: Uniform) -> Self {
        self.inv_resolution = Some(uniform);
        self
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Applies a host resize. Zero sizes are ignored. Returns whether anything
    /// changed.
    pub fn resize(&mut self, view: &mut View, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return false;
        }
        let new_size = UVec2::new(width, height);
        if new_size == self.size {
            return false;
        }

        let old = self.size.max(UVec2::ONE).as_vec2();
        let ratio = new_size.as_vec2() / old;
        let aspect_change = ratio.x / ratio.y;

        for slave in view.slaves() {
            let mut camera = slave.camera.write();
            if camera.renders_to_texture() {
                continue;
            }
            if let Some(viewport) = camera.viewport.as_mut() {
                viewport.x = (viewport.x as f32 * ratio.x).round() as u32;
                viewport.y = (viewport.y as f32 * ratio.y).round() as u32;
                viewport.width = ((viewport.width as f32 * ratio.x).round() as u32).max(1);
                viewport.height = ((viewport.height as f32 * ratio.y).round() as u32).max(1);
            }
            camera.projection_matrix =
                Mat4::from_scale(Vec3::new(1.0 / aspect_change, 1.0, 1.0)) * camera.projection_matrix;
        }

        if let Some(main) = &view.main_camera {
            let mut main = main.write();
            main.projection_matrix = Mat4::from_scale(Vec3::new(1.0 / aspect_change, 1.0, 1.0)) * main.projection_matrix;
        }

        view.set_size(width, height);
        if let Some(uniform) = &self.inv_resolution {
            uniform.set(UniformValue::Vec2(Vec2::ONE / new_size.as_vec2()));
        }
        log::debug!("Resized from {}x{} to {width}x{height}", self.size.x, self.size.y);
        self.size = new_size;
        true
    }
}
