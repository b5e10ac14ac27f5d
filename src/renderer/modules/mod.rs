//! Pipeline Modules
//!
//! Units that own several stages or the textures other stages read:
//! - ShadowModule: cascaded shadow-map casters and their matrices
//! - LightModule: the light parameter table fed by the light registry
//! - UserInputModule: a host-drawn input stage

pub mod light;
pub mod shadow;
pub mod user_input;

pub use light::{LightData, LightModule, LightRanking, LightRegistry, RecencyRanking};
pub use shadow::{ShadowDrawHook, ShadowModule};
pub use user_input::{SharedBuffers, UserInputModule};
