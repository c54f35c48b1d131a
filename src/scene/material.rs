use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{MaterialKey, RenderTargetKey};
use crate::gpu::{BlendMode, CullMode, DepthState, GpuStateCache, ProgramDesc, ProgramKey, TextureKey};

/// How a material treats alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransparencyMode {
    #[default]
    Opaque,
    AlphaTest,
    AlphaBlend,
    AlphaTestAndBlend,
}

/// Program, textures and fixed-function state of a draw.
///
/// A material with `sub_materials` is a multi-material: each sub-mesh picks
/// its material through its material index.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub program_desc: ProgramDesc,
    program: Option<ProgramKey>,

    pub transparency: TransparencyMode,
    pub alpha: f32,
    pub blend_mode: BlendMode,
    pub back_face_culling: bool,
    pub need_depth_pre_pass: bool,

    /// Sampled textures; the index is the sampler slot.
    pub textures: SmallVec<[TextureKey; 4]>,
    /// Render targets sampled by this material; rendered before the camera.
    pub render_target_textures: SmallVec<[RenderTargetKey; 2]>,
    pub sub_materials: Vec<Option<MaterialKey>>,
}

impl Material {
    #[must_use]
    pub fn new(name: impl Into<String>, program_desc: ProgramDesc) -> Self {
        Self {
            name: name.into(),
            program_desc,
            program: None,
            transparency: TransparencyMode::Opaque,
            alpha: 1.0,
            blend_mode: BlendMode::Combine,
            back_face_culling: true,
            need_depth_pre_pass: false,
            textures: SmallVec::new(),
            render_target_textures: SmallVec::new(),
            sub_materials: Vec::new(),
        }
    }

    /// A multi-material dispatching sub-meshes to `sub_materials`.
    #[must_use]
    pub fn multi(name: impl Into<String>, sub_materials: Vec<Option<MaterialKey>>) -> Self {
        let name = name.into();
        Self {
            sub_materials,
            ..Self::new(name.clone(), ProgramDesc {
                label: name,
                vertex_source: String::new(),
                fragment_source: String::new(),
                defines: Vec::new(),
            })
        }
    }

    #[inline]
    #[must_use]
    pub fn is_multi(&self) -> bool {
        !self.sub_materials.is_empty()
    }

    #[must_use]
    pub fn sub_material(&self, index: usize) -> Option<MaterialKey> {
        self.sub_materials.get(index).copied().flatten()
    }

    /// Whether drawing `visibility`-faded geometry with this material needs
    /// blending.
    #[must_use]
    pub fn needs_alpha_blending(&self, visibility: f32) -> bool {
        matches!(
            self.transparency,
            TransparencyMode::AlphaBlend | TransparencyMode::AlphaTestAndBlend
        ) || self.alpha < 1.0
            || visibility < 1.0
    }

    #[must_use]
    pub fn needs_alpha_testing(&self) -> bool {
        matches!(
            self.transparency,
            TransparencyMode::AlphaTest | TransparencyMode::AlphaTestAndBlend
        )
    }

    #[inline]
    #[must_use]
    pub fn has_render_target_textures(&self) -> bool {
        !self.render_target_textures.is_empty()
    }

    #[must_use]
    pub fn render_target_textures(&self) -> &[RenderTargetKey] {
        &self.render_target_textures
    }

    #[must_use]
    pub fn depth_state(&self, blended: bool) -> DepthState {
        if blended {
            DepthState::read_only()
        } else {
            DepthState::default()
        }
    }

    #[must_use]
    pub fn cull_mode(&self) -> CullMode {
        if self.back_face_culling {
            CullMode::Back
        } else {
            CullMode::None
        }
    }

    // ========================================================================
    // GPU
    // ========================================================================

    /// The program key, registering the program on first use.
    pub fn program(&mut self, gpu: &mut GpuStateCache) -> ProgramKey {
        match self.program {
            Some(key) => key,
            None => {
                let key = gpu.register_program(self.program_desc.clone());
                self.program = Some(key);
                key
            }
        }
    }

    /// The program is linked and every texture has contents. Never blocks.
    pub fn is_ready(&mut self, gpu: &mut GpuStateCache) -> bool {
        let program = self.program(gpu);
        if !gpu.is_program_ready(program) {
            return false;
        }
        self.textures.iter().all(|texture| gpu.is_texture_ready(*texture))
    }

    pub fn release(&mut self, gpu: &mut GpuStateCache) {
        if let Some(program) = self.program.take() {
            gpu.dispose_program(program);
        }
        for texture in self.textures.drain(..) {
            gpu.release_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> Material {
        Material::new("test", ProgramDesc {
            label: "test".into(),
            vertex_source: String::new(),
            fragment_source: String::new(),
            defines: Vec::new(),
        })
    }

    #[test]
    fn faded_visibility_needs_blending() {
        let material = material();
        assert!(!material.needs_alpha_blending(1.0));
        assert!(material.needs_alpha_blending(0.5));
    }

    #[test]
    fn multi_material_lookup() {
        let multi = Material::multi("multi", vec![None]);
        assert!(multi.is_multi());
        assert_eq!(multi.sub_material(0), None);
        assert_eq!(multi.sub_material(3), None);
    }
}
