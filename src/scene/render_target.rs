use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use super::{CameraKey, MeshKey};
use crate::errors::Result;
use crate::gpu::{FramebufferDesc, FramebufferKey, GpuStateCache, PixelViewport, TextureDesc, TextureFormat, TextureKey};

/// How often a render target is redrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshRate {
    /// Rendered the first time it is requested, never again.
    Once,
    #[default]
    EveryFrame,
    /// Rendered once every `n` requests.
    Every(u32),
}

#[derive(Debug, Clone)]
pub struct RenderTargetDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub depth_stencil: bool,
    pub refresh_rate: RefreshRate,
}

impl RenderTargetDesc {
    #[must_use]
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format: TextureFormat::Rgba8,
            depth_stencil: true,
            refresh_rate: RefreshRate::EveryFrame,
        }
    }
}

/// Offscreen framebuffer with its own camera and render list.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub name: String,
    width: u32,
    height: u32,
    framebuffer: FramebufferKey,
    color: TextureKey,
    depth_stencil: Option<TextureKey>,

    /// Camera to render with; the current scene camera when `None`.
    pub camera: Option<CameraKey>,
    /// Meshes to render; every scene mesh when `None`.
    pub render_list: Option<Vec<MeshKey>>,
    pub refresh_rate: RefreshRate,
    pub clear_color: [f32; 4],
    refresh_id: Option<u32>,
    rendered_count: u64,
}

impl RenderTarget {
    /// Registers the attachments and framebuffer.
    ///
    /// Fails with `CapabilityMissing` when a depth-stencil attachment is
    /// requested on a device without depth textures.
    pub fn create(gpu: &mut GpuStateCache, desc: RenderTargetDesc) -> Result<Self> {
        let color = gpu.register_texture(TextureDesc::attachment(
            format!("{}:color", desc.name),
            desc.width,
            desc.height,
            desc.format,
        ))?;
        let depth_stencil = if desc.depth_stencil {
            match gpu.register_texture(TextureDesc::attachment(
                format!("{}:depth", desc.name),
                desc.width,
                desc.height,
                TextureFormat::Depth24Stencil8,
            )) {
                Ok(texture) => Some(texture),
                Err(err) => {
                    gpu.release_texture(color);
                    return Err(err);
                }
            }
        } else {
            None
        };

        let framebuffer = gpu.register_framebuffer(FramebufferDesc {
            label: desc.name.clone(),
            colors: smallvec![color],
            depth_stencil,
            width: desc.width,
            height: desc.height,
        })?;

        log::debug!("Render target '{}' created ({}x{})", desc.name, desc.width, desc.height);
        Ok(Self {
            name: desc.name,
            width: desc.width,
            height: desc.height,
            framebuffer,
            color,
            depth_stencil,
            camera: None,
            render_list: None,
            refresh_rate: desc.refresh_rate,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            refresh_id: None,
            rendered_count: 0,
        })
    }

    #[inline]
    #[must_use]
    pub fn framebuffer(&self) -> FramebufferKey {
        self.framebuffer
    }

    #[inline]
    #[must_use]
    pub fn color_texture(&self) -> TextureKey {
        self.color
    }

    #[inline]
    #[must_use]
    pub fn depth_stencil_texture(&self) -> Option<TextureKey> {
        self.depth_stencil
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn viewport(&self) -> PixelViewport {
        PixelViewport::new(0, 0, self.width, self.height)
    }

    #[must_use]
    pub fn rendered_count(&self) -> u64 {
        self.rendered_count
    }

    /// Advances the refresh counter; returns whether this request renders.
    pub fn should_render(&mut self) -> bool {
        let Some(current) = self.refresh_id else {
            self.refresh_id = Some(1);
            return true;
        };
        let period = match self.refresh_rate {
            RefreshRate::Once => return false,
            RefreshRate::EveryFrame => 1,
            RefreshRate::Every(n) => n.max(1),
        };
        if current >= period {
            self.refresh_id = Some(1);
            true
        } else {
            self.refresh_id = Some(current + 1);
            false
        }
    }

    /// Forces the next request to render.
    pub fn reset_refresh_counter(&mut self) {
        self.refresh_id = None;
    }

    pub(crate) fn mark_rendered(&mut self) {
        self.rendered_count += 1;
    }

    pub fn release(&self, gpu: &mut GpuStateCache) {
        gpu.dispose_framebuffer(self.framebuffer);
        gpu.release_texture(self.color);
        if let Some(depth) = self.depth_stencil {
            gpu.release_texture(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingApi;

    fn target(refresh_rate: RefreshRate) -> RenderTarget {
        let (api, _probe) = RecordingApi::new();
        let mut gpu = GpuStateCache::new(Box::new(api), None);
        let desc = RenderTargetDesc {
            refresh_rate,
            ..RenderTargetDesc::new("rt", 64, 64)
        };
        RenderTarget::create(&mut gpu, desc).unwrap()
    }

    #[test]
    fn refresh_once() {
        let mut target = target(RefreshRate::Once);
        assert!(target.should_render());
        assert!(!target.should_render());
        assert!(!target.should_render());
    }

    #[test]
    fn refresh_every_third_request() {
        let mut target = target(RefreshRate::Every(3));
        let pattern: Vec<bool> = (0..7).map(|_| target.should_render()).collect();
        assert_eq!(pattern, vec![true, false, false, true, false, false, true]);
    }
}
