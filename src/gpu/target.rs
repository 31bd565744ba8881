use std::sync::Arc;

use winit::window::Window;

use crate::error::GpuError;

/// Format of the offscreen color target used by headless contexts.
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Where frames are drawn: a window surface or an offscreen texture.
pub(crate) enum RenderTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        texture: wgpu::Texture,
        width: u32,
        height: u32,
    },
}

/// The color attachment acquired for one frame.
pub(crate) struct AcquiredFrame {
    pub view: wgpu::TextureView,
    /// Presented when the frame ends. `None` for offscreen targets.
    pub surface_texture: Option<wgpu::SurfaceTexture>,
}

impl RenderTarget {
    pub fn surface(
        device: &wgpu::Device,
        adapter: &wgpu::Adapter,
        surface: wgpu::Surface<'static>,
        window: &Arc<Window>,
    ) -> Result<Self, GpuError> {
        let size = window.inner_size();
        let config = surface_config(&surface.get_capabilities(adapter), size.width, size.height)?;
        surface.configure(device, &config);
        Ok(RenderTarget::Surface { surface, config })
    }

    pub fn offscreen(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        RenderTarget::Offscreen {
            texture: create_offscreen_texture(device, width, height),
            width,
            height,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        match self {
            RenderTarget::Surface { config, .. } => config.format,
            RenderTarget::Offscreen { .. } => OFFSCREEN_FORMAT,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match self {
            RenderTarget::Surface { config, .. } => (config.width, config.height),
            RenderTarget::Offscreen { width, height, .. } => (*width, *height),
        }
    }

    /// Resize the target. Zero sizes (a minimized window) are ignored.
    pub fn resize(&mut self, device: &wgpu::Device, new_width: u32, new_height: u32) {
        if new_width == 0 || new_height == 0 {
            return;
        }
        match self {
            RenderTarget::Surface { surface, config } => {
                config.width = new_width;
                config.height = new_height;
                surface.configure(device, config);
            }
            RenderTarget::Offscreen { texture, width, height } => {
                *texture = create_offscreen_texture(device, new_width, new_height);
                *width = new_width;
                *height = new_height;
            }
        }
    }

    /// Configure the surface again at its current size.
    pub fn reconfigure(&mut self, device: &wgpu::Device) {
        if let RenderTarget::Surface { surface, config } = self {
            surface.configure(device, config);
        }
    }

    pub fn acquire(&self) -> Result<AcquiredFrame, GpuError> {
        match self {
            RenderTarget::Surface { surface, .. } => {
                let output = surface.get_current_texture()?;
                let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
                Ok(AcquiredFrame {
                    view,
                    surface_texture: Some(output),
                })
            }
            RenderTarget::Offscreen { texture, .. } => Ok(AcquiredFrame {
                view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
                surface_texture: None,
            }),
        }
    }
}

fn create_offscreen_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

/// Surface configuration preferring an sRGB format.
fn surface_config(
    caps: &wgpu::SurfaceCapabilities,
    width: u32,
    height: u32,
) -> Result<wgpu::SurfaceConfiguration, GpuError> {
    let format = caps
        .formats
        .iter()
        .find(|f| f.is_srgb())
        .or_else(|| caps.formats.first())
        .copied()
        .ok_or(GpuError::SurfaceUnsupported("no texture formats"))?;
    let alpha_mode = caps
        .alpha_modes
        .first()
        .copied()
        .ok_or(GpuError::SurfaceUnsupported("no alpha modes"))?;

    Ok(wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: width.max(1),
        height: height.max(1),
        present_mode: wgpu::PresentMode::AutoVsync,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(formats: Vec<wgpu::TextureFormat>, alpha_modes: Vec<wgpu::CompositeAlphaMode>) -> wgpu::SurfaceCapabilities {
        wgpu::SurfaceCapabilities {
            formats,
            present_modes: vec![wgpu::PresentMode::Fifo],
            alpha_modes,
            usages: wgpu::TextureUsages::RENDER_ATTACHMENT,
        }
    }

    #[test]
    fn test_surface_config_prefers_srgb() {
        let caps = caps(
            vec![wgpu::TextureFormat::Bgra8Unorm, wgpu::TextureFormat::Bgra8UnormSrgb],
            vec![wgpu::CompositeAlphaMode::Opaque],
        );
        let config = surface_config(&caps, 0, 600).unwrap();
        assert_eq!(config.format, wgpu::TextureFormat::Bgra8UnormSrgb);
        assert_eq!((config.width, config.height), (1, 600));
    }

    #[test]
    fn test_empty_capabilities_rejected() {
        let no_formats = caps(vec![], vec![wgpu::CompositeAlphaMode::Opaque]);
        assert!(matches!(
            surface_config(&no_formats, 800, 600),
            Err(GpuError::SurfaceUnsupported(_))
        ));

        let no_alpha = caps(vec![wgpu::TextureFormat::Bgra8Unorm], vec![]);
        assert!(matches!(
            surface_config(&no_alpha, 800, 600),
            Err(GpuError::SurfaceUnsupported(_))
        ));
    }
}
