use gfx_hal::{adapter::Adapter, format as f, prelude::*, pso, window, Backend};

use crate::error::{call_failed, RendererError};

pub struct Swapchain<'a, B: Backend> {
    device: &'a B::Device,
    adapter: &'a Adapter<B>,
    pub viewport: pso::Viewport,
    pub dims: window::Extent2D,
    pub surface: &'a mut B::Surface,
    pub format: f::Format,
    /// False while the surface has no usable extent (e.g. minimised).
    pub configured: bool,
}

impl<'a, B: Backend> Swapchain<'a, B> {
    pub fn new(
        device: &'a B::Device,
        surface: &'a mut B::Surface,
        adapter: &'a Adapter<B>,
        dims: window::Extent2D,
    ) -> Result<Self, RendererError> {
        let formats = surface.supported_formats(&adapter.physical_device);
        let format = formats.map_or(f::Format::Rgba8Srgb, |formats| {
            formats
                .iter()
                .find(|format| format.base_format().1 == f::ChannelType::Srgb)
                .copied()
                .or_else(|| formats.first().copied())
                .unwrap_or(f::Format::Rgba8Srgb)
        });
        log::info!("surface format: {:?}", format);

        let viewport = pso::Viewport {
            rect: pso::Rect {
                x: 0,
                y: 0,
                w: dims.width as _,
                h: dims.height as _,
            },
            depth: 0.0..1.0,
        };

        let mut swapchain = Swapchain {
            device,
            surface,
            adapter,
            viewport,
            format,
            dims,
            configured: false,
        };

        swapchain.recreate()?;
        Ok(swapchain)
    }

    /// Follows the window to its new size; the viewport tracks the extent.
    pub fn resize(&mut self, dims: window::Extent2D) -> Result<(), RendererError> {
        log::debug!("resize to {}x{}", dims.width, dims.height);
        self.dims = dims;
        self.recreate()
    }

    /// Reconfigures the surface. The device must be idle.
    pub fn recreate(&mut self) -> Result<(), RendererError> {
        let caps = self.surface.capabilities(&self.adapter.physical_device);

        let mut swap_config = window::SwapchainConfig::from_caps(&caps, self.format, self.dims);
        swap_config.present_mode = window::PresentMode::FIFO;
        let extent = swap_config.extent;
        if !usable_extent(extent) {
            log::debug!(
                "surface extent is {}x{}, swapchain left unconfigured",
                extent.width,
                extent.height
            );
            if self.configured {
                unsafe { self.surface.unconfigure_swapchain(self.device) };
                self.configured = false;
            }
            return Ok(());
        }

        unsafe {
            self.surface
                .configure_swapchain(self.device, swap_config)
                .map_err(call_failed("configure_swapchain"))?;
        }
        self.configured = true;

        self.viewport.rect.w = extent.width as _;
        self.viewport.rect.h = extent.height as _;
        Ok(())
    }
}

/// A swapchain cannot be built for a surface with no area.
pub fn usable_extent(extent: window::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

impl<'a, B: Backend> Drop for Swapchain<'a, B> {
    fn drop(&mut self) {
        if self.configured {
            unsafe { self.surface.unconfigure_swapchain(self.device) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::usable_extent;
    use gfx_hal::window::Extent2D;

    #[test]
    fn minimised_surface_is_not_usable() {
        assert!(!usable_extent(Extent2D {
            width: 0,
            height: 0
        }));
        assert!(!usable_extent(Extent2D {
            width: 800,
            height: 0
        }));
        assert!(!usable_extent(Extent2D {
            width: 0,
            height: 600
        }));
    }

    #[test]
    fn window_sized_surface_is_usable() {
        assert!(usable_extent(Extent2D {
            width: 800,
            height: 600
        }));
        assert!(usable_extent(Extent2D {
            width: 1,
            height: 1
        }));
    }
}
