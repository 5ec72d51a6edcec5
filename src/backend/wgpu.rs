use crate::capture::completion::{MapCallback, MapConvention};
use crate::capture::device::ReadbackDevice;
use crate::foundation::error::{GpucapError, GpucapResult};

/// [`ReadbackDevice`] over a `wgpu` device and queue.
///
/// Map completions arrive through `Buffer::map_async` closures, which wgpu runs from inside
/// `Device::poll`, so they follow the descriptor convention with process-events delivery.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Open the first high-performance adapter without a surface.
    pub fn headless() -> GpucapResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                GpucapError::gpu("no gpu adapter available")
            }
            other => GpucapError::gpu(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("gpucap_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GpucapError::gpu(format!("wgpu request_device failed: {e:?}")))?;

        tracing::info!(adapter = ?adapter.get_info().name, "opened headless wgpu device");
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// A BGRA render target that can be copied out by the capture pipeline.
    pub fn create_render_target(&self, width: u32, height: u32) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gpucap_render_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    /// Fill `texture` with a solid color through a cleared render pass.
    pub fn clear_texture(&self, texture: &wgpu::Texture, color: wgpu::Color) {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gpucap_clear_encoder"),
            });
        {
            let _rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gpucap_clear_rp"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

impl ReadbackDevice for WgpuDevice {
    type Texture = wgpu::Texture;
    type Buffer = wgpu::Buffer;

    fn convention(&self) -> MapConvention {
        MapConvention::Descriptor
    }

    fn create_buffer(&mut self, size: u64, label: &str) -> GpucapResult<wgpu::Buffer> {
        let max = self.device.limits().max_buffer_size;
        if size > max {
            return Err(GpucapError::gpu(format!(
                "readback buffer of {size} bytes exceeds device limit {max}"
            )));
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn destroy_buffer(&mut self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn copy_texture_to_buffer(
        &mut self,
        texture: &wgpu::Texture,
        buffer: &wgpu::Buffer,
        width: u32,
        height: u32,
        bytes_per_row: u32,
    ) -> GpucapResult<()> {
        match texture.format() {
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {}
            other => {
                return Err(GpucapError::validation(format!(
                    "capture expects a bgra8 texture, got {other:?}"
                )));
            }
        }
        if width > texture.width() || height > texture.height() {
            return Err(GpucapError::validation(format!(
                "capture extent {width}x{height} exceeds texture {}x{}",
                texture.width(),
                texture.height()
            )));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gpucap_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn map_read_async(&mut self, buffer: &wgpu::Buffer, callback: MapCallback) -> GpucapResult<()> {
        if callback.convention() != self.convention() {
            return Err(GpucapError::gpu(format!(
                "wgpu delivers {:?} callbacks, got {:?}",
                self.convention(),
                callback.convention()
            )));
        }
        buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |res| {
                callback.complete(res.map_err(|e| e.to_string()));
            });
        Ok(())
    }

    fn process_events(&mut self) -> GpucapResult<()> {
        self.device
            .poll(wgpu::PollType::Poll)
            .map(|_| ())
            .map_err(|e| GpucapError::gpu(format!("wgpu poll failed: {e:?}")))
    }

    fn read_mapped(&self, buffer: &wgpu::Buffer, read: &mut dyn FnMut(&[u8])) -> GpucapResult<()> {
        let mapped = buffer.slice(..).get_mapped_range();
        read(&mapped);
        Ok(())
    }

    fn unmap(&mut self, buffer: &wgpu::Buffer) {
        buffer.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::session::CaptureSession;
    use crate::config::CaptureConfig;
    use crate::foundation::core::FrameNumber;

    fn device_or_skip() -> Option<WgpuDevice> {
        match WgpuDevice::headless() {
            Ok(d) => Some(d),
            Err(e) => {
                eprintln!("skipping: {e}");
                None
            }
        }
    }

    #[test]
    fn async_capture_of_cleared_target_swaps_to_rgba() {
        let Some(device) = device_or_skip() else {
            return;
        };
        let texture = device.create_render_target(70, 3);
        device.clear_texture(
            &texture,
            wgpu::Color {
                r: 1.0,
                g: 0.0,
                b: 0.0,
                a: 1.0,
            },
        );

        let mut session = CaptureSession::new(device, CaptureConfig::default()).unwrap();
        let outcome = session.submit_capture(&texture, 70, 3, FrameNumber(0)).unwrap();
        assert!(outcome.is_submitted());
        let report = session.flush();
        assert_eq!(report.abandoned, 0);

        let frame = session.try_get_frame().unwrap();
        assert_eq!(frame.data.len(), 70 * 3 * 4);
        assert_eq!(frame.pixel(69, 2), Some([255, 0, 0, 255]));
    }

    #[test]
    fn rejects_non_bgra_textures() {
        let Some(mut device) = device_or_skip() else {
            return;
        };
        let texture = device.device().create_texture(&wgpu::TextureDescriptor {
            label: None,
            size: wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let buffer = device.create_buffer(256 * 4, "t").unwrap();
        assert!(
            device
                .copy_texture_to_buffer(&texture, &buffer, 4, 4, 256)
                .is_err()
        );
    }
}
