use crate::capture::completion::{MapCallback, MapConvention};
use crate::foundation::error::GpucapResult;

/// Everything the capture pipeline needs from a GPU backend.
///
/// All methods are called from the thread that owns GPU submission. Implementations must never
/// block inside `process_events`; map callbacks may fire from inside it or from any other
/// backend context.
pub trait ReadbackDevice {
    /// Source texture handle (a rendered frame in the device's native 4-channel BGRA order).
    type Texture;
    /// Host-mappable staging buffer handle.
    type Buffer;

    /// Callback shape this device uses for [`ReadbackDevice::map_read_async`].
    fn convention(&self) -> MapConvention;

    /// Allocate a `COPY_DST | MAP_READ` buffer of `size` bytes.
    fn create_buffer(&mut self, size: u64, label: &str) -> GpucapResult<Self::Buffer>;

    /// Release a buffer's GPU allocation. Pending maps on it are abandoned.
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// Record a texture-to-buffer copy with the given padded row stride and submit it.
    fn copy_texture_to_buffer(
        &mut self,
        texture: &Self::Texture,
        buffer: &Self::Buffer,
        width: u32,
        height: u32,
        bytes_per_row: u32,
    ) -> GpucapResult<()>;

    /// Request read access to the whole buffer; `callback` reports the outcome later.
    fn map_read_async(&mut self, buffer: &Self::Buffer, callback: MapCallback) -> GpucapResult<()>;

    /// Run one non-blocking round of device event processing.
    fn process_events(&mut self) -> GpucapResult<()>;

    /// Borrow the mapped bytes of a buffer whose map completed successfully.
    fn read_mapped(&self, buffer: &Self::Buffer, read: &mut dyn FnMut(&[u8])) -> GpucapResult<()>;

    fn unmap(&mut self, buffer: &Self::Buffer);
}
