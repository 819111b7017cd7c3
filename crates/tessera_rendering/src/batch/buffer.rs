//! GPU buffer backends.
//!
//! The batch manager owns exactly one raw, byte-addressed buffer. Backends
//! implement [`GpuBuffer`]; [`HostBuffer`] keeps the bytes in system memory
//! for headless runs and tests, `WgpuBuffer` (feature `wgpu`) is a storage
//! buffer on a real device.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{RenderError, RenderResult};

/// Opaque identity of the current GPU buffer.
///
/// The id changes whenever the buffer is recreated; every batch must be
/// rebound to the new handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    /// Generation of the buffer, bumped on every resize.
    pub id: u64,
    /// Size of the buffer in bytes.
    pub size: u64,
}

/// A growable, byte-addressed GPU buffer.
pub trait GpuBuffer: Send + Sync {
    /// Returns the current size in bytes.
    fn size(&self) -> u64;

    /// Grows the buffer to `new_size` bytes, preserving its contents.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::BufferResize`] if the backend cannot allocate.
    fn resize(&mut self, new_size: u64) -> RenderResult<()>;

    /// Writes `data` at `offset`. Writes past the end are dropped.
    fn write(&mut self, offset: u64, data: &[u8]);

    /// Returns the handle to bind batches to.
    fn handle(&self) -> BufferHandle;
}

/// A GPU buffer mirrored in system memory.
///
/// The bytes sit behind a shared lock so a [`HostBufferReader`] taken
/// before the buffer moves into the pipeline can still read them back.
#[derive(Debug, Default)]
pub struct HostBuffer {
    bytes: Arc<RwLock<Vec<u8>>>,
    generation: u64,
    /// Largest size a resize may reach, None for unlimited.
    resize_limit: Option<u64>,
    writes: u64,
}

/// Read-only view of a [`HostBuffer`]'s bytes.
#[derive(Clone, Debug)]
pub struct HostBufferReader {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl HostBufferReader {
    /// Copies `len` bytes at `offset`.
    #[must_use]
    pub fn read(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        read_range(&self.bytes.read(), offset, len).map(<[u8]>::to_vec)
    }

    /// Returns the current size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.read().len() as u64
    }
}

fn read_range(bytes: &[u8], offset: u64, len: usize) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    bytes.get(start..start.checked_add(len)?)
}

impl HostBuffer {
    /// Creates a zero-filled buffer.
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(vec![0; usize::try_from(size).unwrap_or(usize::MAX)])),
            generation: 0,
            resize_limit: None,
            writes: 0,
        }
    }

    /// Makes every resize beyond `limit` bytes fail, like an out-of-memory device.
    #[must_use]
    pub fn with_resize_limit(mut self, limit: u64) -> Self {
        self.resize_limit = Some(limit);
        self
    }

    /// Returns a reader that stays valid after the buffer is moved.
    #[must_use]
    pub fn reader(&self) -> HostBufferReader {
        HostBufferReader {
            bytes: Arc::clone(&self.bytes),
        }
    }

    /// Copies `len` bytes at `offset`.
    #[must_use]
    pub fn read(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        read_range(&self.bytes.read(), offset, len).map(<[u8]>::to_vec)
    }

    /// Returns the number of writes so far.
    #[inline]
    #[must_use]
    pub const fn write_count(&self) -> u64 {
        self.writes
    }
}

impl GpuBuffer for HostBuffer {
    fn size(&self) -> u64 {
        self.bytes.read().len() as u64
    }

    fn resize(&mut self, new_size: u64) -> RenderResult<()> {
        let fail = |reason: &str| RenderError::BufferResize {
            requested: new_size,
            reason: reason.to_string(),
        };
        if self.resize_limit.is_some_and(|limit| new_size > limit) {
            return Err(fail("host buffer resize limit reached"));
        }
        let new_len = usize::try_from(new_size).map_err(|_| fail("size exceeds address space"))?;
        let mut bytes = self.bytes.write();
        if new_len < bytes.len() {
            return Err(fail("shrinking is not supported"));
        }
        bytes.resize(new_len, 0);
        self.generation += 1;
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) {
        let Some(start) = usize::try_from(offset).ok() else {
            return;
        };
        let mut bytes = self.bytes.write();
        match bytes.get_mut(start..start.saturating_add(data.len())) {
            Some(dst) => {
                dst.copy_from_slice(data);
                self.writes += 1;
            }
            None => tracing::error!(offset, len = data.len(), "write past the end of the gpu buffer"),
        }
    }

    fn handle(&self) -> BufferHandle {
        BufferHandle {
            id: self.generation,
            size: self.size(),
        }
    }
}

#[cfg(feature = "wgpu")]
pub use self::wgpu_backend::WgpuBuffer;

#[cfg(feature = "wgpu")]
mod wgpu_backend {
    use std::sync::Arc;

    use super::{BufferHandle, GpuBuffer};
    use crate::error::{RenderError, RenderResult};

    /// A storage buffer on a wgpu device.
    pub struct WgpuBuffer {
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        buffer: wgpu::Buffer,
        generation: u64,
    }

    impl WgpuBuffer {
        const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
            .union(wgpu::BufferUsages::COPY_DST)
            .union(wgpu::BufferUsages::COPY_SRC);

        /// Creates a buffer of `size` bytes.
        #[must_use]
        pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, size: u64) -> Self {
            let buffer = Self::create(&device, size);
            Self {
                device,
                queue,
                buffer,
                generation: 0,
            }
        }

        /// Returns the wgpu buffer to bind.
        #[must_use]
        pub fn buffer(&self) -> &wgpu::Buffer {
            &self.buffer
        }

        fn create(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("tessera_instance_data"),
                size,
                usage: Self::USAGE,
                mapped_at_creation: false,
            })
        }
    }

    impl GpuBuffer for WgpuBuffer {
        fn size(&self) -> u64 {
            self.buffer.size()
        }

        fn resize(&mut self, new_size: u64) -> RenderResult<()> {
            let old_size = self.buffer.size();
            if new_size < old_size {
                return Err(RenderError::BufferResize {
                    requested: new_size,
                    reason: "shrinking is not supported".to_string(),
                });
            }
            if new_size > self.device.limits().max_buffer_size {
                return Err(RenderError::BufferResize {
                    requested: new_size,
                    reason: "exceeds device max_buffer_size".to_string(),
                });
            }

            let replacement = Self::create(&self.device, new_size);
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("tessera_instance_data_grow"),
                });
            encoder.copy_buffer_to_buffer(&self.buffer, 0, &replacement, 0, old_size);
            self.queue.submit(Some(encoder.finish()));

            self.buffer = replacement;
            self.generation += 1;
            Ok(())
        }

        fn write(&mut self, offset: u64, data: &[u8]) {
            if offset + data.len() as u64 > self.buffer.size() {
                tracing::error!(offset, len = data.len(), "write past the end of the gpu buffer");
                return;
            }
            self.queue.write_buffer(&self.buffer, offset, data);
        }

        fn handle(&self) -> BufferHandle {
            BufferHandle {
                id: self.generation,
                size: self.buffer.size(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_buffer_resize_keeps_contents() {
        let mut buffer = HostBuffer::new(16);
        buffer.write(4, &[1, 2, 3, 4]);
        let before = buffer.handle();

        buffer.resize(64).unwrap();
        assert_eq!(buffer.size(), 64);
        assert_eq!(buffer.read(4, 4), Some(vec![1, 2, 3, 4]));
        assert_ne!(buffer.handle(), before);
    }

    #[test]
    fn test_host_buffer_rejects_out_of_bounds() {
        let mut buffer = HostBuffer::new(8);
        buffer.write(6, &[1, 2, 3, 4]);
        assert_eq!(buffer.write_count(), 0);
        assert!(buffer.read(6, 4).is_none());
        assert!(buffer.resize(4).is_err());
    }

    #[test]
    fn test_reader_sees_later_writes() {
        let mut buffer = HostBuffer::new(8);
        let reader = buffer.reader();
        buffer.write(0, &[9, 9]);
        buffer.resize(16).unwrap();
        assert_eq!(reader.size(), 16);
        assert_eq!(reader.read(0, 2), Some(vec![9, 9]));
    }

    #[test]
    fn test_host_buffer_resize_limit() {
        let mut buffer = HostBuffer::new(8).with_resize_limit(32);
        assert!(buffer.resize(32).is_ok());
        assert!(matches!(
            buffer.resize(64),
            Err(RenderError::BufferResize { requested: 64, .. })
        ));
    }
}
