use bevy::{
    log::error,
    render::{
        render_resource::{encase::internal::WriteInto, *},
        renderer::{RenderDevice, RenderQueue},
    },
};
use std::ops::Deref;

/// Encodes the value with the memory layout of a uniform block.
fn uniform_bytes<T: ShaderType + WriteInto>(value: &T) -> Vec<u8> {
    let mut buffer = encase::UniformBuffer::new(Vec::new());

    if let Err(error) = buffer.write(value) {
        error!("Failed to encode a terrain uniform: {error}");
    }

    buffer.into_inner()
}

/// A GPU buffer that remembers the CPU side value of its contents.
pub struct GpuBuffer<T> {
    buffer: Buffer,
    value: Option<T>,
}

impl<T> GpuBuffer<T> {
    pub fn empty_sized_labeled<'a>(
        label: impl Into<Option<&'a str>>,
        device: &RenderDevice,
        size: BufferAddress,
        usage: BufferUsages,
    ) -> Self {
        let buffer = device.create_buffer(&BufferDescriptor {
            label: label.into(),
            size,
            usage,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            value: None,
        }
    }

    /// Overwrites the start of the buffer. The queue stages the bytes, so commands that
    /// are still in flight keep reading the previous contents.
    pub fn update_bytes(&self, queue: &RenderQueue, bytes: &[u8]) {
        if !bytes.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytes);
        }
    }
}

impl<T: ShaderType + WriteInto> GpuBuffer<T> {
    pub fn empty_labeled<'a>(
        label: impl Into<Option<&'a str>>,
        device: &RenderDevice,
        usage: BufferUsages,
    ) -> Self {
        Self::empty_sized_labeled(label, device, T::min_size().get(), usage)
    }

    pub fn create_labeled<'a>(
        label: impl Into<Option<&'a str>>,
        device: &RenderDevice,
        value: T,
        usage: BufferUsages,
    ) -> Self {
        let buffer = device.create_buffer_with_data(&BufferInitDescriptor {
            label: label.into(),
            usage,
            contents: &uniform_bytes(&value),
        });

        Self {
            buffer,
            value: Some(value),
        }
    }

    pub fn set_value(&mut self, value: T) {
        self.value = Some(value);
    }

    pub fn update(&mut self, queue: &RenderQueue) {
        if let Some(value) = &self.value {
            self.update_bytes(queue, &uniform_bytes(value));
        }
    }
}

impl<T> Deref for GpuBuffer<T> {
    type Target = Buffer;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl<'a, T> IntoBinding<'a> for &'a GpuBuffer<T> {
    #[inline]
    fn into_binding(self) -> BindingResource<'a> {
        self.buffer.as_entire_binding()
    }
}
