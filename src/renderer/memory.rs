use gfx_hal::{adapter::MemoryType, memory as m, prelude::*, Backend, MemoryTypeId};
use std::iter;
use std::mem::ManuallyDrop;
use std::ptr;

use super::buffer::Buffer;
use crate::error::{call_failed, RendererError};

/// A vertex buffer together with the host-visible memory backing it.
pub struct Memory<'a, B: Backend, T> {
    pub buffer: ManuallyDrop<Buffer<'a, B, T>>,
    memory: ManuallyDrop<B::Memory>,
}

impl<'a, B: Backend, T> Memory<'a, B, T> {
    pub fn new(
        mut buffer: Buffer<'a, B, T>,
        memory_types: &[MemoryType],
    ) -> Result<Self, RendererError> {
        let memory = Self::allocate_gpu_memory(&mut buffer, memory_types)?;
        Ok(Memory {
            buffer: ManuallyDrop::new(buffer),
            memory,
        })
    }

    /// Allocates memory for `buffer`, binds it and uploads the buffer content.
    pub fn allocate_gpu_memory(
        buffer: &mut Buffer<'a, B, T>,
        memory_types: &[MemoryType],
    ) -> Result<ManuallyDrop<B::Memory>, RendererError> {
        let device = buffer.device;
        unsafe {
            let buffer_req = device.get_buffer_requirements(&buffer.buf);
            let upload_type =
                upload_type(memory_types, &buffer_req).ok_or(RendererError::NoUploadMemory)?;
            let memory = device
                .allocate_memory(upload_type, buffer_req.size)
                .map_err(call_failed("allocate_memory"))?;

            if let Err(err) = Self::upload(device, buffer, &memory) {
                device.free_memory(memory);
                return Err(err);
            }
            Ok(ManuallyDrop::new(memory))
        }
    }

    unsafe fn upload(
        device: &B::Device,
        buffer: &mut Buffer<'a, B, T>,
        memory: &B::Memory,
    ) -> Result<(), RendererError> {
        device
            .bind_buffer_memory(memory, 0, &mut buffer.buf)
            .map_err(call_failed("bind_buffer_memory"))?;
        let mapping = device
            .map_memory(memory, m::Segment::ALL)
            .map_err(call_failed("map_memory"))?;
        ptr::copy_nonoverlapping(
            buffer.content.as_ptr() as *const u8,
            mapping,
            buffer.len as usize,
        );
        let flushed = device
            .flush_mapped_memory_ranges(iter::once((memory, m::Segment::ALL)))
            .map_err(call_failed("flush_mapped_memory_ranges"));
        device.unmap_memory(memory);
        flushed
    }
}

/// First memory type allowed by `buffer_req` that the CPU can write to.
pub fn upload_type(
    properties: &[MemoryType],
    buffer_req: &m::Requirements,
) -> Option<MemoryTypeId> {
    properties
        .iter()
        .enumerate()
        .position(|(id, mem_type)| {
            buffer_req.type_mask & (1 << id) != 0
                && mem_type.properties.contains(m::Properties::CPU_VISIBLE)
        })
        .map(MemoryTypeId::from)
}

impl<'a, B: Backend, T> Drop for Memory<'a, B, T> {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.buffer);
            self.buffer
                .device
                .free_memory(ManuallyDrop::into_inner(ptr::read(&self.memory)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_type(properties: m::Properties) -> MemoryType {
        MemoryType {
            properties,
            heap_index: 0,
        }
    }

    fn requirements() -> m::Requirements {
        m::Requirements {
            size: 64,
            alignment: 4,
            type_mask: !0,
        }
    }

    #[test]
    fn picks_first_cpu_visible_type() {
        let types = [
            memory_type(m::Properties::DEVICE_LOCAL),
            memory_type(m::Properties::CPU_VISIBLE | m::Properties::COHERENT),
            memory_type(m::Properties::CPU_VISIBLE),
        ];
        assert_eq!(upload_type(&types, &requirements()), Some(MemoryTypeId(1)));
    }

    #[test]
    fn honours_type_mask() {
        let types = [
            memory_type(m::Properties::CPU_VISIBLE),
            memory_type(m::Properties::CPU_VISIBLE),
        ];
        let mut req = requirements();
        req.type_mask = 0b10;
        assert_eq!(upload_type(&types, &req), Some(MemoryTypeId(1)));
    }

    #[test]
    fn none_when_nothing_is_host_visible() {
        let types = [memory_type(m::Properties::DEVICE_LOCAL)];
        assert_eq!(upload_type(&types, &requirements()), None);
    }
}
