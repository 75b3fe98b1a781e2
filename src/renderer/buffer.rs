use gfx_hal::{buffer, prelude::*, Backend, Limits};
use std::mem::{self, ManuallyDrop};
use std::ptr;

use crate::error::{call_failed, RendererError};

pub struct Buffer<'a, B: Backend, T> {
    pub device: &'a B::Device,
    pub buf: ManuallyDrop<B::Buffer>,
    pub content: &'a [T],
    pub len: u64,
}

impl<'a, B: Backend, T> Buffer<'a, B, T> {
    pub fn new(
        device: &'a B::Device,
        content: &'a [T],
        limits: &Limits,
    ) -> Result<Self, RendererError> {
        let buffer_stride = mem::size_of::<T>() as u64;
        let buffer_len = content.len() as u64 * buffer_stride;
        assert_ne!(buffer_len, 0);
        let memory_size = aligned_size(buffer_len, limits.non_coherent_atom_size as u64);

        let buf = unsafe { device.create_buffer(memory_size, buffer::Usage::VERTEX) }
            .map_err(call_failed("create_buffer"))?;

        Ok(Buffer {
            device,
            buf: ManuallyDrop::new(buf),
            content,
            len: buffer_len,
        })
    }
}

/// Rounds `len` up to a multiple of `atom`.
pub fn aligned_size(len: u64, atom: u64) -> u64 {
    let atom = atom.max(1);
    ((len + atom - 1) / atom) * atom
}

impl<'a, B: Backend, T> Drop for Buffer<'a, B, T> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_buffer(ManuallyDrop::into_inner(ptr::read(&self.buf)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::aligned_size;

    #[test]
    fn rounds_up_to_atom() {
        assert_eq!(aligned_size(36, 64), 64);
        assert_eq!(aligned_size(64, 64), 64);
        assert_eq!(aligned_size(65, 64), 128);
    }

    #[test]
    fn zero_atom_means_no_alignment() {
        assert_eq!(aligned_size(36, 0), 36);
        assert_eq!(aligned_size(36, 1), 36);
    }
}
