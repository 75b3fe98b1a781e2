use gfx_hal::{
    adapter::{self, MemoryType},
    buffer as b, command, format as f, image as i, pass, pool,
    prelude::*,
    queue::{family::QueueFamilyId, Submission},
    window, Backend, Limits,
};

use std::borrow::Borrow;
use std::iter;
use std::mem::ManuallyDrop;
use std::thread;
use std::time::Duration;

mod buffer;
mod memory;
mod pipeline;
pub mod shader;
mod swapchain;
mod vertex;

use crate::error::{call_failed, RendererError};
use buffer::Buffer;
use memory::Memory;
use pipeline::Pipeline;
use shader::ShaderStage;
use std::ptr;
use swapchain::Swapchain;
use vertex::{Vertex, FIRST_TRIANGLE, SECOND_TRIANGLE};

const FRAMES_IN_FLIGHT: usize = 2;
const CLEAR_COLOR: [f32; 4] = [0.2, 0.3, 0.3, 1.0];
/// Back-off between attempts to reconfigure a minimised surface.
const UNCONFIGURED_WAIT: Duration = Duration::from_millis(16);

/// One vertex buffer and the program that draws it. A program that failed to
/// compile or link is `None` and its triangle is skipped.
struct Triangle<'a, B: Backend> {
    memory: Memory<'a, B, Vertex>,
    pipeline: Option<Pipeline<'a, B>>,
}

pub struct Renderer<'a, B: Backend> {
    frame: usize,
    device: &'a B::Device,
    command_buffers: Vec<B::CommandBuffer>,
    framebuffers: Vec<Option<B::Framebuffer>>,
    submission_complete_semaphores: Vec<B::Semaphore>,
    submission_complete_fences: Vec<B::Fence>,
    command_pool: ManuallyDrop<B::CommandPool>,
    triangles: ManuallyDrop<Vec<Triangle<'a, B>>>,
    swapchain: ManuallyDrop<Swapchain<'a, B>>,
    render_pass: ManuallyDrop<B::RenderPass>,
}

impl<'a, B> Renderer<'a, B>
where
    B: Backend,
{
    pub fn new(
        surface: &'a mut B::Surface,
        adapter: &'a adapter::Adapter<B>,
        device: &'a B::Device,
        family: QueueFamilyId,
        init_dims: window::Extent2D,
    ) -> Result<Self, RendererError> {
        let memory_types = adapter.physical_device.memory_properties().memory_types;
        let limits = adapter.physical_device.limits();

        let swapchain = Swapchain::new(device, surface, adapter, init_dims)?;
        let render_pass = Self::create_render_pass(device, swapchain.format)?;

        let triangles = Self::create_triangles(device, &render_pass, &limits, &memory_types)
            .and_then(|triangles| {
                Self::create_command_pool(device, family).map(|pool| (triangles, pool))
            });
        let (triangles, mut command_pool) = match triangles {
            Ok(built) => built,
            Err(err) => {
                unsafe { device.destroy_render_pass(render_pass) };
                return Err(err);
            }
        };

        let command_buffers = Self::allocate_command_buffer(&mut command_pool, FRAMES_IN_FLIGHT);
        let sync = Self::create_semaphores(device, FRAMES_IN_FLIGHT).and_then(|semaphores| {
            match Self::create_fences(device, FRAMES_IN_FLIGHT) {
                Ok(fences) => Ok((semaphores, fences)),
                Err(err) => {
                    for s in semaphores {
                        unsafe { device.destroy_semaphore(s) };
                    }
                    Err(err)
                }
            }
        });
        let (submission_complete_semaphores, submission_complete_fences) = match sync {
            Ok(sync) => sync,
            Err(err) => {
                unsafe {
                    device.destroy_command_pool(command_pool);
                    device.destroy_render_pass(render_pass);
                }
                return Err(err);
            }
        };

        Ok(Renderer {
            device,
            submission_complete_semaphores,
            submission_complete_fences,
            command_pool: ManuallyDrop::new(command_pool),
            triangles: ManuallyDrop::new(triangles),
            swapchain: ManuallyDrop::new(swapchain),
            render_pass: ManuallyDrop::new(render_pass),
            command_buffers,
            framebuffers: (0..FRAMES_IN_FLIGHT).map(|_| None).collect(),
            frame: 0,
        })
    }

    fn create_triangles(
        device: &'a B::Device,
        render_pass: &B::RenderPass,
        limits: &Limits,
        memory_types: &[MemoryType],
    ) -> Result<Vec<Triangle<'a, B>>, RendererError> {
        let [first_program, second_program] = Self::create_programs(device, render_pass);
        let mut triangles = Vec::with_capacity(2);
        for (content, pipeline) in vec![
            (&FIRST_TRIANGLE, first_program),
            (&SECOND_TRIANGLE, second_program),
        ] {
            let vertex_buffer = Buffer::new(device, &content[..], limits)?;
            let memory = Memory::new(vertex_buffer, memory_types)?;
            triangles.push(Triangle { memory, pipeline });
        }
        Ok(triangles)
    }

    /// Builds the pink and the yellow program. Both share the vertex shader;
    /// failures are logged and leave the program empty.
    fn create_programs(
        device: &'a B::Device,
        render_pass: &B::RenderPass,
    ) -> [Option<Pipeline<'a, B>>; 2] {
        let vs = shader::compile(ShaderStage::Vertex, shader::VERTEX_SHADER)
            .map_err(|err| log::error!("{}", err))
            .ok();

        let link = |fs_source: &str| {
            let fs = shader::compile(ShaderStage::Fragment, fs_source)
                .map_err(|err| log::error!("{}", err))
                .ok();
            match (&vs, fs) {
                (Some(vs), Some(fs)) => Pipeline::new::<Vertex>(device, vs, &fs, render_pass)
                    .map_err(|err| log::error!("shader program linking failed: {}", err))
                    .ok(),
                _ => None,
            }
        };

        [
            link(shader::FIRST_FRAGMENT_SHADER),
            link(shader::SECOND_FRAGMENT_SHADER),
        ]
    }

    /// Waits for the device to idle and drops every framebuffer, so the
    /// swapchain images can be replaced.
    fn release_framebuffers(&mut self) -> Result<(), RendererError> {
        self.device
            .wait_idle()
            .map_err(call_failed("wait_idle"))?;
        for framebuffer in self.framebuffers.iter_mut() {
            if let Some(framebuffer) = framebuffer.take() {
                unsafe { self.device.destroy_framebuffer(framebuffer) };
            }
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<(), RendererError> {
        self.release_framebuffers()?;
        self.swapchain.recreate()
    }

    /// Reconfigures the swapchain for a new window size.
    pub fn resize(&mut self, dims: window::Extent2D) -> Result<(), RendererError> {
        self.release_framebuffers()?;
        self.swapchain.resize(dims)
    }

    pub fn render(&mut self, queue: &mut B::CommandQueue) -> Result<(), RendererError> {
        if !self.swapchain.configured {
            self.recreate_swapchain()?;
            if !self.swapchain.configured {
                thread::sleep(UNCONFIGURED_WAIT);
                return Ok(());
            }
        }

        let surface_image = unsafe {
            match self.swapchain.surface.acquire_image(!0) {
                Ok((image, _)) => image,
                Err(err) => {
                    log::debug!("acquire_image failed: {:?}", err);
                    return self.recreate_swapchain();
                }
            }
        };

        let frame_idx = self.frame % FRAMES_IN_FLIGHT;

        unsafe {
            let fence = &self.submission_complete_fences[frame_idx];
            self.device
                .wait_for_fence(fence, !0)
                .map_err(call_failed("wait_for_fence"))?;
            self.device
                .reset_fence(fence)
                .map_err(call_failed("reset_fence"))?;
            if let Some(framebuffer) = self.framebuffers[frame_idx].take() {
                self.device.destroy_framebuffer(framebuffer);
            }
        }

        let frame_buffer = unsafe {
            self.device.create_framebuffer(
                &self.render_pass,
                iter::once(surface_image.borrow()),
                i::Extent {
                    width: self.swapchain.viewport.rect.w as u32,
                    height: self.swapchain.viewport.rect.h as u32,
                    depth: 1,
                },
            )
        }
        .map_err(call_failed("create_framebuffer"))?;

        let cmd_buffer = &mut self.command_buffers[frame_idx];
        unsafe {
            cmd_buffer.reset(false);
            cmd_buffer.begin_primary(command::CommandBufferFlags::ONE_TIME_SUBMIT);
            cmd_buffer.set_viewports(0, &[self.swapchain.viewport.clone()]);
            cmd_buffer.set_scissors(0, &[self.swapchain.viewport.rect]);
            cmd_buffer.begin_render_pass(
                &self.render_pass,
                &frame_buffer,
                self.swapchain.viewport.rect,
                &[command::ClearValue {
                    color: command::ClearColor {
                        float32: CLEAR_COLOR,
                    },
                }],
                command::SubpassContents::Inline,
            );
            for triangle in self.triangles.iter() {
                if let Some(pipeline) = &triangle.pipeline {
                    let vertex_count = triangle.memory.buffer.content.len() as u32;
                    cmd_buffer.bind_graphics_pipeline(&pipeline.pipeline);
                    cmd_buffer.bind_vertex_buffers(
                        0,
                        iter::once((&*triangle.memory.buffer.buf, b::SubRange::WHOLE)),
                    );
                    cmd_buffer.draw(0..vertex_count, 0..1);
                }
            }
            cmd_buffer.end_render_pass();
            cmd_buffer.finish();

            let submission = Submission {
                command_buffers: iter::once(&*cmd_buffer),
                wait_semaphores: None,
                signal_semaphores: iter::once(&self.submission_complete_semaphores[frame_idx]),
            };

            queue.submit(
                submission,
                Some(&self.submission_complete_fences[frame_idx]),
            );

            let result = queue.present_surface(
                &mut self.swapchain.surface,
                surface_image,
                Some(&self.submission_complete_semaphores[frame_idx]),
            );
            self.framebuffers[frame_idx] = Some(frame_buffer);

            if let Err(err) = result {
                log::debug!("present_surface failed: {:?}", err);
                self.recreate_swapchain()?;
            }
        }

        self.frame += 1;
        Ok(())
    }

    fn create_render_pass(
        device: &B::Device,
        format: f::Format,
    ) -> Result<B::RenderPass, RendererError> {
        let attachment = pass::Attachment {
            format: Some(format),
            samples: 1,
            ops: pass::AttachmentOps::new(
                pass::AttachmentLoadOp::Clear,
                pass::AttachmentStoreOp::Store,
            ),
            stencil_ops: pass::AttachmentOps::DONT_CARE,
            layouts: i::Layout::Undefined..i::Layout::Present,
        };

        let subpass = pass::SubpassDesc {
            colors: &[(0, i::Layout::ColorAttachmentOptimal)],
            depth_stencil: None,
            inputs: &[],
            resolves: &[],
            preserves: &[],
        };

        unsafe { device.create_render_pass(&[attachment], &[subpass], &[]) }
            .map_err(call_failed("create_render_pass"))
    }

    fn create_command_pool(
        device: &B::Device,
        family: QueueFamilyId,
    ) -> Result<B::CommandPool, RendererError> {
        let flags = pool::CommandPoolCreateFlags::RESET_INDIVIDUAL;
        unsafe { device.create_command_pool(family, flags) }
            .map_err(call_failed("create_command_pool"))
    }

    fn allocate_command_buffer(
        command_pool: &mut B::CommandPool,
        frames_in_flight: usize,
    ) -> Vec<B::CommandBuffer> {
        (0..frames_in_flight)
            .map(|_| unsafe { command_pool.allocate_one(command::Level::Primary) })
            .collect()
    }

    fn create_semaphores(
        device: &B::Device,
        frames_in_flight: usize,
    ) -> Result<Vec<B::Semaphore>, RendererError> {
        create_all(
            frames_in_flight,
            || device.create_semaphore().map_err(call_failed("create_semaphore")),
            |s| unsafe { device.destroy_semaphore(s) },
        )
    }

    fn create_fences(
        device: &B::Device,
        frames_in_flight: usize,
    ) -> Result<Vec<B::Fence>, RendererError> {
        create_all(
            frames_in_flight,
            || device.create_fence(true).map_err(call_failed("create_fence")),
            |f| unsafe { device.destroy_fence(f) },
        )
    }
}

/// Creates `count` objects; if one fails, those already made are handed to
/// `destroy` before the error is returned.
fn create_all<T, E>(
    count: usize,
    mut create: impl FnMut() -> Result<T, E>,
    mut destroy: impl FnMut(T),
) -> Result<Vec<T>, E> {
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        match create() {
            Ok(object) => created.push(object),
            Err(err) => {
                created.into_iter().for_each(&mut destroy);
                return Err(err);
            }
        }
    }
    Ok(created)
}

impl<'a, B: Backend> Drop for Renderer<'a, B> {
    fn drop(&mut self) {
        let device = &self.device;
        if let Err(err) = device.wait_idle() {
            log::error!("wait_idle before teardown failed: {:?}", err);
        }
        unsafe {
            for framebuffer in self.framebuffers.drain(..).flatten() {
                device.destroy_framebuffer(framebuffer);
            }
            ManuallyDrop::drop(&mut self.triangles);
            device.destroy_command_pool(ManuallyDrop::into_inner(ptr::read(&self.command_pool)));
            for s in self.submission_complete_semaphores.drain(..) {
                device.destroy_semaphore(s);
            }

            for f in self.submission_complete_fences.drain(..) {
                device.destroy_fence(f);
            }

            device.destroy_render_pass(ManuallyDrop::into_inner(ptr::read(&self.render_pass)));
            ManuallyDrop::drop(&mut self.swapchain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::create_all;
    use std::cell::RefCell;

    #[test]
    fn creates_the_requested_count() {
        let mut next = 0;
        let made = create_all(
            2,
            || -> Result<u32, ()> {
                next += 1;
                Ok(next)
            },
            |_| panic!("nothing should be destroyed"),
        );
        assert_eq!(made, Ok(vec![1, 2]));
    }

    #[test]
    fn failure_destroys_what_was_already_made() {
        let destroyed = RefCell::new(vec![]);
        let mut next = 0;
        let made = create_all(
            3,
            || {
                next += 1;
                if next == 3 {
                    Err("out of memory")
                } else {
                    Ok(next)
                }
            },
            |object| destroyed.borrow_mut().push(object),
        );
        assert_eq!(made, Err("out of memory"));
        assert_eq!(destroyed.into_inner(), vec![1, 2]);
    }

    #[test]
    fn first_failure_destroys_nothing() {
        let mut destroyed = 0;
        let made = create_all(2, || Err::<u32, _>(()), |_| destroyed += 1);
        assert_eq!(made, Err(()));
        assert_eq!(destroyed, 0);
    }
}
