#[cfg(feature = "metal")]
use gfx_backend_metal as back;

#[cfg(feature = "vulkan")]
use gfx_backend_vulkan as back;

mod error;
mod renderer;
use error::{call_failed, RendererError};
use renderer::Renderer;

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gfx_hal::{prelude::*, window, Backend, Features, Instance};
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};

const DIMS: window::Extent2D = window::Extent2D {
    width: 800,
    height: 600,
};
const TITLE: &str = "LearnOpenGL";

/// How often the event loop checks on the render thread when idle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type PendingResize = Mutex<Option<window::Extent2D>>;

fn main() {
    env_logger::init();
    let event_loop = EventLoop::new();
    let wb = winit::window::WindowBuilder::new()
        .with_title(TITLE)
        .with_inner_size(winit::dpi::Size::Physical(winit::dpi::PhysicalSize::new(
            DIMS.width,
            DIMS.height,
        )))
        .with_min_inner_size(winit::dpi::Size::Logical(winit::dpi::LogicalSize::new(
            64.0, 64.0,
        )));
    let window = match wb.build(&event_loop) {
        Ok(window) => window,
        Err(err) => {
            log::error!("{}", RendererError::Window(err.to_string()));
            process::exit(1);
        }
    };

    let should_close = Arc::new(AtomicBool::new(false));
    let resized: Arc<PendingResize> = Arc::new(Mutex::new(None));

    let handler = {
        let should_close = Arc::clone(&should_close);
        let resized = Arc::clone(&resized);
        thread::spawn(move || run_renderer(window, &should_close, &resized))
    };
    let mut handler = Some(handler);

    event_loop.run(move |event, _, control_flow| match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state: ElementState::Pressed,
                        virtual_keycode: Some(VirtualKeyCode::Escape),
                        ..
                    },
                ..
            } => {
                should_close.store(true, Ordering::Relaxed);
                log::info!("closed");
                let code = handler.take().map_or(0, join_renderer);
                if code != 0 {
                    process::exit(code);
                }
                *control_flow = ControlFlow::Exit;
            }
            WindowEvent::Resized(size) if size.width > 0 && size.height > 0 => {
                if let Ok(mut pending) = resized.lock() {
                    *pending = Some(window::Extent2D {
                        width: size.width,
                        height: size.height,
                    });
                }
            }
            _ => {}
        },
        Event::MainEventsCleared => {
            // The render thread only stops on its own when it failed.
            if handler.as_ref().map_or(false, JoinHandle::is_finished) {
                let code = handler.take().map_or(0, join_renderer);
                process::exit(code.max(1));
            }
            *control_flow = ControlFlow::WaitUntil(Instant::now() + POLL_INTERVAL);
        }
        _ => {}
    });
}

fn join_renderer(handler: JoinHandle<Result<(), RendererError>>) -> i32 {
    match handler.join() {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            log::error!("{}", err);
            1
        }
        Err(_) => {
            log::error!("render thread panicked");
            101
        }
    }
}

/// Owns every GPU object. Returns once `should_close` is set or on the first
/// fatal error.
fn run_renderer(
    window: winit::window::Window,
    should_close: &AtomicBool,
    resized: &PendingResize,
) -> Result<(), RendererError> {
    let instance =
        back::Instance::create(TITLE, 1).map_err(call_failed("Instance::create"))?;
    let mut surface =
        unsafe { instance.create_surface(&window) }.map_err(call_failed("create_surface"))?;

    let result = render_loop(&instance, &mut surface, should_close, resized);

    unsafe {
        instance.destroy_surface(surface);
    }
    result
}

fn render_loop<B: Backend, I: Instance<B>>(
    instance: &I,
    surface: &mut B::Surface,
    should_close: &AtomicBool,
    resized: &PendingResize,
) -> Result<(), RendererError> {
    let (adapter, family_idx) = instance
        .enumerate_adapters()
        .into_iter()
        .find_map(|adapter| {
            let idx = adapter.queue_families.iter().position(|family| {
                surface.supports_queue_family(family) && family.queue_type().supports_graphics()
            })?;
            Some((adapter, idx))
        })
        .ok_or(RendererError::NoGraphicsQueue)?;
    log::info!("adapter: {}", adapter.info.name);

    let family = &adapter.queue_families[family_idx];
    let mut gpu = unsafe {
        adapter
            .physical_device
            .open(&[(family, &[1.0])], Features::empty())
    }
    .map_err(call_failed("open"))?;

    let mut queue_group = gpu.queue_groups.pop().ok_or(RendererError::NoGraphicsQueue)?;
    let family_id = queue_group.family;
    let queue = queue_group
        .queues
        .first_mut()
        .ok_or(RendererError::NoGraphicsQueue)?;
    let device = gpu.device;

    let mut renderer = Renderer::new(surface, &adapter, &device, family_id, DIMS)?;

    #[cfg(debug_assertions)]
    let mut fps_counter = fps_counter::FPSCounter::new();
    while !should_close.load(Ordering::Relaxed) {
        let pending = resized.lock().ok().and_then(|mut pending| pending.take());
        if let Some(dims) = pending {
            renderer.resize(dims)?;
        }
        renderer.render(queue)?;
        #[cfg(debug_assertions)]
        log::trace!("fps: {}", fps_counter.tick());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_shutdown_exits_zero() {
        let handler = thread::spawn(|| Ok(()));
        assert_eq!(join_renderer(handler), 0);
    }

    #[test]
    fn loader_failure_exits_one() {
        let handler = thread::spawn(|| Err(RendererError::NoGraphicsQueue));
        assert_eq!(join_renderer(handler), 1);

        let handler = thread::spawn(|| Err(call_failed("Instance::create")("UnsupportedBackend")));
        assert_eq!(join_renderer(handler), 1);
    }

    #[test]
    fn render_thread_panic_exits_101() {
        let handler = thread::spawn(|| -> Result<(), RendererError> { panic!("device lost") });
        assert_eq!(join_renderer(handler), 101);
    }
}
