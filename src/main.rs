// =============================================================================
// VULKAN MODEL VIEWER
// =============================================================================
//
// Loads a textured OBJ model and spins it in a window.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit ApplicationHandler (window, input, redraw requests)      │
// │    └── FrameLoop (acquire / submit / present / recreate)        │
// │          └── VulkanRenderer (PresentTarget)                     │
// │                ├── static scene: mesh, texture, shaders         │
// │                └── SurfaceState: swapchain-sized groups         │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Acquire swapchain image
// 3. Update that image's uniform buffer
// 4. Submit its pre-recorded command buffer
// 5. Present, rebuilding the surface objects if they went stale
//
// =============================================================================

mod assets;
mod backend;
mod config;
mod frame;

use anyhow::{Context, Result};
use backend::{VulkanDevice, VulkanRenderer};
use config::Config;
use frame::{FrameLoop, FrameOutcome, SurfaceSize};
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    let (config, config_error) = Config::load_or_default(CONFIG_PATH);

    init_logging(&config)?;
    log::info!("Starting Vulkan model viewer");
    if let Some(e) = config_error {
        log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e);
    }
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {}, {} frames in flight",
        config.graphics.present_mode,
        config.graphics.frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Anything fatal inside the event loop ends up here
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally redirected into the configured log file.
///
/// `RUST_LOG` overrides the default `info` level.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        let file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and with it the surface)
/// must go before the window it was created from.
struct App {
    config: Config,

    frame_loop: Option<FrameLoop<VulkanRenderer>>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // First fatal error, returned from main
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            frame_loop: None,
            window: None,
            is_fullscreen,
            fatal: None,
            frame_count: 0,
            last_fps_update: Instant::now(),
            last_frame_time: Instant::now(),
        }
    }

    // =========================================================================
    // VULKAN INITIALIZATION
    // =========================================================================

    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        let validation = self.config.debug.validation_layers && cfg!(debug_assertions);
        let device = VulkanDevice::new(&self.config.window.title, validation, window)?;

        let size = SurfaceSize::from(window.inner_size());
        let renderer = VulkanRenderer::new(device, &self.config, size)
            .context("Failed to set up renderer")?;

        let frame_loop = FrameLoop::new(renderer, size, self.config.graphics.frames_in_flight);
        log::info!("Frame loop ready with {} slots", frame_loop.frames_in_flight());
        self.frame_loop = Some(frame_loop);
        Ok(())
    }

    /// Record the error and stop the event loop
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal: {:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(frame_loop) = &self.frame_loop {
            if let Err(e) = frame_loop.target().device().wait_idle() {
                log::warn!("Device did not go idle at shutdown: {}", e);
            }
        }
        event_loop.exit();
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            // The window reports its new size with a Resized event
            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(frame_loop) = &mut self.frame_loop {
                    frame_loop.resize(SurfaceSize::from(size));
                    if frame_loop.is_deferred() {
                        log::info!("Window minimized, rendering paused");
                    } else if frame_loop.is_stale() {
                        log::debug!("Swapchain marked for recreation");
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(frame_loop) = &mut self.frame_loop else {
                    return;
                };

                match frame_loop.tick() {
                    Ok(FrameOutcome::Presented { .. }) => self.update_fps(),
                    Ok(FrameOutcome::Skipped | FrameOutcome::Deferred) => {}
                    Err(e) => {
                        let phase = frame_loop.phase();
                        let error = anyhow::Error::new(e).context(format!("Frame failed in {:?}", phase));
                        self.fail(event_loop, error);
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() {
                    return;
                }
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        log::info!("ESC pressed, exiting...");
                        self.shutdown(event_loop);
                    }
                    PhysicalKey::Code(KeyCode::F11) => self.toggle_fullscreen(),
                    _ => {}
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(frame_loop) = self.frame_loop.take() {
            log::info!(
                "Presented {} frames, recreated the swapchain {} times",
                frame_loop.frames_presented(),
                frame_loop.recreations()
            );
            drop(frame_loop);
        }
        self.window = None;

        log::info!("Cleanup complete");
    }
}
