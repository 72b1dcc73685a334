// src/lib.rs

pub mod asset;
pub mod camera;
pub mod camera_controller;
pub mod composer;
pub mod config;
pub mod context;
pub mod culling;
pub mod error;
pub mod gltf_loader;
pub mod gpu;
pub mod input_system;
pub mod lighting;
pub mod pbr_materials;
pub mod renderer;
pub mod scene;
pub mod scheduler;
pub mod shaders;
pub mod time;
pub mod viewer;
pub mod viewport;

pub use asset::{AssetLoader, AssetSource, CancelToken, FileSource, LoadEvent, MemorySource, ModelAsset, RequestId};
pub use config::ViewerConfig;
pub use error::{Result, ViewerError};
pub use gpu::{CountingBackend, GpuBackend, GpuStats, WgpuBackend};
pub use input_system::{InputEvent, PointerButton, PointerKind};
pub use pbr_materials::{MaterialPreset, ShowroomPresets, SurfaceKind};
pub use viewer::{Lifecycle, Viewer};
pub use viewport::ViewportSize;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use glam::Vec2;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

const TITLE: &str = "Showroom Viewer";
/// Mouse pointer id; touch ids are offset past it.
const MOUSE_ID: u64 = 0;
const PIXELS_PER_NOTCH: f32 = 50.0;

/// Open a window and show `model` until it is closed.
pub fn run_native(model: &Path, config: ViewerConfig) -> Result<()> {
    let root = model.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let uri = model
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| ViewerError::load(model.display().to_string(), "not a file path"))?;

    let event_loop = EventLoop::new().map_err(|e| ViewerError::custom(format!("event loop: {e}")))?;
    let mut app = ShowroomApp {
        source: Arc::new(FileSource::new(root)),
        uri,
        config,
        window: None,
        viewer: None,
        cursor: Vec2::ZERO,
        failure: None,
    };
    event_loop
        .run_app(&mut app)
        .map_err(|e| ViewerError::custom(format!("event loop: {e}")))?;
    match app.failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// ----------------------------------------------------------------------------
// winit 0.30 host
// ----------------------------------------------------------------------------
struct ShowroomApp {
    source: Arc<FileSource>,
    uri: String,
    config: ViewerConfig,
    window: Option<Arc<Window>>,
    viewer: Option<Viewer>,
    /// Last cursor position, logical pixels.
    cursor: Vec2,
    failure: Option<ViewerError>,
}

impl ShowroomApp {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes().with_title(TITLE);
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|e| ViewerError::custom(format!("window: {e}")))?,
        );
        let backend = pollster::block_on(WgpuBackend::new(Arc::clone(&window)))?;

        let mut viewer = Viewer::mount(
            viewport_of(&window),
            Box::new(backend),
            self.source.clone(),
            &self.uri,
            self.config.clone(),
        );
        let title_window = Arc::clone(&window);
        viewer.on_load_progress(move |p| title_window.set_title(&format!("{TITLE} - loading {p:.0}%")));
        let title_window = Arc::clone(&window);
        let uri = self.uri.clone();
        viewer.on_ready(move || title_window.set_title(&format!("{TITLE} - {uri}")));
        viewer.on_error(|err| log::error!("viewer: {err}"));

        window.request_redraw();
        self.window = Some(window);
        self.viewer = Some(viewer);
        Ok(())
    }
}

impl ApplicationHandler for ShowroomApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.start(event_loop) {
            log::error!("could not start viewer: {err}");
            self.failure = Some(err);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.clone() else { return };
        if window.id() != window_id {
            return;
        }
        let scale = window.scale_factor();
        let Some(viewer) = self.viewer.as_mut() else { return };

        match event {
            WindowEvent::CloseRequested => {
                viewer.dispose();
                event_loop.exit();
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                viewer.resize(viewport_of(&window));
            }
            WindowEvent::CursorMoved { position, .. } => {
                let position = logical(position, scale);
                self.cursor = position;
                viewer.handle_input(InputEvent::PointerMove { id: MOUSE_ID, position });
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    MouseButton::Left => PointerButton::Primary,
                    MouseButton::Right => PointerButton::Secondary,
                    MouseButton::Middle => PointerButton::Middle,
                    _ => return,
                };
                let event = match state {
                    ElementState::Pressed => InputEvent::PointerDown {
                        id: MOUSE_ID,
                        kind: PointerKind::Mouse,
                        button,
                        position: self.cursor,
                    },
                    ElementState::Released => InputEvent::PointerUp { id: MOUSE_ID },
                };
                viewer.handle_input(event);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let notches = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -y,
                    MouseScrollDelta::PixelDelta(p) => -(p.y as f32) / PIXELS_PER_NOTCH,
                };
                viewer.handle_input(InputEvent::Wheel { delta_y: notches });
            }
            WindowEvent::Touch(touch) => {
                let id = touch.id + 1;
                let position = logical(touch.location, scale);
                let event = match touch.phase {
                    TouchPhase::Started => InputEvent::PointerDown {
                        id,
                        kind: PointerKind::Touch,
                        button: PointerButton::Primary,
                        position,
                    },
                    TouchPhase::Moved => InputEvent::PointerMove { id, position },
                    TouchPhase::Ended | TouchPhase::Cancelled => InputEvent::PointerUp { id },
                };
                viewer.handle_input(event);
            }
            WindowEvent::RedrawRequested => {
                viewer.frame(Instant::now());
                window.request_redraw();
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut viewer) = self.viewer.take() {
            viewer.dispose();
        }
    }
}

fn logical(position: PhysicalPosition<f64>, scale: f64) -> Vec2 {
    Vec2::new((position.x / scale) as f32, (position.y / scale) as f32)
}

fn viewport_of(window: &Window) -> ViewportSize {
    let scale = window.scale_factor();
    let logical = window.inner_size().to_logical::<f32>(scale);
    ViewportSize::new(logical.width, logical.height, scale as f32)
}
