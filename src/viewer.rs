// src/viewer.rs
//! Viewer lifecycle: mount, per-frame pump, model switching, teardown.
//!
//! A [`Viewer`] is one session. Everything it allocates (GPU resources, the loader worker, input
//! and resize bindings, observer callbacks) is released by [`Viewer::dispose`], which also runs
//! on drop. Remounting means building a new `Viewer`.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use showroom_viewer::{Viewer, ViewerConfig, ViewportSize, MemorySource, CountingBackend};
//! let source = Arc::new(MemorySource::new());
//! let mut viewer = Viewer::mount(
//!     ViewportSize::new(800.0, 600.0, 2.0),
//!     Box::new(CountingBackend::new()),
//!     source,
//!     "car.glb",
//!     ViewerConfig::default(),
//! );
//! viewer.on_ready(|| println!("model ready"));
//! viewer.frame(std::time::Instant::now());
//! viewer.dispose();
//! ```

use std::sync::Arc;
use std::time::Instant;

use crate::asset::{AssetLoader, AssetSource, AssetStatus, LoadEvent, ModelAsset};
use crate::camera::CameraState;
use crate::camera_controller::OrbitController;
use crate::composer::SceneComposer;
use crate::config::ViewerConfig;
use crate::error::{Result, ViewerError};
use crate::gpu::GpuBackend;
use crate::input_system::InputEvent;
use crate::lighting::LightRig;
use crate::pbr_materials::{MaterialEnhancer, ShowroomPresets};
use crate::renderer::Renderer;
use crate::scene::SceneGraph;
use crate::scheduler::RenderScheduler;
use crate::time::{DisplayDriver, FixedStepDriver, FrameDriver};
use crate::viewport::{ViewportResizeHandler, ViewportSize};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Unmounted,
    Mounting,
    Active,
    Unmounting,
}

type ProgressFn = Box<dyn FnMut(f32)>;
type ReadyFn = Box<dyn FnMut()>;
type ErrorFn = Box<dyn FnMut(&ViewerError)>;

#[derive(Default)]
struct Observers {
    progress: Option<ProgressFn>,
    ready: Option<ReadyFn>,
    error: Option<ErrorFn>,
}

impl Observers {
    fn progress(&mut self, percent: f32) {
        if let Some(f) = self.progress.as_mut() {
            f(percent);
        }
    }

    fn ready(&mut self) {
        if let Some(f) = self.ready.as_mut() {
            f();
        }
    }

    fn error(&mut self, err: &ViewerError) {
        if let Some(f) = self.error.as_mut() {
            f(err);
        }
    }
}

/// State the scheduler callback mutates once per step.
struct FramePump {
    orbit: OrbitController,
    viewport_height: f32,
}

/// GPU side of a session; absent when the viewer is inert.
struct GpuScene {
    composer: SceneComposer,
    renderer: Renderer,
}

struct Session {
    backend: Box<dyn GpuBackend>,
    gpu: Option<GpuScene>,
    loader: AssetLoader,
    pump: FramePump,
    scheduler: RenderScheduler<FramePump>,
    resize: ViewportResizeHandler,
    presets: ShowroomPresets,
    clear_color: [f32; 4],
    uri: String,
    /// Mount-time failure, reported on the first frame.
    deferred_error: Option<ViewerError>,
}

pub struct Viewer {
    lifecycle: Lifecycle,
    session: Option<Session>,
    observers: Observers,
}

impl Viewer {
    /// Create a session and start loading `model_uri`. Never fails: when the GPU side can't be
    /// built the viewer is inert and reports the error through `on_error` on the next frame.
    pub fn mount(
        surface: ViewportSize,
        mut backend: Box<dyn GpuBackend>,
        source: Arc<dyn AssetSource>,
        model_uri: &str,
        config: ViewerConfig,
    ) -> Self {
        log::debug!("viewer lifecycle: Unmounted -> Mounting");
        let config = config.sanitized();

        let mut camera = CameraState::default();
        if !surface.is_empty() {
            camera.set_aspect(surface.aspect());
        }
        let orbit = OrbitController::new(camera, config.orbit_settings());

        let (gpu, deferred_error) = match build_gpu(backend.as_mut(), orbit.state(), &config) {
            Ok(gpu) => (Some(gpu), None),
            Err(err) => {
                log::warn!("viewer is inert: {err}");
                (None, Some(err))
            }
        };

        let mut resize = ViewportResizeHandler::new(config.pixel_density_cap);
        resize.observe(surface);

        let mut loader = AssetLoader::new(source);
        let driver: Box<dyn FrameDriver> = match config.fixed_step {
            Some(step) => Box::new(FixedStepDriver::new(step)),
            None => Box::new(DisplayDriver::new()),
        };
        let mut scheduler = RenderScheduler::new(driver);
        if gpu.is_some() {
            loader.load(model_uri);
            if let Err(err) = scheduler.start(|pump: &mut FramePump, dt| {
                pump.orbit.update(dt, pump.viewport_height);
            }) {
                log::warn!("scheduler: {err}");
            }
        }

        let session = Session {
            backend,
            gpu,
            loader,
            pump: FramePump { orbit, viewport_height: surface.height.max(1.0) },
            scheduler,
            resize,
            presets: config.presets.clone(),
            clear_color: config.clear_color(),
            uri: model_uri.to_owned(),
            deferred_error,
        };
        log::info!("viewer mounted for `{model_uri}`");
        log::debug!("viewer lifecycle: Mounting -> Active");
        Self { lifecycle: Lifecycle::Active, session: Some(session), observers: Observers::default() }
    }

    pub fn on_load_progress<F: FnMut(f32) + 'static>(&mut self, f: F) {
        self.observers.progress = Some(Box::new(f));
    }

    pub fn on_ready<F: FnMut() + 'static>(&mut self, f: F) {
        self.observers.ready = Some(Box::new(f));
    }

    pub fn on_error<F: FnMut(&ViewerError) + 'static>(&mut self, f: F) {
        self.observers.error = Some(Box::new(f));
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Mounted without a GPU scene.
    pub fn is_inert(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.gpu.is_none())
    }

    pub fn asset(&self) -> Option<&ModelAsset> {
        self.session.as_ref().and_then(|s| s.loader.asset())
    }

    pub fn camera(&self) -> Option<&CameraState> {
        self.session.as_ref().map(|s| s.pump.orbit.state())
    }

    /// Composed scene (showroom root plus the attached model, if any).
    pub fn scene(&self) -> Option<&SceneGraph> {
        self.session.as_ref().and_then(|s| s.gpu.as_ref()).map(|g| g.composer.graph())
    }

    pub fn model_uri(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.uri.as_str())
    }

    /// Switch to another model. The request in flight (if any) is cancelled and its late
    /// events are dropped; the current model stays until the new one is attached.
    pub fn set_model(&mut self, uri: &str) -> Result<()> {
        let session = self.active_session()?;
        if session.gpu.is_none() {
            return Err(ViewerError::invalid_state("viewer is inert"));
        }
        session.uri = uri.to_owned();
        session.loader.load(uri);
        log::info!("switching model to `{uri}`");
        Ok(())
    }

    /// Reload the current model after a failed load. Returns whether a request was started.
    pub fn retry(&mut self) -> Result<bool> {
        let session = self.active_session()?;
        if session.gpu.is_none() {
            return Err(ViewerError::invalid_state("viewer is inert"));
        }
        let failed = matches!(session.loader.asset(), Some(a) if matches!(a.status, AssetStatus::Failed(_)));
        if !failed {
            return Ok(false);
        }
        let uri = session.uri.clone();
        session.loader.load(&uri);
        log::info!("retrying `{uri}`");
        Ok(true)
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        if let Ok(session) = self.active_session() {
            session.pump.orbit.handle_event(&event);
        }
    }

    pub fn resize(&mut self, size: ViewportSize) {
        if let Ok(session) = self.active_session() {
            session.resize.observe(size);
        }
    }

    /// One display refresh: drain loader events, apply resizes, step the camera and draw.
    /// Returns whether a frame was submitted.
    pub fn frame(&mut self, now: Instant) -> bool {
        if self.lifecycle != Lifecycle::Active {
            return false;
        }
        let Some(session) = self.session.as_mut() else { return false };
        let observers = &mut self.observers;

        if let Some(err) = session.deferred_error.take() {
            observers.error(&err);
        }

        let Some(gpu) = session.gpu.as_mut() else { return false };
        let backend = session.backend.as_mut();

        for event in session.loader.poll() {
            match event {
                LoadEvent::Progress(percent) => {
                    if percent >= 100.0 {
                        log::debug!("`{}` fetched and decoded", session.uri);
                    }
                    observers.progress(percent);
                }
                LoadEvent::Ready(mut model) => {
                    let report = MaterialEnhancer::new(&session.presets).enhance(&mut model);
                    log::debug!("enhanced `{}`: {report:?}", session.uri);
                    match gpu.composer.attach(backend, model) {
                        Ok(()) => {
                            log::info!("`{}` ready", session.uri);
                            observers.ready();
                        }
                        Err(err) => {
                            log::warn!("could not attach `{}`: {err}", session.uri);
                            observers.error(&err);
                        }
                    }
                }
                LoadEvent::Failed(err) => {
                    log::debug!("reporting failed load of `{}`", session.uri);
                    observers.error(&err);
                }
            }
        }

        if session.resize.apply(session.pump.orbit.state_mut(), backend) {
            if let Some(size) = session.resize.current() {
                session.pump.viewport_height = size.height.max(1.0);
            }
        }

        if !session.scheduler.is_running() {
            return false;
        }
        // Steps only move the camera; every refresh is drawn.
        let steps = session.scheduler.tick(&mut session.pump, now);
        log::trace!("{steps} camera step(s)");

        let loading = session.loader.asset().and_then(|a| match a.status {
            AssetStatus::Pending => Some(0.0),
            AssetStatus::Loading(p) => Some(p),
            _ => None,
        });
        let drawn = gpu
            .renderer
            .prepare(backend, session.pump.orbit.state(), gpu.composer.graph(), loading, session.clear_color)
            .and_then(|frame| backend.draw(&frame));
        match drawn {
            Ok(()) => true,
            Err(err) => {
                log::warn!("frame dropped: {err}");
                observers.error(&err);
                false
            }
        }
    }

    /// Tear the session down. Idempotent.
    pub fn dispose(&mut self) {
        let Some(mut session) = self.session.take() else { return };
        log::debug!("viewer lifecycle: Active -> Unmounting");
        self.lifecycle = Lifecycle::Unmounting;

        session.scheduler.stop();
        session.loader.cancel();
        session.pump.orbit.detach();
        session.resize.detach();
        self.observers = Observers::default();

        let backend = session.backend.as_mut();
        if let Some(gpu) = session.gpu.as_mut() {
            gpu.composer.release_all(backend);
            gpu.renderer.release(backend);
        }
        let leaked = backend.live_resources();
        if leaked > 0 {
            log::warn!("{leaked} GPU resource(s) still live after dispose");
        }
        drop(session);

        self.lifecycle = Lifecycle::Unmounted;
        log::info!("viewer disposed");
    }

    fn active_session(&mut self) -> Result<&mut Session> {
        match (self.lifecycle, self.session.as_mut()) {
            (Lifecycle::Active, Some(session)) => Ok(session),
            (state, _) => Err(ViewerError::invalid_state(format!("viewer is {state:?}"))),
        }
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn build_gpu(backend: &mut dyn GpuBackend, camera: &CameraState, config: &ViewerConfig) -> Result<GpuScene> {
    let mut composer = SceneComposer::new(backend, LightRig::showroom(), config.model_scale)?;
    let lighting = composer
        .lighting_buffer()
        .ok_or_else(|| ViewerError::invalid_state("lighting buffer missing"))?;
    match Renderer::new(backend, camera, lighting) {
        Ok(renderer) => Ok(GpuScene { composer, renderer }),
        Err(err) => {
            composer.release_all(backend);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{CancelToken, MemorySource};
    use crate::gltf_loader::fixtures;
    use crate::gpu::{CountingBackend, GpuStats};
    use crate::input_system::{PointerButton, PointerKind};
    use glam::Vec2;
    use parking_lot::Mutex;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Progress(f32),
        Ready,
        Error(ViewerError),
    }

    struct Harness {
        viewer: Viewer,
        source: Arc<MemorySource>,
        stats: Arc<Mutex<GpuStats>>,
        seen: Rc<RefCell<Vec<Seen>>>,
    }

    impl Harness {
        fn mount_with(backend: CountingBackend, source: MemorySource, uri: &str) -> Self {
            Self::mount_configured(backend, source, uri, ViewerConfig::default())
        }

        fn mount_configured(backend: CountingBackend, source: MemorySource, uri: &str, config: ViewerConfig) -> Self {
            let source = Arc::new(source);
            let stats = backend.stats();
            let mut viewer = Viewer::mount(
                ViewportSize::new(800.0, 600.0, 1.0),
                Box::new(backend),
                source.clone(),
                uri,
                config,
            );
            let seen = Rc::new(RefCell::new(Vec::new()));
            let s = seen.clone();
            viewer.on_load_progress(move |p| s.borrow_mut().push(Seen::Progress(p)));
            let s = seen.clone();
            viewer.on_ready(move || s.borrow_mut().push(Seen::Ready));
            let s = seen.clone();
            viewer.on_error(move |e| s.borrow_mut().push(Seen::Error(e.clone())));
            Self { viewer, source, stats, seen }
        }

        fn mount(uri: &str) -> Self {
            let source = MemorySource::new();
            source.insert("asset-A", fixtures::car_glb());
            source.insert("asset-B", fixtures::textured_glb());
            Self::mount_with(CountingBackend::new(), source, uri)
        }

        fn settled(&self) -> usize {
            self.seen.borrow().iter().filter(|s| !matches!(s, Seen::Progress(_))).count()
        }

        /// Pump frames until `n` terminal events (ready or error) were observed.
        fn pump_until_settled(&mut self, n: usize) {
            for _ in 0..1000 {
                self.viewer.frame(Instant::now());
                if self.settled() >= n {
                    return;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            panic!("viewer never settled: {:?}", self.seen.borrow());
        }

        fn ready_count(&self) -> usize {
            self.seen.borrow().iter().filter(|s| **s == Seen::Ready).count()
        }
    }

    #[test]
    fn loads_enhances_and_attaches() {
        let mut h = Harness::mount("asset-A");
        assert_eq!(h.viewer.lifecycle(), Lifecycle::Active);
        h.pump_until_settled(1);
        for _ in 0..3 {
            h.viewer.frame(Instant::now());
        }

        let seen = h.seen.borrow().clone();
        let progress: Vec<f32> = seen
            .iter()
            .filter_map(|s| if let Seen::Progress(p) = s { Some(*p) } else { None })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
        assert_eq!(progress.last(), Some(&100.0));
        let ready_at = seen.iter().position(|s| *s == Seen::Ready).unwrap();
        assert_eq!(seen[ready_at - 1], Seen::Progress(100.0));
        assert_eq!(h.ready_count(), 1);

        let scene = h.viewer.scene().unwrap();
        assert_eq!(scene.root.children.len(), 1);
        let body = scene.root.find("body").and_then(|n| n.mesh.as_ref()).unwrap();
        let preset = ShowroomPresets::default().body;
        assert_eq!(body.material.metalness(), preset.metalness);
        assert!(body.cast_shadow && body.receive_shadow);

        let stats = h.stats.lock();
        assert!(stats.frames > 0);
        // both meshes drawn, overlay gone
        assert_eq!(stats.last_frame.as_ref().map(|f| f.items.len()), Some(2));
    }

    #[test]
    fn switching_before_ready_reports_only_the_final_model() {
        let source = MemorySource::new().with_pacing(64, Duration::from_millis(5));
        source.insert("asset-A", fixtures::car_glb());
        source.insert("asset-B", fixtures::textured_glb());
        let mut h = Harness::mount_with(CountingBackend::new(), source, "asset-A");
        h.viewer.frame(Instant::now());
        h.viewer.set_model("asset-B").unwrap();
        h.pump_until_settled(1);
        std::thread::sleep(Duration::from_millis(50));
        for _ in 0..5 {
            h.viewer.frame(Instant::now());
        }

        assert_eq!(h.ready_count(), 1);
        assert_eq!(h.settled(), 1);
        let scene = h.viewer.scene().unwrap();
        assert!(scene.root.find("decal").is_some());
        assert!(scene.root.find("body").is_none());
    }

    #[test]
    fn failed_load_reports_and_retries() {
        let mut h = Harness::mount("missing.glb");
        h.pump_until_settled(1);
        assert!(matches!(&h.seen.borrow()[..], [.., Seen::Error(e)] if e.is_load()));
        assert_eq!(h.ready_count(), 0);

        h.source.insert("missing.glb", fixtures::car_glb());
        assert!(h.viewer.retry().unwrap());
        h.pump_until_settled(2);
        assert_eq!(h.ready_count(), 1);
        assert!(!h.viewer.retry().unwrap());
    }

    #[test]
    fn fixed_step_still_draws_every_refresh() {
        let source = MemorySource::new().with_pacing(16, Duration::from_millis(20));
        source.insert("asset-A", fixtures::car_glb());
        let config = ViewerConfig { fixed_step: Some(0.1), ..ViewerConfig::default() };
        let mut h = Harness::mount_configured(CountingBackend::new(), source, "asset-A", config);

        let start = Instant::now();
        for i in 0..6u64 {
            assert!(h.viewer.frame(start + Duration::from_millis(16 * i)));
            assert_eq!(h.stats.lock().frames, i as usize + 1);
        }
        let overlay = h.stats.lock().last_frame.as_ref().map(|f| f.items.iter().any(|d| d.count == 6));
        assert_eq!(overlay, Some(true));
    }

    #[test]
    fn texture_past_device_limit_is_reported_not_fatal() {
        let source = MemorySource::new();
        source.insert("asset-B", fixtures::textured_glb());
        let mut h = Harness::mount_with(CountingBackend::with_max_texture_dimension(1), source, "asset-B");
        h.pump_until_settled(1);

        assert!(matches!(&h.seen.borrow()[..], [.., Seen::Error(e)] if e.is_unsupported()));
        assert_eq!(h.ready_count(), 0);
        assert!(h.viewer.scene().is_some_and(|s| s.root.children.is_empty()));
        assert!(h.viewer.frame(Instant::now()));
        h.viewer.dispose();
        assert!(h.stats.lock().balanced());
    }

    #[test]
    fn panicking_source_surfaces_an_error() {
        struct Exploding;
        impl AssetSource for Exploding {
            fn fetch(&self, _: &str, _: &mut dyn FnMut(u64, u64), _: &CancelToken) -> Result<Vec<u8>> {
                panic!("bad source");
            }
        }

        let mut viewer = Viewer::mount(
            ViewportSize::new(800.0, 600.0, 1.0),
            Box::new(CountingBackend::new()),
            Arc::new(Exploding),
            "asset-A",
            ViewerConfig::default(),
        );
        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = errors.clone();
        viewer.on_error(move |err| e.borrow_mut().push(err.clone()));
        for _ in 0..1000 {
            viewer.frame(Instant::now());
            if !errors.borrow().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(matches!(&errors.borrow()[..], [err] if err.is_load()));
        assert!(matches!(viewer.asset().map(|a| &a.status), Some(AssetStatus::Failed(_))));
        assert!(viewer.retry().unwrap());
    }

    #[test]
    fn every_acquisition_is_released() {
        let mut h = Harness::mount("asset-A");
        h.pump_until_settled(1);
        h.viewer.set_model("asset-B").unwrap();
        h.pump_until_settled(2);
        h.viewer.set_model("nope").unwrap();
        h.pump_until_settled(3);
        assert!(!h.stats.lock().live.is_empty());

        h.viewer.dispose();
        let stats = h.stats.lock();
        assert!(stats.balanced(), "{} acquired, {} released", stats.acquired, stats.released);
        assert_eq!(stats.failed_releases, 0);
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut h = Harness::mount("asset-A");
        h.viewer.frame(Instant::now());
        h.viewer.dispose();
        let released = h.stats.lock().released;
        h.viewer.dispose();
        assert_eq!(h.stats.lock().released, released);
        assert_eq!(h.stats.lock().failed_releases, 0);
        assert_eq!(h.viewer.lifecycle(), Lifecycle::Unmounted);

        assert!(!h.viewer.frame(Instant::now()));
        assert!(h.viewer.set_model("asset-B").is_err());
        h.viewer.handle_input(InputEvent::Wheel { delta_y: 1.0 });
        h.viewer.resize(ViewportSize::new(10.0, 10.0, 1.0));
        assert!(h.stats.lock().balanced());
    }

    #[test]
    fn late_events_never_reach_a_disposed_viewer() {
        let source = MemorySource::new().with_pacing(64, Duration::from_millis(5));
        source.insert("asset-A", fixtures::car_glb());
        let mut h = Harness::mount_with(CountingBackend::new(), source, "asset-A");
        h.viewer.frame(Instant::now());
        h.viewer.dispose();
        std::thread::sleep(Duration::from_millis(50));
        h.viewer.frame(Instant::now());
        assert_eq!(h.settled(), 0);
    }

    #[test]
    fn allocation_failure_at_mount_makes_the_viewer_inert() {
        let source = MemorySource::new();
        source.insert("asset-A", fixtures::car_glb());
        let mut h = Harness::mount_with(CountingBackend::failing_after(2), source, "asset-A");
        assert!(h.viewer.is_inert());
        assert!(h.stats.lock().live.is_empty());

        assert!(!h.viewer.frame(Instant::now()));
        assert!(!h.viewer.frame(Instant::now()));
        let seen = h.seen.borrow().clone();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Seen::Error(e) if e.is_exhaustion()));
        assert!(h.viewer.set_model("asset-A").is_err());

        h.viewer.dispose();
        assert!(h.stats.lock().balanced());
    }

    #[test]
    fn input_and_resize_reach_the_camera() {
        let mut h = Harness::mount("asset-A");
        h.viewer.frame(Instant::now());
        let polar = h.viewer.camera().unwrap().polar;

        h.viewer.resize(ViewportSize::new(1000.0, 500.0, 3.0));
        h.viewer.handle_input(InputEvent::PointerDown {
            id: 1,
            kind: PointerKind::Mouse,
            button: PointerButton::Primary,
            position: Vec2::new(100.0, 100.0),
        });
        h.viewer.handle_input(InputEvent::PointerMove { id: 1, position: Vec2::new(100.0, 400.0) });
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(2));
            h.viewer.frame(Instant::now());
        }

        let camera = h.viewer.camera().unwrap();
        assert!((camera.projection.aspect - 2.0).abs() < 1e-6);
        assert_ne!(camera.polar, polar);
        assert!(camera.polar >= std::f32::consts::FRAC_PI_4 - 1e-5);
        assert_eq!(h.stats.lock().surface_size, (2000, 1000));
    }
}
