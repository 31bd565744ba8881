//! Simulation builder and windowed runner.

use std::sync::Arc;

use glam::Vec2;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use crate::compute::{Kernel, WorkGroupSize};
use crate::error::{ConfigError, GpuError, PipelineError, SimulationError};
use crate::gpu::GpuContext;
use crate::render::BlendMode;
use crate::scheduler::FrameScheduler;
use crate::spawn::{Population, Preset};
use crate::time::Time;

/// Default number of particles.
pub const DEFAULT_PARTICLE_COUNT: u32 = 60_000;
/// Default window size in pixels.
pub const DEFAULT_WINDOW_SIZE: (u32, u32) = (2300, 1300);

/// A particle simulation builder.
///
/// Use method chaining to configure, then call `.run()` to start.
///
/// ```ignore
/// Simulation::new()
///     .with_preset(Preset::CollidingGalaxies)
///     .with_particle_count(20_000)
///     .run()?;
/// ```
#[derive(Debug, Clone)]
pub struct Simulation {
    particle_count: u32,
    group: (u32, u32),
    preset: Preset,
    seed: Option<u64>,
    window_size: (u32, u32),
    title: String,
    kernel: Kernel,
    blend: BlendMode,
}

impl Simulation {
    pub fn new() -> Self {
        Self {
            particle_count: DEFAULT_PARTICLE_COUNT,
            group: (WorkGroupSize::DEFAULT.x(), WorkGroupSize::DEFAULT.y()),
            preset: Preset::default(),
            seed: None,
            window_size: DEFAULT_WINDOW_SIZE,
            title: "Starfield".to_string(),
            kernel: Kernel::gravity(),
            blend: BlendMode::Alpha,
        }
    }

    pub fn with_particle_count(mut self, count: u32) -> Self {
        self.particle_count = count;
        self
    }

    /// Work items per group along x and y.
    pub fn with_workgroup_size(mut self, x: u32, y: u32) -> Self {
        self.group = (x, y);
        self
    }

    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    /// Fix the RNG seed. Without one, each run draws a new population.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    /// The initial population this simulation would start from.
    pub fn population(&self) -> Population {
        let seed = self.seed.unwrap_or_else(time_seed);
        let extent = Vec2::new(self.window_size.0 as f32, self.window_size.1 as f32);
        Population::preset(self.preset, self.particle_count, extent, seed)
    }

    /// Run the simulation. Blocks until the window is closed or a frame
    /// fails.
    pub fn run(self) -> Result<(), SimulationError> {
        if self.particle_count == 0 {
            return Err(PipelineError::from(ConfigError::EmptyPopulation).into());
        }
        let group = WorkGroupSize::new(self.group.0, self.group.1).map_err(PipelineError::from)?;

        log::info!(
            "Starting {} with {} particles ({} preset)",
            self.title,
            self.particle_count,
            self.preset
        );

        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let mut app = App {
            config: self,
            group,
            window: None,
            scheduler: None,
            time: Time::new(),
            error: None,
        };
        event_loop.run_app(&mut app)?;

        match app.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

fn time_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42)
}

struct App {
    config: Simulation,
    group: WorkGroupSize,
    window: Option<Arc<Window>>,
    scheduler: Option<FrameScheduler<GpuContext>>,
    time: Time,
    error: Option<SimulationError>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: SimulationError) {
        self.error = Some(err);
        event_loop.exit();
    }

    fn setup(&mut self, event_loop: &ActiveEventLoop) -> Result<(), SimulationError> {
        let (width, height) = self.config.window_size;
        let window_attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(width, height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);
        self.window = Some(window.clone());

        let context = pollster::block_on(GpuContext::windowed(window))?;
        let seed = self.config.population().records();
        let scheduler = FrameScheduler::new(
            context,
            &seed,
            self.config.kernel.clone(),
            self.group,
            self.config.blend,
        )?;
        self.scheduler = Some(scheduler);
        self.time = Time::new();
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(scheduler) = &mut self.scheduler else {
            return;
        };
        let (elapsed, delta) = self.time.update();

        match scheduler.step(elapsed, delta) {
            Ok(()) => {}
            Err(GpuError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                log::warn!("Surface lost or outdated; reconfiguring");
                scheduler.device_mut().reconfigure();
            }
            Err(GpuError::Surface(wgpu::SurfaceError::Timeout)) => {
                log::warn!("Timed out acquiring the next frame; skipping it");
            }
            Err(err) => {
                self.fail(event_loop, err.into());
                return;
            }
        }

        if self.time.fps_updated() {
            log::info!("{:.1} FPS ({} frames)", self.time.fps(), self.time.frame());
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(err) = self.setup(event_loop) {
                self.fail(event_loop, err);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(physical_size) => {
                if let Some(scheduler) = &mut self.scheduler {
                    scheduler
                        .device_mut()
                        .resize(physical_size.width, physical_size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let sim = Simulation::new();
        assert_eq!(sim.particle_count, 60_000);
        assert_eq!(sim.group, (256, 1));
        assert_eq!(sim.window_size, (2300, 1300));
        assert_eq!(sim.preset, Preset::RandomSpace);
    }

    #[test]
    fn test_population_follows_builder() {
        let sim = Simulation::new()
            .with_particle_count(10)
            .with_window_size(100, 50)
            .with_preset(Preset::RandomSpace)
            .with_seed(11);
        let records = sim.population().records();
        assert_eq!(records.len(), 10);
        assert!(records.iter().all(|r| r.position().x < 100.0 && r.position().y < 50.0));
        assert_eq!(records, sim.population().records());
    }

    #[test]
    fn test_zero_particles_rejected_before_window() {
        let result = Simulation::new().with_particle_count(0).run();
        assert!(matches!(
            result,
            Err(SimulationError::Pipeline(PipelineError::Config(ConfigError::EmptyPopulation)))
        ));
    }

    #[test]
    fn test_zero_work_group_rejected_before_window() {
        let result = Simulation::new().with_workgroup_size(0, 1).run();
        assert!(matches!(
            result,
            Err(SimulationError::Pipeline(PipelineError::Config(ConfigError::ZeroWorkGroup { .. })))
        ));
    }

    #[test]
    fn test_overflowing_work_group_rejected_before_window() {
        let result = Simulation::new().with_workgroup_size(65_536, 65_536).run();
        assert!(matches!(
            result,
            Err(SimulationError::Pipeline(PipelineError::Config(ConfigError::WorkGroupOverflow { .. })))
        ));
    }
}
