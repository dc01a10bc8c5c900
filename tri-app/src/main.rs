#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod fps;
mod shaders;

use std::{
    fs::{self, File},
    sync::Arc,
    time::Instant,
};

use clap::Parser;
use rgpu::{
    ash::vk,
    device::Device,
    frame::{RenderLoop, VulkanFrame},
    instance::Instance,
    surface::Surface,
};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::ControlFlow,
    window::{Window as WinitWindow, WindowAttributes},
};

use fps::{FrameCounter, fps_title};
use shaders::ShaderBinaries;

const APP_NAME: &str = "tri-app";

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Debug,
    Info,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            //Off never installs a subscriber, this arm is unreachable in practice
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    #[default]
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for rgpu::log::VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => rgpu::log::VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => rgpu::log::VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => rgpu::log::VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => rgpu::log::VulkanLogLevel::Error,
        }
    }
}

#[derive(clap::Parser, Debug)]
struct CliArgs {
    /// Window width in pixels
    #[arg(long, default_value_t = 640, value_parser = clap::value_parser!(u32).range(1..))]
    width: u32,
    /// Window height in pixels
    #[arg(long, default_value_t = 480, value_parser = clap::value_parser!(u32).range(1..))]
    height: u32,
    /// Enable the Vulkan debug messenger and at least debug-level tracing
    #[arg(long)]
    debug: bool,
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    /// Lowest validation message severity forwarded when --debug is set
    #[arg(short, long, default_value = "warning")]
    graphics_debug_level: CliVulkanLogLevel,
}

impl CliArgs {
    fn effective_tracing_level(&self) -> TracingLogLevel {
        if self.debug
            && !matches!(
                self.tracing_log_level,
                TracingLogLevel::Trace | TracingLogLevel::Debug
            )
        {
            TracingLogLevel::Debug
        } else {
            self.tracing_log_level
        }
    }

    fn vulkan_log_level(&self) -> Option<rgpu::log::VulkanLogLevel> {
        self.debug.then(|| self.graphics_debug_level.into())
    }
}

fn main() -> eyre::Result<()> {
    let app_dirs = directories::ProjectDirs::from("", "rgpu", APP_NAME);

    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let cli_args = CliArgs::parse();
    let tracing_level = cli_args.effective_tracing_level();

    if tracing_level != TracingLogLevel::Off {
        fs::create_dir_all(&log_dir)?;

        let mut log_file_path = log_dir.clone();
        log_file_path.push("log-file");
        log_file_path.set_extension("txt");
        let log_file = File::create(&log_file_path)?;
        let file_log = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false);

        println!("log_file_path: {}", log_file_path.display());
        println!("cli_args: {:#?}", cli_args);

        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                        tracing_level.into(),
                    ))
                    .and_then(file_log),
            )
            .init();
    }

    let shaders = ShaderBinaries::load()?;

    let event_loop = winit::event_loop::EventLoop::builder().build()?;

    //SAFETY: Loads vulkan via libloading. We trust the system loader.
    let instance = Arc::new(
        unsafe { Instance::new(APP_NAME, cli_args.vulkan_log_level(), &event_loop) }?,
    );

    let mut app = AppRunner(Some(App::Initializing(InitializingState {
        instance,
        shaders,
        window_size: LogicalSize {
            width: cli_args.width,
            height: cli_args.height,
        },
    })));

    tracing::trace!("Entering main event loop");
    Ok(event_loop.run_app(&mut app)?)
}

type Renderer = RenderLoop<VulkanFrame<WinitWindow>>;

/// Surface, device, chain, pipeline and frame resources for `win`.
fn create_renderer(
    instance: &Arc<Instance>,
    win: &Arc<WinitWindow>,
    shaders: &ShaderBinaries,
) -> eyre::Result<Renderer> {
    let _span = tracing::debug_span!("create_renderer").entered();

    //SAFETY: The surface ends up inside the renderer, which RunningState drops
    //before the window and tears down on suspend.
    let surface = Arc::new(unsafe { Surface::new(instance, Arc::clone(win)) }?);
    let device = Arc::new(Device::create_compatible(instance, &surface)?);

    let win_size = win.inner_size();
    let requested_extent = vk::Extent2D {
        width: win_size.width,
        height: win_size.height,
    };
    let frame = VulkanFrame::new(
        &device,
        &surface,
        requested_extent,
        &shaders.vertex,
        &shaders.fragment,
    )?;
    Ok(RenderLoop::new(frame))
}

#[derive(Debug)]
struct AppRunner(Option<App>);

#[derive(Debug)]
enum App {
    Running(RunningState),
    Initializing(InitializingState),
    Suspended(SuspendedState),
    Exiting(ExitingState),
}

#[derive(Debug)]
struct InitializingState {
    instance: Arc<Instance>,
    shaders: ShaderBinaries,
    window_size: LogicalSize<u32>,
}
#[derive(Debug)]
struct RunningState {
    // Declared first: every GPU object goes before the window.
    renderer: Renderer,
    frame_counter: FrameCounter,
    win: Arc<WinitWindow>,
    shaders: ShaderBinaries,
    instance: Arc<Instance>,
}
#[derive(Debug)]
struct SuspendedState {
    win: Arc<WinitWindow>,
    shaders: ShaderBinaries,
    instance: Arc<Instance>,
}
#[derive(Debug)]
struct ExitingState {}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        assert!(self.0.is_some());
        if let Some(initializing_state) = self.take_initializing() {
            event_loop.set_control_flow(ControlFlow::Poll);
            let win = Arc::new(
                match event_loop.create_window(
                    WindowAttributes::default()
                        .with_title(APP_NAME)
                        .with_inner_size(initializing_state.window_size)
                        .with_resizable(false),
                ) {
                    Ok(w) => w,
                    Err(e) => {
                        tracing::error!("Error while creating window: {}", e);
                        self.transition_to_exiting("Initializing", event_loop);
                        return;
                    }
                },
            );
            let renderer = match create_renderer(
                &initializing_state.instance,
                &win,
                &initializing_state.shaders,
            ) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Error while creating renderer: {}", e);
                    self.transition_to_exiting("Initializing", event_loop);
                    return;
                }
            };
            tracing::debug!("State transition: Initializing -> Running");
            self.set_running(RunningState {
                renderer,
                frame_counter: FrameCounter::new(Instant::now()),
                win,
                shaders: initializing_state.shaders,
                instance: initializing_state.instance,
            });
        } else if let Some(suspended_state) = self.take_suspended() {
            event_loop.set_control_flow(ControlFlow::Poll);
            let renderer = match create_renderer(
                &suspended_state.instance,
                &suspended_state.win,
                &suspended_state.shaders,
            ) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Error while recreating renderer: {}", e);
                    self.transition_to_exiting("Suspended", event_loop);
                    return;
                }
            };
            tracing::debug!("State transition: Suspended -> Running");
            self.set_running(RunningState {
                renderer,
                frame_counter: FrameCounter::new(Instant::now()),
                win: suspended_state.win,
                shaders: suspended_state.shaders,
                instance: suspended_state.instance,
            });
        } else if self.is_exiting() {
            tracing::warn!("resumed() called while in Exiting state");
        }
    }

    fn suspended(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        assert!(self.0.is_some());
        if let Some(running_state) = self.take_running() {
            event_loop.set_control_flow(ControlFlow::Wait);
            let RunningState {
                renderer,
                frame_counter: _,
                win,
                shaders,
                instance,
            } = running_state;

            // Waits for idle, then releases everything down to the surface.
            drop(renderer);

            tracing::debug!("State transition: Running -> Suspended");
            self.set_suspended(SuspendedState { win, shaders, instance });
        }
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        window_id: winit::window::WindowId,
        window_event: winit::event::WindowEvent,
    ) {
        assert!(self.0.is_some());
        if !self.is_running_window(window_id) {
            return;
        }

        match window_event {
            WindowEvent::CloseRequested => {
                tracing::trace!("Close window request received for window");
                self.exit_from_running(event_loop);
            }
            WindowEvent::RedrawRequested => {
                let keep_running = match self.as_running_mut() {
                    Some(running_state) => Self::draw_frame(running_state),
                    None => return,
                };
                if !keep_running {
                    self.exit_from_running(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(running_state) = self.as_running() {
            running_state.win.request_redraw();
        }
    }
}

impl AppRunner {
    fn transition_to_exiting(
        &mut self,
        from_state: &'static str,
        event_loop: &winit::event_loop::ActiveEventLoop,
    ) {
        tracing::debug!("State transition: {} -> Exiting", from_state);
        self.set_exiting(ExitingState {});
        event_loop.exit();
    }

    fn exit_from_running(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(running_state) = self.take_running() {
            // Renderer first, then the window.
            drop(running_state);
            self.transition_to_exiting("Running", event_loop);
        } else {
            tracing::warn!(
                "Requested Running -> Exiting transition while not in Running state"
            );
            event_loop.exit();
        }
    }

    /// Tick once and update the title when a new frame rate is measured.
    /// Returns `false` when the loop should stop.
    fn draw_frame(running_state: &mut RunningState) -> bool {
        match running_state.renderer.tick() {
            Ok(info) => {
                tracing::trace!(
                    "Presented image {} (tick {})",
                    info.image_index,
                    info.tick
                );
                if let Some(fps) = running_state.frame_counter.frame(Instant::now()) {
                    running_state.win.set_title(&fps_title(fps));
                    tracing::debug!(
                        "{} fps, {:.2} ms per frame",
                        fps,
                        running_state.frame_counter.frame_time_ms()
                    );
                }
                true
            }
            Err(e) => {
                tracing::error!("Frame failed: {}", e);
                false
            }
        }
    }

    fn is_running_window(&self, window_id: winit::window::WindowId) -> bool {
        if let Some(running_state) = self.as_running()
            && window_id == running_state.win.id()
        {
            true
        } else {
            false
        }
    }

    fn take_initializing(&mut self) -> Option<InitializingState> {
        assert!(self.0.is_some());
        if matches!(self.0, Some(App::Initializing(_))) {
            match self.0.take() {
                Some(App::Initializing(s)) => Some(s),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    fn take_running(&mut self) -> Option<RunningState> {
        assert!(self.0.is_some());
        if matches!(self.0, Some(App::Running(_))) {
            match self.0.take() {
                Some(App::Running(s)) => Some(s),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    fn as_running(&self) -> Option<&RunningState> {
        assert!(self.0.is_some());
        match &self.0 {
            Some(App::Running(s)) => Some(s),
            _ => None,
        }
    }

    fn as_running_mut(&mut self) -> Option<&mut RunningState> {
        assert!(self.0.is_some());
        match &mut self.0 {
            Some(App::Running(s)) => Some(s),
            _ => None,
        }
    }

    fn set_running(&mut self, state: RunningState) {
        assert!(self.0.is_none());
        self.0 = Some(App::Running(state));
    }

    fn take_suspended(&mut self) -> Option<SuspendedState> {
        assert!(self.0.is_some());
        if matches!(self.0, Some(App::Suspended(_))) {
            match self.0.take() {
                Some(App::Suspended(s)) => Some(s),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    fn set_suspended(&mut self, state: SuspendedState) {
        assert!(self.0.is_none());
        self.0 = Some(App::Suspended(state));
    }

    fn is_exiting(&self) -> bool {
        assert!(self.0.is_some());
        matches!(self.0, Some(App::Exiting(_)))
    }

    fn set_exiting(&mut self, state: ExitingState) {
        assert!(self.0.is_none());
        self.0 = Some(App::Exiting(state));
    }
}
