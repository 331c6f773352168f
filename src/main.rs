//! emotefx: looping shader filters over an emote, previewed live and
//! exported to GIF.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use emotefx::config::Config;
use emotefx::export::{ExportOutcome, ExportStatus};
use emotefx::filters::{self, ChromaKey, FilterDefinition};
use emotefx::gallery::{GalleryCycler, GalleryLayout, THUMBNAIL_SIZE};
use emotefx::input::{ImageInput, ImageWatcher};
use emotefx::output::{save_gif, CompositeLayout, WindowRenderer};
use emotefx::session::PreviewSession;
use emotefx::shader::{GpuContext, WgpuRasterizer};
use emotefx::text::LabelFont;
use emotefx::utils::{window_title, FpsCounter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// Looping shader animations for emotes.
#[derive(Parser, Debug)]
#[command(name = "emotefx")]
#[command(about = "Preview looping shader filters over an image and export them as GIFs")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the preview window (default)
    Preview {
        /// Source image
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Filter selected at startup
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Export one loop of a filter to a GIF without opening a window
    Render {
        /// Filter to export
        #[arg(short, long)]
        filter: Option<String>,

        /// Source image
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Output file; defaults to the image name with a .gif extension
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Canvas side in pixels
        #[arg(long)]
        size: Option<u32>,
    },
    /// List the available filters
    List,
}

/// Minimum time between presented frames.
const FRAME_DURATION: Duration = Duration::from_micros(16_667);

/// Everything that needs the window to exist.
struct AppState {
    renderer: WindowRenderer,
    session: PreviewSession<WgpuRasterizer>,
    gallery: GalleryCycler<WgpuRasterizer>,
    layout: CompositeLayout,
    watcher: Option<ImageWatcher>,
}

struct EmoteApp {
    config: Config,
    image: Option<PathBuf>,
    filter: &'static FilterDefinition,
    window: Option<Arc<Window>>,
    state: Option<AppState>,
    cursor: (f64, f64),
    fps: FpsCounter,
    last_frame_time: Instant,
    title: String,
}

impl EmoteApp {
    fn new(config: Config, image: Option<PathBuf>, filter: &'static FilterDefinition) -> Self {
        Self {
            config,
            image,
            filter,
            window: None,
            state: None,
            cursor: (0.0, 0.0),
            fps: FpsCounter::default(),
            last_frame_time: Instant::now(),
            title: String::new(),
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<AppState> {
        let ctx = Arc::new(GpuContext::new(Some(&window))?);
        let renderer = WindowRenderer::new(window, ctx.clone())?;

        let input = ImageInput::open_or_placeholder(self.image.as_deref());
        let watcher = input.path.as_deref().and_then(ImageWatcher::new);

        let size = self.config.canvas_size;
        let preview = WgpuRasterizer::new(ctx.clone(), size, size);
        let labels = LabelFont::system();
        let mut gallery = GalleryCycler::new(
            WgpuRasterizer::new(ctx, THUMBNAIL_SIZE, THUMBNAIL_SIZE),
            labels.as_ref(),
        )?;
        gallery.upload_image(&input.image)?;
        let session = PreviewSession::new(preview, self.filter, input, self.config.export.clone())?;

        let gallery_layout = gallery.layout();
        let layout = CompositeLayout::new((size, size), (gallery_layout.width(), gallery_layout.height()));
        info!("Preview ready with {}", self.filter.name);
        Ok(AppState {
            renderer,
            session,
            gallery,
            layout,
            watcher,
        })
    }

    fn process_frame(&mut self) {
        let Some(state) = &mut self.state else {
            return;
        };
        let now = Instant::now();

        if let Some(input) = state.watcher.as_mut().and_then(ImageWatcher::check_for_changes) {
            apply_image(state, input);
        }

        if let Err(e) = state.gallery.tick() {
            error!("Gallery error: {:#}", e);
        }
        if let Some(outcome) = state.session.step_export() {
            finish_export(&self.config, outcome);
        }

        let preview = match state.session.render_frame(now) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Preview error: {:#}", e);
                return;
            }
        };
        let gallery = state.gallery.next_display_frame();
        state.renderer.set_frame(&state.layout.compose(&preview, &gallery));
        if let Err(e) = state.renderer.render() {
            error!("Render error: {}", e);
        }

        if let Some(fps) = self.fps.update(now) {
            debug!("[Perf] Presenting at {:.2} FPS", fps);
        }
        let title = window_title(state.session.selected().name, state.session.export_progress());
        if title != self.title {
            state.renderer.window().set_title(&title);
            self.title = title;
        }
    }

    fn handle_key(&mut self, key: Key, event_loop: &ActiveEventLoop) {
        let Some(state) = &mut self.state else {
            return;
        };
        let result = match key.as_ref() {
            Key::Named(NamedKey::ArrowLeft) => state.session.select_relative(-1).map_err(anyhow::Error::from),
            Key::Named(NamedKey::ArrowRight) => state.session.select_relative(1).map_err(anyhow::Error::from),
            Key::Named(NamedKey::Escape) => {
                if state.session.export_progress().is_some() {
                    state.session.abort_export();
                } else {
                    event_loop.exit();
                }
                Ok(())
            }
            Key::Character(c) if c.eq_ignore_ascii_case("r") => state.session.start_export(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("{:#}", e);
        }
    }

    fn handle_click(&mut self) {
        let (Some(state), Some(window)) = (&mut self.state, &self.window) else {
            return;
        };
        let size = window.inner_size();
        let Some((x, y)) = state.layout.to_gallery(self.cursor.0, self.cursor.1, (size.width, size.height)) else {
            return;
        };
        let Some(index) = state.gallery.layout().hit_test(x, y) else {
            return;
        };
        if let Err(e) = state.session.select(filters::all()[index].name) {
            warn!("{}", e);
        }
    }

    fn shutdown(&mut self) {
        if let Some(state) = &mut self.state {
            state.session.shutdown();
            state.gallery.shutdown();
        }
    }
}

fn apply_image(state: &mut AppState, input: ImageInput) {
    state.watcher = input.path.as_deref().and_then(ImageWatcher::new);
    if let Err(e) = state.gallery.upload_image(&input.image) {
        error!("Gallery upload failed: {:#}", e);
    }
    if let Err(e) = state.session.set_image(input) {
        error!("Preview upload failed: {:#}", e);
    }
}

fn finish_export(config: &Config, outcome: ExportOutcome) {
    match outcome.status {
        ExportStatus::Finished(bytes) => {
            if let Err(e) = save_gif(&config.output_dir, &outcome.file_name, &bytes) {
                error!("{:#}", e);
            }
        }
        ExportStatus::Failed(reason) => error!("Export failed: {}", reason),
        _ => {}
    }
}

impl ApplicationHandler for EmoteApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let gallery = GalleryLayout::new(filters::all().len());
        let size = self.config.canvas_size;
        let (width, height) =
            CompositeLayout::new((size, size), (gallery.width(), gallery.height())).size();
        let window_attrs = WindowAttributes::default()
            .with_title(window_title(self.filter.name, None))
            .with_inner_size(PhysicalSize::new(width, height));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        self.window = Some(window.clone());
        match self.initialize(window) {
            Ok(state) => self.state = Some(state),
            Err(e) => {
                error!("Initialization error: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.renderer.resize(size);
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                self.handle_key(event.logical_key, event_loop);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x, position.y);
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => self.handle_click(),
            WindowEvent::DroppedFile(path) => {
                if let Some(state) = &mut self.state {
                    apply_image(state, ImageInput::open_or_placeholder(Some(&path)));
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= FRAME_DURATION {
                    self.process_frame();
                    self.last_frame_time = now;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Preview {
        image: None,
        filter: None,
    }) {
        Command::List => list_filters(),
        Command::Preview { image, filter } => {
            let filter = filters::lookup(filter.as_deref().unwrap_or(&config.default_filter))?;
            run_preview(config, image, filter)?;
        }
        Command::Render {
            filter,
            image,
            output,
            size,
        } => {
            let filter = filters::lookup(filter.as_deref().unwrap_or(&config.default_filter))?;
            run_render(config, filter, image.as_deref(), output.as_deref(), size)?;
        }
    }
    Ok(())
}

fn list_filters() {
    for filter in filters::all() {
        let key = match filter.chroma_key {
            ChromaKey::Color(rgb) => format!("key #{:06x}", rgb.to_packed()),
            ChromaKey::None => "alpha".to_string(),
        };
        println!("{:<10} {:>8}  {}", filter.name, filter.loop_duration.to_string(), key);
    }
}

fn run_preview(config: Config, image: Option<PathBuf>, filter: &'static FilterDefinition) -> Result<()> {
    info!("Starting emotefx...");
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = EmoteApp::new(config, image, filter);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Exports one loop headlessly. Ctrl-C aborts the export.
fn run_render(
    config: Config,
    filter: &'static FilterDefinition,
    image: Option<&Path>,
    output: Option<&Path>,
    size: Option<u32>,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, aborting export...");
        r.store(false, Ordering::SeqCst);
    })?;

    let size = size.unwrap_or(config.canvas_size);
    if size == 0 {
        bail!("size must be positive");
    }
    let input = ImageInput::open_or_placeholder(image);
    let ctx = Arc::new(GpuContext::new(None)?);
    let rasterizer = WgpuRasterizer::new(ctx, size, size);
    let mut session = PreviewSession::new(rasterizer, filter, input, config.export.clone())?;

    session.start_export()?;
    let mut reported = 0;
    let ExportOutcome { file_name, status } = loop {
        if !running.load(Ordering::SeqCst) {
            session.abort_export();
        }
        if let Some(outcome) = session.step_export() {
            break outcome;
        }
        let percent = (session.export_progress().unwrap_or(0.0) * 100.0) as u32;
        if percent >= reported + 10 {
            reported = percent - percent % 10;
            info!("Exporting {}: {}%", filter.name, reported);
        }
        if session.export_progress().is_some_and(|p| p >= 0.5) {
            std::thread::sleep(Duration::from_millis(5));
        }
    };

    session.shutdown();
    match status {
        ExportStatus::Finished(bytes) => {
            let (dir, name) = match output {
                Some(path) => (
                    path.parent().map(Path::to_path_buf).unwrap_or_default(),
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or(file_name),
                ),
                None => (config.output_dir.clone(), file_name),
            };
            let dir = if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir };
            save_gif(&dir, &name, &bytes)?;
            Ok(())
        }
        ExportStatus::Aborted => {
            warn!("Export aborted");
            Ok(())
        }
        ExportStatus::Failed(reason) => bail!("export failed: {}", reason),
        ExportStatus::Capturing | ExportStatus::Encoding => bail!("export ended while still running"),
    }
}
