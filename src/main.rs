use calloop::{
    EventLoop,
    signals::{Signal, Signals},
};
use cleave::{
    Cleave, CompositorError, Result,
    backend::headless::{HeadlessRenderer, init_headless},
    config,
    message::{TextRasterizer, message_printf},
    state::init_wayland_listener,
};
use smithay::reexports::wayland_server::Display;
use std::{backtrace::Backtrace, fs, path::PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = concat!(
    "cleave=debug,",
    "cleave::render=info,",
    "cleave::handlers=debug"
);

fn main() -> Result<()> {
    init_backtrace_defaults();
    init_logging()?;
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();
        tracing::error!("panic: {panic_info}\n{backtrace}");
        eprintln!("panic: {panic_info}\n{backtrace}");
    }));

    let args: Vec<String> = std::env::args().collect();
    let mut runtime_config = match config_arg(&args) {
        Some(path) => config::load_from_path(&path)?,
        None => config::load_or_create_default()?.config,
    };
    if args.iter().any(|a| a == "--debug-damage") {
        runtime_config.debug_damage_tracking = true;
    }

    let mut event_loop: EventLoop<Cleave> =
        EventLoop::try_new().map_err(|e| CompositorError::EventLoop(e.to_string()))?;

    let display: Display<Cleave> =
        Display::new().map_err(|e| CompositorError::Backend(e.to_string()))?;
    let mut state = Cleave::new(
        display.handle(),
        runtime_config,
        Box::new(HeadlessRenderer::new()),
        text_rasterizer(),
    );
    state.attach_event_loop(event_loop.handle(), event_loop.get_signal());

    let socket_name = init_wayland_listener(display, &event_loop.handle())?;
    // Safety: called at startup before creating any threads.
    unsafe { std::env::set_var("WAYLAND_DISPLAY", &socket_name) };
    tracing::info!(socket = %socket_name.to_string_lossy(), "listening for wayland clients");

    #[cfg(feature = "xwayland")]
    if !args.iter().any(|a| a == "--no-xwayland") {
        if let Err(err) = cleave::handlers::xwayland::start_xwayland(
            &state,
            &event_loop.handle(),
            &socket_name,
        ) {
            tracing::warn!("continuing without Xwayland: {err}");
        }
    }

    init_headless(&mut event_loop, &mut state)?;

    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
        .map_err(|err| CompositorError::EventLoop(format!("failed to watch signals: {err}")))?;
    event_loop
        .handle()
        .insert_source(signals, |event, _, state| {
            tracing::info!(signal = ?event.signal(), "received signal");
            state.stop();
        })
        .map_err(|err| {
            CompositorError::EventLoop(format!("failed to insert signal source: {err}"))
        })?;

    let outputs: Vec<_> = state.outputs.iter().map(|o| o.id).collect();
    for output in outputs {
        message_printf(&mut state, output, concat!("cleave ", env!("CARGO_PKG_VERSION")));
    }

    event_loop
        .run(None, &mut state, |state| {
            state.popups.cleanup();
            if let Err(err) = state.display_handle.flush_clients() {
                tracing::warn!("failed to flush clients: {err}");
            }
        })
        .map_err(|e| CompositorError::EventLoop(e.to_string()))?;

    tracing::info!("event loop finished");
    Ok(())
}

fn config_arg(args: &[String]) -> Option<PathBuf> {
    let index = args.iter().position(|a| a == "--config")?;
    args.get(index + 1).map(PathBuf::from)
}

#[cfg(feature = "pango")]
fn text_rasterizer() -> Box<dyn TextRasterizer> {
    Box::new(cleave::render_helpers::pango_text::PangoRasterizer)
}

#[cfg(not(feature = "pango"))]
fn text_rasterizer() -> Box<dyn TextRasterizer> {
    Box::new(cleave::message::BlockRasterizer)
}

fn init_backtrace_defaults() {
    if std::env::var_os("RUST_BACKTRACE").is_none() {
        // Safety: called at startup before creating any threads.
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }
    if std::env::var_os("RUST_LIB_BACKTRACE").is_none() {
        // Safety: called at startup before creating any threads.
        unsafe { std::env::set_var("RUST_LIB_BACKTRACE", "0") };
    }
}

fn state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_STATE_HOME")
        && !dir.is_empty()
    {
        return PathBuf::from(dir).join("cleave");
    }
    if let Some(home) = std::env::var_os("HOME")
        && !home.is_empty()
    {
        return PathBuf::from(home).join(".local").join("state").join("cleave");
    }
    std::env::temp_dir().join("cleave")
}

fn init_logging() -> Result<()> {
    let log_dir = state_dir();
    fs::create_dir_all(&log_dir).map_err(|err| {
        CompositorError::Backend(format!(
            "failed to create log directory {}: {err}",
            log_dir.display()
        ))
    })?;

    let file_appender = tracing_appender::rolling::never(&log_dir, "cleave.log");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender),
        )
        .init();

    let log_file = log_dir.join("cleave.log");
    tracing::info!(path = %log_file.display(), "logging initialized");

    Ok(())
}
