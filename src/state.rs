use std::{collections::HashMap, ffi::OsString, sync::Arc, time::Instant};

use calloop::{Interest, LoopHandle, LoopSignal, Mode, PostAction, generic::Generic};
use smithay::{
    desktop::PopupManager,
    input::{Seat, SeatState},
    reexports::wayland_server::{
        Display, DisplayHandle,
        backend::{ClientData, ClientId, DisconnectReason},
        protocol::wl_surface::WlSurface,
    },
    utils::{Logical, Point},
    wayland::{
        compositor::{CompositorClientState, CompositorState},
        selection::data_device::DataDeviceState,
        shell::xdg::{XdgShellState, decoration::XdgDecorationState},
        shm::ShmState,
        socket::ListeningSocketSource,
    },
};

#[cfg(feature = "xwayland")]
use smithay::{
    wayland::xwayland_shell::XWaylandShellState,
    xwayland::{X11Wm, xwm::XwmId},
};

use crate::{
    CompositorError, Result,
    config::RuntimeConfig,
    handlers::Listeners,
    message::TextRasterizer,
    output::{Output, OutputId, OutputSettings, Presentation},
    render_helpers::Renderer,
    view::{View, ViewId, WorkspaceRef},
};

/// A surface shown under the pointer during drag-and-drop.
#[derive(Debug, Clone, PartialEq)]
pub struct DragIcon {
    pub surface: WlSurface,
    /// Layout coordinates.
    pub position: Point<i32, Logical>,
}

pub struct Cleave {
    pub display_handle: DisplayHandle,
    pub loop_handle: Option<LoopHandle<'static, Cleave>>,
    pub loop_signal: Option<LoopSignal>,
    pub start_time: Instant,
    pub config: RuntimeConfig,

    pub compositor_state: CompositorState,
    pub xdg_shell_state: XdgShellState,
    pub xdg_decoration_state: XdgDecorationState,
    pub shm_state: ShmState,
    pub seat_state: SeatState<Cleave>,
    pub seat: Seat<Cleave>,
    pub data_device_state: DataDeviceState,
    pub popups: PopupManager,
    #[cfg(feature = "xwayland")]
    pub xwayland_shell_state: XWaylandShellState,
    #[cfg(feature = "xwayland")]
    pub xwms: HashMap<XwmId, X11Wm>,

    pub renderer: Box<dyn Renderer>,
    pub text: Box<dyn TextRasterizer>,

    pub views: HashMap<ViewId, View>,
    pub listeners: Listeners,
    pub outputs: Vec<Output>,
    /// Where new views are mapped.
    pub current_output: Option<OutputId>,
    pub seat_focus: Option<ViewId>,
    pub drag_icons: Vec<DragIcon>,

    pub(crate) next_view_id: u64,
    next_output_id: usize,
}

impl Cleave {
    pub fn new(
        display_handle: DisplayHandle,
        config: RuntimeConfig,
        renderer: Box<dyn Renderer>,
        text: Box<dyn TextRasterizer>,
    ) -> Self {
        let compositor_state = CompositorState::new::<Self>(&display_handle);
        let xdg_shell_state = XdgShellState::new::<Self>(&display_handle);
        let xdg_decoration_state = XdgDecorationState::new::<Self>(&display_handle);
        let shm_state = ShmState::new::<Self>(&display_handle, vec![]);
        let data_device_state = DataDeviceState::new::<Self>(&display_handle);
        let mut seat_state = SeatState::new();
        let mut seat = seat_state.new_wl_seat(&display_handle, "seat0");
        seat.add_pointer();

        Self {
            #[cfg(feature = "xwayland")]
            xwayland_shell_state: XWaylandShellState::new::<Self>(&display_handle),
            #[cfg(feature = "xwayland")]
            xwms: HashMap::new(),
            display_handle,
            loop_handle: None,
            loop_signal: None,
            start_time: Instant::now(),
            config,
            compositor_state,
            xdg_shell_state,
            xdg_decoration_state,
            shm_state,
            seat_state,
            seat,
            data_device_state,
            popups: PopupManager::default(),
            renderer,
            text,
            views: HashMap::new(),
            listeners: Listeners::default(),
            outputs: Vec::new(),
            current_output: None,
            seat_focus: None,
            drag_icons: Vec::new(),
            next_view_id: 0,
            next_output_id: 0,
        }
    }

    /// Hook the state up to the event loop that drives it.
    pub fn attach_event_loop(&mut self, handle: LoopHandle<'static, Cleave>, signal: LoopSignal) {
        self.loop_handle = Some(handle);
        self.loop_signal = Some(signal);
    }

    pub fn add_output(
        &mut self,
        settings: OutputSettings,
        presentation: Box<dyn Presentation>,
    ) -> OutputId {
        let id = OutputId(self.next_output_id);
        self.next_output_id += 1;
        let output = Output::new(id, settings, presentation);
        tracing::debug!(output = %output.name, mode = ?output.mode, scale = output.scale, "output added");
        self.outputs.push(output);
        if self.current_output.is_none() {
            self.current_output = Some(id);
        }
        id
    }

    /// Drop an output, releasing its message textures and timers.
    pub fn remove_output(&mut self, id: OutputId) {
        let Some(index) = self.outputs.iter().position(|o| o.id == id) else {
            return;
        };
        let output = self.outputs.remove(index);
        for message in &output.messages {
            self.renderer.destroy_texture(message.texture);
        }
        if let Some(handle) = &self.loop_handle {
            for token in [output.message_timer, output.frame_timer].into_iter().flatten() {
                handle.remove(token);
            }
        }
        if self.current_output == Some(id) {
            self.current_output = self.outputs.first().map(|o| o.id);
        }
        tracing::debug!(output = %output.name, "output removed");
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.id == id)
    }

    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|o| o.id == id)
    }

    /// The output whose layout box contains `point`.
    pub fn output_at(&self, point: Point<f64, Logical>) -> Option<OutputId> {
        self.outputs
            .iter()
            .find(|o| o.layout_box().to_f64().contains(point))
            .map(|o| o.id)
    }

    /// The visible workspace of the current output.
    pub fn current_workspace_ref(&self) -> Option<WorkspaceRef> {
        let output = self.output(self.current_output?)?;
        Some(WorkspaceRef {
            output: output.id,
            workspace: output.current_workspace,
        })
    }

    /// Outputs with damage waiting for the next frame.
    pub fn render_pending(&self) -> Vec<OutputId> {
        self.outputs
            .iter()
            .filter(|o| o.has_damage())
            .map(|o| o.id)
            .collect()
    }

    pub fn stop(&self) {
        tracing::info!("stopping compositor");
        if let Some(signal) = &self.loop_signal {
            signal.stop();
        }
    }
}

/// Listen on a fresh `wayland-N` socket and dispatch client requests from
/// the event loop. Returns the socket name.
pub fn init_wayland_listener(
    display: Display<Cleave>,
    loop_handle: &LoopHandle<'static, Cleave>,
) -> Result<OsString> {
    let listening_socket = ListeningSocketSource::new_auto()
        .map_err(|err| CompositorError::Backend(format!("failed to create wayland socket: {err}")))?;
    let socket_name = listening_socket.socket_name().to_os_string();

    loop_handle
        .insert_source(listening_socket, move |client_stream, _, state| {
            if let Err(err) = state
                .display_handle
                .insert_client(client_stream, Arc::new(ClientState::default()))
            {
                tracing::warn!("failed to insert wayland client: {err}");
            }
        })
        .map_err(|err| CompositorError::EventLoop(format!("failed to init wayland listener: {err}")))?;

    loop_handle
        .insert_source(
            Generic::new(display, Interest::READ, Mode::Level),
            move |_, display, state| {
                // Safety: the display is never dropped while the source lives.
                if let Err(err) = unsafe { display.get_mut().dispatch_clients(state) } {
                    tracing::error!("failed to dispatch wayland clients: {err}");
                }
                Ok(PostAction::Continue)
            },
        )
        .map_err(|err| CompositorError::EventLoop(format!("failed to init display source: {err}")))?;

    Ok(socket_name)
}

#[derive(Default)]
pub struct ClientState {
    pub compositor_state: CompositorClientState,
}

impl ClientData for ClientState {
    fn initialized(&self, client_id: ClientId) {
        tracing::info!(?client_id, "wayland client initialized");
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        tracing::info!(?client_id, ?reason, "wayland client disconnected");
    }
}
