//! Protocol handlers and surface signal routing.
//!
//! Protocol events arrive as [`SurfaceEvent`]s on a surface. Whoever cares
//! about a signal on a surface registers a [`ListenerTarget`] for it, and
//! [`Cleave::emit`] hands the event to the matching handler.

pub mod compositor;
pub mod xdg_shell;
#[cfg(feature = "xwayland")]
pub mod xwayland;

use std::collections::HashMap;

use smithay::{
    delegate_data_device, delegate_seat,
    input::{
        Seat, SeatHandler, SeatState,
        dnd::{DnDGrab, DndGrabHandler, GrabType, Source},
        pointer::{CursorImageStatus, Focus},
    },
    reexports::wayland_server::{
        Resource,
        backend::ObjectId,
        protocol::wl_surface::WlSurface,
    },
    utils::{Point, Serial},
    wayland::{
        selection::{
            SelectionHandler,
            data_device::{
                DataDeviceHandler, DataDeviceState, WaylandDndGrabHandler, set_data_device_focus,
            },
        },
        shell::xdg::PopupSurface,
    },
};

use crate::{
    state::Cleave,
    view::{ViewId, ViewKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    Commit,
    Map,
    Unmap,
    Destroy,
    NewSubsurface,
    NewPopup,
    RequestFullscreen,
}

#[derive(Debug, Clone)]
pub enum SurfaceEvent {
    Commit,
    Map,
    Unmap,
    Destroy,
    NewSubsurface(WlSurface),
    NewPopup(PopupSurface),
    RequestFullscreen(bool),
}

impl SurfaceEvent {
    pub fn signal(&self) -> Signal {
        match self {
            SurfaceEvent::Commit => Signal::Commit,
            SurfaceEvent::Map => Signal::Map,
            SurfaceEvent::Unmap => Signal::Unmap,
            SurfaceEvent::Destroy => Signal::Destroy,
            SurfaceEvent::NewSubsurface(_) => Signal::NewSubsurface,
            SurfaceEvent::NewPopup(_) => Signal::NewPopup,
            SurfaceEvent::RequestFullscreen(_) => Signal::RequestFullscreen,
        }
    }
}

/// Who handles a signal. The surface that emitted it is passed alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerTarget {
    /// The view whose root surface emitted the signal.
    View(ViewId),
    /// A child (subsurface or popup) of the view.
    Child(ViewId),
}

impl ListenerTarget {
    pub fn view(&self) -> ViewId {
        match self {
            ListenerTarget::View(view) | ListenerTarget::Child(view) => *view,
        }
    }
}

#[derive(Debug, Default)]
pub struct Listeners {
    map: HashMap<(ObjectId, Signal), ListenerTarget>,
}

impl Listeners {
    pub fn add(&mut self, surface: &WlSurface, signal: Signal, target: ListenerTarget) {
        if let Some(previous) = self.map.insert((surface.id(), signal), target)
            && previous != target
        {
            tracing::debug!(surface = ?surface.id(), ?signal, ?previous, ?target, "listener replaced");
        }
    }

    pub fn remove(&mut self, surface: &WlSurface, signal: Signal) -> Option<ListenerTarget> {
        self.map.remove(&(surface.id(), signal))
    }

    pub fn get(&self, surface: &WlSurface, signal: Signal) -> Option<ListenerTarget> {
        self.map.get(&(surface.id(), signal)).copied()
    }

    /// Drop every listener on `surface`.
    pub fn remove_surface(&mut self, surface: &WlSurface) {
        let id = surface.id();
        self.map.retain(|(s, _), _| *s != id);
    }

    /// Drop every listener that points at `view`, returning how many there
    /// were.
    pub fn remove_view(&mut self, view: ViewId) -> usize {
        let before = self.map.len();
        self.map.retain(|_, target| target.view() != view);
        before - self.map.len()
    }

    pub fn count_for_view(&self, view: ViewId) -> usize {
        self.map
            .values()
            .filter(|target| target.view() == view)
            .count()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Cleave {
    /// Deliver `event` to whoever listens for it on `surface`.
    ///
    /// Returns false when nobody does.
    pub fn emit(&mut self, surface: &WlSurface, event: SurfaceEvent) -> bool {
        let signal = event.signal();
        let Some(target) = self.listeners.get(surface, signal) else {
            return false;
        };
        let Some(kind) = self.view(target.view()).map(|view| view.kind()) else {
            tracing::warn!(surface = ?surface.id(), ?target, "listener points at a destroyed view");
            self.listeners.remove(surface, signal);
            return false;
        };
        tracing::trace!(surface = ?surface.id(), ?target, ?signal, "dispatching surface event");

        match (target, event) {
            (ListenerTarget::View(view), SurfaceEvent::NewSubsurface(child)) => {
                self.subsurface_create(view, None, child);
            }
            (ListenerTarget::Child(view), SurfaceEvent::NewSubsurface(child)) => {
                self.subsurface_create(view, Some(surface), child);
            }
            (ListenerTarget::Child(view), SurfaceEvent::Commit) => {
                self.view_damage_child(view, surface, false);
            }
            (ListenerTarget::Child(view), SurfaceEvent::Destroy) => {
                self.view_child_destroyed(view, surface);
            }
            (ListenerTarget::Child(view), SurfaceEvent::Map | SurfaceEvent::Unmap) => {
                xdg_shell::handle_xdg_popup_map_change(self, view);
            }
            (ListenerTarget::Child(view), SurfaceEvent::NewPopup(popup)) => {
                xdg_shell::xdg_popup_create(self, view, Some(surface), popup);
            }
            (ListenerTarget::Child(_), SurfaceEvent::RequestFullscreen(_)) => {}
            (ListenerTarget::View(view), event) => match kind {
                ViewKind::XdgShell => {
                    xdg_shell::handle_xdg_toplevel_event(self, view, surface, event)
                }
                #[cfg(feature = "xwayland")]
                ViewKind::Xwayland => {
                    xwayland::handle_xwayland_surface_event(self, view, surface, event)
                }
            },
        }
        true
    }
}

impl SeatHandler for Cleave {
    type KeyboardFocus = WlSurface;
    type PointerFocus = WlSurface;
    type TouchFocus = WlSurface;

    fn seat_state(&mut self) -> &mut SeatState<Self> {
        &mut self.seat_state
    }

    fn focus_changed(&mut self, seat: &Seat<Self>, focused: Option<&WlSurface>) {
        let dh = &self.display_handle;
        let client = focused.and_then(|s| dh.get_client(s.id()).ok());
        set_data_device_focus(dh, seat, client);
    }

    fn cursor_image(&mut self, _seat: &Seat<Self>, _image: CursorImageStatus) {}
}

delegate_seat!(Cleave);

impl SelectionHandler for Cleave {
    type SelectionUserData = ();
}

impl DataDeviceHandler for Cleave {
    fn data_device_state(&mut self) -> &mut DataDeviceState {
        &mut self.data_device_state
    }
}

impl DndGrabHandler for Cleave {}

impl WaylandDndGrabHandler for Cleave {
    fn dnd_requested<S: Source>(
        &mut self,
        source: S,
        icon: Option<WlSurface>,
        seat: Seat<Self>,
        serial: Serial,
        type_: GrabType,
    ) {
        match type_ {
            GrabType::Pointer => {
                let Some(pointer) = seat.get_pointer() else {
                    tracing::warn!("drag requested on a seat without a pointer");
                    return;
                };
                let location = pointer.current_location().to_i32_round();
                if let Some(icon) = icon {
                    self.add_drag_icon(&icon, location);
                }
                let Some(start_data) = pointer.grab_start_data() else {
                    tracing::debug!("drag requested without an active pointer grab");
                    return;
                };
                let grab = DnDGrab::new_pointer(&self.display_handle, start_data, source, seat);
                pointer.set_grab(self, grab, serial, Focus::Keep);
            }
            GrabType::Touch => {
                if let Some(icon) = icon {
                    self.add_drag_icon(&icon, Point::from((0, 0)));
                }
            }
        }
    }
}

delegate_data_device!(Cleave);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestState;

    #[test]
    fn view_listener_counts_follow_removal() {
        let mut t = TestState::new(800, 600);
        let a = t.bare_surface().server;
        let b = t.bare_surface().server;
        let c = t.bare_surface().server;

        let mut listeners = Listeners::default();
        let view = ViewId(1);
        let other = ViewId(2);
        listeners.add(&a, Signal::Commit, ListenerTarget::View(view));
        listeners.add(&b, Signal::Destroy, ListenerTarget::Child(view));
        listeners.add(&c, Signal::Commit, ListenerTarget::View(other));

        assert_eq!(listeners.count_for_view(view), 2);
        assert_eq!(listeners.get(&b, Signal::Destroy), Some(ListenerTarget::Child(view)));
        listeners.remove_surface(&b);
        assert_eq!(listeners.count_for_view(view), 1);
        assert_eq!(listeners.remove_view(view), 1);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn events_without_listeners_are_dropped() {
        let mut t = TestState::new(800, 600);
        let surface = t.bare_surface().server;
        assert!(!t.state.emit(&surface, SurfaceEvent::Commit));
        assert!(!t.state.emit(&surface, SurfaceEvent::RequestFullscreen(true)));
    }
}
