//! Workspaces and tiles as consumed by the render pass.
//!
//! How tiles get their geometry is decided elsewhere. This module only
//! keeps the circular tile order, the focused tile and the unmanaged list.

use smithay::utils::{Logical, Point, Rectangle, Size};

use crate::view::ViewId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub id: TileId,
    /// Output-local geometry.
    pub geometry: Rectangle<i32, Logical>,
    pub view: Option<ViewId>,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    tiles: Vec<Tile>,
    focused: usize,
    /// Newest first.
    unmanaged_views: Vec<ViewId>,
}

impl Workspace {
    /// A workspace with a single tile covering `output_box`.
    pub fn new(output_box: Rectangle<i32, Logical>) -> Self {
        Self::with_tiles(vec![output_box])
    }

    /// A workspace with one tile per rectangle, in cycle order.
    ///
    /// An empty list still yields a workspace with one empty-sized tile,
    /// so there is always a focused tile.
    pub fn with_tiles(geometries: Vec<Rectangle<i32, Logical>>) -> Self {
        let mut tiles: Vec<Tile> = geometries
            .into_iter()
            .enumerate()
            .map(|(index, geometry)| Tile {
                id: TileId(index as u32 + 1),
                geometry,
                view: None,
            })
            .collect();
        if tiles.is_empty() {
            tiles.push(Tile {
                id: TileId(1),
                geometry: Rectangle::new(Point::from((0, 0)), Size::from((0, 0))),
                view: None,
            });
        }
        Self {
            tiles,
            focused: 0,
            unmanaged_views: Vec::new(),
        }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.iter().find(|tile| tile.id == id)
    }

    pub fn focused_tile(&self) -> &Tile {
        &self.tiles[self.focused]
    }

    pub fn focus_tile(&mut self, id: TileId) -> bool {
        match self.tiles.iter().position(|tile| tile.id == id) {
            Some(index) => {
                self.focused = index;
                true
            }
            None => false,
        }
    }

    /// Every tile exactly once, starting at the focused tile and following
    /// the circular order.
    pub fn tile_cycle(&self) -> impl Iterator<Item = &Tile> + '_ {
        let len = self.tiles.len();
        (0..len).map(move |step| &self.tiles[(self.focused + step) % len])
    }

    pub fn tile_for_view(&self, view: ViewId) -> Option<&Tile> {
        self.tiles.iter().find(|tile| tile.view == Some(view))
    }

    pub fn first_empty_tile(&self) -> Option<TileId> {
        self.tile_cycle()
            .find(|tile| tile.view.is_none())
            .map(|tile| tile.id)
    }

    /// Put `view` in `tile`, returning whatever was there before.
    pub fn assign(&mut self, tile: TileId, view: Option<ViewId>) -> Option<ViewId> {
        let slot = self.tiles.iter_mut().find(|t| t.id == tile)?;
        std::mem::replace(&mut slot.view, view)
    }

    pub fn set_tile_geometry(&mut self, tile: TileId, geometry: Rectangle<i32, Logical>) {
        if let Some(slot) = self.tiles.iter_mut().find(|t| t.id == tile) {
            slot.geometry = geometry;
        }
    }

    pub fn unmanaged_views(&self) -> &[ViewId] {
        &self.unmanaged_views
    }

    pub fn add_unmanaged(&mut self, view: ViewId) {
        if !self.unmanaged_views.contains(&view) {
            self.unmanaged_views.insert(0, view);
        }
    }

    pub fn contains_view(&self, view: ViewId) -> bool {
        self.tile_for_view(view).is_some() || self.unmanaged_views.contains(&view)
    }

    /// Drop `view` from every tile and from the unmanaged list.
    pub fn remove_view(&mut self, view: ViewId) {
        for tile in &mut self.tiles {
            if tile.view == Some(view) {
                tile.view = None;
            }
        }
        self.unmanaged_views.retain(|v| *v != view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(x: i32) -> Rectangle<i32, Logical> {
        Rectangle::new(Point::from((x, 0)), Size::from((100, 100)))
    }

    #[test]
    fn tile_cycle_starts_at_focus_and_wraps() {
        let mut workspace = Workspace::with_tiles(vec![geometry(0), geometry(100), geometry(200)]);
        assert!(workspace.focus_tile(TileId(2)));

        let order: Vec<TileId> = workspace.tile_cycle().map(|tile| tile.id).collect();
        assert_eq!(order, vec![TileId(2), TileId(3), TileId(1)]);
    }

    #[test]
    fn single_tile_cycle_visits_once() {
        let workspace = Workspace::new(geometry(0));
        assert_eq!(workspace.tile_cycle().count(), 1);
    }

    #[test]
    fn unmanaged_views_are_newest_first() {
        let mut workspace = Workspace::new(geometry(0));
        workspace.add_unmanaged(ViewId(1));
        workspace.add_unmanaged(ViewId(2));
        workspace.add_unmanaged(ViewId(1));
        assert_eq!(workspace.unmanaged_views(), &[ViewId(2), ViewId(1)]);

        workspace.remove_view(ViewId(2));
        assert_eq!(workspace.unmanaged_views(), &[ViewId(1)]);
    }

    #[test]
    fn assign_returns_previous_view() {
        let mut workspace = Workspace::new(geometry(0));
        assert_eq!(workspace.assign(TileId(1), Some(ViewId(4))), None);
        assert_eq!(workspace.assign(TileId(1), Some(ViewId(5))), Some(ViewId(4)));
        assert_eq!(workspace.tile_for_view(ViewId(5)).map(|t| t.id), Some(TileId(1)));
        assert_eq!(workspace.first_empty_tile(), None);
    }
}
