//! Desktop icon placement on a logical cell grid.
//!
//! Cells are scanned column by column (top to bottom, then left to right) inside the visible
//! `cols x rows` area. Once that area is full, placement continues below it row by row, so the
//! grid only ever grows downward. Everything here is pure over its inputs.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::vfs::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Tunables for the desktop grid.
pub struct GridSettings {
    pub cell_width: u32,
    pub cell_height: u32,
    /// Padding between the viewport edge and the first cell.
    pub margin_x: u32,
    pub margin_y: u32,
    /// Maximum distance in pixels between a drop point and a folder icon's center for the drop
    /// to move the dragged node into that folder.
    pub drop_into_folder_radius: u32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            cell_width: 80,
            cell_height: 90,
            margin_x: 8,
            margin_y: 8,
            drop_into_folder_radius: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Grid geometry for one viewport size.
pub struct GridConfig {
    /// Visible columns, at least 1.
    pub cols: u32,
    /// Visible rows, at least 1.
    pub rows: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub margin_x: u32,
    pub margin_y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// Logical cell address.
pub struct GridPosition {
    pub col: u32,
    pub row: u32,
}

impl GridPosition {
    pub const fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Viewport-relative pixel coordinate.
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Computes the cell grid for a viewport.
pub fn get_grid_config(viewport_width: u32, viewport_height: u32, settings: &GridSettings) -> GridConfig {
    let cell_width = settings.cell_width.max(1);
    let cell_height = settings.cell_height.max(1);
    let usable_w = viewport_width.saturating_sub(settings.margin_x.saturating_mul(2));
    let usable_h = viewport_height.saturating_sub(settings.margin_y.saturating_mul(2));
    GridConfig {
        cols: (usable_w / cell_width).max(1),
        rows: (usable_h / cell_height).max(1),
        cell_width,
        cell_height,
        margin_x: settings.margin_x,
        margin_y: settings.margin_y,
    }
}

/// Top-left pixel of a cell.
pub fn grid_to_pixel(position: GridPosition, config: &GridConfig) -> PixelPoint {
    let x = i64::from(config.margin_x) + i64::from(position.col) * i64::from(config.cell_width);
    let y = i64::from(config.margin_y) + i64::from(position.row) * i64::from(config.cell_height);
    PixelPoint {
        x: saturate(x),
        y: saturate(y),
    }
}

/// Cell containing a pixel.
///
/// Columns clamp into the visible range; rows only clamp at the top, since the grid grows
/// downward. For every cell inside the visible columns this inverts [`grid_to_pixel`].
pub fn pixel_to_grid(point: PixelPoint, config: &GridConfig) -> GridPosition {
    let col = (i64::from(point.x) - i64::from(config.margin_x)).div_euclid(i64::from(config.cell_width));
    let row = (i64::from(point.y) - i64::from(config.margin_y)).div_euclid(i64::from(config.cell_height));
    GridPosition {
        col: col.clamp(0, i64::from(config.cols) - 1) as u32,
        row: row.clamp(0, i64::from(u32::MAX)) as u32,
    }
}

/// Center pixel of a cell.
pub fn cell_center(position: GridPosition, config: &GridConfig) -> PixelPoint {
    let origin = grid_to_pixel(position, config);
    PixelPoint {
        x: saturate(i64::from(origin.x) + i64::from(config.cell_width / 2)),
        y: saturate(i64::from(origin.y) + i64::from(config.cell_height / 2)),
    }
}

fn saturate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn visible_cells(config: &GridConfig) -> u64 {
    u64::from(config.cols) * u64::from(config.rows)
}

/// Scan-order index of a cell, or `None` for columns outside the grid.
pub fn scan_index(position: GridPosition, config: &GridConfig) -> Option<u64> {
    if position.col >= config.cols {
        return None;
    }
    let (col, row) = (u64::from(position.col), u64::from(position.row));
    let rows = u64::from(config.rows);
    Some(if row < rows {
        col * rows + row
    } else {
        visible_cells(config) + (row - rows) * u64::from(config.cols) + col
    })
}

/// Cell at a scan-order index.
pub fn position_at(index: u64, config: &GridConfig) -> GridPosition {
    let rows = u64::from(config.rows);
    let cols = u64::from(config.cols);
    let (col, row) = if index < visible_cells(config) {
        (index / rows, index % rows)
    } else {
        let overflow = index - visible_cells(config);
        (overflow % cols, rows + overflow / cols)
    };
    GridPosition {
        col: u32::try_from(col).unwrap_or(u32::MAX),
        row: u32::try_from(row).unwrap_or(u32::MAX),
    }
}

/// First free cell in scan order at or after `start`.
fn next_free_from(start: u64, config: &GridConfig, occupied: &HashSet<GridPosition>) -> GridPosition {
    (start..)
        .map(|index| position_at(index, config))
        .find(|cell| !occupied.contains(cell))
        .unwrap_or_else(|| position_at(start, config))
}

/// First unoccupied cell in scan order. Always succeeds, growing the grid downward if needed.
pub fn find_next_free_cell(config: &GridConfig, occupied: &HashSet<GridPosition>) -> GridPosition {
    next_free_from(0, config, occupied)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One icon shown on the desktop: a child of the user's Desktop directory.
pub struct DesktopIcon {
    pub id: NodeId,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of [`DesktopLayout::drop_icon`].
pub enum DropOutcome {
    /// The icon now occupies `cell`; `displaced` icons were pushed along the scan order.
    Placed {
        cell: GridPosition,
        displaced: Vec<NodeId>,
    },
    /// The drop landed on a folder's center; the caller should move the node into `folder` and
    /// then [`DesktopLayout::forget`] it.
    MoveIntoFolder { folder: NodeId },
    /// The icon is not part of the desktop.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Persisted form of one placement.
pub struct StoredPlacement {
    pub id: NodeId,
    pub col: u32,
    pub row: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Committed icon positions for one desktop. No two icons share a cell.
pub struct DesktopLayout {
    positions: BTreeMap<NodeId, GridPosition>,
}

impl DesktopLayout {
    /// Rebuilds a layout from stored placements. Later placements that collide are dropped and
    /// will be re-placed on the next recompute.
    pub fn from_placements(placements: impl IntoIterator<Item = StoredPlacement>) -> Self {
        let mut layout = Self::default();
        let mut taken = HashSet::new();
        for placement in placements {
            let cell = GridPosition::new(placement.col, placement.row);
            if taken.insert(cell) {
                layout.positions.insert(placement.id, cell);
            }
        }
        layout
    }

    pub fn to_placements(&self) -> Vec<StoredPlacement> {
        self.positions
            .iter()
            .map(|(id, cell)| StoredPlacement {
                id: *id,
                col: cell.col,
                row: cell.row,
            })
            .collect()
    }

    pub fn position(&self, id: NodeId) -> Option<GridPosition> {
        self.positions.get(&id).copied()
    }

    pub fn positions(&self) -> &BTreeMap<NodeId, GridPosition> {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Drops the record for `id`. Returns `true` when one existed.
    pub fn forget(&mut self, id: NodeId) -> bool {
        self.positions.remove(&id).is_some()
    }

    fn occupied(&self) -> HashSet<GridPosition> {
        self.positions.values().copied().collect()
    }

    /// Brings the layout in line with the current icons.
    ///
    /// Records for vanished icons are pruned, records outside the grid or sharing a cell are
    /// re-placed, and new icons take the first free cell in input order. Returns `true` when any
    /// record changed.
    pub fn recompute(&mut self, icons: &[DesktopIcon], config: &GridConfig) -> bool {
        let live: HashSet<NodeId> = icons.iter().map(|icon| icon.id).collect();
        let before = self.positions.clone();
        self.positions.retain(|id, _| live.contains(id));

        let mut kept: Vec<(u64, NodeId)> = self
            .positions
            .iter()
            .filter_map(|(id, cell)| scan_index(*cell, config).map(|index| (index, *id)))
            .collect();
        kept.sort_unstable();

        let mut occupied = HashSet::new();
        let mut committed = BTreeMap::new();
        for (index, id) in kept {
            let cell = position_at(index, config);
            if occupied.insert(cell) {
                committed.insert(id, cell);
            }
        }

        for icon in icons {
            if committed.contains_key(&icon.id) {
                continue;
            }
            let cell = find_next_free_cell(config, &occupied);
            occupied.insert(cell);
            committed.insert(icon.id, cell);
        }

        self.positions = committed;
        let changed = self.positions != before;
        if changed {
            log::debug!("desktop layout recomputed for {} icons", self.positions.len());
        }
        changed
    }

    /// Applies a drag-and-drop of `id` at `point`.
    ///
    /// Dropping within `folder_radius` pixels of a folder icon's center yields
    /// [`DropOutcome::MoveIntoFolder`] without touching the layout. Otherwise the icon claims the
    /// exact target cell; an occupant is pushed to the next cell in scan order, pushing whatever
    /// sits there in turn, until a free cell absorbs the last one.
    pub fn drop_icon(
        &mut self,
        id: NodeId,
        point: PixelPoint,
        icons: &[DesktopIcon],
        config: &GridConfig,
        folder_radius: u32,
    ) -> DropOutcome {
        if !icons.iter().any(|icon| icon.id == id) {
            return DropOutcome::Unchanged;
        }
        let target = pixel_to_grid(point, config);
        let occupant = self
            .positions
            .iter()
            .find(|(other, cell)| **other != id && **cell == target)
            .map(|(other, _)| *other);

        if let Some(folder) = occupant {
            let is_dir = icons.iter().any(|icon| icon.id == folder && icon.is_dir);
            if is_dir && within_radius(point, cell_center(target, config), folder_radius) {
                return DropOutcome::MoveIntoFolder { folder };
            }
        }

        self.positions.remove(&id);
        let mut displaced = Vec::new();
        if let Some(first) = occupant {
            let by_cell: BTreeMap<GridPosition, NodeId> =
                self.positions.iter().map(|(node, cell)| (*cell, *node)).collect();
            // Target is always inside the visible columns, so it has a scan index.
            let mut index = scan_index(target, config).unwrap_or(0);
            let mut carry = first;
            loop {
                index += 1;
                let cell = position_at(index, config);
                displaced.push(carry);
                self.positions.insert(carry, cell);
                match by_cell.get(&cell) {
                    Some(next) => carry = *next,
                    None => break,
                }
            }
            log::debug!("drop at {target:?} displaced {} icons", displaced.len());
        }
        self.positions.insert(id, target);
        DropOutcome::Placed {
            cell: target,
            displaced,
        }
    }
}

fn within_radius(a: PixelPoint, b: PixelPoint, radius: u32) -> bool {
    let dx = i64::from(a.x) - i64::from(b.x);
    let dy = i64::from(a.y) - i64::from(b.y);
    dx * dx + dy * dy <= i64::from(radius) * i64::from(radius)
}
