//! Shared 3D storage grid guarded by a single reader/writer lock.
//!
//! Stock lookups take the shared lock; every check-then-write sequence
//! (reservation, restock, occupancy) holds the exclusive lock for its full
//! duration. Nothing here sleeps while holding the lock.

use std::collections::HashSet;
use std::sync::RwLock;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, WarehouseError};
use crate::types::{Position, ProductId};

/// One addressable storage slot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StorageCell {
    pub product_id: Option<ProductId>,
    pub quantity: u32,
    pub bin_label: String,
}

impl StorageCell {
    pub fn is_empty(&self) -> bool {
        self.product_id.is_none() || self.quantity == 0
    }

    pub fn can_fulfill(&self, product: ProductId, qty: u32) -> bool {
        self.product_id == Some(product) && self.quantity >= qty
    }
}

struct GridState {
    cells: Vec<StorageCell>,
    occupied: Vec<bool>,
}

pub struct WarehouseGrid {
    width: i32,
    height: i32,
    levels: i32,
    state: RwLock<GridState>,
}

impl WarehouseGrid {
    pub fn new(width: i32, height: i32, levels: i32) -> Result<Self> {
        if width <= 0 || height <= 0 || levels <= 0 {
            return Err(WarehouseError::InvalidDimensions {
                width,
                height,
                levels,
            });
        }
        let len = (width * height * levels) as usize;
        Ok(Self {
            width,
            height,
            levels,
            state: RwLock::new(GridState {
                cells: vec![StorageCell::default(); len],
                occupied: vec![false; len],
            }),
        })
    }

    pub fn dimensions(&self) -> (i32, i32, i32) {
        (self.width, self.height, self.levels)
    }

    /// Pure bounds check.
    pub fn is_valid_position(&self, pos: Position) -> bool {
        (0..self.width).contains(&pos.x)
            && (0..self.height).contains(&pos.y)
            && (0..self.levels).contains(&pos.z)
    }

    /// Delivery ports sit on the north edge (`y == 0`); that row never holds stock.
    pub fn is_port_row(&self, pos: Position) -> bool {
        pos.y == 0
    }

    /// Port positions on the floor level, one per column.
    pub fn port_positions(&self) -> Vec<Position> {
        (0..self.width).map(|x| Position::new(x, 0, 0)).collect()
    }

    /// Every in-bounds position outside the port row, in scan order.
    pub fn storage_positions(&self) -> Vec<Position> {
        self.positions()
            .filter(|pos| !self.is_port_row(*pos))
            .collect()
    }

    // Index order matches the documented scan order: x, then y, then z.
    fn index(&self, pos: Position) -> Option<usize> {
        if !self.is_valid_position(pos) {
            return None;
        }
        Some(((pos.x * self.height + pos.y) * self.levels + pos.z) as usize)
    }

    fn position_at(&self, index: usize) -> Position {
        let index = index as i32;
        let z = index % self.levels;
        let y = (index / self.levels) % self.height;
        let x = index / (self.levels * self.height);
        Position::new(x, y, z)
    }

    fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        let len = (self.width * self.height * self.levels) as usize;
        (0..len).map(|index| self.position_at(index))
    }

    /// Put `qty` units of `product` into an empty cell.
    pub fn place(
        &self,
        pos: Position,
        product: ProductId,
        qty: u32,
        bin_label: impl Into<String>,
    ) -> Result<()> {
        let index = self.index(pos).ok_or(WarehouseError::InvalidPosition(pos))?;
        let mut guard = self.state.write().expect("grid lock poisoned");
        guard.cells[index] = StorageCell {
            product_id: Some(product),
            quantity: qty,
            bin_label: bin_label.into(),
        };
        Ok(())
    }

    pub fn cell(&self, pos: Position) -> Option<StorageCell> {
        let index = self.index(pos)?;
        let guard = self.state.read().expect("grid lock poisoned");
        Some(guard.cells[index].clone())
    }

    /// First cell in scan order holding at least `qty` units of `product`.
    ///
    /// Linear scan under the shared lock; an index keyed by product is the
    /// place to go if grids grow large.
    pub fn has_stock(&self, product: ProductId, qty: u32) -> Option<Position> {
        let guard = self.state.read().expect("grid lock poisoned");
        guard
            .cells
            .iter()
            .position(|cell| cell.can_fulfill(product, qty))
            .map(|index| self.position_at(index))
    }

    /// Sum of `product` across all cells.
    pub fn total_quantity(&self, product: ProductId) -> u64 {
        let guard = self.state.read().expect("grid lock poisoned");
        guard
            .cells
            .iter()
            .filter(|cell| cell.product_id == Some(product))
            .map(|cell| u64::from(cell.quantity))
            .sum()
    }

    /// Atomically check and decrement the cell's quantity.
    pub fn reserve(&self, pos: Position, qty: u32) -> Result<()> {
        let index = self.index(pos).ok_or(WarehouseError::InvalidPosition(pos))?;
        let mut guard = self.state.write().expect("grid lock poisoned");
        let cell = &mut guard.cells[index];
        if cell.product_id.is_none() || cell.quantity < qty {
            debug!("[GRID] reservation lost at {pos}: have {} want {qty}", cell.quantity);
            return Err(WarehouseError::ReservationRace { position: pos, qty });
        }
        cell.quantity -= qty;
        Ok(())
    }

    /// Return previously reserved units to a cell.
    pub fn restock(&self, pos: Position, qty: u32) -> Result<()> {
        let index = self.index(pos).ok_or(WarehouseError::InvalidPosition(pos))?;
        let mut guard = self.state.write().expect("grid lock poisoned");
        let cell = &mut guard.cells[index];
        cell.quantity = cell.quantity.saturating_add(qty);
        Ok(())
    }

    /// Check-and-set the occupancy flag. Only one concurrent caller wins.
    pub fn try_occupy(&self, pos: Position) -> bool {
        let Some(index) = self.index(pos) else {
            return false;
        };
        let mut guard = self.state.write().expect("grid lock poisoned");
        if guard.occupied[index] {
            return false;
        }
        guard.occupied[index] = true;
        true
    }

    pub fn release(&self, pos: Position) -> bool {
        let Some(index) = self.index(pos) else {
            warn!("[GRID] release outside grid: {pos}");
            return false;
        };
        let mut guard = self.state.write().expect("grid lock poisoned");
        if !guard.occupied[index] {
            warn!("[GRID] release on unoccupied cell: {pos}");
            return false;
        }
        guard.occupied[index] = false;
        true
    }

    pub fn occupied_cells(&self) -> HashSet<Position> {
        let guard = self.state.read().expect("grid lock poisoned");
        guard
            .occupied
            .iter()
            .enumerate()
            .filter(|(_, occupied)| **occupied)
            .map(|(index, _)| self.position_at(index))
            .collect()
    }
}
