//! Product catalog and initial stocking of the grid.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::error::Result;
use crate::grid::WarehouseGrid;
use crate::types::{Position, ProductId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Engine,
    Brakes,
    Electrical,
    Filters,
    Lighting,
    Maintenance,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub sku: String,
    pub category: Category,
    #[serde(default)]
    pub brand: String,
    pub price: f64,
    #[serde(rename = "weight_kg")]
    pub weight: f64,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Deserialize)]
struct CatalogFile {
    products: Vec<Product>,
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    products: BTreeMap<ProductId, Product>,
}

impl Catalog {
    pub fn from_products(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    /// Parse `{"products": [...]}`.
    pub fn from_json_str(raw: &str) -> std::result::Result<Self, ConfigError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Ok(Self::from_products(file.products))
    }

    /// A handful of auto parts for demos and tests.
    pub fn sample() -> Self {
        let part = |id, name: &str, sku: &str, category, brand: &str, price, weight| Product {
            id,
            name: name.to_string(),
            sku: sku.to_string(),
            category,
            brand: brand.to_string(),
            price,
            weight,
            position: None,
        };
        Self::from_products([
            part(1, "Air Filter Honda Civic", "AF-HC-2023", Category::Filters, "Bosch", 29.99, 0.5),
            part(2, "Brake Pads Toyota Camry", "BP-TC-2021", Category::Brakes, "ACDelco", 54.5, 1.8),
            part(3, "Spark Plug Set", "SP-UNI-4", Category::Engine, "NGK", 32.0, 0.3),
            part(4, "Headlight Bulb H7", "HL-H7-55", Category::Lighting, "Philips", 18.75, 0.1),
            part(5, "Alternator Ford F-150", "ALT-F150-2019", Category::Electrical, "Motorcraft", 219.0, 6.2),
            part(6, "Synthetic Oil 5W-30", "OIL-5W30-5L", Category::Maintenance, "Mobil 1", 38.9, 4.6),
            part(7, "Cabin Filter Mazda 3", "CF-M3-2020", Category::Filters, "Mann", 21.4, 0.4),
        ])
    }

    pub fn contains(&self, id: ProductId) -> bool {
        self.products.contains_key(&id)
    }

    pub fn get(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn ids(&self) -> Vec<ProductId> {
        self.products.keys().copied().collect()
    }

    pub fn by_category(&self, category: Category) -> Vec<&Product> {
        self.products
            .values()
            .filter(|p| p.category == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Place every product into one storage cell with a random quantity in `stock`.
    ///
    /// A product's own position wins when it is in bounds, outside the port row
    /// and still free; the rest fill shuffled free cells. Returns placements made.
    pub fn stock_grid<R: Rng + ?Sized>(
        &self,
        grid: &WarehouseGrid,
        rng: &mut R,
        stock: std::ops::RangeInclusive<u32>,
    ) -> Result<Vec<(ProductId, Position)>> {
        let mut taken = HashSet::new();
        let mut placements = Vec::with_capacity(self.products.len());
        let mut unplaced = Vec::new();

        for product in self.products.values() {
            match product.position {
                Some(pos)
                    if grid.is_valid_position(pos)
                        && !grid.is_port_row(pos)
                        && taken.insert(pos) =>
                {
                    placements.push((product.id, pos));
                }
                _ => unplaced.push(product.id),
            }
        }

        let mut free: Vec<Position> = grid
            .storage_positions()
            .into_iter()
            .filter(|pos| !taken.contains(pos))
            .collect();
        free.shuffle(rng);
        if unplaced.len() > free.len() {
            warn!(
                "[GRID] more products ({}) than free storage positions ({})",
                unplaced.len(),
                free.len()
            );
        }
        placements.extend(unplaced.into_iter().zip(free));

        for &(product, pos) in &placements {
            let qty = rng.gen_range(stock.clone());
            grid.place(pos, product, qty, format!("BIN-{}-{}-{}", pos.x, pos.y, pos.z))?;
            debug!("[GRID] placed {qty} x product {product} at {pos}");
        }
        Ok(placements)
    }
}
