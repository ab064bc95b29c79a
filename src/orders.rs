//! Customer orders and the queue that owns their lifetime.

use std::time::SystemTime;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::Catalog;
use crate::error::{Result, WarehouseError};
use crate::types::{OrderId, Position, ProductId, RobotId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Assigned,
    Picking,
    Delivering,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }

    /// The one state a live order may advance to, short of failing.
    fn successor(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Assigned),
            OrderStatus::Assigned => Some(OrderStatus::Picking),
            OrderStatus::Picking => Some(OrderStatus::Delivering),
            OrderStatus::Delivering => Some(OrderStatus::Completed),
            OrderStatus::Completed | OrderStatus::Failed => None,
        }
    }

    /// One step at a time; terminal states absorb. Failed is reachable from any live state.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == OrderStatus::Failed || self.successor() == Some(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Picking => "picking",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

/// Carried on every order. Dispatch is FIFO and does not consult it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
    Express,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_name: String,
    pub product_id: ProductId,
    pub requested_qty: u32,
    pub status: OrderStatus,
    pub priority: Priority,
    pub assigned_robot: Option<RobotId>,
    pub created_at: SystemTime,
    pub completed_at: Option<SystemTime>,
    pub delivery_port: Option<Position>,
    /// Cell the stock was reserved from; used to return stock on failure.
    pub source_cell: Option<Position>,
}

/// Intake payload from outer layers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub customer_name: String,
    pub product_id: ProductId,
    pub requested_qty: u32,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl OrderRequest {
    pub fn validate(&self, catalog: &Catalog) -> Result<()> {
        if self.customer_name.trim().is_empty() {
            return Err(WarehouseError::MalformedOrderRequest(
                "customer_name is required".to_string(),
            ));
        }
        if self.requested_qty == 0 {
            return Err(WarehouseError::MalformedOrderRequest(
                "requested_qty must be >= 1".to_string(),
            ));
        }
        if !catalog.contains(self.product_id) {
            return Err(WarehouseError::MalformedOrderRequest(format!(
                "unknown product {}",
                self.product_id
            )));
        }
        Ok(())
    }
}

const CUSTOMERS: [&str; 8] = [
    "Smith Auto Repair",
    "QuickFix Motors",
    "Downtown Garage",
    "Highway Service Center",
    "Metro Auto Parts",
    "City Car Care",
    "Precision Automotive",
    "Express Auto Repair",
];

/// A plausible repair-shop order for a random catalog product.
pub fn random_request<R: Rng + ?Sized>(rng: &mut R, catalog: &Catalog) -> Option<OrderRequest> {
    let ids = catalog.ids();
    let product_id = *ids.choose(rng)?;
    let customer = CUSTOMERS.choose(rng).copied().unwrap_or(CUSTOMERS[0]);
    let priority = match rng.gen_range(0..100) {
        0..=79 => Priority::Normal,
        80..=94 => Priority::Urgent,
        _ => Priority::Express,
    };
    Some(OrderRequest {
        customer_name: customer.to_string(),
        product_id,
        requested_qty: rng.gen_range(1..=5),
        priority: Some(priority),
    })
}

pub struct OrderQueue {
    orders: Vec<Order>,
    next_id: OrderId,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self {
            orders: Vec::new(),
            next_id: 1,
        }
    }

    /// Validate and append a new Pending order.
    pub fn submit(&mut self, request: OrderRequest, catalog: &Catalog) -> Result<Order> {
        request.validate(catalog)?;
        let order = Order {
            id: self.next_id,
            customer_name: request.customer_name,
            product_id: request.product_id,
            requested_qty: request.requested_qty,
            status: OrderStatus::Pending,
            priority: request.priority.unwrap_or_default(),
            assigned_robot: None,
            created_at: SystemTime::now(),
            completed_at: None,
            delivery_port: None,
            source_cell: None,
        };
        self.next_id += 1;
        info!(
            "[ORDER] order {} created: {} x product {} for {}",
            order.id, order.requested_qty, order.product_id, order.customer_name
        );
        self.orders.push(order.clone());
        Ok(order)
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        // Ids are allocated in push order, so the vec is sorted by id.
        self.orders
            .binary_search_by_key(&id, |order| order.id)
            .ok()
            .map(|index| &self.orders[index])
    }

    fn get_mut(&mut self, id: OrderId) -> Result<&mut Order> {
        let index = self
            .orders
            .binary_search_by_key(&id, |order| order.id)
            .map_err(|_| WarehouseError::UnknownOrder(id))?;
        Ok(&mut self.orders[index])
    }

    pub fn all(&self) -> Vec<Order> {
        self.orders.clone()
    }

    /// Pending orders in creation order.
    pub fn pending(&self) -> Vec<Order> {
        self.with_status(OrderStatus::Pending)
    }

    pub fn with_status(&self, status: OrderStatus) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|order| order.status == status)
            .cloned()
            .collect()
    }

    /// Orders that are neither completed nor failed.
    pub fn active(&self) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|order| !order.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn count(&self, status: OrderStatus) -> usize {
        self.orders.iter().filter(|order| order.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Pending -> Assigned. The robot is recorded here and never changes afterwards.
    pub fn assign(
        &mut self,
        id: OrderId,
        robot: RobotId,
        port: Position,
        source: Position,
    ) -> Result<()> {
        let order = self.get_mut(id)?;
        if order.status != OrderStatus::Pending || order.assigned_robot.is_some() {
            return Err(WarehouseError::InvalidTransition {
                order: id,
                from: order.status.as_str(),
                to: OrderStatus::Assigned.as_str(),
            });
        }
        order.assigned_robot = Some(robot);
        order.delivery_port = Some(port);
        order.source_cell = Some(source);
        order.status = OrderStatus::Assigned;
        Ok(())
    }

    pub fn transition(&mut self, id: OrderId, next: OrderStatus) -> Result<()> {
        let order = self.get_mut(id)?;
        if next == OrderStatus::Assigned || !order.status.can_transition_to(next) {
            return Err(WarehouseError::InvalidTransition {
                order: id,
                from: order.status.as_str(),
                to: next.as_str(),
            });
        }
        order.status = next;
        if next == OrderStatus::Completed {
            order.completed_at = Some(SystemTime::now());
        }
        Ok(())
    }

    /// Transition on behalf of `robot`, which must be the order's assignee.
    pub fn transition_by(&mut self, id: OrderId, robot: RobotId, next: OrderStatus) -> Result<()> {
        let assigned = self.get(id).ok_or(WarehouseError::UnknownOrder(id))?.assigned_robot;
        if assigned != Some(robot) {
            return Err(WarehouseError::NotAssigned { order: id, robot });
        }
        self.transition(id, next)
    }
}

impl Default for OrderQueue {
    fn default() -> Self {
        Self::new()
    }
}
