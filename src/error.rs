//! Error taxonomy for the warehouse core.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::{OrderId, Position, ProductId, RobotId};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("position {0} is outside the grid")]
    InvalidPosition(Position),

    #[error("no cell holds {qty} unit(s) of product {product}")]
    InsufficientStock { product: ProductId, qty: u32 },

    #[error("no idle robot available for order {0}")]
    NoRobotAvailable(OrderId),

    #[error("stock at {position} was consumed before reservation of {qty} unit(s)")]
    ReservationRace { position: Position, qty: u32 },

    #[error("malformed order request: {0}")]
    MalformedOrderRequest(String),

    #[error("command queue of robot {0} is full")]
    QueueSaturated(RobotId),

    #[error("unknown robot {0}")]
    UnknownRobot(RobotId),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("order {order} cannot move from {from} to {to}")]
    InvalidTransition {
        order: OrderId,
        from: &'static str,
        to: &'static str,
    },

    #[error("order {order} is not assigned to robot {robot}")]
    NotAssigned { order: OrderId, robot: RobotId },

    #[error("robot {0} is not accepting commands")]
    RobotOffline(RobotId),

    #[error("invalid grid dimensions {width}x{height}x{levels}")]
    InvalidDimensions { width: i32, height: i32, levels: i32 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, WarehouseError>;
