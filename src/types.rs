//! Shared identifiers and value types used across the warehouse core.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a robot (1-based, stable for the fleet's lifetime).
pub type RobotId = u32;
/// Unique identifier for an order; allocated by the order queue, never reused.
pub type OrderId = u64;
/// Catalog identifier of a storable product.
pub type ProductId = u32;

/// Integer grid coordinate. `z` is the bin level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Per-axis absolute grid distance to `other`.
    pub fn axis_distance(&self, other: &Position) -> (u32, u32, u32) {
        (
            self.x.abs_diff(other.x),
            self.y.abs_diff(other.y),
            self.z.abs_diff(other.z),
        )
    }

    pub fn manhattan(&self, other: &Position) -> u32 {
        let (dx, dy, dz) = self.axis_distance(other);
        dx + dy + dz
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    Idle,
    Moving,
    Picking,
    Carrying,
    Delivering,
    Dropping,
    Error,
}

/// Work handed to a single robot. Immutable once enqueued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RobotCommand {
    Move {
        target: Position,
        order: Option<OrderId>,
    },
    Pick {
        target: Position,
        order: OrderId,
    },
    Drop {
        target: Position,
        order: OrderId,
    },
}

impl RobotCommand {
    pub fn target(&self) -> Position {
        match *self {
            RobotCommand::Move { target, .. }
            | RobotCommand::Pick { target, .. }
            | RobotCommand::Drop { target, .. } => target,
        }
    }

    pub fn order(&self) -> Option<OrderId> {
        match *self {
            RobotCommand::Move { order, .. } => order,
            RobotCommand::Pick { order, .. } | RobotCommand::Drop { order, .. } => Some(order),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RobotCommand::Move { .. } => "move",
            RobotCommand::Pick { .. } => "pick",
            RobotCommand::Drop { .. } => "drop",
        }
    }
}

/// State-change event published to the external notification sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotUpdate {
    pub robot_id: RobotId,
    pub position: Position,
    pub status: RobotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
}
