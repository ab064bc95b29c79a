//! Facade wiring grid, fleet, orders and dispatcher for outer layers.

use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::unbounded;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::SimConfig;
use crate::dispatcher::{DispatchReport, OrderDispatcher};
use crate::error::Result;
use crate::fleet::Fleet;
use crate::grid::WarehouseGrid;
use crate::orders::{self, Order, OrderQueue, OrderRequest, OrderStatus};
use crate::robot::{ActorTiming, RobotSnapshot, UpdateSink};
use crate::types::{OrderId, Position, ProductId, RobotCommand, RobotId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkstationStatus {
    Available,
    Busy,
}

/// A delivery port as seen by reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Workstation {
    pub id: u32,
    pub position: Position,
    pub status: WorkstationStatus,
}

pub struct Warehouse {
    config: SimConfig,
    grid: Arc<WarehouseGrid>,
    catalog: Catalog,
    fleet: Fleet,
    orders: Arc<RwLock<OrderQueue>>,
    dispatcher: OrderDispatcher,
    rng: Mutex<StdRng>,
}

impl Warehouse {
    /// Build the grid, stock it from `catalog`, and start one worker per robot.
    pub fn start(config: SimConfig, catalog: Catalog, sink: Arc<dyn UpdateSink>) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let grid = Arc::new(WarehouseGrid::new(
            config.grid.width,
            config.grid.height,
            config.grid.levels,
        )?);
        let placed = catalog.stock_grid(&grid, &mut rng, config.min_stock..=config.max_stock)?;

        let starts = Fleet::default_starts(&grid, config.robots);
        let fleet = Fleet::new(Arc::clone(&grid), &starts, config.command_queue_capacity)?;

        let (events_tx, events_rx) = unbounded();
        let orders = Arc::new(RwLock::new(OrderQueue::new()));
        let dispatcher = OrderDispatcher::new(
            Arc::clone(&grid),
            fleet.robots().to_vec(),
            Arc::clone(&orders),
            events_rx,
            StdRng::seed_from_u64(rng.gen_range(0..u64::MAX)),
        );
        fleet.start(
            sink,
            events_tx,
            ActorTiming {
                time_scale: config.time_scale,
            },
        )?;

        info!(
            "[WAREHOUSE] {}x{}x{} grid, {} products stocked, {} robots",
            config.grid.width,
            config.grid.height,
            config.grid.levels,
            placed.len(),
            fleet.len()
        );
        Ok(Self {
            config,
            grid,
            catalog,
            fleet,
            orders,
            dispatcher,
            rng: Mutex::new(rng),
        })
    }

    /// Order intake. Malformed requests are rejected, never dropped.
    pub fn create_order(&self, request: OrderRequest) -> Result<Order> {
        self.orders
            .write()
            .expect("order queue lock poisoned")
            .submit(request, &self.catalog)
    }

    /// Submit a random repair-shop order; `None` with an empty catalog.
    pub fn generate_order(&self) -> Option<Order> {
        let request = {
            let mut rng = self.rng.lock().expect("warehouse rng mutex poisoned");
            orders::random_request(&mut *rng, &self.catalog)?
        };
        self.create_order(request).ok()
    }

    /// Manual command injection; blocks while the robot's queue is full.
    pub fn send_command(&self, robot: RobotId, command: RobotCommand) -> Result<()> {
        self.fleet.get(robot)?.send(command)
    }

    pub fn try_send_command(&self, robot: RobotId, command: RobotCommand) -> Result<()> {
        self.fleet.get(robot)?.try_send(command)
    }

    /// One dispatch pass; meant to be driven by an external periodic trigger.
    pub fn tick(&self) -> DispatchReport {
        self.dispatcher.dispatch()
    }

    pub fn robots(&self) -> Vec<RobotSnapshot> {
        self.fleet.snapshot()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.read().expect("order queue lock poisoned").all()
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.orders.read().expect("order queue lock poisoned").active()
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.orders
            .read()
            .expect("order queue lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn order_count(&self, status: OrderStatus) -> usize {
        self.orders.read().expect("order queue lock poisoned").count(status)
    }

    /// True once every order is completed or failed.
    pub fn is_settled(&self) -> bool {
        self.active_orders().is_empty()
    }

    pub fn workstations(&self) -> Vec<Workstation> {
        let active = self.active_orders();
        self.grid
            .port_positions()
            .into_iter()
            .enumerate()
            .map(|(index, position)| {
                let busy = active.iter().any(|order| {
                    order.status == OrderStatus::Delivering
                        && order.delivery_port == Some(position)
                });
                Workstation {
                    id: index as u32 + 1,
                    position,
                    status: if busy {
                        WorkstationStatus::Busy
                    } else {
                        WorkstationStatus::Available
                    },
                }
            })
            .collect()
    }

    pub fn stock_of(&self, product: ProductId) -> u64 {
        self.grid.total_quantity(product)
    }

    pub fn grid(&self) -> &WarehouseGrid {
        &self.grid
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn collisions(&self) -> usize {
        self.fleet.collisions()
    }

    /// Stop all workers; in-flight commands finish first.
    pub fn shutdown(&self) {
        self.fleet.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarehouseError;
    use crate::robot::ChannelSink;
    use crate::types::{RobotStatus, RobotUpdate};
    use crossbeam_channel::Receiver;
    use std::thread;
    use std::time::{Duration, Instant};

    fn fast_config() -> SimConfig {
        SimConfig {
            robots: 2,
            time_scale: 0.0,
            seed: Some(42),
            ..SimConfig::default()
        }
    }

    fn start(config: SimConfig) -> (Warehouse, Receiver<RobotUpdate>) {
        let (tx, rx) = unbounded();
        let warehouse = Warehouse::start(config, Catalog::sample(), Arc::new(ChannelSink::new(tx)))
            .expect("start warehouse");
        (warehouse, rx)
    }

    fn tick_until_settled(warehouse: &Warehouse) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !warehouse.is_settled() {
            assert!(Instant::now() < deadline, "orders did not settle");
            warehouse.tick();
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn intake_validates_product() {
        let (warehouse, _updates) = start(fast_config());
        let err = warehouse
            .create_order(OrderRequest {
                customer_name: "City Car Care".to_string(),
                product_id: 404,
                requested_qty: 1,
                priority: None,
            })
            .unwrap_err();
        assert!(matches!(err, WarehouseError::MalformedOrderRequest(_)));
        assert!(warehouse.orders().is_empty());
        warehouse.shutdown();
    }

    #[test]
    fn orders_complete_end_to_end() {
        let (warehouse, updates) = start(fast_config());
        let stock_before = warehouse.stock_of(3);
        let order = warehouse
            .create_order(OrderRequest {
                customer_name: "QuickFix Motors".to_string(),
                product_id: 3,
                requested_qty: 2,
                priority: None,
            })
            .expect("create order");

        tick_until_settled(&warehouse);

        let done = warehouse.order(order.id).expect("order");
        assert_eq!(done.status, OrderStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(warehouse.stock_of(3), stock_before - 2);

        // Pick then drop, both tagged with the order.
        let tagged: Vec<_> = updates
            .try_iter()
            .filter(|u| u.order_id == Some(order.id))
            .map(|u| u.status)
            .collect();
        assert_eq!(tagged, vec![RobotStatus::Carrying, RobotStatus::Idle]);

        let robot = warehouse
            .robots()
            .into_iter()
            .find(|r| Some(r.id) == done.assigned_robot)
            .expect("robot");
        assert_eq!(Some(robot.position), done.delivery_port);
        assert_eq!(robot.assigned_order, None);
        warehouse.shutdown();
    }

    #[test]
    fn random_orders_all_settle() {
        let (warehouse, _updates) = start(fast_config());
        for _ in 0..8 {
            assert!(warehouse.generate_order().is_some());
        }
        tick_until_settled(&warehouse);
        let completed = warehouse.order_count(OrderStatus::Completed);
        let failed = warehouse.order_count(OrderStatus::Failed);
        assert_eq!(completed + failed, 8);
        assert!(warehouse.workstations().iter().all(|w| w.status == WorkstationStatus::Available));
        warehouse.shutdown();
    }

    #[test]
    fn manual_move_and_error_recovery() {
        let (warehouse, updates) = start(fast_config());
        warehouse
            .send_command(1, RobotCommand::Move { target: Position::new(-1, 0, 0), order: None })
            .expect("send invalid move");
        warehouse
            .send_command(1, RobotCommand::Move { target: Position::new(4, 4, 2), order: None })
            .expect("send valid move");

        let update = updates
            .recv_timeout(Duration::from_secs(1))
            .expect("update for valid move");
        assert_eq!(update.robot_id, 1);
        assert_eq!(update.position, Position::new(4, 4, 2));
        assert_eq!(update.status, RobotStatus::Idle);
        assert!(updates.try_recv().is_err());

        assert!(matches!(
            warehouse.send_command(9, RobotCommand::Move { target: Position::new(0, 1, 0), order: None }),
            Err(WarehouseError::UnknownRobot(9))
        ));
        warehouse.shutdown();
    }

    #[test]
    fn injected_drop_cannot_complete_an_unassigned_order() {
        let (warehouse, updates) = start(SimConfig {
            robots: 1,
            ..fast_config()
        });
        let stock_before = warehouse.stock_of(3);
        let order = warehouse
            .create_order(OrderRequest {
                customer_name: "Precision Auto".to_string(),
                product_id: 3,
                requested_qty: 2,
                priority: None,
            })
            .expect("create order");
        warehouse
            .send_command(1, RobotCommand::Drop { target: Position::new(0, 0, 0), order: order.id })
            .expect("send drop");
        updates
            .recv_timeout(Duration::from_secs(1))
            .expect("update for injected drop");

        tick_until_settled(&warehouse);

        let done = warehouse.order(order.id).expect("order");
        assert_eq!(done.status, OrderStatus::Completed);
        assert_eq!(done.assigned_robot, Some(1));
        assert_eq!(warehouse.stock_of(3), stock_before - 2);
        assert!(warehouse.robots()[0].assigned_order.is_none());
        warehouse.shutdown();
    }

    #[test]
    fn workstations_cover_the_port_row() {
        let (warehouse, _updates) = start(fast_config());
        let ports = warehouse.workstations();
        assert_eq!(ports.len(), 8);
        assert!(ports.iter().all(|w| w.position.y == 0 && w.position.z == 0));
        assert_eq!(ports[0].id, 1);
        warehouse.shutdown();
    }
}
