//! Order dispatch: match pending orders to idle robots and stock.
//!
//! A pass first applies robot lifecycle events (pick started, picked, dropped,
//! failed) and then walks pending orders in creation order. An event only moves
//! an order when it comes from the assigned robot and the order sits in the
//! state right before the one the event implies. Priority is not
//! consulted. Passes are serialized; robot claims are check-and-set, so an idle
//! robot is never handed two orders.

use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::Receiver;
use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, WarehouseError};
use crate::grid::WarehouseGrid;
use crate::orders::{Order, OrderQueue, OrderStatus};
use crate::robot::{Robot, RobotEvent};
use crate::types::{OrderId, Position, RobotCommand, RobotId};

/// What a single pass changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub assigned: usize,
    pub failed: usize,
    /// Pending orders left alone because no robot was free.
    pub deferred: usize,
    /// Assigned -> Picking -> Delivering steps driven by robot events.
    pub advanced: usize,
    pub completed: usize,
}

impl DispatchReport {
    pub fn transitions(&self) -> usize {
        self.assigned + self.failed + self.advanced + self.completed
    }
}

pub struct OrderDispatcher {
    grid: Arc<WarehouseGrid>,
    robots: Vec<Arc<Robot>>,
    orders: Arc<RwLock<OrderQueue>>,
    events: Receiver<RobotEvent>,
    ports: Vec<Position>,
    rng: Mutex<StdRng>,
    pass: Mutex<()>,
}

impl OrderDispatcher {
    pub fn new(
        grid: Arc<WarehouseGrid>,
        robots: Vec<Arc<Robot>>,
        orders: Arc<RwLock<OrderQueue>>,
        events: Receiver<RobotEvent>,
        rng: StdRng,
    ) -> Self {
        let ports = grid.port_positions();
        Self {
            grid,
            robots,
            orders,
            events,
            ports,
            rng: Mutex::new(rng),
            pass: Mutex::new(()),
        }
    }

    /// Run one dispatch pass. Never blocks on missing robots or stock; only a
    /// full robot command queue can make it wait.
    pub fn dispatch(&self) -> DispatchReport {
        let _pass = self.pass.lock().expect("dispatch pass mutex poisoned");
        let mut report = DispatchReport::default();

        self.apply_events(&mut report);

        let pending = self.orders.read().expect("order queue lock poisoned").pending();
        for order in &pending {
            self.match_order(order, &mut report);
        }

        if report.transitions() > 0 {
            info!(
                "[DISPATCH] assigned={} failed={} advanced={} completed={} deferred={}",
                report.assigned, report.failed, report.advanced, report.completed, report.deferred
            );
        }
        report
    }

    fn match_order(&self, order: &Order, report: &mut DispatchReport) {
        let robot = match self.claim_robot(order.id) {
            Ok(robot) => robot,
            Err(err) => {
                debug!("[DISPATCH] {err}");
                report.deferred += 1;
                return;
            }
        };

        let cell = match self.reserve_stock(order) {
            Ok(cell) => cell,
            Err(err) => {
                robot.release_claim(order.id);
                warn!("[DISPATCH] order {} failed: {err}", order.id);
                self.fail(order.id, false, report);
                return;
            }
        };

        let port = self.choose_port();
        let assigned = self
            .orders
            .write()
            .expect("order queue lock poisoned")
            .assign(order.id, robot.id(), port, cell);
        if let Err(err) = assigned {
            // Order left Pending behind our back; undo the reservation.
            warn!("[DISPATCH] {err}");
            robot.release_claim(order.id);
            self.restock(cell, order.requested_qty);
            return;
        }
        report.assigned += 1;

        let command = RobotCommand::Pick {
            target: cell,
            order: order.id,
        };
        if let Err(err) = robot.send(command) {
            warn!("[DISPATCH] order {} failed: {err}", order.id);
            robot.release_claim(order.id);
            self.fail(order.id, true, report);
            return;
        }
        info!(
            "[DISPATCH] order {} -> robot {}: pick {} x product {} at {cell}, deliver to {port}",
            order.id,
            robot.id(),
            order.requested_qty,
            order.product_id
        );
    }

    /// First robot, in fleet order, whose claim succeeds.
    fn claim_robot(&self, order: OrderId) -> Result<&Arc<Robot>> {
        self.robots
            .iter()
            .find(|robot| robot.try_claim(order))
            .ok_or(WarehouseError::NoRobotAvailable(order))
    }

    fn reserve_stock(&self, order: &Order) -> Result<Position> {
        let cell = self
            .grid
            .has_stock(order.product_id, order.requested_qty)
            .ok_or(WarehouseError::InsufficientStock {
                product: order.product_id,
                qty: order.requested_qty,
            })?;
        self.grid.reserve(cell, order.requested_qty)?;
        Ok(cell)
    }

    fn choose_port(&self) -> Position {
        let mut rng = self.rng.lock().expect("dispatch rng mutex poisoned");
        self.ports[rng.gen_range(0..self.ports.len())]
    }

    fn apply_events(&self, report: &mut DispatchReport) {
        for event in self.events.try_iter() {
            debug!("[DISPATCH] event {event:?}");
            match event {
                RobotEvent::PickStarted { robot, order } => {
                    if self.advance(robot, order, OrderStatus::Picking) {
                        report.advanced += 1;
                    }
                }
                RobotEvent::Picked { robot, order, .. } => {
                    if self.advance(robot, order, OrderStatus::Delivering) {
                        report.advanced += 1;
                        self.send_drop(robot, order, report);
                    }
                }
                RobotEvent::Dropped { robot, order, .. } => {
                    if self.advance(robot, order, OrderStatus::Completed) {
                        report.completed += 1;
                        info!("[ORDER] order {order} completed");
                    }
                }
                RobotEvent::CommandFailed { robot, order, target } => {
                    if !self.is_assignee(robot, order) {
                        warn!("[DISPATCH] ignoring failure from robot {robot}: order {order} is not its own");
                        continue;
                    }
                    warn!("[DISPATCH] robot {robot} could not reach {target} for order {order}");
                    self.fail(order, true, report);
                }
            }
        }
    }

    fn send_drop(&self, robot: RobotId, order: OrderId, report: &mut DispatchReport) {
        let port = self
            .orders
            .read()
            .expect("order queue lock poisoned")
            .get(order)
            .and_then(|o| o.delivery_port);
        let (Some(port), Some(handle)) = (port, self.robot(robot)) else {
            warn!("[DISPATCH] cannot route order {order} to a port");
            self.fail(order, false, report);
            return;
        };
        if let Err(err) = handle.send(RobotCommand::Drop {
            target: port,
            order,
        }) {
            warn!("[DISPATCH] order {order} failed: {err}");
            handle.release_claim(order);
            self.fail(order, false, report);
        }
    }

    fn advance(&self, robot: RobotId, order: OrderId, next: OrderStatus) -> bool {
        let mut orders = self.orders.write().expect("order queue lock poisoned");
        match orders.transition_by(order, robot, next) {
            Ok(()) => true,
            Err(err) => {
                warn!("[DISPATCH] ignoring event from robot {robot}: {err}");
                false
            }
        }
    }

    fn is_assignee(&self, robot: RobotId, order: OrderId) -> bool {
        self.orders
            .read()
            .expect("order queue lock poisoned")
            .get(order)
            .is_some_and(|o| o.assigned_robot == Some(robot))
    }

    /// Fail an order; when `return_stock` is set its reservation goes back to the cell.
    fn fail(&self, order: OrderId, return_stock: bool, report: &mut DispatchReport) {
        let reserved = {
            let mut orders = self.orders.write().expect("order queue lock poisoned");
            if let Err(err) = orders.transition(order, OrderStatus::Failed) {
                warn!("[DISPATCH] {err}");
                return;
            }
            orders
                .get(order)
                .and_then(|o| o.source_cell.map(|cell| (cell, o.requested_qty)))
        };
        report.failed += 1;
        if return_stock {
            if let Some((cell, qty)) = reserved {
                self.restock(cell, qty);
            }
        }
    }

    fn restock(&self, cell: Position, qty: u32) {
        if let Err(err) = self.grid.restock(cell, qty) {
            warn!("[DISPATCH] could not return stock to {cell}: {err}");
        }
    }

    fn robot(&self, id: RobotId) -> Option<&Arc<Robot>> {
        self.robots.iter().find(|robot| robot.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::fleet::Fleet;
    use crate::orders::{OrderRequest, Priority};
    use crate::types::RobotStatus;
    use crossbeam_channel::{Sender, unbounded};
    use rand::SeedableRng;
    use std::thread;

    struct Harness {
        grid: Arc<WarehouseGrid>,
        fleet: Fleet,
        orders: Arc<RwLock<OrderQueue>>,
        catalog: Catalog,
        events: Sender<RobotEvent>,
        dispatcher: Arc<OrderDispatcher>,
    }

    impl Harness {
        fn new(robots: &[Position]) -> Self {
            let grid = Arc::new(WarehouseGrid::new(8, 8, 5).expect("grid"));
            let fleet = Fleet::new(Arc::clone(&grid), robots, 10).expect("fleet");
            let orders = Arc::new(RwLock::new(OrderQueue::new()));
            let (events, events_rx) = unbounded();
            let dispatcher = Arc::new(OrderDispatcher::new(
                Arc::clone(&grid),
                fleet.robots().to_vec(),
                Arc::clone(&orders),
                events_rx,
                StdRng::seed_from_u64(11),
            ));
            Self {
                grid,
                fleet,
                orders,
                catalog: Catalog::sample(),
                events,
                dispatcher,
            }
        }

        fn order(&self, product_id: u32, qty: u32) -> OrderId {
            let request = OrderRequest {
                customer_name: "Metro Auto Parts".to_string(),
                product_id,
                requested_qty: qty,
                priority: Some(Priority::Normal),
            };
            self.orders
                .write()
                .expect("orders lock")
                .submit(request, &self.catalog)
                .expect("submit")
                .id
        }

        fn status(&self, id: OrderId) -> OrderStatus {
            self.orders.read().expect("orders lock").get(id).expect("order").status
        }

        fn robot(&self) -> &Arc<Robot> {
            &self.fleet.robots()[0]
        }
    }

    const SHELF: Position = Position::new(2, 3, 1);

    #[test]
    fn assigns_order_reserves_stock_and_enqueues_pick() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        h.grid.place(SHELF, 7, 1, "BIN-2-3-1").expect("place");
        let id = h.order(7, 1);

        let report = h.dispatcher.dispatch();
        assert_eq!(report.assigned, 1);
        assert_eq!(h.status(id), OrderStatus::Assigned);
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(0));

        let order = h.orders.read().expect("orders lock").get(id).cloned().expect("order");
        assert_eq!(order.assigned_robot, Some(1));
        assert_eq!(order.source_cell, Some(SHELF));
        let port = order.delivery_port.expect("port");
        assert!(h.grid.port_positions().contains(&port));

        assert_eq!(h.robot().queue_len(), 1);
        assert_eq!(
            h.robot().drain_commands(),
            vec![RobotCommand::Pick { target: SHELF, order: id }]
        );
    }

    #[test]
    fn missing_stock_fails_order_without_command() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        let id = h.order(7, 1);

        let report = h.dispatcher.dispatch();
        assert_eq!(report.failed, 1);
        assert_eq!(h.status(id), OrderStatus::Failed);
        assert_eq!(h.robot().queue_len(), 0);
        assert_eq!(h.robot().status(), RobotStatus::Idle);
        assert!(h.robot().is_available());
    }

    #[test]
    fn insufficient_quantity_fails_order() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        h.grid.place(SHELF, 7, 2, "BIN").expect("place");
        let id = h.order(7, 3);
        h.dispatcher.dispatch();
        assert_eq!(h.status(id), OrderStatus::Failed);
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(2));
    }

    #[test]
    fn sole_robot_goes_to_earliest_order() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        h.grid.place(SHELF, 7, 5, "BIN").expect("place");
        let first = h.order(7, 1);
        let second = h.order(7, 1);

        let report = h.dispatcher.dispatch();
        assert_eq!(report.assigned, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(h.status(first), OrderStatus::Assigned);
        assert_eq!(h.status(second), OrderStatus::Pending);
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(4));
    }

    #[test]
    fn priority_does_not_reorder_dispatch() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        h.grid.place(SHELF, 7, 5, "BIN").expect("place");
        let normal = h.order(7, 1);
        let express = h
            .orders
            .write()
            .expect("orders lock")
            .submit(
                OrderRequest {
                    customer_name: "Express Auto Repair".to_string(),
                    product_id: 7,
                    requested_qty: 1,
                    priority: Some(Priority::Express),
                },
                &h.catalog,
            )
            .expect("submit")
            .id;
        h.dispatcher.dispatch();
        assert_eq!(h.status(normal), OrderStatus::Assigned);
        assert_eq!(h.status(express), OrderStatus::Pending);
    }

    #[test]
    fn second_pass_without_changes_is_a_no_op() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        h.grid.place(SHELF, 7, 5, "BIN").expect("place");
        let first = h.order(7, 1);
        let second = h.order(7, 1);
        h.dispatcher.dispatch();

        let report = h.dispatcher.dispatch();
        assert_eq!(report.transitions(), 0);
        assert_eq!(h.status(first), OrderStatus::Assigned);
        assert_eq!(h.status(second), OrderStatus::Pending);
        assert_eq!(h.robot().queue_len(), 1);
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(4));
    }

    #[test]
    fn robot_events_drive_order_to_completion() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        h.grid.place(SHELF, 7, 1, "BIN").expect("place");
        let id = h.order(7, 1);
        h.dispatcher.dispatch();
        h.robot().drain_commands();

        h.events
            .send(RobotEvent::PickStarted { robot: 1, order: id })
            .expect("event");
        h.events
            .send(RobotEvent::Picked { robot: 1, order: id, position: SHELF })
            .expect("event");
        let report = h.dispatcher.dispatch();
        assert_eq!(report.advanced, 2);
        assert_eq!(h.status(id), OrderStatus::Delivering);

        let port = h
            .orders
            .read()
            .expect("orders lock")
            .get(id)
            .and_then(|o| o.delivery_port)
            .expect("port");
        assert_eq!(
            h.robot().drain_commands(),
            vec![RobotCommand::Drop { target: port, order: id }]
        );

        h.events
            .send(RobotEvent::Dropped { robot: 1, order: id, position: port })
            .expect("event");
        let report = h.dispatcher.dispatch();
        assert_eq!(report.completed, 1);
        assert_eq!(h.status(id), OrderStatus::Completed);

        // Completed is absorbing: stray events change nothing.
        h.events
            .send(RobotEvent::CommandFailed { robot: 1, order: id, target: port })
            .expect("event");
        let report = h.dispatcher.dispatch();
        assert_eq!(report.transitions(), 0);
        assert_eq!(h.status(id), OrderStatus::Completed);
    }

    #[test]
    fn failed_pick_returns_stock() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        h.grid.place(SHELF, 7, 3, "BIN").expect("place");
        let id = h.order(7, 2);
        h.dispatcher.dispatch();
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(1));

        h.events
            .send(RobotEvent::CommandFailed { robot: 1, order: id, target: SHELF })
            .expect("event");
        let report = h.dispatcher.dispatch();
        assert_eq!(report.failed, 1);
        assert_eq!(h.status(id), OrderStatus::Failed);
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(3));
    }

    #[test]
    fn busy_robot_is_skipped() {
        let h = Harness::new(&[Position::new(0, 1, 0), Position::new(1, 1, 0)]);
        h.grid.place(SHELF, 7, 5, "BIN").expect("place");
        assert!(h.fleet.robots()[0].try_claim(999));
        let id = h.order(7, 1);
        h.dispatcher.dispatch();
        let order = h.orders.read().expect("orders lock").get(id).cloned().expect("order");
        assert_eq!(order.assigned_robot, Some(2));
        assert_eq!(h.fleet.robots()[0].queue_len(), 0);
        assert_eq!(h.fleet.robots()[1].queue_len(), 1);
    }

    #[test]
    fn concurrent_passes_never_double_assign() {
        let starts = [Position::new(0, 1, 0), Position::new(1, 1, 0), Position::new(2, 1, 0)];
        let h = Harness::new(&starts);
        h.grid.place(SHELF, 7, 50, "BIN").expect("place");
        let ids: Vec<_> = (0..6).map(|_| h.order(7, 1)).collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = Arc::clone(&h.dispatcher);
                thread::spawn(move || dispatcher.dispatch())
            })
            .collect();
        let assigned: usize = handles
            .into_iter()
            .map(|handle| handle.join().expect("dispatch thread panicked").assigned)
            .sum();

        assert_eq!(assigned, 3);
        for robot in h.fleet.robots() {
            assert_eq!(robot.queue_len(), 1);
        }
        let statuses: Vec<_> = ids.iter().map(|id| h.status(*id)).collect();
        assert_eq!(&statuses[..3], &[OrderStatus::Assigned; 3]);
        assert_eq!(&statuses[3..], &[OrderStatus::Pending; 3]);
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(47));
    }

    #[test]
    fn stray_drop_does_not_complete_a_pending_order() {
        let h = Harness::new(&[Position::new(0, 0, 0)]);
        h.grid.place(SHELF, 7, 2, "BIN").expect("place");
        let id = h.order(7, 1);

        h.events
            .send(RobotEvent::Dropped { robot: 1, order: id, position: Position::new(0, 0, 0) })
            .expect("event");
        let report = h.dispatcher.dispatch();
        assert_eq!(report.completed, 0);
        // The pass still matches the order normally.
        assert_eq!(report.assigned, 1);
        assert_eq!(h.status(id), OrderStatus::Assigned);
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(1));
    }

    #[test]
    fn stray_events_leave_an_assigned_order_on_track() {
        let h = Harness::new(&[Position::new(0, 1, 0), Position::new(1, 1, 0)]);
        h.grid.place(SHELF, 7, 2, "BIN").expect("place");
        let id = h.order(7, 1);
        h.dispatcher.dispatch();
        assert_eq!(h.status(id), OrderStatus::Assigned);
        h.robot().drain_commands();

        let port = Position::new(0, 0, 0);
        for robot in [1, 2] {
            h.events
                .send(RobotEvent::Dropped { robot, order: id, position: port })
                .expect("event");
        }
        h.events
            .send(RobotEvent::CommandFailed { robot: 2, order: id, target: port })
            .expect("event");
        h.events
            .send(RobotEvent::Picked { robot: 2, order: id, position: SHELF })
            .expect("event");
        let report = h.dispatcher.dispatch();
        assert_eq!(report.transitions(), 0);
        assert_eq!(h.status(id), OrderStatus::Assigned);
        assert_eq!(h.grid.cell(SHELF).map(|c| c.quantity), Some(1));

        // The assignee's own events still carry the order through.
        h.events
            .send(RobotEvent::PickStarted { robot: 1, order: id })
            .expect("event");
        h.events
            .send(RobotEvent::Picked { robot: 1, order: id, position: SHELF })
            .expect("event");
        let report = h.dispatcher.dispatch();
        assert_eq!(report.advanced, 2);
        assert_eq!(h.status(id), OrderStatus::Delivering);
        assert!(matches!(
            h.robot().drain_commands().as_slice(),
            [RobotCommand::Drop { order, .. }] if *order == id
        ));
    }

    #[test]
    fn claim_reports_no_robot_when_all_are_busy() {
        let h = Harness::new(&[Position::new(0, 1, 0)]);
        assert!(h.robot().try_claim(500));
        assert!(matches!(
            h.dispatcher.claim_robot(8),
            Err(WarehouseError::NoRobotAvailable(8))
        ));
        assert!(h.robot().release_claim(500));
        assert_eq!(h.dispatcher.claim_robot(8).map(|r| r.id()).ok(), Some(1));
    }
}
