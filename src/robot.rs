//! Robot handles and the per-robot actor that executes their command stream.
//!
//! A [`Robot`] is the shared handle: command queue plus a mutex-guarded state
//! snapshot. Only the robot's own [`RobotActor`] writes position and status;
//! everyone else reads point-in-time copies. The dispatcher's claim on a robot
//! goes through the same mutex so two passes can never assign one robot twice.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, select};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, WarehouseError};
use crate::grid::WarehouseGrid;
use crate::types::{OrderId, Position, RobotCommand, RobotId, RobotStatus, RobotUpdate};

// Physical constants of the storage grid and robot drive.
const CELL_WIDTH_M: f64 = 0.705;
const CELL_DEPTH_M: f64 = 0.480;
const BIN_HEIGHT_M: f64 = 0.330;
const HORIZONTAL_SPEED_MPS: f64 = 3.1;
const LIFT_SPEED_MPS: f64 = 1.6;
const ACCELERATION_MPS2: f64 = 0.8;

/// Lowering, gripping and lifting a bin.
pub const PICK_DURATION: Duration = Duration::from_millis(2000);
/// Lowering and releasing a bin at a port.
pub const DROP_DURATION: Duration = Duration::from_millis(1500);

/// Unscaled travel time between two cells.
///
/// Manhattan legs converted to meters per axis, divided by the axis speed, plus
/// one acceleration allowance for any non-zero move.
pub fn travel_time(from: Position, to: Position) -> Duration {
    let (dx, dy, dz) = from.axis_distance(&to);
    let horizontal_m = f64::from(dx) * CELL_WIDTH_M + f64::from(dy) * CELL_DEPTH_M;
    let vertical_m = f64::from(dz) * BIN_HEIGHT_M;
    let mut seconds = horizontal_m / HORIZONTAL_SPEED_MPS + vertical_m / LIFT_SPEED_MPS;
    if seconds > 0.0 {
        seconds += (HORIZONTAL_SPEED_MPS / ACCELERATION_MPS2) * 0.5;
    }
    Duration::from_secs_f64(seconds)
}

/// Scaling applied to simulated durations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActorTiming {
    pub time_scale: f64,
}

impl ActorTiming {
    pub fn scaled(&self, duration: Duration) -> Duration {
        if self.time_scale <= 0.0 {
            return Duration::ZERO;
        }
        duration.mul_f64(self.time_scale)
    }
}

impl Default for ActorTiming {
    fn default() -> Self {
        Self { time_scale: 1.0 }
    }
}

/// Receiver of robot state changes (e.g. a websocket hub).
pub trait UpdateSink: Send + Sync {
    fn publish(&self, update: RobotUpdate);
}

impl<F> UpdateSink for F
where
    F: Fn(RobotUpdate) + Send + Sync,
{
    fn publish(&self, update: RobotUpdate) {
        self(update)
    }
}

/// Forwards updates into a channel; a dropped receiver just discards them.
pub struct ChannelSink(Sender<RobotUpdate>);

impl ChannelSink {
    pub fn new(tx: Sender<RobotUpdate>) -> Self {
        Self(tx)
    }
}

impl UpdateSink for ChannelSink {
    fn publish(&self, update: RobotUpdate) {
        let _ = self.0.send(update);
    }
}

/// Lifecycle notifications from actors to the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RobotEvent {
    PickStarted {
        robot: RobotId,
        order: OrderId,
    },
    Picked {
        robot: RobotId,
        order: OrderId,
        position: Position,
    },
    Dropped {
        robot: RobotId,
        order: OrderId,
        position: Position,
    },
    CommandFailed {
        robot: RobotId,
        order: OrderId,
        target: Position,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RobotState {
    position: Position,
    status: RobotStatus,
    assignment: Option<OrderId>,
}

/// Read-only copy of a robot for reporting. May be stale by the time it is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RobotSnapshot {
    pub id: RobotId,
    pub position: Position,
    pub status: RobotStatus,
    pub assigned_order: Option<OrderId>,
    pub queued_commands: usize,
}

pub struct Robot {
    id: RobotId,
    state: Mutex<RobotState>,
    commands: Sender<RobotCommand>,
    // Handed to the actor on start; its drop disconnects the queue.
    inbox: Mutex<Option<Receiver<RobotCommand>>>,
    accepting: AtomicBool,
}

impl Robot {
    /// Create an idle robot with a bounded command queue.
    pub fn new(id: RobotId, position: Position, queue_capacity: usize) -> Self {
        let (commands, inbox) = bounded(queue_capacity);
        Self {
            id,
            state: Mutex::new(RobotState {
                position,
                status: RobotStatus::Idle,
                assignment: None,
            }),
            commands,
            inbox: Mutex::new(Some(inbox)),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    fn state(&self) -> RobotState {
        *self.state.lock().expect("robot state mutex poisoned")
    }

    fn update_state<R>(&self, f: impl FnOnce(&mut RobotState) -> R) -> R {
        let mut guard = self.state.lock().expect("robot state mutex poisoned");
        f(&mut guard)
    }

    pub fn status(&self) -> RobotStatus {
        self.state().status
    }

    pub fn position(&self) -> Position {
        self.state().position
    }

    pub fn assignment(&self) -> Option<OrderId> {
        self.state().assignment
    }

    pub fn snapshot(&self) -> RobotSnapshot {
        let state = self.state();
        RobotSnapshot {
            id: self.id,
            position: state.position,
            status: state.status,
            assigned_order: state.assignment,
            queued_commands: self.commands.len(),
        }
    }

    /// Idle and not claimed by any order.
    pub fn is_available(&self) -> bool {
        let state = self.state();
        state.status == RobotStatus::Idle && state.assignment.is_none()
    }

    /// Claim an available robot for `order`. Check-and-set under the state lock.
    pub fn try_claim(&self, order: OrderId) -> bool {
        self.update_state(|state| {
            if state.status != RobotStatus::Idle || state.assignment.is_some() {
                return false;
            }
            state.assignment = Some(order);
            true
        })
    }

    /// Drop the claim if it is still held for `order`.
    pub fn release_claim(&self, order: OrderId) -> bool {
        self.update_state(|state| {
            if state.assignment != Some(order) {
                return false;
            }
            state.assignment = None;
            true
        })
    }

    /// Enqueue a command, blocking while the queue is full. Fails with
    /// `RobotOffline` once the worker has exited, even for a blocked caller.
    pub fn send(&self, command: RobotCommand) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(WarehouseError::RobotOffline(self.id));
        }
        self.commands
            .send(command)
            .map_err(|_| WarehouseError::RobotOffline(self.id))
    }

    /// Enqueue without blocking; a full queue is reported instead of waited on.
    pub fn try_send(&self, command: RobotCommand) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(WarehouseError::RobotOffline(self.id));
        }
        self.commands.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => WarehouseError::QueueSaturated(self.id),
            TrySendError::Disconnected(_) => WarehouseError::RobotOffline(self.id),
        })
    }

    pub fn queue_len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// The receiving end of the queue; `None` once a worker has taken it.
    pub(crate) fn take_inbox(&self) -> Option<Receiver<RobotCommand>> {
        self.inbox.lock().expect("robot inbox mutex poisoned").take()
    }

    #[cfg(test)]
    pub(crate) fn drain_commands(&self) -> Vec<RobotCommand> {
        self.inbox
            .lock()
            .expect("robot inbox mutex poisoned")
            .as_ref()
            .map(|inbox| inbox.try_iter().collect())
            .unwrap_or_default()
    }
}

/// Everything an actor needs besides its robot.
#[derive(Clone)]
pub(crate) struct ActorContext {
    pub grid: Arc<WarehouseGrid>,
    pub sink: Arc<dyn UpdateSink>,
    pub events: Sender<RobotEvent>,
    pub timing: ActorTiming,
    pub collisions: Arc<AtomicUsize>,
}

/// Executes one robot's commands serially on its own thread.
pub(crate) struct RobotActor {
    robot: Arc<Robot>,
    ctx: ActorContext,
    occupying: Option<Position>,
}

impl RobotActor {
    pub(crate) fn new(robot: Arc<Robot>, ctx: ActorContext, occupying: Option<Position>) -> Self {
        Self {
            robot,
            ctx,
            occupying,
        }
    }

    /// Loop until shutdown. A command already running completes; shutdown is
    /// only observed before the next one starts.
    pub(crate) fn run(mut self, shutdown: Receiver<()>) {
        let id = self.robot.id();
        let Some(inbox) = self.robot.take_inbox() else {
            warn!("[ROBOT] robot {id} already has a worker");
            return;
        };
        info!("[ROBOT] robot {id} started at {}", self.robot.position());
        loop {
            let next = select! {
                recv(inbox) -> msg => msg.ok(),
                recv(shutdown) -> _ => None,
            };
            let Some(command) = next else { break };
            if shutdown_requested(&shutdown) {
                debug!("[ROBOT] robot {id} dropping {} after shutdown", command.kind());
                break;
            }
            self.execute(command);
        }
        // Queued commands are discarded and blocked senders see RobotOffline.
        drop(inbox);
        info!("[ROBOT] robot {id} shutting down");
    }

    pub(crate) fn execute(&mut self, command: RobotCommand) {
        let id = self.robot.id();
        debug!("[ROBOT] robot {id} received {} to {}", command.kind(), command.target());
        match command {
            RobotCommand::Move { target, order } => {
                // A robot holding a picked bin keeps carrying it across moves.
                let (leg, resting) = if self.robot.status() == RobotStatus::Carrying {
                    (RobotStatus::Delivering, RobotStatus::Carrying)
                } else {
                    (RobotStatus::Moving, RobotStatus::Idle)
                };
                if self.travel(target, leg).is_err() {
                    if let Some(order) = order {
                        self.fail(order, target);
                    }
                    return;
                }
                self.robot.update_state(|state| state.status = resting);
                self.publish(order);
            }
            RobotCommand::Pick { target, order } => {
                if self.travel(target, RobotStatus::Moving).is_err() {
                    self.fail(order, target);
                    return;
                }
                self.robot.update_state(|state| state.status = RobotStatus::Picking);
                self.emit(RobotEvent::PickStarted { robot: id, order });
                self.pause(PICK_DURATION);
                self.robot.update_state(|state| state.status = RobotStatus::Carrying);
                debug!("[ROBOT] robot {id} picked up item for order {order}");
                self.publish(Some(order));
                self.emit(RobotEvent::Picked {
                    robot: id,
                    order,
                    position: target,
                });
            }
            RobotCommand::Drop { target, order } => {
                let leg = if self.robot.status() == RobotStatus::Carrying {
                    RobotStatus::Delivering
                } else {
                    RobotStatus::Moving
                };
                if self.travel(target, leg).is_err() {
                    self.fail(order, target);
                    return;
                }
                self.robot.update_state(|state| state.status = RobotStatus::Dropping);
                self.pause(DROP_DURATION);
                self.robot.update_state(|state| {
                    state.status = RobotStatus::Idle;
                    if state.assignment == Some(order) {
                        state.assignment = None;
                    }
                });
                debug!("[ROBOT] robot {id} completed delivery for order {order}");
                self.publish(Some(order));
                self.emit(RobotEvent::Dropped {
                    robot: id,
                    order,
                    position: target,
                });
            }
        }
    }

    /// Travel leg shared by all commands. No lock is held while time passes.
    fn travel(&mut self, target: Position, status: RobotStatus) -> Result<()> {
        let id = self.robot.id();
        if !self.ctx.grid.is_valid_position(target) {
            self.robot.update_state(|state| state.status = RobotStatus::Error);
            warn!("[ROBOT] robot {id} cannot move to {target}: out of bounds");
            return Err(WarehouseError::InvalidPosition(target));
        }
        let from = self.robot.position();
        if from == target {
            return Ok(());
        }
        let duration = travel_time(from, target);
        self.robot.update_state(|state| state.status = status);
        debug!("[ROBOT] robot {id} moving {from} -> {target}, eta {duration:?}");
        self.pause(duration);
        self.robot.update_state(|state| state.position = target);
        self.shift_occupancy(target);
        Ok(())
    }

    fn shift_occupancy(&mut self, target: Position) {
        if let Some(previous) = self.occupying.take() {
            self.ctx.grid.release(previous);
        }
        if self.ctx.grid.try_occupy(target) {
            self.occupying = Some(target);
        } else {
            self.ctx.collisions.fetch_add(1, Ordering::SeqCst);
            warn!(
                "[ROBOT] robot {} arrived at occupied cell {target}",
                self.robot.id()
            );
        }
    }

    fn fail(&self, order: OrderId, target: Position) {
        self.robot.release_claim(order);
        self.emit(RobotEvent::CommandFailed {
            robot: self.robot.id(),
            order,
            target,
        });
    }

    fn pause(&self, duration: Duration) {
        let scaled = self.ctx.timing.scaled(duration);
        if !scaled.is_zero() {
            thread::sleep(scaled);
        }
    }

    fn publish(&self, order: Option<OrderId>) {
        let state = self.robot.state();
        self.ctx.sink.publish(RobotUpdate {
            robot_id: self.robot.id(),
            position: state.position,
            status: state.status,
            order_id: order,
        });
    }

    fn emit(&self, event: RobotEvent) {
        let _ = self.ctx.events.send(event);
    }
}

fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}
