//! Robot fleet: creation, worker threads and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::info;

use crate::error::{Result, WarehouseError};
use crate::grid::WarehouseGrid;
use crate::robot::{ActorContext, ActorTiming, Robot, RobotActor, RobotEvent, RobotSnapshot, UpdateSink};
use crate::types::{Position, RobotId};

struct Workers {
    handles: Vec<thread::JoinHandle<()>>,
    // Dropping the sender is the shutdown signal.
    shutdown: Option<Sender<()>>,
}

pub struct Fleet {
    grid: Arc<WarehouseGrid>,
    robots: Vec<Arc<Robot>>,
    collisions: Arc<AtomicUsize>,
    workers: Mutex<Workers>,
}

impl Fleet {
    /// Create idle robots (ids from 1) at the given start cells and occupy them.
    pub fn new(
        grid: Arc<WarehouseGrid>,
        starts: &[Position],
        queue_capacity: usize,
    ) -> Result<Self> {
        let mut robots = Vec::with_capacity(starts.len());
        for (index, &start) in starts.iter().enumerate() {
            if !grid.try_occupy(start) {
                for placed in &starts[..index] {
                    grid.release(*placed);
                }
                return Err(WarehouseError::InvalidPosition(start));
            }
            robots.push(Arc::new(Robot::new(
                index as RobotId + 1,
                start,
                queue_capacity,
            )));
        }
        Ok(Self {
            grid,
            robots,
            collisions: Arc::new(AtomicUsize::new(0)),
            workers: Mutex::new(Workers {
                handles: Vec::new(),
                shutdown: None,
            }),
        })
    }

    /// Default start cells: level 0, row-major, skipping the port row.
    pub fn default_starts(grid: &WarehouseGrid, count: usize) -> Vec<Position> {
        let (width, height, _) = grid.dimensions();
        (1..height)
            .flat_map(|y| (0..width).map(move |x| Position::new(x, y, 0)))
            .take(count)
            .collect()
    }

    /// Spawn one worker thread per robot. Calling twice is a no-op.
    pub fn start(
        &self,
        sink: Arc<dyn UpdateSink>,
        events: Sender<RobotEvent>,
        timing: ActorTiming,
    ) -> Result<()> {
        let mut workers = self.workers.lock().expect("fleet workers mutex poisoned");
        if workers.shutdown.is_some() {
            return Ok(());
        }
        let (shutdown_tx, shutdown_rx): (Sender<()>, Receiver<()>) = bounded(0);
        let ctx = ActorContext {
            grid: Arc::clone(&self.grid),
            sink,
            events,
            timing,
            collisions: Arc::clone(&self.collisions),
        };
        for robot in &self.robots {
            let actor = RobotActor::new(Arc::clone(robot), ctx.clone(), Some(robot.position()));
            let shutdown_rx = shutdown_rx.clone();
            let id = robot.id();
            let handle = thread::Builder::new()
                .name(format!("robot-{id}"))
                .spawn(move || actor.run(shutdown_rx))
                .map_err(|_| WarehouseError::RobotOffline(id))?;
            workers.handles.push(handle);
        }
        workers.shutdown = Some(shutdown_tx);
        info!("[FLEET] started {} robot workers", self.robots.len());
        Ok(())
    }

    /// Stop accepting commands, signal workers and wait for in-flight commands.
    pub fn shutdown(&self) {
        for robot in &self.robots {
            robot.stop_accepting();
        }
        let (handles, shutdown) = {
            let mut workers = self.workers.lock().expect("fleet workers mutex poisoned");
            (std::mem::take(&mut workers.handles), workers.shutdown.take())
        };
        drop(shutdown);
        for handle in handles {
            handle.join().expect("robot thread panicked");
        }
    }

    pub fn robots(&self) -> &[Arc<Robot>] {
        &self.robots
    }

    pub fn get(&self, id: RobotId) -> Result<&Arc<Robot>> {
        self.robots
            .iter()
            .find(|robot| robot.id() == id)
            .ok_or(WarehouseError::UnknownRobot(id))
    }

    pub fn snapshot(&self) -> Vec<RobotSnapshot> {
        self.robots.iter().map(|robot| robot.snapshot()).collect()
    }

    /// Moves that ended on a cell another robot already held.
    pub fn collisions(&self) -> usize {
        self.collisions.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.robots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.robots.is_empty()
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        self.shutdown();
    }
}
