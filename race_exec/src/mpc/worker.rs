//! Worker thread which runs MPC solves off the control thread.
//!
//! Each request carries a cycle number. The caller waits for the reply to its own cycle up to a
//! deadline, replies to older cycles which arrive late are discarded. If requests queue up while
//! a solve is running only the newest is solved.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, RwLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use super::{MpcCtrl, MpcError, MpcOutput, MpcReport};
use crate::{map::OccupancyGrid, path::NamedPath, vehicle::VehicleState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single solve request.
#[derive(Debug)]
pub struct MpcJob {
    pub cycle: u64,
    pub path: Arc<NamedPath>,
    pub state: VehicleState,
}

/// The result of a solve request.
#[derive(Debug)]
pub struct MpcReply {
    pub cycle: u64,
    pub result: Result<MpcOutput, MpcError>,
    pub report: MpcReport,
}

/// Handle to the controller worker thread.
pub struct CtrlWorker {
    sender: Sender<CtrlSignal>,
    receiver: Receiver<MpcReply>,
    jh: Option<JoinHandle<()>>,
    next_cycle: u64,
    deadline: Duration,
    last_report: MpcReport,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub enum CtrlSignal {
    /// The worker should stop
    Stop,

    /// Solve the given job
    Solve(Box<MpcJob>),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlWorker {
    /// Start the worker. The grid is read locked while the reference is checked against it and
    /// released before the solve.
    pub fn spawn(
        ctrl: MpcCtrl,
        grid: Arc<RwLock<OccupancyGrid>>,
        deadline: Duration,
    ) -> Result<Self, std::io::Error> {
        let (job_tx, job_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();

        let jh = thread::Builder::new()
            .name("mpc_worker".into())
            .spawn(move || worker_thread(ctrl, grid, job_rx, reply_tx))?;

        Ok(Self {
            sender: job_tx,
            receiver: reply_rx,
            jh: Some(jh),
            next_cycle: 0,
            deadline,
            last_report: MpcReport::default(),
        })
    }

    /// Status of the last cycle whose reply arrived in time
    pub fn last_report(&self) -> MpcReport {
        self.last_report
    }

    /// Solve for a command, waiting at most the deadline.
    pub fn request(
        &mut self,
        path: Arc<NamedPath>,
        state: VehicleState,
    ) -> Result<MpcOutput, MpcError> {
        let cycle = self.next_cycle;
        self.next_cycle += 1;

        self.sender
            .send(CtrlSignal::Solve(Box::new(MpcJob { cycle, path, state })))
            .map_err(|_| MpcError::WorkerStopped)?;

        let deadline_at = Instant::now() + self.deadline;

        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());

            match self.receiver.recv_timeout(remaining) {
                Ok(reply) if reply.cycle == cycle => {
                    self.last_report = reply.report;
                    return reply.result;
                }
                Ok(reply) => {
                    debug!("Discarding late MPC result from cycle {}", reply.cycle);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("MPC cycle {} missed its deadline", cycle);
                    return Err(MpcError::DeadlineMissed {
                        cycle,
                        deadline_s: self.deadline.as_secs_f64(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(MpcError::WorkerStopped),
            }
        }
    }
}

impl Drop for CtrlWorker {
    fn drop(&mut self) {
        self.sender.send(CtrlSignal::Stop).ok();

        if let Some(jh) = self.jh.take() {
            if jh.join().is_err() {
                warn!("MPC worker thread panicked");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn worker_thread(
    mut ctrl: MpcCtrl,
    grid: Arc<RwLock<OccupancyGrid>>,
    job_receiver: Receiver<CtrlSignal>,
    reply_sender: Sender<MpcReply>,
) {
    while let Ok(signal) = job_receiver.recv() {
        let mut job = match signal {
            CtrlSignal::Stop => break,
            CtrlSignal::Solve(job) => job,
        };

        // Skip to the newest job if several are waiting
        let mut stop = false;
        while let Ok(next) = job_receiver.try_recv() {
            match next {
                CtrlSignal::Stop => stop = true,
                CtrlSignal::Solve(newer) => {
                    trace!("Dropping queued MPC job for cycle {}", job.cycle);
                    job = newer;
                }
            }
        }
        if stop {
            break;
        }

        let result = ctrl.proc(&job.path, &job.state, Some(&grid));

        let reply = MpcReply {
            cycle: job.cycle,
            result,
            report: ctrl.report(),
        };

        if reply_sender.send(reply).is_err() {
            break;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        mpc::{test_params, MpcMode, OsqpSolver, QpError, QpProblem, QpSolution, QpSolver},
        path::Waypoint,
    };
    use comms_if::msg::PoseMsg;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sleeps before failing, to simulate a slow solve.
    struct SlowSolver(Duration);

    impl QpSolver for SlowSolver {
        fn solve(&self, _: &QpProblem) -> Result<QpSolution, QpError> {
            thread::sleep(self.0);
            Err(QpError::MaxIterations(0))
        }
    }

    /// Records whether the grid could be write locked while solving.
    struct GridWriteSolver {
        grid: Arc<RwLock<OccupancyGrid>>,
        writable: Arc<AtomicBool>,
    }

    impl QpSolver for GridWriteSolver {
        fn solve(&self, _: &QpProblem) -> Result<QpSolution, QpError> {
            self.writable
                .store(self.grid.try_write().is_ok(), Ordering::SeqCst);
            Err(QpError::MaxIterations(0))
        }
    }

    fn setup() -> (Arc<NamedPath>, Arc<RwLock<OccupancyGrid>>, VehicleState) {
        let path = NamedPath {
            name: "straight".into(),
            waypoints: (0..40)
                .map(|i| Waypoint::new(0.5 * i as f64, 0.0, 0.0, 2.0))
                .collect(),
            closed: false,
        };
        let grid =
            OccupancyGrid::new_free("map", 300, 40, 0.1, PoseMsg::planar(-5.0, -2.0, 0.0)).unwrap();
        let state = VehicleState {
            x: 1.0,
            velocity: 2.0,
            ..Default::default()
        };
        (Arc::new(path), Arc::new(RwLock::new(grid)), state)
    }

    #[test]
    fn test_solves_in_time() {
        let (path, grid, state) = setup();
        let params = test_params(10);
        let ctrl = MpcCtrl::new(params.clone(), Box::new(OsqpSolver::new(params.solver)));

        let mut worker = CtrlWorker::spawn(ctrl, grid, Duration::from_secs(10)).unwrap();
        let out = worker.request(path, state).unwrap();

        assert!((out.command.speed_ms - 2.0).abs() < 0.1);
        assert_eq!(worker.last_report().final_mode, MpcMode::Apply);
    }

    #[test]
    fn test_late_results_discarded() {
        let (path, grid, state) = setup();
        let params = test_params(5);
        let ctrl = MpcCtrl::new(params, Box::new(SlowSolver(Duration::from_millis(200))));

        let mut worker = CtrlWorker::spawn(ctrl, grid, Duration::from_millis(20)).unwrap();

        // The first cycle misses the deadline
        assert!(matches!(
            worker.request(path.clone(), state),
            Err(MpcError::DeadlineMissed { cycle: 0, .. })
        ));

        // With a long enough deadline the next cycle gets its own reply, the late reply for cycle
        // 0 is skipped over
        worker.deadline = Duration::from_secs(5);
        assert!(matches!(
            worker.request(path, state),
            Err(MpcError::Solver(QpError::MaxIterations(0)))
        ));
        assert_eq!(worker.last_report().final_mode, MpcMode::Fallback);
    }

    #[test]
    fn test_grid_unlocked_during_solve() {
        let (path, grid, state) = setup();
        let writable = Arc::new(AtomicBool::new(false));
        let solver = GridWriteSolver {
            grid: grid.clone(),
            writable: writable.clone(),
        };
        let ctrl = MpcCtrl::new(test_params(5), Box::new(solver));

        let mut worker = CtrlWorker::spawn(ctrl, grid, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            worker.request(path, state),
            Err(MpcError::Solver(QpError::MaxIterations(0)))
        ));

        // The map could have been updated while the solve was running
        assert!(writable.load(Ordering::SeqCst));
    }
}
