//! Race executable entry point.
//!
//! # Architecture
//!
//! The executable replays a recording of the vehicle's inputs through the planner:
//!
//!     - Initialise the session, logging, parameters, paths and the initial map
//!     - Start the scan thread, which updates the map and plans gaps for every scan
//!     - Main loop over the recording:
//!         - Transforms and odometry are handed to the planner directly
//!         - Scans are forwarded to the scan thread
//!         - Every ego odometry sample triggers a control cycle, whose command is archived

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::{
    fs::File,
    io::BufReader,
    path::PathBuf,
    sync::{
        mpsc::{channel, Receiver},
        Arc,
    },
    thread,
};
use structopt::StructOpt;

// Internal
use comms_if::{
    msg::{LaserScan, OccupancyGridMsg},
    replay::{read_recording, InputMsg},
};
use race_lib::{
    map::OccupancyGrid,
    mpc::CommandSource,
    params::PlannerParams,
    path::GlobalPath,
    planner::{CycleOutput, Planner},
};
use util::{
    archive::Archiver,
    logger::{logger_init, LevelFilter},
    session::{self, Session},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Replay a recording through the local planner and controller.
#[derive(Debug, StructOpt)]
#[structopt(name = "race_exec")]
struct Opt {
    /// Parameter file, relative to the params directory of the software root
    #[structopt(short, long, default_value = "planner.toml")]
    params: String,

    /// JSON encoded initial map, otherwise the first map in the recording is used
    #[structopt(short, long, parse(from_os_str))]
    map: Option<PathBuf>,

    /// Recording of input messages, one JSON message per line
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Log debug messages
    #[structopt(short, long)]
    verbose: bool,
}

/// One archived control cycle
#[derive(Debug, Serialize)]
struct CycleRecord {
    stamp_s: f64,
    steering_rad: f64,
    speed_ms: f64,
    accel_mss: f64,
    source: CommandSource,
    opponent_distance_m: Option<f64>,
    mpc_error: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum ScanSignal {
    Stop,
    Scan(Box<LaserScan>),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("race_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    let level = if opt.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logger_init(level, &session).wrap_err("Failed to initialise logging")?;

    info!("Race Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: PlannerParams = util::params::load(&opt.params)
        .wrap_err_with(|| format!("Could not load parameters from {}", opt.params))?;
    info!("Parameters loaded");

    let global_path = GlobalPath::load(&params.path).wrap_err("Could not load the global path")?;

    // ---- LOAD RECORDING ----

    let file = File::open(&opt.input)
        .wrap_err_with(|| format!("Could not open the recording {:?}", opt.input))?;
    let msgs = read_recording(BufReader::new(file)).wrap_err("Could not read the recording")?;
    info!("Loaded {} messages from {:?}", msgs.len(), opt.input);

    // ---- INITIAL MAP ----

    let map_msg = match opt.map {
        Some(ref path) => {
            let file = File::open(path)
                .wrap_err_with(|| format!("Could not open the map {:?}", path))?;
            serde_json::from_reader::<_, OccupancyGridMsg>(BufReader::new(file))
                .wrap_err("Could not parse the map")?
        }
        None => msgs
            .iter()
            .find_map(|m| match m {
                InputMsg::Map(map) => Some(map.clone()),
                _ => None,
            })
            .ok_or_else(|| eyre!("No map was given and the recording doesn't contain one"))?,
    };
    let grid = OccupancyGrid::from_msg(&map_msg).wrap_err("The initial map is unusable")?;
    info!(
        "Initial map is {}x{} cells at {} m/cell",
        grid.width(),
        grid.height(),
        grid.resolution
    );

    // ---- INITIALISE PLANNER ----

    let map_save_period = params.planner.map_save_period_scans;
    let planner =
        Arc::new(Planner::new(params, global_path, grid).wrap_err("Failed to initialise the planner")?);
    info!("Planner initialised");

    let mut archiver =
        Archiver::from_path(&session, "cycles.csv").wrap_err("Could not open the cycle archive")?;

    // ---- SCAN THREAD ----

    let (scan_tx, scan_rx) = channel();
    let scan_jh = {
        let planner = planner.clone();
        thread::Builder::new()
            .name("scan".into())
            .spawn(move || scan_thread(planner, scan_rx, map_save_period))
            .wrap_err("Could not start the scan thread")?
    };

    // ---- MAIN LOOP ----

    info!("Beginning replay\n");

    let mut num_cycles = 0usize;
    let mut num_fallbacks = 0usize;
    let mut last_stamp_s = 0.0;

    for msg in msgs.into_iter() {
        match msg {
            InputMsg::Scan(scan) => {
                if scan_tx.send(ScanSignal::Scan(Box::new(scan))).is_err() {
                    error!("Scan thread has stopped");
                    break;
                }
            }
            InputMsg::Transform(tf) => {
                if let Err(e) = planner.on_transform(&tf) {
                    warn!("Could not store transform: {}", e);
                }
            }
            InputMsg::OppOdom(odom) => {
                if let Err(e) = planner.on_opp_odom(&odom) {
                    warn!("Could not update the opponent: {}", e);
                }
            }
            InputMsg::Map(map) => {
                if let Err(e) = planner.on_map(&map) {
                    warn!("Rejected map update: {}", e);
                }
            }
            InputMsg::EgoOdom(odom) => {
                last_stamp_s = odom.stamp_s;
                planner
                    .on_ego_odom(&odom)
                    .wrap_err("Could not update the ego vehicle")?;

                let out = match planner.control_cycle(odom.stamp_s) {
                    Ok(o) => o,
                    Err(e) => {
                        warn!("Control cycle failed: {}", e);
                        continue;
                    }
                };

                num_cycles += 1;
                if out.command.source != CommandSource::Mpc {
                    num_fallbacks += 1;
                }

                if let Err(e) = archiver.serialise(&CycleRecord::from(&out)) {
                    warn!("Could not archive cycle: {}", e);
                }
            }
        }
    }

    // ---- SHUTDOWN ----

    scan_tx.send(ScanSignal::Stop).ok();
    if scan_jh.join().is_err() {
        error!("Scan thread panicked");
    }

    match planner.map_msg(last_stamp_s) {
        Ok(map) => session.save("final_map.json", map),
        Err(e) => warn!("Could not save the final map: {}", e),
    }

    info!(
        "Replay complete: {} control cycles, {} without the MPC",
        num_cycles, num_fallbacks
    );

    session.exit();

    Ok(())
}

/// Update the map and gaps for every scan received, until stopped.
fn scan_thread(planner: Arc<Planner>, receiver: Receiver<ScanSignal>, map_save_period: usize) {
    let mut num_scans = 0usize;

    while let Ok(ScanSignal::Scan(scan)) = receiver.recv() {
        match planner.on_scan(&scan) {
            Ok(out) => {
                if let Some(report) = out.map_report {
                    debug!("Map update: {:?}", report);
                }
            }
            Err(e) => warn!("Scan processing failed: {}", e),
        }

        num_scans += 1;

        if map_save_period > 0 && num_scans % map_save_period == 0 {
            match planner.map_msg(scan.stamp_s) {
                Ok(map) => session::save_with_timestamp("maps/map.json", map),
                Err(e) => warn!("Could not snapshot the map: {}", e),
            }
        }
    }

    debug!("Scan thread stopping after {} scans", num_scans);
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl From<&CycleOutput> for CycleRecord {
    fn from(out: &CycleOutput) -> Self {
        Self {
            stamp_s: out.stamp_s,
            steering_rad: out.command.steering_rad,
            speed_ms: out.command.speed_ms,
            accel_mss: out.command.accel_mss,
            source: out.command.source,
            opponent_distance_m: out.opponent_distance_m,
            mpc_error: out.mpc_error.clone(),
        }
    }
}
