use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use chrono::Utc;
use clap::{Parser, Subcommand, arg};
use egui::Vec2;
use log::{error, info};
use serde_json::json;

use ridewatch::{
    AppConfig, Backend, LiveSession, MemoryBackend, RidewatchError, SafetyScoreInputs, ScoreCard,
    SupabaseBackend,
    ui::{LiveDashboardApp, ScoreCardApp},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow a rider's latest session live
    Live {
        #[arg(short, long)]
        rider: String,

        /// Skip the lookup and watch this session
        #[arg(short, long)]
        session: Option<String>,

        #[arg(short, long)]
        label: Option<String>,

        /// Supabase project URL, overrides SUPABASE_URL
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        key: Option<String>,

        /// Use an in-memory backend fed with made-up events
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Show a safety score card
    Scores {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(long, default_value_t = 0.)]
        overall: f64,
        #[arg(long, default_value_t = 0.)]
        acceleration: f64,
        #[arg(long, default_value_t = 0.)]
        gyroscope: f64,
        #[arg(long, default_value_t = 0.)]
        events: f64,
        #[arg(long, default_value_t = 0.)]
        potholes: f64,
        #[arg(long, default_value_t = 0.)]
        speed_consistency: f64,
    },
}

const OFFLINE_SESSION: &str = "offline-session";
const OFFLINE_EVENT_PERIOD: Duration = Duration::from_secs(3);

/// Keeps an in-memory backend busy the way a device on a ride would.
fn offline_feed(backend: Arc<MemoryBackend>, config: &AppConfig, rider_id: &str) {
    let tables = config.tables.clone();
    backend.seed(
        &tables.uploads,
        vec![json!({
            "rider_id": rider_id,
            "session_id": OFFLINE_SESSION,
            "uploaded_at": Utc::now().to_rfc3339(),
        })],
    );
    let rider_id = rider_id.to_string();
    thread::spawn(move || {
        for tick in 0u64.. {
            let now = Utc::now().to_rfc3339();
            let wobble = (tick as f64 * 0.7).sin();
            let sample = json!({
                "rider_id": rider_id,
                "session_id": OFFLINE_SESSION,
                "ax": wobble, "ay": 0.1 * wobble, "az": 9.81,
                "gx": 0.02, "gy": -0.01, "gz": 0.2 * wobble,
                "latitude": 52.52 + tick as f64 * 1e-5, "longitude": 13.405,
                "speed": 5.5 + wobble,
            });
            let _ = backend.insert(&tables.telemetry, sample);

            if tick % 3 == 0 {
                let pothole = json!({
                    "id": format!("pothole-{tick}"),
                    "detected_at": now,
                    "rider_id": rider_id,
                    "session_id": OFFLINE_SESSION,
                });
                let _ = backend.insert(&tables.potholes, pothole);
            }
            if tick % 5 == 4 {
                let event_type = if tick % 2 == 0 { "hard_brake" } else { "swerve" };
                let event = json!({
                    "id": format!("event-{tick}"),
                    "event_type": event_type,
                    "start_time": now,
                    "confidence": 70 + tick % 30,
                    "rider_id": rider_id,
                    "session_id": OFFLINE_SESSION,
                });
                let _ = backend.insert(&tables.ride_events, event);
            }
            thread::sleep(OFFLINE_EVENT_PERIOD);
        }
    });
}

fn live(
    rider: &str,
    session: Option<&str>,
    label: Option<&str>,
    url: Option<String>,
    key: Option<String>,
    offline: bool,
) -> Result<(), RidewatchError> {
    let stored = AppConfig::load()?;
    let config = stored.effective(url, key);

    let backend: Arc<dyn Backend> = if offline {
        info!("Running offline with generated events");
        let memory = Arc::new(MemoryBackend::new());
        offline_feed(memory.clone(), &config, rider);
        memory
    } else {
        Arc::new(SupabaseBackend::new(&config)?)
    };
    let live = LiveSession::mount(backend, &config, rider, session, label);

    let mut native_options = eframe::NativeOptions::default();
    native_options.viewport = native_options
        .viewport
        .with_inner_size(Vec2::new(760., 560.))
        .with_position(stored.window_position.clone());

    eframe::run_native(
        "Ridewatch",
        native_options,
        Box::new(|cc| Ok(Box::new(LiveDashboardApp::new(live, stored, cc)))),
    )
    .map_err(|e| RidewatchError::UiStart {
        reason: e.to_string(),
    })
}

fn scores(input: Option<&PathBuf>, flags: SafetyScoreInputs) -> Result<(), RidewatchError> {
    let inputs = match input {
        Some(path) => SafetyScoreInputs::from_file(path)?,
        None => flags,
    };
    let card = ScoreCard::from_inputs(&inputs);
    info!("Overall {:.1} ({})", card.overall, card.tier);

    let mut native_options = eframe::NativeOptions::default();
    native_options.viewport = native_options
        .viewport
        .with_inner_size(Vec2::new(540., 520.));
    eframe::run_native(
        "Ridewatch Scores",
        native_options,
        Box::new(|cc| Ok(Box::new(ScoreCardApp::new(card, cc)))),
    )
    .map_err(|e| RidewatchError::UiStart {
        reason: e.to_string(),
    })
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("Exiting...");
        std::process::exit(0);
    }) {
        error!("Could not set Ctrl-C handler: {e}");
    }

    let result = match &cli.command {
        Commands::Live {
            rider,
            session,
            label,
            url,
            key,
            offline,
        } => live(
            rider,
            session.as_deref(),
            label.as_deref(),
            url.clone(),
            key.clone(),
            *offline,
        ),
        Commands::Scores {
            input,
            overall,
            acceleration,
            gyroscope,
            events,
            potholes,
            speed_consistency,
        } => scores(
            input.as_ref(),
            SafetyScoreInputs {
                overall: *overall,
                acceleration: *acceleration,
                gyroscope: *gyroscope,
                events: *events,
                potholes: *potholes,
                speed_consistency: *speed_consistency,
            },
        ),
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
