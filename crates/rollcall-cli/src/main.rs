mod config;
mod feedback;
mod runner;
mod source;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use feedback::TerminalFeedback;
use rollcall_core::{
    run_enrollment, run_recognition, AttendanceLedger, EngineError, Identifier, RecognitionEngine,
    SampleStore, ScrfdDetector, SessionEnd, StoreError, TrainOutcome, Trainer,
};
use rollcall_hw::Camera;
use source::CameraSource;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture face samples for a new member, then retrain
    Enroll {
        /// Member name (no '-' or path separators)
        #[arg(short, long)]
        name: String,
        /// Unique numeric identifier
        #[arg(short, long)]
        id: Identifier,
    },
    /// Rebuild the recognition model from all stored samples
    Train,
    /// Recognize faces and log attendance until Ctrl-C
    Recognize {
        /// Attendance date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Check whether samples exist for a name
    Search { name: String },
    /// List enrolled members
    List,
    /// Count stored samples
    Count,
    /// Print the attendance ledger
    Attendance,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll { name, id } => enroll(&config, &name, id).await,
        Commands::Train => train(&config),
        Commands::Recognize { date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            recognize(&config, date).await
        }
        Commands::Search { name } => {
            let store = SampleStore::open(&config.samples_dir)?;
            if store.has_name(&name)? {
                println!("{name}: enrolled");
            } else {
                println!("{name}: not found");
            }
            Ok(())
        }
        Commands::List => {
            let store = SampleStore::open(&config.samples_dir)?;
            let people = store.summary()?;
            if people.is_empty() {
                println!("No members enrolled");
            }
            for person in people {
                println!("{:>6}  {:<24} {} samples", person.identifier.to_string(), person.name, person.samples);
            }
            Ok(())
        }
        Commands::Count => {
            let store = SampleStore::open(&config.samples_dir)?;
            println!("{}", store.count()?);
            Ok(())
        }
        Commands::Attendance => {
            let records = AttendanceLedger::read_all(&config.attendance_path)?;
            if records.is_empty() {
                println!("No attendance recorded");
            }
            for record in records {
                println!("{}  {}", record.date, record.name);
            }
            Ok(())
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for device in devices {
                println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
            }
            Ok(())
        }
    }
}

async fn enroll(config: &Config, name: &str, id: Identifier) -> Result<()> {
    let mut store = SampleStore::open(&config.samples_dir)?;
    let mut enrollment = match store.begin_enrollment(name, id) {
        Ok(enrollment) => enrollment,
        Err(StoreError::DuplicateIdentifier(id)) => {
            anyhow::bail!("identifier {id} is already enrolled; choose another identifier");
        }
        Err(e) => return Err(e.into()),
    };

    let mut detector = ScrfdDetector::load(&config.detector_model, config.detection)
        .with_context(|| format!("loading face detector {}", config.detector_model.display()))?;
    let source = CameraSource::open(
        &config.camera_device,
        config.camera_width,
        config.camera_height,
        config.warmup_frames,
    )?;

    println!("Enrolling {name} ({id}); look at the camera. Ctrl-C to stop.");
    let quota = config.sample_quota;
    let report = runner::run_until_interrupted("rollcall-enroll", move |cancel| {
        let mut feedback = TerminalFeedback::default();
        run_enrollment(&mut enrollment, source, &mut detector, quota, &cancel, &mut feedback)
    })
    .await??;

    match report.end {
        SessionEnd::QuotaReached => println!("Captured {} samples", report.captured),
        SessionEnd::Cancelled => println!("Stopped after {}/{} samples", report.captured, report.quota),
        SessionEnd::FrameUnavailable => {
            println!("Camera stopped after {}/{} samples", report.captured, report.quota)
        }
    }

    // The enrollment has returned and released the camera; the corpus is stable.
    train(config)
}

fn train(config: &Config) -> Result<()> {
    let store = SampleStore::open(&config.samples_dir)?;
    match Trainer::default().rebuild_to(&store, &config.model_path)? {
        TrainOutcome::Trained { report, .. } => {
            println!(
                "Trained on {} samples of {} members{}",
                report.samples,
                report.identities,
                skipped_note(report.skipped)
            );
        }
        TrainOutcome::Empty { skipped } => {
            println!("No samples to train on; enroll a member first{}", skipped_note(skipped));
        }
    }
    Ok(())
}

fn skipped_note(skipped: usize) -> String {
    if skipped == 0 {
        String::new()
    } else {
        format!(" ({skipped} unreadable files skipped)")
    }
}

async fn recognize(config: &Config, date: NaiveDate) -> Result<()> {
    let mut engine = match RecognitionEngine::load(&config.model_path, config.accept_threshold) {
        Ok(engine) => engine,
        Err(EngineError::ModelMissing(path)) => {
            tracing::info!(path = %path, "no trained model");
            println!("No trained model found. Enroll and train first.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let store = SampleStore::open(&config.samples_dir)?;
    let labels = store.label_map()?;
    if labels.is_empty() {
        tracing::warn!("no enrolled names; every face will be reported unknown");
    }
    let mut ledger = AttendanceLedger::open(&config.attendance_path)?;

    let mut detector = ScrfdDetector::load(&config.detector_model, config.detection)
        .with_context(|| format!("loading face detector {}", config.detector_model.display()))?;
    let source = CameraSource::open(
        &config.camera_device,
        config.camera_width,
        config.camera_height,
        config.warmup_frames,
    )?;

    println!("Recognizing for {date}. Ctrl-C to stop.");
    let report = runner::run_until_interrupted("rollcall-recognize", move |cancel| {
        let mut feedback = TerminalFeedback::default();
        run_recognition(
            &mut engine,
            &labels,
            &mut ledger,
            date,
            source,
            &mut detector,
            &cancel,
            &mut feedback,
        )
    })
    .await??;

    println!(
        "{} frames, {} faces, {} unknown alerts",
        report.frames, report.faces, report.unknown_alerts
    );
    if report.recorded.is_empty() {
        println!("No new attendance recorded");
    } else {
        println!("Recorded: {}", report.recorded.join(", "));
    }
    Ok(())
}
