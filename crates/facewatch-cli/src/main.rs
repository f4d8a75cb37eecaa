mod config;
mod console;
mod engine;
mod gui;
mod session;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use facewatch_hw::Camera;
use session::Session;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facewatch", version, about = "Live face recognition with history logging")]
struct Cli {
    /// Open the desktop interface instead of the console loop
    #[arg(long)]
    gui: bool,

    /// Camera index, device path, image file or image directory
    #[arg(long)]
    video: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face from a photo (or from the camera when no photo is given)
    Add {
        name: String,
        /// Photo containing exactly one face
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Remove a known face, its photos and its database records
    Remove { name: String },
    /// List known faces
    List,
    /// Show recognition history
    History {
        /// Only this person
        #[arg(short, long)]
        name: Option<String>,
        /// At most this many entries
        #[arg(short, long)]
        limit: Option<usize>,
        /// Only today's entries
        #[arg(long)]
        today: bool,
        /// Read from the database instead of the CSV log
        #[arg(long)]
        db: bool,
    },
    /// Export recognition history to CSV
    Export {
        path: PathBuf,
        /// Export the database log instead of the CSV log
        #[arg(long)]
        db: bool,
    },
    /// Delete the CSV recognition history
    ClearHistory,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    let video = cli.video.unwrap_or_else(|| config.video_source.clone());

    match cli.command {
        Some(Commands::Devices) => list_devices(),
        Some(command) => {
            let mut session = Session::open(config);
            let result = run_command(&mut session, command, &video);
            session.shutdown();
            result
        }
        None if cli.gui => {
            let session = Session::open(config);
            // eframe owns the main thread's event loop until the window closes.
            tokio::task::block_in_place(|| gui::run(session, video))
        }
        None => {
            let mut session = Session::open(config);
            tokio::task::block_in_place(|| console::run(&mut session, &video))
        }
    }
}

fn run_command(session: &mut Session, command: Commands, video: &str) -> Result<()> {
    match command {
        Commands::Add { name, image } => {
            let path = match image {
                Some(image) => session
                    .add_face_from_file(&image, &name)
                    .with_context(|| format!("could not add {name} from {}", image.display()))?,
                None => add_from_camera(session, &name, video)?,
            };
            println!("Added {name} ({} known faces, photo at {})", session.gallery().len(), path.display());
        }
        Commands::Remove { name } => {
            session.remove_face(&name).with_context(|| format!("could not remove {name}"))?;
            println!("Removed {name}");
        }
        Commands::List => {
            let names = session.gallery().names();
            if names.is_empty() {
                println!("No known faces");
            }
            for name in names {
                println!("{name}");
            }
            if let Ok((persons, unknown)) = session.db_summary() {
                println!("Database: {} people, {unknown} unknown faces logged", persons.len());
                for person in persons {
                    let photo = person.image_path.as_deref().unwrap_or("-");
                    println!("  {:<24} added {}  {photo}", person.name, person.added_date);
                }
            }
        }
        Commands::History { name, limit, today, db } => {
            if db {
                for entry in session.db_history(name.as_deref(), limit)? {
                    println!(
                        "#{:<6} {}  {:<24} {:>6.1}%",
                        entry.id,
                        entry.timestamp,
                        entry.name,
                        entry.confidence * 100.0
                    );
                }
            } else {
                let records = if today {
                    session.today()
                } else {
                    session.history().records().iter().collect()
                };
                let mut shown: Vec<_> = records
                    .into_iter()
                    .rev()
                    .filter(|r| name.as_deref().map_or(true, |n| r.name == n))
                    .collect();
                if let Some(limit) = limit {
                    shown.truncate(limit);
                }
                for r in &shown {
                    println!(
                        "{}  {:<24} {:>6.1}%",
                        r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        r.name,
                        r.confidence
                    );
                }
                let stats = session.stats();
                println!("{} recognitions, {} people", stats.total, stats.unique_people);
            }
        }
        Commands::Export { path, db } => {
            let rows = if db {
                session.export_db(&path)?
            } else {
                session.export_history(&path)?
            };
            println!("Exported {rows} records to {}", path.display());
        }
        Commands::ClearHistory => {
            session.clear_history()?;
            println!("History cleared");
        }
        Commands::Devices => list_devices()?,
    }
    Ok(())
}

/// Grab frames until one is processed, then register the face in it.
fn add_from_camera(session: &mut Session, name: &str, video: &str) -> Result<PathBuf> {
    session.start_camera(video)?;
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while std::time::Instant::now() < deadline {
        session.poll();
        if session.latest().is_some_and(|s| s.fresh) {
            let path = session.add_face_from_frame(name);
            session.stop_camera();
            return Ok(path?);
        }
        std::thread::sleep(std::time::Duration::from_millis(30));
    }
    session.stop_camera();
    anyhow::bail!("no frame captured from {video}")
}

fn list_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in devices {
        println!("{}  {} [{}] {}", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(())
}
