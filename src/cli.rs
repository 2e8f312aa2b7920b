// CLASSIFICATION: COMMUNITY
// Filename: cli.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Command-line interface for the `qrlogin` binary.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use crate::camera::{DirectorySource, FrameSource};
use crate::capture::CaptureLoop;
use crate::config::Config;
use crate::decoder::QrDecoder;
use crate::engine::ToggleEngine;
use crate::feedback::{ConsoleSink, SnapshotWriter};
use crate::registry::{list_users, provision_user, UserDirectory, UserRecord};
use crate::store::SqliteSessionStore;

#[derive(Parser, Debug)]
#[command(name = "qrlogin", author, version, about = "QR code login system")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// SQLite database, overrides the config file.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan for codes and toggle users until interrupted.
    Run(RunArgs),
    /// Provision a user and their access code.
    AddUser {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// List provisioned users.
    Users,
    /// Show the presence of every user seen so far.
    Status,
    /// Show the login/logout history of one user.
    History { identity: String },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[arg(long)]
    pub camera: Option<usize>,
    /// Replay images from a directory instead of the camera.
    #[arg(long)]
    pub frames: Option<PathBuf>,
    #[arg(long = "debounce-ms")]
    pub debounce_ms: Option<u64>,
    /// Save the frame behind each transition here.
    #[arg(long)]
    pub snapshots: Option<PathBuf>,
    #[arg(long = "refresh-last-seen")]
    pub refresh_last_seen: bool,
    #[arg(long = "max-frames")]
    pub max_frames: Option<u64>,
}

impl RunArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(i) = self.camera {
            cfg.camera_index = i;
        }
        if let Some(dir) = &self.frames {
            cfg.frame_dir = Some(dir.clone());
        }
        if let Some(ms) = self.debounce_ms {
            cfg.debounce_window_ms = ms;
        }
        if let Some(dir) = &self.snapshots {
            cfg.snapshot_dir = Some(dir.clone());
        }
        if self.refresh_last_seen {
            cfg.refresh_last_seen = true;
        }
    }
}

#[cfg(feature = "webcam")]
fn camera_source(cfg: &Config) -> anyhow::Result<Box<dyn FrameSource>> {
    Ok(Box::new(crate::camera::V4lCamera::new(cfg.camera_index)))
}

#[cfg(not(feature = "webcam"))]
fn camera_source(cfg: &Config) -> anyhow::Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "camera {} unavailable: built without the `webcam` feature, use --frames DIR",
        cfg.camera_index
    )
}

fn frame_source(cfg: &Config) -> anyhow::Result<Box<dyn FrameSource>> {
    match &cfg.frame_dir {
        Some(dir) => Ok(Box::new(DirectorySource::new(dir))),
        None => camera_source(cfg),
    }
}

fn run_capture(cfg: &Config, args: &RunArgs) -> anyhow::Result<()> {
    let users = UserDirectory::load(&cfg.store_path)
        .with_context(|| format!("loading users from {}", cfg.store_path.display()))?;
    if users.is_empty() {
        warn!("no users provisioned; every code will be ignored");
    }
    let store = SqliteSessionStore::open(&cfg.store_path)?;
    let mut engine = ToggleEngine::new(users, store)
        .with_debounce_window(cfg.debounce_window())
        .with_refresh_last_seen(cfg.refresh_last_seen);
    if let Some(dir) = &cfg.snapshot_dir {
        engine = engine.with_snapshots(SnapshotWriter::new(dir));
    }

    let mut capture = CaptureLoop::new(QrDecoder::new(), engine, ConsoleSink)
        .with_max_store_failures(cfg.max_consecutive_store_failures);
    if let Some(n) = args.max_frames {
        capture = capture.with_max_frames(n);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))
        .context("installing interrupt handler")?;

    let source = frame_source(cfg)?;
    let summary = capture.run(source, &stop)?;
    info!("{summary:?}");
    Ok(())
}

/// Execute a parsed command line.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = Config::load(cli.config.as_deref())?;
    if let Some(store) = cli.store {
        cfg.store_path = store;
    }

    match cli.command {
        Command::Run(args) => {
            args.apply(&mut cfg);
            run_capture(&cfg, &args)?;
        }
        Command::AddUser {
            identity,
            name,
            code,
            email,
        } => {
            let user = UserRecord {
                identity,
                display_name: name,
                access_code: code,
                email,
            };
            if provision_user(&cfg.store_path, &user)? {
                println!("added {}", user.identity);
            } else {
                println!("{} already provisioned", user.identity);
            }
        }
        Command::Users => {
            for u in list_users(&cfg.store_path)? {
                println!(
                    "{}\t{}\t{}",
                    u.identity,
                    u.display_name,
                    u.email.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Status => {
            let store = SqliteSessionStore::open(&cfg.store_path)?;
            for s in store.sessions()? {
                let since = s
                    .last_transition_ts
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                println!("{}\t{}\t{}", s.identity, s.current_status, since);
            }
        }
        Command::History { identity } => {
            let store = SqliteSessionStore::open(&cfg.store_path)?;
            for e in store.events_for(&identity)? {
                println!("{}\t{}", e.timestamp.to_rfc3339(), e.event_type);
            }
        }
    }
    Ok(())
}
