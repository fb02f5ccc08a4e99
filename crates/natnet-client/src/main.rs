//! NatNet client demo binary.
//!
//! Connects to a motion-capture server, prints every rigid body of every
//! frame with its name and latency, and exits on Ctrl-C or end of stream.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ ClientConfig::load_from()   -- TOML file, then CLI overrides
//!  └─ tracing_subscriber          -- RUST_LOG, else the configured level
//!  └─ ClientSession::new()        -- UDP Connection, or FakeTransport with --simulate
//!  └─ model callback              -- keeps the id -> name map for printing
//!  └─ frame callback              -- one log line (or JSON line) per rigid body
//!  └─ connect() then spin()       -- until Ctrl-C sets the stop handle
//! ```
//!
//! # Offline runs (for beginners)
//!
//! `--simulate 600` swaps the UDP sockets for an in-memory server that
//! streams 600 frames at 120 Hz and then ends the stream.  The whole
//! handshake, clock sync and latency calculation runs exactly as it would
//! against a real server, so the binary can be tried without Motive.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use natnet_client::application::session::{ClientSession, SessionConfig};
use natnet_client::application::transport::Transport;
use natnet_client::infrastructure::config::ClientConfig;
use natnet_client::infrastructure::network::fake::{FakeTransport, SimulatedServer};
use natnet_client::infrastructure::network::Connection;
use natnet_core::protocol::messages::RigidBody;
use natnet_core::TimestampAndLatency;

/// Stream rigid body poses from a NatNet motion-capture server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file; missing means defaults.
    #[arg(long, default_value = "natnet.toml")]
    config: PathBuf,

    /// Server IP address.  Omit to discover the server by broadcast.
    #[arg(long)]
    server: Option<IpAddr>,

    /// Multicast group, for servers that do not announce one.
    #[arg(long)]
    multicast_group: Option<Ipv4Addr>,

    /// Data port, for servers that do not announce one.
    #[arg(long)]
    data_port: Option<u16>,

    /// Reject packets with trailing bytes or a wrong declared length.
    #[arg(long)]
    strict: bool,

    /// Print one JSON object per frame on stdout instead of log lines.
    #[arg(long)]
    json: bool,

    /// How long each receive waits before logging a timeout.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Run against an in-memory server streaming this many frames.
    #[arg(long, value_name = "FRAMES")]
    simulate: Option<u32>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    save_config: bool,
}

impl Args {
    /// Applies command line overrides on top of the file configuration.
    fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(server) = self.server {
            config.server.address = Some(server);
        }
        if let Some(group) = self.multicast_group {
            config.server.multicast_group = Some(group);
        }
        if let Some(port) = self.data_port {
            config.server.data_port = Some(port);
        }
        if self.strict {
            config.session.strict = true;
        }
    }
}

/// One rigid body as printed with `--json`.
#[derive(Serialize)]
struct BodyLine<'a> {
    id: u32,
    name: Option<&'a str>,
    position: [f32; 3],
    orientation: [f32; 4],
    tracking_valid: Option<bool>,
}

/// One frame as printed with `--json`.
#[derive(Serialize)]
struct FrameLine<'a> {
    rigid_bodies: Vec<BodyLine<'a>>,
    labelled_markers: usize,
    timing: Option<&'a TimestampAndLatency>,
}

/// Frames arrive this far apart in `--simulate` mode.
const SIMULATED_FRAME_INTERVAL: f64 = 1.0 / 120.0;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    args.apply_to(&mut config);

    if args.save_config {
        config
            .save_to(&args.config)
            .with_context(|| format!("saving {}", args.config.display()))?;
        println!("wrote {}", args.config.display());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("NatNet client starting");
    let session_config = SessionConfig::from(&config);
    let timeout = Some(Duration::from_millis(args.timeout_ms));

    match args.simulate {
        Some(frames) => {
            let server = SimulatedServer::motive_v3();
            let session_config = SessionConfig {
                server_address: Some(server.address.ip()),
                ..session_config
            };
            let mut session =
                ClientSession::new(FakeTransport::with_server(server), session_config);
            install_callbacks(&mut session, args.json);
            session.connect().context("handshake with simulated server")?;

            let transport = session.transport_mut();
            transport
                .stream_frames(frames, SIMULATED_FRAME_INTERVAL)
                .context("generating simulated frames")?;
            transport.finish();
            session.spin(timeout).context("receive loop")?;
        }
        None => {
            let transport = Connection::open().context("opening command socket")?;
            let mut session = ClientSession::new(transport, session_config);
            install_callbacks(&mut session, args.json);

            let stop = session.stop_handle();
            ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
                .context("installing Ctrl-C handler")?;

            session.connect().context("handshake with server")?;
            session.spin(timeout).context("receive loop")?;
        }
    }

    info!("NatNet client stopped");
    Ok(())
}

/// Installs the model and frame callbacks that print each frame.
fn install_callbacks<T: Transport>(session: &mut ClientSession<T>, json: bool) {
    // Both callbacks run on this thread, inside `connect` and `spin`.
    let names: Rc<RefCell<HashMap<u32, String>>> = Rc::default();

    let model_names = Rc::clone(&names);
    session.set_model_callback(move |rigid_bodies, _skeletons, _marker_sets| {
        let mut names = model_names.borrow_mut();
        names.clear();
        names.extend(
            rigid_bodies
                .iter()
                .filter_map(|body| Some((body.id, body.name.clone()?))),
        );
    });

    session.set_frame_callback(move |rigid_bodies, labelled_markers, timing| {
        let names = names.borrow();
        if json {
            print_json(&names, rigid_bodies, labelled_markers.len(), timing);
        } else {
            log_frame(&names, rigid_bodies, timing);
        }
    });
}

fn log_frame(
    names: &HashMap<u32, String>,
    rigid_bodies: &[RigidBody],
    timing: Option<&TimestampAndLatency>,
) {
    let latency_ms = timing.map(|t| t.latency() * 1e3);
    for body in rigid_bodies {
        let name = names.get(&body.id).map_or("<unnamed>", String::as_str);
        info!(
            id = body.id,
            name,
            position = ?body.position,
            orientation = ?body.orientation,
            latency_ms,
            "rigid body"
        );
    }
}

fn print_json(
    names: &HashMap<u32, String>,
    rigid_bodies: &[RigidBody],
    labelled_markers: usize,
    timing: Option<&TimestampAndLatency>,
) {
    let line = FrameLine {
        rigid_bodies: rigid_bodies
            .iter()
            .map(|body| BodyLine {
                id: body.id,
                name: names.get(&body.id).map(String::as_str),
                position: body.position.to_array(),
                orientation: body.orientation.to_array(),
                tracking_valid: body.tracking_valid(),
            })
            .collect(),
        labelled_markers,
        timing,
    };
    match serde_json::to_string(&line) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::warn!(error = %e, "could not serialise frame"),
    }
}
