//! Tansu tablet server binary.
//!
//! Serves tablets out of `--root`. Transport wiring is left to the
//! deployment; this binary assembles the storage stack, loads the fixed
//! tables found under the root, and runs until killed. Daemonization is
//! handled by the process supervisor; `--nodaemon` and `--pidfile` keep
//! the conventional wrapper interface.
//!
//! Exit codes: 0 on clean shutdown, 1 on an unhandled error, 2 on bad
//! options.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tansu_core::config::ServerConfig;
use tansu_core::tablet_name::TabletName;
use tansu_server::{
    DiskFragmentFactory, DiskFragmentLoader, ServerBits, StaticSchemaReader, TabletServer,
};
use tansu_storage::FixedConfigAdapter;

#[derive(Parser)]
#[command(name = "tansu-server")]
#[command(about = "Tansu tablet server")]
struct Args {
    /// Root directory for tablet data
    #[arg(short, long)]
    root: PathBuf,

    /// Write PID to file
    #[arg(short, long)]
    pidfile: Option<PathBuf>,

    /// Don't fork and run as daemon
    #[arg(long)]
    nodaemon: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Some(pidfile) = &args.pidfile {
        std::fs::write(pidfile, format!("{}\n", std::process::id()))
            .with_context(|| format!("failed to write pidfile {:?}", pidfile))?;
    }
    if !args.nodaemon {
        info!("daemonization is delegated to the supervisor; running in foreground");
    }

    std::fs::create_dir_all(&args.root)
        .with_context(|| format!("failed to create root {:?}", args.root))?;

    let config = ServerConfig {
        root_dir: args.root.clone(),
        ..ServerConfig::default()
    };
    let fixed = Arc::new(FixedConfigAdapter::new(&args.root));
    let bits = ServerBits {
        schema_reader: Arc::new(StaticSchemaReader),
        config_reader: fixed.clone(),
        config_writer: fixed,
        fragment_loader: Arc::new(DiskFragmentLoader),
        fragment_factory: Arc::new(DiskFragmentFactory::new(
            &args.root,
            config.fragment.clone(),
        )),
        log_dir: args.root.join("log"),
        config,
    };

    let server = TabletServer::start(bits)?;

    // Every directory under the root with a state file is a fixed table
    let tablets = discover_fixed_tables(&args.root)?;
    if !tablets.is_empty() {
        info!(count = tablets.len(), "loading fixed tables");
        server.load_async(tablets).wait()?;
    }

    info!(root = ?args.root, "serving");
    loop {
        std::thread::park();
    }
}

fn discover_fixed_tables(root: &PathBuf) -> anyhow::Result<Vec<TabletName>> {
    let mut tablets = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if !entry.path().join("state").exists() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            tablets.push(TabletName::last(name));
        }
    }
    tablets.sort_by(|a, b| a.encode().cmp(&b.encode()));
    Ok(tablets)
}
