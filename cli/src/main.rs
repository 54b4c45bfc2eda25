// cli/src/main.rs - containerctl entrypoint
//
// Host-side companion to container-boot: packs layouts into container
// images and checks them with the same loader firmware runs.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod keys;
mod layout;

use keys::{HashArg, TrustArgs};

#[derive(Parser)]
#[command(
    name = "containerctl",
    version,
    about = "containerctl - pack, inspect, verify and extract boot containers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (overridden by CONTAINERCTL_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// tracing filter directive, e.g. "loader=debug,auth=debug"
    #[arg(long, global = true, env = "CONTAINERCTL_LOG", hide_env_values = true)]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a container image from a TOML layout
    Create {
        layout: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the header and directory
    Show { image: PathBuf },
    /// Register the image and authenticate every component
    Verify {
        image: PathBuf,
        #[command(flatten)]
        trust: TrustArgs,
    },
    /// Write one authenticated, decompressed component to a file
    Extract {
        image: PathBuf,
        component: String,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        trust: TrustArgs,
    },
    /// Print the digest to provision for a PEM key
    KeyHash {
        key: PathBuf,
        #[arg(long, value_enum, default_value = "sha256")]
        alg: HashArg,
    },
}

fn init_tracing(cli: &Cli) {
    let filter = match &cli.log {
        Some(directive) => EnvFilter::new(directive),
        None if cli.verbose => EnvFilter::new("debug"),
        None => EnvFilter::new("warn"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let result = match &cli.command {
        Commands::Create { layout, output } => commands::create(layout, output),
        Commands::Show { image } => commands::show(image, cli.json),
        Commands::Verify { image, trust } => commands::verify(image, trust, cli.json),
        Commands::Extract { image, component, output, trust } => commands::extract(image, component, output, trust),
        Commands::KeyHash { key, alg } => commands::key_hash(key, (*alg).into(), cli.json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[containerctl] error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
