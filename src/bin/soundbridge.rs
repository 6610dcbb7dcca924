use clap::Parser;
use soundbridge::common::box_error::BoxError;
use soundbridge::stream::bridge::{self, BridgeOpts};

/// Bidirectional live audio bridge over UDP
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Wait for a peer on the configured port instead of dialing out
    #[arg(short, long)]
    serve: bool,

    /// Host to bridge to (client side)
    #[arg(short, long)]
    connect: Option<String>,

    /// UDP port to serve on or connect to
    #[arg(short, long)]
    port: Option<u16>,

    /// Settings file
    #[arg(long, default_value = "settings.json")]
    config: String,

    /// Capture device name override
    #[arg(long)]
    in_device: Option<String>,

    /// Playback device name override
    #[arg(long)]
    out_device: Option<String>,
}

fn main() -> Result<(), BoxError> {
    env_logger::init();
    let args = Args::parse();

    bridge::run(BridgeOpts {
        serve: args.serve,
        peer_host: args.connect,
        port: args.port,
        config_file: args.config,
        in_device: args.in_device,
        out_device: args.out_device,
    })
}
