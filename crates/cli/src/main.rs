use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rtsp::{H264FileSubsession, MediaSession, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-server",
    about = "Standalone RTSP server streaming H.264 Annex-B files"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = rtsp::server::DEFAULT_BIND_ADDR)]
    bind: String,

    /// Stream name; clients connect to rtsp://<host>:<port>/<name>
    #[arg(long, short, default_value = "live")]
    name: String,

    /// H.264 Annex-B file, one track per occurrence
    #[arg(long, short, required = true)]
    file: Vec<PathBuf>,

    /// Playback frame rate
    #[arg(long, default_value_t = 25)]
    fps: u32,

    #[arg(long, default_value_t = 90_000)]
    clock_rate: u32,

    /// Host advertised in the SDP origin line
    #[arg(long)]
    public_host: Option<String>,

    /// SDP session name
    #[arg(long)]
    session_name: Option<String>,
}

fn build_media_session(args: &Args) -> rtsp::Result<MediaSession> {
    let mut media = MediaSession::new(&args.name);
    for path in &args.file {
        let subsession = H264FileSubsession::open(path, args.fps, args.clock_rate)?;
        let track = media.add_subsession(Arc::new(subsession));
        tracing::info!(path = %path.display(), track = %track, "track added");
    }
    Ok(media)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let media = match build_media_session(&args) {
        Ok(media) => media,
        Err(e) => {
            tracing::error!(error = %e, "failed to open media");
            return ExitCode::FAILURE;
        }
    };

    let mut config = ServerConfig {
        bind_addr: args.bind.clone(),
        public_host: args.public_host.clone(),
        ..ServerConfig::default()
    };
    if let Some(name) = &args.session_name {
        config.session_name = name.clone();
    }

    let mut server = Server::with_config(config);
    server.add_media_session(media);

    let addr = match server.start().await {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, bind = %args.bind, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("streaming at rtsp://{addr}/{}, press Ctrl-C to stop", args.name);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }

    server.stop();
    ExitCode::SUCCESS
}
