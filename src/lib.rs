pub mod asset;
pub mod buffer;
pub mod cli;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod job;
pub mod session;

pub use asset::{MediaAsset, MediaInfo, MediaKind, OutputArtifact};
pub use buffer::{BufferStore, Handle, PreviewLease, StoreStats};
pub use command::{build, CommandArgs, Preset, Quality, ResizeStrategy, TargetResolution, TransformSpec, VideoCodec};
pub use engine::{Engine, EngineHandle, EngineLoader, EngineManager, EngineStatus};
pub use error::{FailureKind, Result, TransformError};
pub use geometry::{to_native, to_native_range, CropRegion, DisplaySize, NativeCropRegion, Size, TrimRange, ViewportMapping};
pub use job::{submit, Job, JobEvent, JobOutcome, JobState};
pub use session::{Completion, Session, ToolRequest};

// ============================================================================
// Application Entry Point
// ============================================================================

pub fn run() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = <cli::Args as clap::Parser>::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::run(args)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("{:?}", e);
            eprintln!("error: {}", e.user_message());
            std::process::ExitCode::FAILURE
        }
    }
}
