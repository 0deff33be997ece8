use std::path::PathBuf;

use clap::Parser;
use yuv_presenter::app::RenderEventLoop;
use yuv_presenter::config::RendererConfig;
use yuv_presenter::producer::ProducerSettings;

const PROCESS_EXIT_CODE_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(author, version, about = "Presents a synthetic I420 stream in a window", long_about = None)]
struct Args {
    /// Frame width in pixels, must be even
    #[arg(long, default_value_t = 1280)]
    width: i32,

    /// Frame height in pixels, must be even
    #[arg(long, default_value_t = 720)]
    height: i32,

    /// Frames published per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Renderer config file, defaults to <config_dir>/yuv_presenter/config.json
    #[arg(long)]
    config: Option<PathBuf>,

    /// Switch between full and half frame size every N frames (0 disables)
    #[arg(long, default_value_t = 0)]
    alternate_every: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    log::info!("main: {args:?}");

    let config = match RendererConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("main: {e}");
            std::process::exit(PROCESS_EXIT_CODE_ERROR);
        }
    };

    let settings = ProducerSettings {
        width: args.width,
        height: args.height,
        fps: args.fps,
        alternate_every: args.alternate_every,
    };

    let result = RenderEventLoop::new().and_then(|event_loop| event_loop.run(config, settings));
    if let Err(e) = result {
        log::error!("main: {e}");
        std::process::exit(PROCESS_EXIT_CODE_ERROR);
    }
}
