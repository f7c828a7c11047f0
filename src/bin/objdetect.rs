use clap::{Parser, Subcommand};
use dotenv::dotenv;
use objdetect::{setup_tracing, AppResult, ServerConfig};
use tokio::runtime;
use tracing::info;

#[derive(Parser)]
#[command(version, about = "Object detection server")]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// bind address
    #[arg(long)]
    pub host: Option<String>,
    /// listen port
    #[arg(long)]
    pub port: Option<u16>,
    /// log every decoded frame and its detections
    #[arg(long)]
    pub show_image: bool,
    /// send detections back to the client
    #[arg(long)]
    pub return_coordinates: Option<bool>,
    /// log level or filter directive, e.g. "info" or "objdetect=debug"
    #[arg(long)]
    pub log_level: Option<String>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// print the effective configuration as JSON and exit
    PrintConfig,
}

impl CommandLine {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.network.host = host.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if self.show_image {
            config.debug.show_image = true;
        }
        if let Some(return_coordinates) = self.return_coordinates {
            config.debug.return_coordinates = return_coordinates;
        }
        if let Some(log_level) = &self.log_level {
            config.debug.log_level = log_level.clone();
        }
        match self.verbose {
            0 => {}
            1 => config.debug.log_level = "info".to_string(),
            2 => config.debug.log_level = "debug".to_string(),
            _ => config.debug.log_level = "trace".to_string(),
        }
    }
}

fn main() -> AppResult<()> {
    // pick up DETECT__* overrides from .env
    dotenv().ok();

    //setup config
    let commandline: CommandLine = CommandLine::parse();
    let mut server_config = ServerConfig::set_up_config(commandline.conf.as_deref())?;
    commandline.apply(&mut server_config);
    server_config.validate()?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{}", serde_json::to_string_pretty(&server_config)?);
        return Ok(());
    }

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let _log_guard = setup_tracing(&server_config.debug.log_level)?;
    info!(address = %server_config.listen_address(), "starting detection server");

    serve(server_config, &rt)
}

#[cfg(feature = "onnx")]
fn serve(config: ServerConfig, rt: &runtime::Runtime) -> AppResult<()> {
    use objdetect::detection::YoloV8Detector;
    use objdetect::DetectionNode;

    let detector = YoloV8Detector::load(&config.detector)?;
    let node = DetectionNode::new(config, detector);
    node.start(rt)
}

#[cfg(not(feature = "onnx"))]
fn serve(_config: ServerConfig, _rt: &runtime::Runtime) -> AppResult<()> {
    tracing::error!("no detection backend compiled in, rebuild with `--features onnx`");
    Err(objdetect::AppError::IllegalStateError(
        "no detection backend available".to_string(),
    ))
}
