use std::io::Cursor;
use std::path::PathBuf;

use bytes::Bytes;
use clap::Parser;
use image::ImageFormat;
use objdetect::{AppResult, DetectionClient};
use tokio::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Send one image to a detection server")]
pub struct CommandLine {
    /// image file to send
    pub image: PathBuf,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 5000)]
    pub port: u16,
    /// re-encode the image as JPEG before sending instead of sending the file as is
    #[arg(long)]
    pub reencode: bool,
}

fn load_image(commandline: &CommandLine) -> AppResult<Bytes> {
    if !commandline.reencode {
        return Ok(Bytes::from(std::fs::read(&commandline.image)?));
    }
    let image = image::open(&commandline.image)?;
    let mut encoded = Cursor::new(Vec::new());
    image.to_rgb8().write_to(&mut encoded, ImageFormat::Jpeg)?;
    Ok(Bytes::from(encoded.into_inner()))
}

fn main() -> AppResult<()> {
    let commandline: CommandLine = CommandLine::parse();
    // logs go to stderr, stdout carries the detections
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let image = load_image(&commandline)?;
    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    let detections = rt.block_on(async {
        let client = DetectionClient::connect((commandline.host.as_str(), commandline.port)).await?;
        info!(bytes = image.len(), "sending image");
        client.detect(image).await
    })?;

    println!("{}", serde_json::to_string_pretty(&detections)?);
    Ok(())
}
