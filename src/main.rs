use anyhow::{Context, Result};
use hotkey_dictation::artifacts::ArtifactStore;
use hotkey_dictation::audio::devices::{find_device, pick_device};
use hotkey_dictation::audio::{CaptureProcess, CaptureTool, DeviceCatalog, DeviceError, DeviceSource};
use hotkey_dictation::config::Config;
use hotkey_dictation::dictation::{
    CommandRecognizer, CommandSink, Dictation, StdoutSink, TextSink, Toggle,
};
use hotkey_dictation::session::RecordingSession;
use hotkey_dictation::telemetry;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

type Triggers = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;
    println!("✓ Config loaded from ~/.hotkey-dictation.toml");

    telemetry::init(config.telemetry.enabled, &config.telemetry.log_path)?;
    tracing::info!("hotkey-dictation starting");

    let tool = CaptureTool::from_config(&config.capture);
    let catalog = DeviceCatalog::new(tool.clone());
    let store = ArtifactStore::new(config.storage.dir_path()?, &config.capture.extension);

    let swept = store.sweep_expired(config.storage.max_age());
    tracing::info!(swept, dir = %store.dir().display(), "startup sweep complete");

    let mut triggers = BufReader::new(tokio::io::stdin()).lines();

    let device = match &config.capture.device {
        Some(name) => {
            check_configured_device(&catalog, name).await?;
            name.clone()
        }
        None => match tool.unlisted_default_device() {
            Some(name) => {
                tracing::info!(
                    input_format = tool.input_format(),
                    "input driver cannot list devices, using default source"
                );
                name.to_owned()
            }
            None => choose_device(&catalog, &mut triggers).await?,
        },
    };
    println!("✓ Recording from: {device}");

    let capture = CaptureProcess::new(tool)
        .with_startup_probe(config.capture.startup_probe())
        .with_stop_timeout(config.capture.stop_timeout());
    let mut session =
        RecordingSession::new(catalog, capture, store).with_max_age(config.storage.max_age());
    session.select_device(device);

    let sink: Box<dyn TextSink> = if config.dictation.output.is_empty() {
        Box::new(StdoutSink)
    } else {
        Box::new(CommandSink::new(&config.dictation.output)?)
    };

    let mut dictation =
        Dictation::new(session, sink).with_max_duration(config.dictation.max_duration());
    if config.dictation.recognizer.is_empty() {
        tracing::warn!("no recognizer configured, recordings are kept until swept");
    } else {
        dictation =
            dictation.with_recognizer(Box::new(CommandRecognizer::new(&config.dictation.recognizer)?));
    }

    tracing::info!("trigger loop starting");
    println!("\nPress Enter to start/stop recording. Press Ctrl+C to exit.\n");

    loop {
        let deadline = dictation.deadline();

        tokio::select! {
            line = triggers.next_line() => match line {
                Ok(Some(_)) => handle_toggle(&mut dictation).await,
                Ok(None) => {
                    tracing::info!("trigger input closed");
                    break;
                }
                Err(e) => {
                    tracing::error!("failed to read trigger input: {}", e);
                    break;
                }
            },
            () = wait_until(deadline) => {
                tracing::info!("maximum recording duration reached");
                handle_toggle(&mut dictation).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                println!("\nShutting down...");
                break;
            }
        }
    }

    dictation.shutdown().await;
    Ok(())
}

async fn handle_toggle(dictation: &mut Dictation<DeviceCatalog, CaptureProcess>) {
    match dictation.toggle().await {
        Ok(Toggle::Started(path)) => {
            println!("● Recording... ({})", path.display());
        }
        Ok(Toggle::Delivered(text)) => {
            tracing::info!(chars = text.chars().count(), "dictation complete");
            println!("✓ Text delivered");
        }
        Ok(Toggle::Silent) => println!("✓ No speech recognized"),
        Ok(Toggle::Recorded(path)) => println!("✓ Recording saved: {}", path.display()),
        Err(e) => {
            tracing::error!("dictation failed: {:#}", e);
            println!("✗ {e:#}");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

/// Warn when the configured device is not listed; the tool must still be present
async fn check_configured_device(catalog: &DeviceCatalog, name: &str) -> Result<()> {
    match catalog.list_devices().await {
        Ok(devices) => {
            if find_device(&devices, name).is_none() {
                tracing::warn!(device = name, "configured device not found in device list");
            }
            Ok(())
        }
        Err(e @ DeviceError::ToolUnavailable(_)) => Err(e.into()),
        Err(e) => {
            tracing::warn!("could not verify configured device: {}", e);
            Ok(())
        }
    }
}

async fn choose_device(catalog: &DeviceCatalog, input: &mut Triggers) -> Result<String> {
    let devices = catalog
        .list_devices()
        .await
        .context("failed to list audio devices")?;

    println!("\nAvailable audio devices:");
    for (index, device) in devices.iter().enumerate() {
        println!("{}. {}", index + 1, device.description());
    }
    println!("\nSelect device number (Enter for 1):");

    let answer = input
        .next_line()
        .await
        .context("failed to read device selection")?
        .unwrap_or_default();

    let device = pick_device(&devices, &answer)
        .with_context(|| format!("invalid device number: {:?}", answer.trim()))?;
    Ok(device.name().to_owned())
}
