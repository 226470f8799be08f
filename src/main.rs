use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use url::Url;

use compita_voice::events::{self, Emitter, VoiceEvent};
use compita_voice::voice::{
    AudioCapture, AudioFrame, CaptureSink, CpalMicrophone, CpalSpeaker, PROTOCOL_SAMPLE_RATE,
    PlaybackQueue, rms_energy,
};
use compita_voice::{
    Config, ControllerSettings, NativePlatform, StatusClient, VoiceCommand, VoiceController,
    VoiceSnapshot,
};

/// Compita - real-time voice bridge for the Compita assistant
#[derive(Parser)]
#[command(name = "compita", version, about)]
struct Cli {
    /// Compita server base URL (e.g. `http://localhost:8042`)
    #[arg(short, long, env = "COMPITA_SERVER_URL")]
    server: Option<String>,

    /// Enable voice without consulting the server status
    #[arg(long)]
    force: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Stream voice to the server (default)
    Run,
    /// Show the server's voice status
    Status,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output through the playback queue
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,compita_voice=info",
        1 => "info,compita_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(server) = &cli.server {
        config.server_url = Url::parse(server)?;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_voice(&config, cli.force).await,
        Command::Status => show_status(&config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run the voice bridge until quit or Ctrl-C
#[allow(clippy::future_not_send)]
async fn run_voice(config: &Config, force: bool) -> anyhow::Result<()> {
    if !config.voice.enabled {
        tracing::info!("voice disabled in configuration, nothing to do");
        return Ok(());
    }

    let settings = ControllerSettings::from_config(config)?;
    let mut controller = VoiceController::new(Box::new(NativePlatform::new(config)), settings);

    let (commands, commands_rx) = mpsc::channel::<VoiceCommand>(16);
    spawn_stdin_commands(commands.clone());
    spawn_ctrl_c(commands);
    spawn_snapshot_printer(controller.subscribe());

    let enabled = if force {
        controller.enable().map(|()| true)
    } else {
        match StatusClient::new(config.status_url()?).fetch().await {
            Ok(status) => controller.enable_if_available(&status),
            Err(e) => {
                tracing::warn!(error = %e, "voice status unavailable, not enabling");
                Ok(false)
            }
        }
    };

    match enabled {
        Ok(true) => {
            tracing::info!("compita voice ready - type 'activate' to start a turn, 'quit' to exit");
        }
        Ok(false) => tracing::info!("voice not enabled - type 'enable' to start anyway"),
        Err(e) => tracing::warn!(error = %e, "voice unavailable - type 'enable' to retry"),
    }

    controller.run(commands_rx).await;
    tracing::info!("compita voice stopped");
    Ok(())
}

/// Map interactive stdin lines to controller commands
fn spawn_stdin_commands(commands: mpsc::Sender<VoiceCommand>) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let command = match line.trim() {
                "activate" | "a" => VoiceCommand::Activate,
                "enable" => VoiceCommand::Enable,
                "disable" => VoiceCommand::Disable,
                "quit" | "exit" | "q" => VoiceCommand::Shutdown,
                "" => continue,
                other => {
                    println!("unknown command: {other} (activate, enable, disable, quit)");
                    continue;
                }
            };
            if commands.send(command).await.is_err() {
                break;
            }
        }
    });
}

fn spawn_ctrl_c(commands: mpsc::Sender<VoiceCommand>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            let _ = commands.send(VoiceCommand::Shutdown).await;
        }
    });
}

/// Print state and transcript changes as they happen
fn spawn_snapshot_printer(mut snapshots: tokio::sync::watch::Receiver<VoiceSnapshot>) {
    tokio::spawn(async move {
        let mut shown = VoiceSnapshot::default();
        while snapshots.changed().await.is_ok() {
            let current = snapshots.borrow_and_update().clone();
            if current.state != shown.state || current.connected != shown.connected {
                let link = if current.connected { "connected" } else { "disconnected" };
                println!("[{}] {link}", current.state);
            }
            if current.last_transcript != shown.last_transcript {
                if let Some(line) = &current.last_transcript {
                    println!("{}: {}", line.role, line.text);
                }
            }
            if current.degraded != shown.degraded {
                if let Some(reason) = &current.degraded {
                    println!("voice unavailable: {reason}");
                }
            }
            shown = current;
        }
    });
}

/// Print the server's voice status
async fn show_status(config: &Config) -> anyhow::Result<()> {
    let client = StatusClient::new(config.status_url()?);
    let status = client.fetch().await?;

    println!("Server:        {}", config.server_url);
    println!("Enabled:       {}", status.enabled);
    println!("Running:       {}", status.running);
    println!("Has API key:   {}", status.has_api_key);
    println!(
        "Voice mode:    {}",
        status.voice_mode.as_deref().unwrap_or("unknown")
    );
    println!("Robot voice:   {}", status.robot_voice_available);
    println!(
        "Client stream: {}",
        if status.enabled && status.client_mode() { "yes" } else { "no" }
    );

    Ok(())
}

/// Test microphone input after conversion to the protocol rate
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = events::channel();
    let mut capture =
        AudioCapture::new(Box::new(CpalMicrophone::new()), config.voice.constraints());
    let info = capture.open(CaptureSink::new(Emitter::new(0, tx)))?.clone();
    capture.arm();

    println!(
        "Device: {} ({} Hz, {} ch) -> {PROTOCOL_SAMPLE_RATE} Hz",
        info.device, info.sample_rate, info.channels
    );
    println!("---");

    for i in 0..duration {
        let mut samples = Vec::new();
        let window = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(window);

        loop {
            tokio::select! {
                () = &mut window => break,
                Some(envelope) = rx.recv() => match envelope.event {
                    VoiceEvent::Capture(block) => {
                        if let Some(frame) = capture.process(block) {
                            samples.extend_from_slice(frame.samples());
                        }
                    }
                    VoiceEvent::CaptureError(e) => tracing::warn!(error = %e, "capture error"),
                    _ => {}
                },
            }
        }

        let energy = rms_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | Samples: {:6} | [{}]",
            i + 1,
            energy,
            peak,
            samples.len(),
            meter
        );
    }

    capture.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave split into queued frames
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let speaker = CpalSpeaker::new()?;
    println!("Device rate: {} Hz", speaker.device_rate());

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut queue = PlaybackQueue::new(Box::new(speaker), move |seq| {
        let _ = done_tx.send(seq);
    });

    let frequency = 440.0_f32;
    let rate = usize::try_from(PROTOCOL_SAMPLE_RATE)?;
    let num_samples = rate * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PROTOCOL_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    // 100 ms frames, the size the server streams
    for chunk in samples.chunks(rate / 10) {
        queue.enqueue(AudioFrame::new(chunk.to_vec()));
    }
    println!("Queued {} frames...", queue.pending() + 1);

    while !queue.is_idle() {
        let Some(seq) = done_rx.recv().await else {
            break;
        };
        queue.on_finished(seq);
    }

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
