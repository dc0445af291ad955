//! Cascade CLI Application

mod commands;

use anyhow::{bail, Context};
use cascade_core::domain::audio::AudioEnumerator;
use cascade_core::domain::config::{ConfigManager, ControlConfig, EqualizerConfig, PresetManager};
use cascade_core::domain::control::{ControlSnapshot, SlotId};
use cascade_core::domain::design::{design, response_db, Cutoff};
use cascade_core::domain::engine::EngineEvent;
use cascade_infra::audio::wav::write_wav_i16;
use cascade_infra::audio::{
    CpalEnumerator, DeviceSelection, EqualizerSession, ExportJob, TestSignal,
};
use clap::{Parser, Subcommand};
use commands::{Command, HELP};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(about = "A real-time cascaded-biquad equalizer", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the equalizer on the audio devices, starting idle
    Live {
        /// Start capturing immediately
        #[arg(long)]
        capture: bool,
    },
    /// Run the equalizer and play a WAV file through it
    Play { file: PathBuf },
    /// Render a WAV file through the filters (zero-phase) into a new WAV file
    Export {
        input: PathBuf,
        output: PathBuf,
        /// Saved preset to use instead of the configured controls
        #[arg(long)]
        preset: Option<String>,
        /// Slots to enable, e.g. `lp,bs` (replaces the configured set)
        #[arg(long, value_delimiter = ',')]
        enable: Option<Vec<SlotId>>,
        /// Custom lowpass cutoff in Hz
        #[arg(long)]
        cutoff: Option<f32>,
        /// Output gain between 0 and 1
        #[arg(long)]
        gain: Option<f32>,
    },
    /// Print the designed sections and their response at the cutoffs
    Design,
    /// Delete the saved configuration so the next run starts from defaults
    Reset,
    /// List audio devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Write a test signal (`sine:440`, `multitone`, `chirp:20-20000`) as WAV
    Generate {
        signal: TestSignal,
        output: PathBuf,
        #[arg(long, default_value_t = 3.0)]
        duration: f32,
        #[arg(long, default_value_t = 44100)]
        rate: u32,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!("🎚️ Cascade starting...");

    let manager = match cli.config_dir {
        Some(dir) => ConfigManager::new(dir),
        None => ConfigManager::new(ConfigManager::default_config_dir()?),
    };
    let config = manager.load().await;

    match cli.command {
        Commands::Live { capture } => {
            let mut session = open_session(&config)?;
            if capture {
                session.start_capture()?;
            }
            run_interactive(session, &manager, &config).await
        }
        Commands::Play { file } => {
            let mut session = open_session(&config)?;
            session
                .play_file(&file)
                .with_context(|| format!("cannot play {}", file.display()))?;
            run_interactive(session, &manager, &config).await
        }
        Commands::Export {
            input,
            output,
            preset,
            enable,
            cutoff,
            gain,
        } => {
            let controls = match preset {
                Some(name) => manager.presets(&config).load_preset(&name).await?,
                None => config.controls,
            };
            let mut snapshot = controls.to_snapshot();
            if let Some(slots) = enable {
                snapshot = SlotId::ALL
                    .iter()
                    .fold(snapshot, |s, &slot| s.with_enabled(slot, slots.contains(&slot)));
            }
            if let Some(hz) = cutoff {
                snapshot = snapshot.with_custom_cutoff(hz);
            }
            if let Some(g) = gain {
                snapshot = snapshot.with_gain(g);
            }
            export(&config, snapshot, input, output).await
        }
        Commands::Design => print_design(&config),
        Commands::Reset => {
            if manager.exists() {
                manager.clear().await?;
                println!("Removed {}", manager.config_path().display());
            } else {
                println!("No saved configuration at {}", manager.config_path().display());
            }
            Ok(())
        }
        Commands::Devices { json } => print_devices(json),
        Commands::Generate {
            signal,
            output,
            duration,
            rate,
        } => {
            let samples = signal.render(rate, duration);
            write_wav_i16(&output, &samples, rate)?;
            println!("Wrote {} samples to {}", samples.len(), output.display());
            Ok(())
        }
    }
}

fn open_session(config: &EqualizerConfig) -> anyhow::Result<EqualizerSession> {
    let (stream, bank) = config.resolve()?;
    let devices = DeviceSelection {
        input: config.audio.input_device().map(str::to_string),
        output: config.audio.output_device().map(str::to_string),
    };
    let session = EqualizerSession::open(stream, bank, config.controls.to_snapshot(), &devices)
        .context("cannot open audio devices")?;
    Ok(session)
}

async fn export(
    config: &EqualizerConfig,
    snapshot: ControlSnapshot,
    input: PathBuf,
    output: PathBuf,
) -> anyhow::Result<()> {
    let (_, bank) = config.resolve()?;
    let written = run_export(ExportJob::new(bank, snapshot, input, output.clone())).await?;
    println!("Exported {} samples to {}", written, output.display());
    Ok(())
}

/// Export on a blocking worker so the runtime stays responsive
async fn run_export(job: ExportJob) -> anyhow::Result<usize> {
    let written = tokio::task::spawn_blocking(move || job.run()).await??;
    Ok(written)
}

async fn run_interactive(
    mut session: EqualizerSession,
    manager: &ConfigManager,
    config: &EqualizerConfig,
) -> anyhow::Result<()> {
    let presets = manager.presets(config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.app.event_poll_interval_ms.max(10)));

    println!("{HELP}");
    print_status(&session);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in session.poll_events() {
                    if event == EngineEvent::PlaybackEnded {
                        println!("playback finished");
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = execute(&mut session, &presets, command).await {
                            println!("error: {e:#}");
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
        }
    }

    session.shutdown();
    info!("Cascade stopped");
    Ok(())
}

async fn execute(
    session: &mut EqualizerSession,
    presets: &PresetManager,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Toggle(slot) => {
            let on = session.toggle(slot);
            println!("{slot} {}", if on { "on" } else { "off" });
        }
        Command::Set(slot, on) => {
            session.set_enabled(slot, on);
            println!("{slot} {}", if on { "on" } else { "off" });
        }
        Command::Cutoff(hz) => {
            println!("custom cutoff {} Hz", session.set_custom_cutoff(hz));
        }
        Command::Gain(gain) => {
            println!("gain {}", session.set_gain(gain));
        }
        Command::Capture => session.start_capture()?,
        Command::Play(None) => session.play()?,
        Command::Play(Some(path)) => session.play_file(&path)?,
        Command::Stop => session.stop()?,
        Command::Spectrum => print_spectrum(session),
        Command::Status => print_status(session),
        Command::Presets => {
            let names = presets.list_presets().await?;
            if names.is_empty() {
                println!("no presets saved");
            }
            for name in names {
                println!("  {name}");
            }
        }
        Command::SavePreset(name) => {
            let existed = presets.preset_exists(&name).await;
            presets
                .save_preset(&name, &ControlConfig::from(&session.snapshot()))
                .await?;
            if existed {
                println!("overwrote preset '{name}'");
            } else {
                println!("saved preset '{name}'");
            }
        }
        Command::LoadPreset(name) => {
            let controls = presets.load_preset(&name).await?;
            session.apply_snapshot(controls.to_snapshot());
            print_status(session);
        }
        Command::DeletePreset(name) => {
            presets.delete_preset(&name).await?;
            println!("deleted preset '{name}'");
        }
        Command::Export { input, output } => {
            println!("exporting {} ...", input.display());
            let written = run_export(session.export_job(input, output.clone())).await?;
            println!("exported {} samples to {}", written, output.display());
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn print_status(session: &EqualizerSession) {
    let snapshot = session.snapshot();
    let slots: Vec<String> = SlotId::ALL
        .iter()
        .map(|&slot| {
            format!(
                "{}:{}",
                slot,
                if snapshot.is_enabled(slot) { "on" } else { "off" }
            )
        })
        .collect();
    println!(
        "[{}] cutoff {} Hz, gain {:.2}, source {:?}",
        slots.join(" "),
        snapshot.custom_cutoff_hz(),
        snapshot.gain(),
        session.source_state()
    );
}

fn print_spectrum(session: &mut EqualizerSession) {
    const BANDS: usize = 16;
    const WIDTH: f32 = 40.0;

    let Some(spectrum) = session.spectrum() else {
        println!("(silence)");
        return;
    };
    let nyquist = session.config().sample_rate.nyquist();
    for (i, level) in spectrum.bands(BANDS).iter().enumerate() {
        let from = nyquist * i as f32 / BANDS as f32;
        let bar = "#".repeat((level.clamp(0.0, 1.0) * WIDTH).round() as usize);
        println!("{:>6.0} Hz |{}", from, bar);
    }
    println!("peak at {:.0} Hz", spectrum.peak_frequency());
}

fn print_design(config: &EqualizerConfig) -> anyhow::Result<()> {
    let (stream, bank) = config.resolve()?;
    let fs = stream.sample_rate.hz() as f64;

    for slot in SlotId::ALL {
        let spec = bank.spec(slot);
        let sections = design(spec)?;
        let cutoffs = match spec.cutoff {
            Cutoff::Single(hz) => vec![hz],
            Cutoff::Band { low, high } => vec![low, high],
        };
        println!(
            "{slot}: {:?} order {} at {:?} Hz, {} sections",
            spec.kind,
            spec.order,
            cutoffs,
            sections.len()
        );
        for (i, s) in sections.iter().enumerate() {
            println!(
                "  #{i}: b = [{:+.10}, {:+.10}, {:+.10}]  a = [1, {:+.10}, {:+.10}]",
                s.b0, s.b1, s.b2, s.a1, s.a2
            );
        }
        for hz in cutoffs {
            println!(
                "  |H({hz} Hz)| = {:.2} dB",
                response_db(&sections, hz as f64, fs)
            );
        }
    }
    Ok(())
}

fn print_devices(json: bool) -> anyhow::Result<()> {
    let enumerator = CpalEnumerator::new();
    let devices = enumerator.devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        warn!("No audio devices found");
        bail!("no audio devices found");
    }
    for device in &devices {
        let rates: Vec<String> = device.sample_rates.iter().map(|r| r.hz().to_string()).collect();
        println!(
            "{:<40} {:<7} {} ch  [{}]",
            device.name,
            format!("{:?}", device.device_type),
            device.max_channels,
            rates.join(", ")
        );
    }
    Ok(())
}
