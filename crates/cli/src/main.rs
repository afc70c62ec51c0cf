//! uwsctl CLI: Lian Li TL wireless fan and LCD control tool.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uwsctl_core::device::{self, DeviceSource};
use uwsctl_core::effects::{self, LedFrame, Rgb, Scope, TlEffect};
use uwsctl_core::lcd::{LcdChannel, CHUNK_DATA_LEN};
use uwsctl_core::pwm_sync::{run_pwm_sync_loop, CancelToken, HwmonPwmSource, PwmSource, SyncOptions};
use uwsctl_core::retry::ThreadSleeper;
use uwsctl_core::transport::HidDeviceTransport;
use uwsctl_core::wireless::WirelessTransceiver;

#[derive(Parser)]
#[command(
    name = "uwsctl",
    version,
    about = "Control Lian Li TL wireless fans and the TL-LCD panel"
)]
struct Cli {
    /// Output format for command results.
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached TL devices, wired and wireless.
    ListDevices,
    /// Wireless fan module commands, via the base station.
    #[command(subcommand)]
    Fan(FanCommands),
    /// Wired TL-LCD panel commands.
    #[command(subcommand)]
    Lcd(LcdCommands),
}

#[derive(Subcommand)]
enum FanCommands {
    /// Poll the base station and list paired modules with telemetry.
    List {
        /// Base station serial (auto-detected when exactly one is attached).
        #[arg(long)]
        serial: Option<String>,
    },
    /// Apply an LED mode to one or more modules.
    SetLed(SetLedArgs),
    /// Mirror the motherboard PWM duty to modules until interrupted.
    PwmSync(PwmSyncArgs),
}

#[derive(Args)]
struct SetLedArgs {
    /// Base station serial (auto-detected when exactly one is attached).
    #[arg(long)]
    serial: Option<String>,
    /// Target module MAC, repeatable.
    #[arg(long = "mac", value_name = "MAC", conflicts_with = "all")]
    macs: Vec<String>,
    /// Target every module currently bound to the base station.
    #[arg(long)]
    all: bool,
    #[arg(long, value_enum, default_value_t = LedMode::Static)]
    mode: LedMode,
    /// Uniform "R,G,B" color for static mode.
    #[arg(long)]
    color: Option<String>,
    /// Per-segment "R,G,B;R,G,B;..." list for static mode.
    #[arg(long, conflicts_with = "color")]
    color_list: Option<String>,
    /// Effect name; repeatable to restrict the random-effect pool.
    #[arg(long = "effect", value_name = "NAME")]
    effects: Vec<String>,
    #[arg(long, default_value_t = 255)]
    effect_brightness: u8,
    /// Playback direction, 0 or 1.
    #[arg(long, default_value_t = 1)]
    effect_direction: u8,
    /// LED ring scope: front, behind, or both.
    #[arg(long, default_value = "both")]
    effect_scope: String,
    /// Frame/effect step spacing in milliseconds.
    #[arg(long, default_value_t = 50)]
    interval_ms: u16,
    /// Rainbow step count.
    #[arg(long, default_value_t = 24)]
    frames: u8,
    /// JSON frames file for frames mode: an array of frames, each an array
    /// of [R, G, B] triples.
    #[arg(long)]
    frames_file: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LedMode {
    Static,
    Rainbow,
    Effect,
    RandomEffect,
    Frames,
}

#[derive(Args)]
struct PwmSyncArgs {
    /// Base station serial (auto-detected when exactly one is attached).
    #[arg(long)]
    serial: Option<String>,
    /// Target module MAC, repeatable.
    #[arg(long = "mac", value_name = "MAC", conflicts_with = "all")]
    macs: Vec<String>,
    /// Target every module currently bound to the base station.
    #[arg(long)]
    all: bool,
    /// Seconds between sync cycles.
    #[arg(long, default_value_t = 1.0)]
    interval: f64,
    /// Send one cycle and exit, leaving rpm-sync enabled.
    #[arg(long)]
    once: bool,
    /// Stop after this many cycles.
    #[arg(long)]
    max_cycles: Option<u64>,
    /// hwmon pwm attribute to mirror (auto-discovered when omitted).
    #[arg(long)]
    pwm_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum LcdCommands {
    /// List attached wired LCD panels.
    List,
    /// Query handshake mode and firmware version.
    Info {
        /// Panel serial (auto-detected when exactly one is attached).
        #[arg(long)]
        serial: Option<String>,
    },
    /// Send a JPEG image to the panel.
    Display {
        /// JPEG file to display.
        #[arg(long)]
        file: PathBuf,
        /// Panel serial (auto-detected when exactly one is attached).
        #[arg(long)]
        serial: Option<String>,
    },
}

/// A validated LED command, resolved from CLI arguments before any device
/// is touched.
enum LedPlan {
    Static {
        color: Option<Rgb>,
        color_list: Option<Vec<Rgb>>,
    },
    Rainbow {
        steps: u8,
    },
    Effect {
        effect: TlEffect,
    },
    RandomEffect {
        pool: Vec<TlEffect>,
    },
    Frames {
        frames: Vec<LedFrame>,
    },
}

fn build_led_plan(args: &SetLedArgs) -> Result<LedPlan> {
    let pool: Vec<TlEffect> = args
        .effects
        .iter()
        .map(|name| {
            TlEffect::from_name(name).ok_or_else(|| anyhow!("unknown effect '{name}'"))
        })
        .collect::<Result<_>>()?;

    match args.mode {
        LedMode::Static => {
            let color = args.color.as_deref().map(effects::parse_color).transpose()?;
            let color_list = args
                .color_list
                .as_deref()
                .map(effects::parse_color_list)
                .transpose()?;
            if color.is_none() && color_list.is_none() {
                bail!("static mode needs --color or --color-list");
            }
            Ok(LedPlan::Static { color, color_list })
        }
        LedMode::Rainbow => Ok(LedPlan::Rainbow { steps: args.frames }),
        LedMode::Effect => match pool.as_slice() {
            [one] => Ok(LedPlan::Effect { effect: *one }),
            [] => bail!("effect mode needs --effect"),
            _ => bail!("effect mode takes exactly one --effect"),
        },
        LedMode::RandomEffect => Ok(LedPlan::RandomEffect { pool }),
        LedMode::Frames => {
            let path = args
                .frames_file
                .as_ref()
                .ok_or_else(|| anyhow!("frames mode needs --frames-file"))?;
            let text = fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            Ok(LedPlan::Frames {
                frames: effects::parse_frames_json(&text)?,
            })
        }
    }
}

/// Expand `--mac`/`--all` into a concrete target list. `--all` polls the
/// base station and takes every bound module.
fn resolve_targets(
    tx: &mut WirelessTransceiver<HidDeviceTransport>,
    macs: &[String],
    all: bool,
) -> Result<Vec<String>> {
    if all {
        let snapshot = tx.list_devices()?;
        let targets: Vec<String> = snapshot.bound_devices().map(|d| d.mac.clone()).collect();
        if targets.is_empty() {
            bail!(
                "no modules are bound to base station {}",
                snapshot.base_mac
            );
        }
        Ok(targets)
    } else if macs.is_empty() {
        bail!("give at least one --mac, or --all");
    } else {
        Ok(macs.to_vec())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let output = cli.output;

    match cli.command {
        Commands::ListDevices => list_devices(output, None),
        Commands::Fan(FanCommands::List { serial }) => fan_list(output, serial.as_deref()),
        Commands::Fan(FanCommands::SetLed(args)) => fan_set_led(output, args),
        Commands::Fan(FanCommands::PwmSync(args)) => fan_pwm_sync(output, args),
        Commands::Lcd(LcdCommands::List) => list_devices(output, Some(DeviceSource::Wired)),
        Commands::Lcd(LcdCommands::Info { serial }) => lcd_info(output, serial.as_deref()),
        Commands::Lcd(LcdCommands::Display { file, serial }) => {
            lcd_display(output, &file, serial.as_deref())
        }
    }
}

fn list_devices(output: OutputFormat, source: Option<DeviceSource>) -> Result<()> {
    let mut devices = device::enumerate_devices()?;
    if let Some(source) = source {
        devices.retain(|d| d.source == source);
    }

    match output {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "devices": devices }))?
            );
        }
        OutputFormat::Text => {
            if devices.is_empty() {
                println!("No TL devices found.");
            } else {
                for dev in &devices {
                    println!(
                        "{} ({}, serial: {}, path: {})",
                        dev.product.as_deref().unwrap_or("TL device"),
                        dev.source,
                        dev.serial_number.as_deref().unwrap_or("-"),
                        dev.path
                    );
                }
            }
        }
    }
    Ok(())
}

fn fan_list(output: OutputFormat, serial: Option<&str>) -> Result<()> {
    let mut tx = WirelessTransceiver::open(serial)?;
    let snapshot = tx.list_devices()?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Text => {
            println!(
                "Base station {} ({} module(s))",
                snapshot.base_mac,
                snapshot.devices.len()
            );
            for dev in &snapshot.devices {
                let bound = if dev.is_bound(&snapshot.base_mac) {
                    "bound"
                } else {
                    "unbound"
                };
                println!(
                    "  {} [{bound}] channel {} fans {} pwm {:?} rpm {:?}",
                    dev.mac, dev.channel, dev.fan_count, dev.pwm_values, dev.fan_rpm
                );
            }
        }
    }
    Ok(())
}

fn fan_set_led(output: OutputFormat, args: SetLedArgs) -> Result<()> {
    let scope = Scope::from_name(&args.effect_scope)
        .ok_or_else(|| anyhow!("unknown scope '{}', expected front, behind, or both", args.effect_scope))?;
    let plan = build_led_plan(&args)?;

    let mut tx = WirelessTransceiver::open(args.serial.as_deref())?;
    let targets = resolve_targets(&mut tx, &args.macs, args.all)?;

    let mut rng = rand::thread_rng();
    let mut entries = Vec::new();
    let mut failures = 0usize;
    for mac in &targets {
        let applied = match &plan {
            LedPlan::Static { color, color_list } => tx
                .set_led_static(mac, *color, color_list.as_deref())
                .map(|()| {
                    (
                        format!("Applied static color to {mac}"),
                        json!({ "mac": mac, "mode": "static" }),
                    )
                }),
            LedPlan::Rainbow { steps } => tx
                .set_led_rainbow(mac, *steps, args.interval_ms)
                .map(|()| {
                    (
                        format!("Applied rainbow ({steps} steps) to {mac}"),
                        json!({ "mac": mac, "mode": "rainbow", "frames": steps }),
                    )
                }),
            LedPlan::Effect { effect } => tx
                .set_led_effect(
                    mac,
                    *effect,
                    scope,
                    args.effect_brightness,
                    args.effect_direction,
                    args.interval_ms,
                )
                .map(|()| {
                    (
                        format!("Applied effect {} to {mac}", effect.name()),
                        json!({ "mac": mac, "mode": "effect", "effect": effect.name() }),
                    )
                }),
            LedPlan::RandomEffect { pool } => {
                let effect = TlEffect::random(&mut rng, pool);
                tx.set_led_effect(
                    mac,
                    effect,
                    scope,
                    args.effect_brightness,
                    args.effect_direction,
                    args.interval_ms,
                )
                .map(|()| {
                    (
                        format!("Applied effect {} to {mac}", effect.name()),
                        json!({ "mac": mac, "mode": "random-effect", "effect": effect.name() }),
                    )
                })
            }
            LedPlan::Frames { frames } => tx
                .set_led_frames(mac, frames, args.interval_ms)
                .map(|()| {
                    (
                        format!("Applied {} frame(s) to {mac}", frames.len()),
                        json!({ "mac": mac, "mode": "frames", "frames": frames.len() }),
                    )
                }),
        };

        match applied {
            Ok((message, entry)) => {
                if output == OutputFormat::Text {
                    println!("{message}");
                }
                entries.push(entry);
            }
            Err(err) => {
                failures += 1;
                warn!(mac = %mac, "LED command failed: {err}");
                if output == OutputFormat::Text {
                    println!("{mac}: error: {err}");
                }
                entries.push(json!({ "mac": mac, "error": err.to_string() }));
            }
        }
    }

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }
    if failures > 0 {
        bail!("{failures} of {} target(s) failed", targets.len());
    }
    Ok(())
}

fn fan_pwm_sync(output: OutputFormat, args: PwmSyncArgs) -> Result<()> {
    if !(args.interval.is_finite() && args.interval > 0.0) {
        bail!("--interval must be a positive number of seconds");
    }

    let mut tx = WirelessTransceiver::open(args.serial.as_deref())?;
    let targets = resolve_targets(&mut tx, &args.macs, args.all)?;

    let source = match args.pwm_path {
        Some(path) => HwmonPwmSource::new(path),
        None => HwmonPwmSource::discover()?,
    };
    let options = SyncOptions {
        interval: Duration::from_secs_f64(args.interval),
        max_cycles: args.max_cycles,
        stop_after_first_send: args.once,
    };

    let status = if args.once { "once" } else { "running" };
    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "targets": targets,
                "interval": args.interval,
                "status": status,
            }))?
        ),
        OutputFormat::Text => println!(
            "Syncing PWM to {} target(s) every {}s ({status})",
            targets.len(),
            args.interval
        ),
    }

    // The flag stays enabled after a clean exit so the modules keep the last
    // synced duty; it is only rolled back when the loop aborts.
    source.set_rpm_sync(true)?;
    let result = run_pwm_sync_loop(
        &mut tx,
        &source,
        &targets,
        &options,
        &CancelToken::new(),
        &ThreadSleeper,
    );
    if result.is_err() {
        if let Err(restore) = source.set_rpm_sync(false) {
            warn!("could not restore rpm-sync flag: {restore}");
        }
    }
    let cycles = result?;
    info!(cycles, "pwm sync finished");
    Ok(())
}

fn lcd_info(output: OutputFormat, serial: Option<&str>) -> Result<()> {
    let channel = LcdChannel::open(serial)?;
    let handshake = channel.handshake()?;
    let firmware = channel.firmware_version()?;

    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "handshake": handshake,
                "firmware": firmware,
            }))?
        ),
        OutputFormat::Text => {
            println!("Mode: {}", handshake.mode);
            println!("Firmware: {}", firmware.version);
        }
    }
    Ok(())
}

fn lcd_display(output: OutputFormat, file: &PathBuf, serial: Option<&str>) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("read {}", file.display()))?;

    let channel = LcdChannel::open(serial)?;
    channel.send_jpg(&data)?;

    let chunks = data.len().div_ceil(CHUNK_DATA_LEN);
    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "file": file.display().to_string(),
                "bytes": data.len(),
                "chunks": chunks,
            }))?
        ),
        OutputFormat::Text => println!(
            "Displayed {} ({} bytes in {chunks} chunk(s))",
            file.display(),
            data.len()
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_led_args() -> SetLedArgs {
        SetLedArgs {
            serial: None,
            macs: vec!["aa:bb:cc:dd:ee:ff".into()],
            all: false,
            mode: LedMode::Static,
            color: None,
            color_list: None,
            effects: Vec::new(),
            effect_brightness: 255,
            effect_direction: 1,
            effect_scope: "both".into(),
            interval_ms: 50,
            frames: 24,
            frames_file: None,
        }
    }

    #[test]
    fn static_plan_needs_a_color() {
        let args = set_led_args();
        assert!(build_led_plan(&args).is_err());

        let args = SetLedArgs {
            color: Some("255,128,0".into()),
            ..set_led_args()
        };
        assert!(matches!(
            build_led_plan(&args),
            Ok(LedPlan::Static {
                color: Some((255, 128, 0)),
                color_list: None,
            })
        ));
    }

    #[test]
    fn effect_plan_takes_exactly_one_effect() {
        let args = SetLedArgs {
            mode: LedMode::Effect,
            ..set_led_args()
        };
        assert!(build_led_plan(&args).is_err());

        let args = SetLedArgs {
            mode: LedMode::Effect,
            effects: vec!["twinkle".into()],
            ..set_led_args()
        };
        assert!(matches!(
            build_led_plan(&args),
            Ok(LedPlan::Effect {
                effect: TlEffect::Twinkle,
            })
        ));

        let args = SetLedArgs {
            mode: LedMode::Effect,
            effects: vec!["twinkle".into(), "ripple".into()],
            ..set_led_args()
        };
        assert!(build_led_plan(&args).is_err());
    }

    #[test]
    fn random_effect_plan_rejects_unknown_pool_entries() {
        let args = SetLedArgs {
            mode: LedMode::RandomEffect,
            effects: vec!["disco".into()],
            ..set_led_args()
        };
        assert!(build_led_plan(&args).is_err());
    }

    #[test]
    fn cli_parses_random_effect_invocation() {
        let cli = Cli::try_parse_from([
            "uwsctl",
            "--output",
            "json",
            "fan",
            "set-led",
            "--all",
            "--mode",
            "random-effect",
            "--effect",
            "staggered",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Fan(FanCommands::SetLed(args)) => {
                assert!(args.all);
                assert_eq!(args.mode, LedMode::RandomEffect);
                assert_eq!(args.effects, vec!["staggered"]);
            }
            _ => panic!("expected fan set-led"),
        }
    }

    #[test]
    fn cli_rejects_mac_combined_with_all() {
        let result = Cli::try_parse_from([
            "uwsctl",
            "fan",
            "set-led",
            "--all",
            "--mac",
            "aa:bb:cc:dd:ee:ff",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn pwm_sync_defaults() {
        let cli = Cli::try_parse_from([
            "uwsctl",
            "fan",
            "pwm-sync",
            "--mac",
            "aa:bb:cc:dd:ee:ff",
        ])
        .unwrap();
        match cli.command {
            Commands::Fan(FanCommands::PwmSync(args)) => {
                assert_eq!(args.interval, 1.0);
                assert!(!args.once);
                assert_eq!(args.max_cycles, None);
            }
            _ => panic!("expected fan pwm-sync"),
        }
    }
}
