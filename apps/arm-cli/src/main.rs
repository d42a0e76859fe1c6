use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use arm_controller::{ArmController, ConsoleSink, HostCommand, HostResponse, StatusSink};
use servo_registry as reg;
use servo_registry::{ArmDescriptor, JointSlot, MetricsHub};
use servo_transport as transport;
use servo_transport::BusAddress;

#[derive(Parser, Debug)]
#[command(
    name = "arm",
    version,
    about = "Six-axis arm servo bus controller",
    disable_help_subcommand = true
)]
struct Cli {
    /// Arm descriptor (YAML); built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<String>,

    /// Bus backend
    #[arg(long, value_enum, default_value_t = Backend::Mock, global = true)]
    backend: Backend,

    /// Serial port, overrides the descriptor
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate, overrides the descriptor
    #[arg(long, global = true)]
    baud: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Serial,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,
    /// Ping servos; every configured slot unless --id is given
    Discover {
        /// Addresses to probe, e.g. 1,2,40
        #[arg(long = "id", value_delimiter = ',')]
        ids: Vec<u8>,
    },
    /// Move one joint and wait for it to arrive
    SetJoint {
        #[arg(long)]
        slot: usize,
        #[arg(long, allow_negative_numbers = true)]
        position: i16,
        #[arg(long, default_value_t = 0)]
        velocity: u16,
        #[arg(long, default_value_t = 0)]
        acceleration: u8,
    },
    /// Move several joints together, then wait the settle time
    SetJoints {
        #[arg(long, value_delimiter = ',', required = true)]
        slots: Vec<usize>,
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true, required = true)]
        positions: Vec<i16>,
        #[arg(long, value_delimiter = ',', required = true)]
        velocities: Vec<u16>,
        #[arg(long, value_delimiter = ',', required = true)]
        accelerations: Vec<u8>,
    },
    /// Read the full state of one joint
    JointState {
        #[arg(long)]
        slot: usize,
    },
    /// Read every joint in slot order
    RobotState,
    /// Enable (default) or disable torque on joints
    Torque {
        #[arg(long, value_delimiter = ',', required = true)]
        slots: Vec<usize>,
        /// Disable instead of enable
        #[arg(long, action = ArgAction::SetTrue)]
        off: bool,
    },
    /// Rewrite a servo's bus address
    Reassign {
        #[arg(long)]
        old: u8,
        #[arg(long)]
        new: u8,
    },
    /// Run discovery and print bus metrics (Prometheus text format)
    Metrics,
    /// Start up, then execute JSON commands read line by line from stdin
    Serve,
    /// Validate a descriptor and print the slot table
    ConfigCheck,
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let desc = load_descriptor(&cli)?;

    match cli.command {
        Commands::Ports => list_ports(cli.backend),
        Commands::ConfigCheck => config_check(&desc),
        Commands::Metrics => {
            let hub = MetricsHub::new().map_err(anyhow::Error::msg)?;
            let mut arm = build_controller(cli.backend, &desc)?.with_metrics(hub.bus.clone());
            arm.startup();
            print!("{}", hub.encode_text());
            Ok(())
        }
        Commands::Serve => {
            let hub = MetricsHub::new().map_err(anyhow::Error::msg)?;
            let arm = build_controller(cli.backend, &desc)?.with_metrics(hub.bus.clone());
            serve(arm)
        }
        Commands::Discover { ids } => {
            let addresses = if ids.is_empty() {
                None
            } else {
                Some(ids.into_iter().map(BusAddress).collect())
            };
            run_one(cli.backend, &desc, HostCommand::Discover { addresses })
        }
        Commands::SetJoint {
            slot,
            position,
            velocity,
            acceleration,
        } => run_one(
            cli.backend,
            &desc,
            HostCommand::SetJoint {
                slot: JointSlot(slot),
                position,
                velocity,
                acceleration,
            },
        ),
        Commands::SetJoints {
            slots,
            positions,
            velocities,
            accelerations,
        } => run_one(
            cli.backend,
            &desc,
            HostCommand::SetJoints {
                slots: slots.into_iter().map(JointSlot).collect(),
                positions,
                velocities,
                accelerations,
            },
        ),
        Commands::JointState { slot } => run_one(
            cli.backend,
            &desc,
            HostCommand::GetJointState {
                slot: JointSlot(slot),
            },
        ),
        Commands::RobotState => run_one(cli.backend, &desc, HostCommand::GetRobotState),
        Commands::Torque { slots, off } => {
            let enabled = vec![!off; slots.len()];
            run_one(
                cli.backend,
                &desc,
                HostCommand::SetTorque {
                    slots: slots.into_iter().map(JointSlot).collect(),
                    enabled,
                },
            )
        }
        Commands::Reassign { old, new } => run_one(
            cli.backend,
            &desc,
            HostCommand::Reassign {
                old: BusAddress(old),
                new: BusAddress(new),
            },
        ),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_descriptor(cli: &Cli) -> Result<ArmDescriptor> {
    let mut desc = match cli.config.as_deref() {
        Some(path) => reg::load_descriptor_file(path)?,
        None => ArmDescriptor::default(),
    };
    if let Some(port) = &cli.port {
        desc.bus.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        desc.bus.baud = baud;
    }
    Ok(desc)
}

fn status_sink() -> Box<dyn StatusSink> {
    // stdout carries JSON; human-readable status goes to stderr.
    Box::new(ConsoleSink::stderr())
}

fn build_controller(backend: Backend, desc: &ArmDescriptor) -> Result<ArmController> {
    let arm = match backend {
        Backend::Mock => {
            let bus = transport::MockBus::with_servos(
                desc.families
                    .sts
                    .iter()
                    .chain(desc.families.scs.iter())
                    .copied(),
            );
            ArmController::new(
                desc,
                Box::new(transport::MockDriver::new(&bus, "sts", true)),
                Box::new(transport::MockDriver::new(&bus, "scs", false)),
                status_sink(),
            )?
        }
        Backend::Serial => {
            let line = transport::SerialLine::open(
                &desc.bus.port,
                desc.bus.baud,
                Duration::from_millis(desc.bus.timeout_ms),
            )
            .with_context(|| format!("opening {} at {} baud", desc.bus.port, desc.bus.baud))?
            .shared();
            ArmController::new(
                desc,
                Box::new(transport::StsDriver::new(line.clone())),
                Box::new(transport::ScsDriver::new(line)),
                status_sink(),
            )?
        }
    };
    info!(arm = arm.name(), backend = ?backend, "controller ready");
    Ok(arm)
}

fn list_ports(backend: Backend) -> Result<()> {
    let ports = match backend {
        Backend::Mock => transport::MockBus::list()?,
        Backend::Serial => transport::SerialLine::list()?,
    };
    for port in ports {
        println!("{}\t{}", port.name, port.driver);
    }
    Ok(())
}

fn config_check(desc: &ArmDescriptor) -> Result<()> {
    let registry = reg::ServoRegistry::from_descriptor(desc).context("validating rosters")?;
    println!(
        "descriptor: {} ({} slots, bus {} @ {})",
        desc.name,
        registry.len(),
        desc.bus.port,
        desc.bus.baud
    );
    println!("{}", serde_json::to_string_pretty(registry.slots())?);
    let wait = desc
        .motion
        .max_wait_ms
        .map(|ms| format!("{ms} ms"))
        .unwrap_or_else(|| "unbounded".to_string());
    println!(
        "motion: tolerance={} poll={} ms settle={} ms max_wait={}",
        desc.motion.tolerance, desc.motion.poll_interval_ms, desc.motion.settle_ms, wait
    );
    println!("telemetry: {:?}", desc.telemetry.snapshot_policy);
    Ok(())
}

fn run_one(backend: Backend, desc: &ArmDescriptor, cmd: HostCommand) -> Result<()> {
    let mut arm = build_controller(backend, desc)?;
    let resp = arm.execute(cmd);
    println!("{}", serde_json::to_string_pretty(&resp)?);
    if let HostResponse::Error { kind, message } = resp {
        anyhow::bail!("{kind}: {message}");
    }
    Ok(())
}

enum Inbound {
    Command(HostCommand),
    Reply(HostResponse),
}

fn serve(mut arm: ArmController) -> Result<()> {
    arm.startup();
    let (tx, rx) = mpsc::channel::<Inbound>();
    let cancel = arm.cancel_token();

    // Reader: cancellation is acted on here so it reaches a motion that is still waiting.
    let reader = thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let inbound = match serde_json::from_str::<HostCommand>(text) {
                Ok(HostCommand::Cancel) => {
                    cancel.cancel();
                    Inbound::Reply(HostResponse::CancelRequested)
                }
                Ok(cmd) => Inbound::Command(cmd),
                Err(e) => Inbound::Reply(HostResponse::malformed(&e)),
            };
            if tx.send(inbound).is_err() {
                break;
            }
        }
    });

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for inbound in rx {
        let resp = match inbound {
            Inbound::Command(cmd) => arm.execute(cmd),
            Inbound::Reply(resp) => resp,
        };
        serde_json::to_writer(&mut out, &resp)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }
    if reader.join().is_err() {
        warn!("stdin reader exited abnormally");
    }
    info!("host channel closed");
    Ok(())
}
