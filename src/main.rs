use anyhow::{Context, Result};
use clap::parser::ValueSource;
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};
use log::LevelFilter;
use novena_usb_hub::{Error, HostSession, HubControl, IndicatorMode, Topology, UsbHost};

#[derive(Parser, Debug)]
#[command(
    name = "novena-usb-hub",
    about = "Switch power to, and show the status of, the Novena board's USB hub ports.",
    after_help = "PORT is a hub letter followed by the port number: 'u3' for upstream port 3 \
                  or 'd2' for downstream port 2, or 'i4' / 'e2' for internal and external \
                  ports with --topology internal-external."
)]
struct Args {
    /// Show the status of every port on the board's hubs
    #[arg(short = 'l', long)]
    list_ports: bool,

    /// Switch power on for a port
    #[arg(short = 'e', long, value_name = "PORT")]
    port_enable: Vec<String>,

    /// Switch power off for a port
    #[arg(short = 'd', long, value_name = "PORT")]
    port_disable: Vec<String>,

    /// Set the indicator LED of a port (see --indicator-mode)
    #[arg(long, value_name = "PORT")]
    port_indicator: Vec<String>,

    #[arg(long, value_enum, default_value_t = IndicatorMode::Green)]
    indicator_mode: IndicatorMode,

    /// Hub layout of the board
    #[arg(
        short,
        long,
        value_enum,
        env = "NOVENA_HUB_TOPOLOGY",
        default_value_t = Topology::UpstreamDownstream
    )]
    topology: Topology,

    /// More output; repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

enum Action {
    List,
    Power { port: String, enabled: bool },
    Indicator { port: String, mode: IndicatorMode },
}

/// Actions in the order they were given on the command line.
fn ordered_actions(matches: &ArgMatches, args: &Args) -> Vec<Action> {
    let indices = |id: &str| -> Vec<usize> {
        matches
            .indices_of(id)
            .map(|indices| indices.collect())
            .unwrap_or_default()
    };

    let mut actions = Vec::new();
    for (index, port) in indices("port_enable").into_iter().zip(&args.port_enable) {
        actions.push((index, Action::Power { port: port.clone(), enabled: true }));
    }
    for (index, port) in indices("port_disable").into_iter().zip(&args.port_disable) {
        actions.push((index, Action::Power { port: port.clone(), enabled: false }));
    }
    for (index, port) in indices("port_indicator").into_iter().zip(&args.port_indicator) {
        actions.push((
            index,
            Action::Indicator { port: port.clone(), mode: args.indicator_mode },
        ));
    }
    if args.list_ports && matches.value_source("list_ports") == Some(ValueSource::CommandLine) {
        let index = matches.index_of("list_ports").unwrap_or(usize::MAX);
        actions.push((index, Action::List));
    }

    actions.sort_by_key(|(index, _)| *index);
    actions.into_iter().map(|(_, action)| action).collect()
}

fn report_failure(topology: Topology, port: &str, err: &Error) {
    eprintln!("Error: port '{port}': {err}");
    if let Error::Parse(_) | Error::InvalidPort(_) = err {
        let [a, b] = topology.roles();
        eprintln!(
            "Must specify port as '{}N' or '{}N' for the {} or {} hub.\n\
             Port number must be 1, 2, 3, or 4.",
            a.letter(),
            b.letter(),
            a.label(),
            b.label()
        );
    }
}

fn run<H: UsbHost>(control: &HubControl<'_, H>, action: Action) {
    let topology = control.topology();
    match action {
        Action::List => {
            for hub in control.list_ports() {
                println!("{hub}");
            }
        }
        Action::Power { port, enabled } => {
            if let Err(e) = control.set_power(&port, enabled) {
                report_failure(topology, &port, &e);
            }
        }
        Action::Indicator { port, mode } => {
            if let Err(e) = control.set_indicator(&port, mode) {
                report_failure(topology, &port, &e);
            }
        }
    }
}

fn main() -> Result<()> {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let usb_log_level = match args.verbose {
        0 => rusb::LogLevel::Warning,
        1 | 2 => rusb::LogLevel::Info,
        _ => rusb::LogLevel::Debug,
    };
    let session = HostSession::new(usb_log_level).context("Failed to initialize libusb")?;

    let actions = ordered_actions(&matches, &args);
    if actions.is_empty() {
        Args::command().print_help()?;
        return Ok(());
    }

    let control = HubControl::new(&session, args.topology);
    for action in actions {
        run(&control, action);
    }
    Ok(())
}
