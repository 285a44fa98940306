use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;
use simplelog::{ConfigBuilder, SimpleLogger};

use lockstep::{
    algorithm::{self, AlgorithmFactory},
    output::{CsvHandler, LogHandler, OutputWriter},
    topology::{
        generator::{generate, GeneratorOptions},
        Topology,
    },
    Simulation,
};

const RUN_CMD: &str = "run";
const GENERATE_CMD: &str = "generate";
const VERBOSE_FLAG: &str = "verbose";

fn cli() -> Command {
    Command::new("lockstep")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Simulate round-based distributed algorithms across clusters of nodes.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new(RUN_CMD)
                .about("Run the nodes of the cluster marked isSelf in a topology file.")
                .arg(
                    Arg::new("topology")
                        .required(true)
                        .help("Path to the YAML topology file")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("rounds")
                        .long("rounds")
                        .default_value("1000")
                        .help("Number of rounds every node runs")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("algorithm")
                        .long("algorithm")
                        .default_value("average")
                        .value_parser(["average", "descent"]),
                )
                .arg(
                    Arg::new("key")
                        .long("key")
                        .default_value("x")
                        .help("State variable averaged by the average algorithm"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .help("CSV file receiving every state change")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("backoff-ms")
                        .long("backoff-ms")
                        .default_value("1000")
                        .help("Delay between two attempts to reach an unreachable cluster")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new(GENERATE_CMD)
                .about("Print a regular topology as YAML.")
                .arg(
                    Arg::new("nodes")
                        .long("nodes")
                        .required(true)
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("neighbors")
                        .long("neighbors")
                        .required(true)
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("clusters")
                        .long("clusters")
                        .default_value("1")
                        .value_parser(clap::builder::RangedU64ValueParser::<u32>::new().range(1..)),
                )
                .arg(
                    Arg::new("vars")
                        .long("vars")
                        .default_value("x")
                        .value_delimiter(',')
                        .help("Comma separated state variables given to every node"),
                )
                .arg(Arg::new("host").long("host").default_value("localhost"))
                .arg(
                    Arg::new("base-port")
                        .long("base-port")
                        .default_value("2005")
                        .value_parser(value_parser!(u16)),
                ),
        )
}

fn main() -> ExitCode {
    let matches = cli().get_matches();

    let level = if matches.get_flag(VERBOSE_FLAG) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = SimpleLogger::init(level, ConfigBuilder::new().build());

    match matches.subcommand() {
        Some((RUN_CMD, matches)) => run(matches),
        Some((GENERATE_CMD, matches)) => generate_topology(matches),
        _ => ExitCode::FAILURE,
    }
}

fn run(matches: &ArgMatches) -> ExitCode {
    let Some(path) = matches.get_one::<PathBuf>("topology") else {
        return ExitCode::FAILURE;
    };
    let topology = match Topology::from_path(path) {
        Ok(topology) => topology,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let algorithms: AlgorithmFactory =
        match matches.get_one::<String>("algorithm").map(String::as_str) {
            Some("descent") => algorithm::stochastic_descent(),
            _ => algorithm::neighbor_average(
                matches
                    .get_one::<String>("key")
                    .cloned()
                    .unwrap_or_else(|| "x".to_owned()),
            ),
        };

    let writer = match matches.get_one::<PathBuf>("output") {
        Some(path) => CsvHandler::create(path).and_then(OutputWriter::spawn),
        None => OutputWriter::spawn(LogHandler),
    };
    let writer = match writer {
        Ok(writer) => writer,
        Err(e) => {
            log::error!("unable to start the output writer: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let simulation = Simulation::builder(topology, algorithms)
        .with_max_rounds(matches.get_one::<u32>("rounds").copied().unwrap_or(1000))
        .with_retry_backoff(Duration::from_millis(
            matches.get_one::<u64>("backoff-ms").copied().unwrap_or(1000),
        ))
        .with_sink(Arc::new(writer.sink()))
        .build();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("unable to start the runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(simulation.run());
    // the network listener never stops on its own
    runtime.shutdown_background();
    writer.shutdown();

    match result {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(report) => {
            log::error!(
                "{} nodes of cluster {} failed",
                report.failures.len(),
                report.cluster
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn generate_topology(matches: &ArgMatches) -> ExitCode {
    let defaults = GeneratorOptions::default();
    let options = GeneratorOptions {
        nodes: matches.get_one::<u32>("nodes").copied().unwrap_or(defaults.nodes),
        neighbors: matches
            .get_one::<u32>("neighbors")
            .copied()
            .unwrap_or(defaults.neighbors),
        clusters: matches
            .get_one::<u32>("clusters")
            .copied()
            .unwrap_or(defaults.clusters),
        variables: matches
            .get_many::<String>("vars")
            .map(|vars| vars.cloned().collect())
            .unwrap_or(defaults.variables),
        host: matches
            .get_one::<String>("host")
            .cloned()
            .unwrap_or(defaults.host),
        base_port: matches
            .get_one::<u16>("base-port")
            .copied()
            .unwrap_or(defaults.base_port),
    };

    match generate(&options).and_then(|topology| topology.to_yaml_string()) {
        Ok(document) => {
            print!("{}", document);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
