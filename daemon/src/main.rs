use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use spiped::{
    dispatcher::{self, Actor},
    resolve, shutdown, Error,
};
use spiped_cryptography::SharedSecret;
use spiped_runtime::{resolver::Dns, tokio::Network, Network as _};
use spiped_stream::Role;
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tracing::{error, info, warn, Level};

/// Size of the dispatcher control mailbox.
const MAILBOX_SIZE: usize = 8;

struct Options {
    source: String,
    target: String,
    key: PathBuf,
    connection: spiped_stream::Config,
    max_connections: usize,
    resolve_interval: Option<Duration>,
    wait_for_dns: bool,
    oneshot: bool,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("invalid number of seconds: {value}"))?;
    if seconds.is_nan() || seconds <= 0.0 {
        return Err(format!("must be positive: {value}"));
    }
    Duration::try_from_secs_f64(seconds).map_err(|err| format!("{err}: {value}"))
}

fn command() -> Command {
    Command::new("spiped")
        .version(env!("CARGO_PKG_VERSION"))
        .about("create a secure pipe between a socket and a target")
        .arg(
            Arg::new("encrypt")
                .short('e')
                .action(ArgAction::SetTrue)
                .help("encrypt connections from the source and forward them to the target"),
        )
        .arg(
            Arg::new("decrypt")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("decrypt connections from the source and forward them to the target"),
        )
        .group(
            ArgGroup::new("mode")
                .args(["encrypt", "decrypt"])
                .required(true),
        )
        .arg(
            Arg::new("source")
                .short('s')
                .value_name("ADDRESS")
                .required(true)
                .help("address to listen on: [host]:port, [ipv6]:port, or /unix/socket"),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .value_name("ADDRESS")
                .required(true)
                .help("address to connect to"),
        )
        .arg(
            Arg::new("key")
                .short('k')
                .value_name("FILE")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("file containing the shared key, or - for standard input"),
        )
        .arg(
            Arg::new("no-pfs")
                .short('f')
                .action(ArgAction::SetTrue)
                .conflicts_with("require-pfs")
                .help("skip the Diffie-Hellman computation (no perfect forward secrecy)"),
        )
        .arg(
            Arg::new("require-pfs")
                .short('g')
                .action(ArgAction::SetTrue)
                .help("refuse peers that skip the Diffie-Hellman computation"),
        )
        .arg(
            Arg::new("no-keepalive")
                .short('j')
                .action(ArgAction::SetTrue)
                .help("disable transport keep-alives"),
        )
        .arg(
            Arg::new("max-connections")
                .short('n')
                .value_name("COUNT")
                .value_parser(value_parser!(u16).range(1..=500))
                .default_value("100")
                .help("maximum number of open connections"),
        )
        .arg(
            Arg::new("timeout")
                .short('o')
                .value_name("SECONDS")
                .value_parser(parse_seconds)
                .default_value("5")
                .help("timeout for connecting and handshaking"),
        )
        .arg(
            Arg::new("resolve-interval")
                .short('r')
                .value_name("SECONDS")
                .value_parser(parse_seconds)
                .default_value("60")
                .help("how often to re-resolve the target address"),
        )
        .arg(
            Arg::new("no-resolve")
                .short('R')
                .action(ArgAction::SetTrue)
                .conflicts_with("resolve-interval")
                .help("never re-resolve the target address"),
        )
        .arg(
            Arg::new("wait-for-dns")
                .short('D')
                .action(ArgAction::SetTrue)
                .help("keep retrying until the source and target addresses resolve"),
        )
        .arg(
            Arg::new("oneshot")
                .short('1')
                .action(ArgAction::SetTrue)
                .help("handle a single connection, then exit"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(value_parser!(Level))
                .default_value("info")
                .help("most verbose level to log"),
        )
}

fn options(matches: &ArgMatches) -> Options {
    let role = if matches.get_flag("encrypt") {
        Role::Encrypt
    } else {
        Role::Decrypt
    };
    let mut connection = spiped_stream::Config::new(role);
    connection.no_pfs = matches.get_flag("no-pfs");
    connection.require_pfs = matches.get_flag("require-pfs");
    connection.keepalive = !matches.get_flag("no-keepalive");
    connection.timeout = *matches.get_one::<Duration>("timeout").unwrap();

    let resolve_interval = if matches.get_flag("no-resolve") {
        None
    } else {
        Some(*matches.get_one::<Duration>("resolve-interval").unwrap())
    };
    Options {
        source: matches.get_one::<String>("source").unwrap().clone(),
        target: matches.get_one::<String>("target").unwrap().clone(),
        key: matches.get_one::<PathBuf>("key").unwrap().clone(),
        connection,
        max_connections: *matches.get_one::<u16>("max-connections").unwrap() as usize,
        resolve_interval,
        wait_for_dns: matches.get_flag("wait-for-dns"),
        oneshot: matches.get_flag("oneshot"),
    }
}

async fn run(options: Options) -> Result<(), Error> {
    // Load key
    let secret = Arc::new(SharedSecret::load(&options.key)?);

    // Resolve addresses
    let dns = Dns::spawn().map_err(Error::Resolver)?;
    let sources = resolve(&dns, &options.source, options.wait_for_dns).await?;
    if sources.len() > 1 {
        warn!(
            address = %options.source,
            count = sources.len(),
            "source resolves to multiple addresses; using the first"
        );
    }
    let targets = resolve(&dns, &options.target, options.wait_for_dns).await?;

    // Bind source
    let network = Network;
    let listener = network.bind(&sources[0]).await.map_err(Error::Bind)?;
    info!(
        source = %sources[0],
        ?targets,
        role = ?options.connection.role,
        "listening"
    );

    // Run dispatcher until it finishes
    let cfg = dispatcher::Config {
        connection: options.connection,
        target: options.target,
        max_connections: options.max_connections,
        resolve_interval: options.resolve_interval,
        oneshot: options.oneshot,
        mailbox_size: MAILBOX_SIZE,
    };
    let (actor, mailbox) = Actor::new(network, dns, listener, secret, targets, cfg);
    let signals = tokio::spawn(shutdown::forward(shutdown::signals()?, mailbox));
    let result = actor.run().await;
    signals.abort();
    result
}

fn main() -> ExitCode {
    // Parse arguments
    let matches = command().get_matches();
    let options = options(&matches);

    // Create logger
    let level = *matches.get_one::<Level>("log-level").unwrap();
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Start runtime
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(?err, "unable to start runtime");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(options)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "exiting");
            ExitCode::FAILURE
        }
    }
}
