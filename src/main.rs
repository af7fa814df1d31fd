use aprs_listener::{
    config::{
        Config,
        DEFAULT_CALLSIGN,
        DEFAULT_FILTER,
        DEFAULT_HOST,
        DEFAULT_PASSCODE,
        DEFAULT_PORT,
    },
    observer::{
        JsonLinesObserver,
        LogObserver,
        Observer,
    },
    session::{
        Client,
        TcpConnector,
    },
};
use clap::{
    Parser,
    ValueEnum,
};
use color_eyre::eyre::Error;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;

    // stdout is reserved for `--output json`
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let output = args.output;
    let config = args.into_config();
    config.validate()?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    shutdown.cancel();
                }
                Err(error) => tracing::error!(?error, "can't listen for ctrl-c"),
            }
        }
    });

    let observer: Box<dyn Observer + Send> = match output {
        Output::Log => Box::new(LogObserver),
        Output::Json => Box::new(JsonLinesObserver::new(std::io::stdout())),
    };

    let connector = TcpConnector::new(config.host.clone(), config.port);
    Client::new(connector, config, observer)
        .with_shutdown(shutdown)
        .run()
        .await;

    Ok(())
}

#[derive(Debug, Parser)]
#[clap(about = "Listens to APRS-IS and reports the positions of matching stations")]
struct Args {
    #[clap(long, env = "APRS_HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[clap(long, env = "APRS_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Callsign to log in with
    #[clap(long, env = "APRS_CALLSIGN", default_value = DEFAULT_CALLSIGN)]
    callsign: String,

    /// `-1` for receive-only
    #[clap(long, env = "APRS_PASSCODE", default_value_t = DEFAULT_PASSCODE, allow_negative_numbers = true)]
    passcode: i32,

    #[clap(long, env = "APRS_CLIENT_NAME", default_value = env!("CARGO_PKG_NAME"))]
    client_name: String,

    #[clap(long, env = "APRS_CLIENT_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    client_version: String,

    /// Server-side filter
    ///
    /// See https://www.aprs-is.net/javAPRSFilter.aspx
    #[clap(long, env = "APRS_FILTER", default_value = DEFAULT_FILTER)]
    filter: String,

    /// Only report stations whose callsign starts with one of these.
    #[clap(
        long = "region-prefix",
        env = "APRS_REGION_PREFIXES",
        value_delimiter = ',',
        default_values_t = ['M', 'G', '2']
    )]
    region_prefixes: Vec<char>,

    /// Reconnect if nothing is received for this long.
    #[clap(long, env = "APRS_READ_TIMEOUT", default_value = "10s")]
    read_timeout: humantime::Duration,

    /// Delay between connection attempts.
    #[clap(long, env = "APRS_BACKOFF", default_value = "10s")]
    backoff: humantime::Duration,

    #[clap(short, long, value_enum, default_value_t = Output::Log)]
    output: Output,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            host: self.host,
            port: self.port,
            callsign: self.callsign,
            passcode: self.passcode,
            client_name: self.client_name,
            client_version: self.client_version,
            filter: self.filter,
            region_prefixes: self.region_prefixes,
            read_timeout: self.read_timeout.into(),
            backoff: self.backoff.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    /// Log positions
    Log,
    /// Print positions as JSON lines to stdout
    Json,
}
