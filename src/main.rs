use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use wsbench::bench::Benchmark;
use wsbench::config::{ClientCommand, Config, ServerType, Target};
use wsbench::connect::ConnectBenchmark;
use wsbench::error::Result;
use wsbench::pool::LocalClientPool;
use wsbench::progress::LogProgress;
use wsbench::recorder::{JsonResultRecorder, ResultRecorder, TextResultRecorder};

#[derive(Parser)]
#[command(
    name = "wsbench",
    version,
    about = "WebSocket load generation and latency measurement"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Measure message round-trip latency with echo probes
    Echo(BenchArgs),
    /// Measure message round-trip latency with broadcast probes
    Broadcast(BenchArgs),
    /// Measure connection-establishment latency
    Connect(BenchArgs),
}

#[derive(Args)]
struct BenchArgs {
    /// Target endpoint, e.g. ws://localhost:8080/ws
    url: String,

    /// Application protocol: json, binary, actioncable, actioncable-connect, phoenix
    #[arg(long, default_value = "json")]
    server_type: String,

    /// Origin header sent with the WebSocket handshake
    #[arg(long)]
    origin: Option<String>,

    /// Sec-WebSocket-Protocol header sent with the handshake
    #[arg(long)]
    server_protocol: Option<String>,

    /// Envelope encoding for channel-subscription protocols: json, msgpack, protobuf
    #[arg(long, default_value = "json")]
    encoding: String,

    /// Channel identifier for channel-subscription protocols
    #[arg(long, default_value = "BenchmarkChannel")]
    channel: String,

    /// Payload padding in bytes
    #[arg(long, default_value_t = 0)]
    padding_size: usize,

    /// Clients created before the first step (0 means step-size)
    #[arg(long, default_value_t = 0)]
    initial_clients: usize,

    /// Clients added per step (samples per step for connect)
    #[arg(long, default_value_t = 1000)]
    step_size: usize,

    /// Target number of in-flight probes
    #[arg(long, default_value_t = 50)]
    concurrent: usize,

    /// Parallelism of client creation
    #[arg(long, default_value_t = 100)]
    connect_concurrent: usize,

    /// Outcomes collected per step
    #[arg(long, default_value_t = 100)]
    sample_size: usize,

    /// Percentile checked against the RTT ceiling
    #[arg(long, default_value_t = 95)]
    limit_percentile: u8,

    /// RTT ceiling in milliseconds
    #[arg(long, default_value_t = 500)]
    limit_rtt: u64,

    /// Steps to run (0 means run until the RTT ceiling is exceeded)
    #[arg(long, default_value_t = 0)]
    total_steps: usize,

    /// Prompt between steps
    #[arg(long)]
    interactive: bool,

    /// Pause between steps, in milliseconds
    #[arg(long, default_value_t = 0)]
    step_delay: u64,

    /// Jitter pause before a probe, in milliseconds
    #[arg(long, default_value_t = 0)]
    command_delay: u64,

    /// Chance in percent that the jitter pause applies
    #[arg(long, default_value_t = 0)]
    command_delay_chance: u8,

    /// Seconds to wait for straggling broadcasts at end of run
    #[arg(long, default_value_t = 0)]
    wait_broadcasts: u64,

    /// Local source address to bind; repeat to multi-home over several
    #[arg(long)]
    local_addr: Vec<IpAddr>,

    /// Emit one JSON object instead of a line per step
    #[arg(long)]
    json: bool,

    /// Write results to a file instead of stdout
    #[arg(long)]
    output: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info");
    env_logger::init_from_env(env);

    let cli = Cli::parse();
    match cli.command {
        Command::Echo(args) => {
            let config = build_config(&args, ClientCommand::Echo, None)?;
            run_message_benchmark(config, &args).await
        }
        Command::Broadcast(args) => {
            let config = build_config(&args, ClientCommand::Broadcast, None)?;
            run_message_benchmark(config, &args).await
        }
        Command::Connect(args) => {
            // Connection-establishment timing only works through the
            // connect-only adapter, whatever the flag says.
            let config = build_config(
                &args,
                ClientCommand::Echo,
                Some(ServerType::ActionCableConnect),
            )?;
            let target = Arc::new(Target::new(&config)?);
            let pools = build_pools(&args);
            let recorder = build_recorder(&args)?;
            ConnectBenchmark::new(config, target, pools, recorder)
                .with_progress(Arc::new(LogProgress))
                .run()
                .await
        }
    }
}

async fn run_message_benchmark(config: Config, args: &BenchArgs) -> Result<()> {
    let target = Arc::new(Target::new(&config)?);
    let pools = build_pools(args);
    let recorder = build_recorder(args)?;
    Benchmark::new(config, target, pools, recorder)
        .with_progress(Arc::new(LogProgress))
        .run()
        .await
}

fn build_config(
    args: &BenchArgs,
    client_cmd: ClientCommand,
    force_server_type: Option<ServerType>,
) -> Result<Config> {
    let server_type = match force_server_type {
        Some(server_type) => server_type,
        None => args.server_type.parse()?,
    };

    Ok(Config {
        websocket_url: args.url.clone(),
        websocket_origin: args.origin.clone(),
        websocket_protocol: args.server_protocol.clone(),
        server_type,
        encoding: args.encoding.parse()?,
        channel: args.channel.clone(),
        client_cmd,
        payload_padding_size: args.padding_size,
        initial_clients: args.initial_clients,
        step_size: args.step_size,
        concurrent: args.concurrent,
        concurrent_connect: args.connect_concurrent,
        sample_size: args.sample_size,
        limit_percentile: args.limit_percentile.min(100),
        limit_rtt: Duration::from_millis(args.limit_rtt),
        total_steps: args.total_steps,
        interactive: args.interactive,
        step_delay: Duration::from_millis(args.step_delay),
        command_delay: Duration::from_millis(args.command_delay),
        command_delay_chance: args.command_delay_chance.min(100),
        wait_broadcasts: Duration::from_secs(args.wait_broadcasts),
    })
}

fn build_pools(args: &BenchArgs) -> Vec<Arc<LocalClientPool>> {
    if args.local_addr.is_empty() {
        vec![Arc::new(LocalClientPool::new(None))]
    } else {
        args.local_addr
            .iter()
            .map(|ip| Arc::new(LocalClientPool::new(Some(SocketAddr::new(*ip, 0)))))
            .collect()
    }
}

fn build_recorder(args: &BenchArgs) -> Result<Box<dyn ResultRecorder>> {
    let writer: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    if args.json {
        Ok(Box::new(JsonResultRecorder::new(writer)))
    } else {
        Ok(Box::new(TextResultRecorder::new(writer)))
    }
}
