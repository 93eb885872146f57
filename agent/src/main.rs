//! covstream agent CLI
//!
//! Small driver around the streaming client: connects to a collector and
//! streams execution data from a synthetic in-memory runtime, records the
//! same data to an `.exec` file, or decodes a file for inspection.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use covstream_agent::{AgentOptions, CoverageSource, InMemoryRuntime, TcpClient};
use covstream_shared::protocol::{ExecutionDataReader, ExecutionDataWriter};
use covstream_shared::types::DEFAULT_CORRELATION_ID;
use covstream_shared::utils::parse_duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "covstream-agent")]
#[command(about = "Streams coverage execution data to a collector", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a collector and stream synthetic execution data
    Stream {
        /// Collector host name or IP
        #[arg(long, default_value = "localhost")]
        address: String,

        /// Collector TCP port
        #[arg(long, default_value = "6300")]
        port: u16,

        /// Additional connect attempts after the first failure (<= 0 retries forever)
        #[arg(long, default_value = "10")]
        retry_count: i32,

        /// Delay between connect attempts (e.g., "1s", "500")
        #[arg(long, default_value = "1s")]
        retry_delay: String,

        /// Heartbeat period (e.g., "30s", "5m")
        #[arg(long, default_value = "30s")]
        heartbeat_interval: String,

        /// Do not reconnect when the collector drops the connection
        #[arg(long)]
        no_keep_alive: bool,

        /// Explicit session id (default: host name)
        #[arg(long)]
        session_id: Option<String>,

        /// Interval between coverage dumps (e.g., "5s")
        #[arg(long, default_value = "5s")]
        dump_interval: String,

        /// Total run time (e.g., "30s", "5m", "1h")
        #[arg(short, long, default_value = "30s")]
        duration: String,
    },

    /// Record synthetic execution data into an .exec file
    Record {
        /// Output path for the execution data file
        #[arg(short, long, default_value = "covstream.exec")]
        output: PathBuf,
    },

    /// Decode an execution data file and print its frames as JSON
    Dump {
        /// Path to the .exec file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().map_err(|e| anyhow::anyhow!(e))?;

    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Stream {
            address,
            port,
            retry_count,
            retry_delay,
            heartbeat_interval,
            no_keep_alive,
            session_id,
            dump_interval,
            duration,
        } => {
            let options = AgentOptions {
                address,
                port,
                retry_count,
                retry_delay: parse_duration(&retry_delay).context("invalid retry delay")?,
                heartbeat_interval: parse_duration(&heartbeat_interval)
                    .context("invalid heartbeat interval")?,
                keep_alive: !no_keep_alive,
                session_id,
            };
            options.validate().context("invalid configuration")?;
            let dump_interval =
                parse_duration(&dump_interval).context("invalid dump interval")?;
            let duration = parse_duration(&duration).context("invalid duration")?;
            run_stream(options, dump_interval, duration).await
        }
        Command::Record { output } => run_record(&output),
        Command::Dump { file } => run_dump(&file),
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Build a runtime with a couple of instrumented classes and a
/// deterministic probe pattern per dump cycle.
fn demo_runtime(session_id: String) -> Arc<InMemoryRuntime> {
    let runtime = Arc::new(InMemoryRuntime::new(session_id));
    runtime.register_class(0x1001, "com/example/Service", 12);
    runtime.register_class(0x1002, "com/example/Repository", 8);
    runtime.register_class(0x1003, "com/example/Controller", 20);
    runtime
}

fn touch_probes(runtime: &InMemoryRuntime, cycle: u64) {
    for class_id in [0x1001i64, 0x1002, 0x1003] {
        runtime.record_probe(DEFAULT_CORRELATION_ID, class_id, (cycle % 8) as usize);
        runtime.record_probe(DEFAULT_CORRELATION_ID, class_id, ((cycle + 3) % 8) as usize);
    }
}

async fn run_stream(
    options: AgentOptions,
    dump_interval: Duration,
    duration: Duration,
) -> Result<()> {
    info!(
        "Streaming to {} for {}s (dump every {}s)",
        options.remote(),
        duration.as_secs(),
        dump_interval.as_secs()
    );

    let runtime = demo_runtime(options.session_id());
    let mut client = TcpClient::new(options, runtime.clone());
    client.startup().await.context("startup failed")?;

    let deadline = tokio::time::Instant::now() + duration;
    let mut cycle = 0u64;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::time::sleep(dump_interval) => {}
        }
        cycle += 1;
        touch_probes(&runtime, cycle);
        if let Err(e) = client
            .write_execution_data(DEFAULT_CORRELATION_ID, true)
            .await
        {
            tracing::warn!("dump {cycle} failed: {e}");
        } else {
            info!("dump {cycle} sent");
        }
    }

    client.shutdown().await.context("shutdown failed")?;
    info!("Streaming complete");
    Ok(())
}

fn run_record(output: &PathBuf) -> Result<()> {
    let runtime = demo_runtime("record".to_string());
    touch_probes(&runtime, 1);
    let (session, records) = runtime.collect(DEFAULT_CORRELATION_ID);

    let file = File::create(output)
        .with_context(|| format!("cannot create {}", output.display()))?;
    let mut writer = ExecutionDataWriter::new(BufWriter::new(file))?;
    writer.write_session_info(&session)?;
    let mut written = 0;
    for record in &records {
        if writer.write_execution_record(record)? {
            written += 1;
        }
    }
    writer.flush()?;

    info!("Wrote {} records to {}", written, output.display());
    Ok(())
}

fn run_dump(file: &PathBuf) -> Result<()> {
    let input = File::open(file).with_context(|| format!("cannot open {}", file.display()))?;
    let mut reader = ExecutionDataReader::new(BufReader::new(input))
        .context("not a valid execution data file")?;
    let frames = reader.read_all().context("decode failed")?;
    for frame in &frames {
        println!("{}", serde_json::to_string(frame)?);
    }
    Ok(())
}
