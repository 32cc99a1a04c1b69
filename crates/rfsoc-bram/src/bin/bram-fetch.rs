//! bram-fetch - read one BRAM region window from a running server.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::time::Duration;

use rfsoc_bram::logging::{init_logging, LogConfig, LogLevel};
use rfsoc_bram::{is_error_marker, BramClient, ClientConfig, Request, DEFAULT_PORT};

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Hex dump, 16 bytes per line
    Hex,
    /// Raw bytes to stdout
    Raw,
    /// Little-endian u32 words, one per line
    U32,
}

/// Fetch bytes from a BRAM server.
#[derive(Parser)]
#[command(name = "bram-fetch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Region name (e.g. synth0_0, acc_cnt)
    region: String,

    /// Byte offset into the region
    #[arg(default_value_t = 0)]
    offset: u64,

    /// Bytes to request
    #[arg(default_value_t = 4)]
    length: u64,

    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Exact response size; skips error marker detection
    #[arg(short, long)]
    expect: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "hex")]
    format: OutputFormat,

    /// Read timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig {
        level: LogLevel::from_verbosity(LogLevel::Warn, cli.verbose),
        ..Default::default()
    });

    let config = ClientConfig {
        read_timeout: Some(Duration::from_millis(cli.timeout_ms.max(1))),
        ..Default::default()
    };
    let mut client = BramClient::connect_with(&cli.host, cli.port, &config)?;
    tracing::debug!("Connected to {}", client.peer_addr()?);

    let request = Request::new(cli.region, cli.offset, cli.length);
    let result = match cli.expect {
        // Raw exchange: an error marker comes back as data
        Some(expected) => client.send_request(&request.to_string(), expected).map(|response| {
            if is_error_marker(&response) {
                tracing::warn!("Server answered '{}' with the error marker", request);
            }
            response
        }),
        None => {
            let length = usize::try_from(request.length).context("length does not fit in memory")?;
            client.fetch(&request.region, request.offset, length)
        }
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            if e.is_incomplete() {
                tracing::warn!(
                    "Reads past the end of a region are clamped; request at most the bytes left in it"
                );
            }
            return Err(anyhow::Error::new(e).context(format!("request '{}' failed", request)));
        }
    };

    let mut out = std::io::stdout().lock();
    match cli.format {
        OutputFormat::Raw => out.write_all(&response)?,
        OutputFormat::Hex => {
            for (line, chunk) in response.chunks(16).enumerate() {
                let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                let address = request.offset + line as u64 * 16;
                writeln!(out, "{:08x}  {}", address, hex.join(" "))?;
            }
        }
        OutputFormat::U32 => {
            for word in response.chunks_exact(4) {
                let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                writeln!(out, "{}", value)?;
            }
        }
    }
    out.flush()?;

    Ok(())
}
