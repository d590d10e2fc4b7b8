// scpilib test application -- CLI tool for serving the demo instrument,
// querying any SCPI server over TCP, and evaluating command lines
// in-process.
//
// Usage:
//   scpilib-test-app serve --port 5025 --write-lock
//   scpilib-test-app serve --ipv6 --data-format double --max-clients 4
//   scpilib-test-app send --host 127.0.0.1:5025 "*IDN?" "SOUR:CURR:UPPE 42"
//   scpilib-test-app send --no-reply "*RST"
//   scpilib-test-app eval "CHAN02:MEAS?" "DATA SINGLE;WAVE? 8"
//   scpilib-test-app tree
//
// Logging is controlled with RUST_LOG (default `info`), for example
//   RUST_LOG=scpilib_transport=trace scpilib-test-app serve

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scpilib::{
    Branch, DEFAULT_PORT, DataFormat, Dispatcher, DispatcherConfig, Error, LogHook, Node,
    ScpiBuilder, ScpiClient, decode_values,
};
use scpilib_test_harness::demo_instrument;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "scpilib-test-app", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the demo instrument over TCP until interrupted.
    Serve {
        /// TCP port.
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Also listen on IPv6.
        #[arg(long)]
        ipv6: bool,

        /// Do not listen on IPv4.
        #[arg(long)]
        no_ipv4: bool,

        /// Maximum number of concurrent clients.
        #[arg(long, default_value_t = 10)]
        max_clients: usize,

        /// Enable the write lock (SYSTem:WLOCk).
        #[arg(long)]
        write_lock: bool,

        /// Default lock expiration in seconds (1-600).
        #[arg(long, default_value_t = 60)]
        lock_expiration: u64,

        /// Initial data format for array answers.
        #[arg(long, default_value = "ASCII")]
        data_format: DataFormat,

        /// Drop clients idle for this many seconds.
        #[arg(long)]
        read_timeout: Option<u64>,
    },

    /// Send command lines to a server and print the replies.
    Send {
        /// Server address (host:port).
        #[arg(long, default_value = "127.0.0.1:5025")]
        host: String,

        /// Reply timeout in milliseconds.
        #[arg(long, default_value_t = 2000)]
        timeout: u64,

        /// Send the lines without waiting for replies.
        #[arg(long)]
        no_reply: bool,

        /// Format used to decode binary block replies.
        #[arg(long)]
        format: Option<DataFormat>,

        /// Command lines, one per argument.
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Run command lines against an in-process demo instrument.
    Eval {
        /// Enable the write lock.
        #[arg(long)]
        write_lock: bool,

        /// Command lines, one per argument.
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Print the demo instrument's command tree.
    Tree,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Render a reply for the terminal. Binary blocks are decoded when the
/// format is known, otherwise summarized.
fn render_reply(reply: &[u8], format: Option<DataFormat>) -> String {
    let body = reply.strip_suffix(b"\r\n").unwrap_or(reply);
    if body.first() != Some(&b'#') {
        return String::from_utf8_lossy(body).into_owned();
    }
    match format {
        Some(format) if format != DataFormat::Ascii => match decode_values(body, format) {
            Ok(values) => {
                let shown: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("[{format}, {} values] {}", values.len(), shown.join(","))
            }
            Err(e) => format!("<undecodable block: {e}>"),
        },
        _ => format!("<binary block, {} bytes>", body.len()),
    }
}

fn print_tree(branch: &Branch, depth: usize) {
    for node in branch.children() {
        let indent = "  ".repeat(depth);
        match node {
            Node::Branch(child) => {
                let channels = child
                    .channel()
                    .map(|c| format!(" [channels {}..{}]", c.start(), c.end()))
                    .unwrap_or_default();
                println!("{indent}{}{channels}", child.path());
                print_tree(child, depth + 1);
            }
            Node::Leaf(leaf) => {
                let mut flags = Vec::new();
                if leaf.is_readable() {
                    flags.push("read");
                }
                if leaf.is_writable() {
                    flags.push("write");
                }
                if leaf.is_lock_exempt() {
                    flags.push("exempt");
                }
                let default = match branch.default_leaf() {
                    Some(d) if d.path() == leaf.path() => " (default)",
                    _ => "",
                };
                let allowed = leaf
                    .allowed_values()
                    .map(|v| format!(" {{{}}}", v.join("|")))
                    .unwrap_or_default();
                println!(
                    "{indent}{} <{}>{default}{allowed}",
                    leaf.path(),
                    flags.join(",")
                );
            }
        }
    }
}

fn demo_dispatcher(config: DispatcherConfig) -> Result<Dispatcher> {
    let demo = demo_instrument().context("failed to build demo instrument")?;
    Ok(Dispatcher::new(demo.root, demo.specials, config)?)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn cmd_serve(
    port: u16,
    ipv6: bool,
    no_ipv4: bool,
    max_clients: usize,
    write_lock: bool,
    lock_expiration: u64,
    data_format: DataFormat,
    read_timeout: Option<u64>,
) -> Result<()> {
    if no_ipv4 && !ipv6 {
        bail!("--no-ipv4 requires --ipv6");
    }

    let demo = demo_instrument().context("failed to build demo instrument")?;
    let mut builder = ScpiBuilder::from_parts(demo.root, demo.specials)
        .port(port)
        .ipv4(!no_ipv4)
        .ipv6(ipv6)
        .max_clients(max_clients)
        .write_lock(write_lock)
        .lock_expiration(Duration::from_secs(lock_expiration))
        .data_format(data_format)
        .hook(LogHook);
    if let Some(secs) = read_timeout {
        builder = builder.read_timeout(Duration::from_secs(secs));
    }

    let server = builder.serve().await.context("failed to start server")?;
    for addr in server.local_addrs() {
        println!("listening on {addr}");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for interrupt")?;
    info!("interrupt received, shutting down");
    server.close().await;
    Ok(())
}

async fn cmd_send(
    host: &str,
    timeout: u64,
    no_reply: bool,
    format: Option<DataFormat>,
    lines: &[String],
) -> Result<()> {
    let mut client = ScpiClient::connect(host)
        .await
        .with_context(|| format!("failed to connect to {host}"))?;
    client.set_reply_timeout(Duration::from_millis(timeout));

    for line in lines {
        if no_reply {
            client.send(line.as_bytes()).await?;
            println!("> {line}");
            continue;
        }
        match client.query(line.as_bytes()).await {
            Ok(reply) => println!("> {line}\n{}", render_reply(&reply, format)),
            Err(Error::Timeout) => println!("> {line}\n(no reply)"),
            Err(e) => return Err(e).with_context(|| format!("query failed: {line}")),
        }
    }

    client.close().await.ok();
    Ok(())
}

fn cmd_eval(write_lock: bool, lines: &[String]) -> Result<()> {
    let dispatcher = demo_dispatcher(DispatcherConfig {
        write_lock,
        ..DispatcherConfig::default()
    })?;

    for line in lines {
        let reply = dispatcher.input(line.as_bytes());
        if reply.is_empty() {
            println!("> {line}\n(no reply)");
        } else {
            println!(
                "> {line}\n{}",
                render_reply(&reply, Some(dispatcher.data_format()))
            );
        }
    }
    dispatcher.close();
    Ok(())
}

fn cmd_tree() -> Result<()> {
    let dispatcher = demo_dispatcher(DispatcherConfig::default())?;
    print_tree(dispatcher.root(), 0);
    let mut names: Vec<&str> = dispatcher.specials().names().collect();
    names.sort_unstable();
    for name in names {
        println!("*{name}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Serve {
            port,
            ipv6,
            no_ipv4,
            max_clients,
            write_lock,
            lock_expiration,
            data_format,
            read_timeout,
        } => {
            cmd_serve(
                *port,
                *ipv6,
                *no_ipv4,
                *max_clients,
                *write_lock,
                *lock_expiration,
                *data_format,
                *read_timeout,
            )
            .await
        }
        Command::Send {
            host,
            timeout,
            no_reply,
            format,
            lines,
        } => cmd_send(host, *timeout, *no_reply, *format, lines).await,
        Command::Eval { write_lock, lines } => cmd_eval(*write_lock, lines),
        Command::Tree => cmd_tree(),
    }
}
