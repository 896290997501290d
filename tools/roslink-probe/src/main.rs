// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! roslink-probe - Poke at a ROS1 graph from the command line
//!
//! Like `rostopic pub|echo` and `rosservice call` for plain string payloads.

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use colored::*;
use roslink::{
    Node, NodeConfig, PublisherSpec, ServiceCallerSpec, ServiceProviderSpec, SubscriberSpec,
    TypeInfo,
};
use std::cell::Cell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_NODE_NAME: &str = "/roslink_probe";
const STRING_TYPE: &str = "std_msgs/String";
const STRING_MD5: &str = "992ce8a1687cec8c8bd883ec73ca41d1";
const STRING_DEFINITION: &str = "string data\n";

/// Publish, echo, serve and call ROS1 topics and services
#[derive(Parser, Debug)]
#[command(name = "roslink-probe")]
#[command(version)]
#[command(about = "Poke at a ROS1 graph (like rostopic / rosservice)")]
struct Cli {
    #[command(flatten)]
    node: NodeArgs,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct NodeArgs {
    /// Node name (default /roslink_probe)
    #[arg(long, global = true)]
    name: Option<String>,

    /// Master URI (defaults to ROS_MASTER_URI)
    #[arg(long, global = true)]
    master: Option<String>,

    /// Host advertised to peers (defaults to ROS_HOSTNAME / ROS_IP)
    #[arg(long, global = true)]
    host: Option<String>,

    /// YAML node configuration, applied before the flags above
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a string message periodically
    Pub {
        topic: String,
        text: String,
        /// Publish rate in Hz
        #[arg(short, long, default_value = "1")]
        rate: f64,
        /// Stop after this many messages (0 = unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,
    },
    /// Print messages received on a topic
    Echo {
        topic: String,
        /// Message type (`*` accepts any)
        #[arg(short = 't', long, default_value = "*")]
        msg_type: String,
        /// Type md5sum (`*` accepts any)
        #[arg(long, default_value = "*")]
        md5: String,
        /// Stop after this many messages (0 = unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,
        /// Hex dump instead of string decoding
        #[arg(long)]
        raw: bool,
    },
    /// Serve a service that echoes every request back
    Serve {
        service: String,
        /// Service type
        #[arg(short = 't', long, default_value = "roslink_probe/Echo")]
        srv_type: String,
        #[arg(long, default_value = "*")]
        md5: String,
    },
    /// Call a service once with a string request
    Call {
        service: String,
        text: String,
        #[arg(short = 't', long, default_value = "*")]
        srv_type: String,
        #[arg(long, default_value = "*")]
        md5: String,
        /// Give up after this many milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if cli.no_color || !is_tty() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut node = Node::create(node_config(&cli.node)?)?;
    eprintln!(
        "{} {} at {} (master {})",
        ">>>".green().bold(),
        node.name().bold(),
        node.uri().cyan(),
        node.config().master_uri
    );

    let outcome = match cli.command {
        Command::Pub {
            topic,
            text,
            rate,
            count,
        } => run_pub(&mut node, &running, &topic, &text, rate, count),
        Command::Echo {
            topic,
            msg_type,
            md5,
            count,
            raw,
        } => {
            let info = TypeInfo::new(&msg_type, &md5, "");
            run_echo(&mut node, &running, &topic, info, count, raw)
        }
        Command::Serve {
            service,
            srv_type,
            md5,
        } => run_serve(&mut node, &running, &service, TypeInfo::new(&srv_type, &md5, "")),
        Command::Call {
            service,
            text,
            srv_type,
            md5,
            timeout_ms,
        } => run_call(
            &mut node,
            &running,
            &service,
            TypeInfo::new(&srv_type, &md5, ""),
            &text,
            timeout_ms,
        ),
    };

    node.shutdown()?;
    outcome
}

fn node_config(args: &NodeArgs) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load_yaml(path)?,
        None => NodeConfig::new(DEFAULT_NODE_NAME),
    };
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(master) = &args.master {
        config = config.with_master_uri(master);
    }
    if let Some(host) = &args.host {
        config = config.with_host(host);
    }
    Ok(config)
}

fn run_pub(
    node: &mut Node,
    running: &AtomicBool,
    topic: &str,
    text: &str,
    rate: f64,
    count: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let period = publish_period(rate)?;
    let info = TypeInfo::new(STRING_TYPE, STRING_MD5, STRING_DEFINITION);
    let id = node.register_publisher(PublisherSpec::new(topic, info))?;
    eprintln!("{} {} {:?} every {:?}", ">>>".green().bold(), "Publishing".bold(), text, period);

    let payload = encode_string(text);
    let mut sent = 0u64;
    let mut next = Instant::now();
    while running.load(Ordering::SeqCst) && !node.shutdown_requested() {
        if Instant::now() >= next {
            if count > 0 && sent >= count {
                break;
            }
            node.publish(id, payload.clone())?;
            sent += 1;
            next += period;
            log::debug!("published #{} to {} subscriber(s)", sent, node.subscriber_count(id));
        }
        let budget = next.saturating_duration_since(Instant::now()).as_millis() as u64;
        node.spin_once(budget.min(node.config().loop_timeout_ms))?;
    }
    eprintln!("\n{} Published {} message(s)", "---".dimmed(), sent);
    Ok(())
}

/// Interval between messages at `rate` Hz.
fn publish_period(rate: f64) -> Result<Duration, String> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(format!("rate must be a positive number, got {}", rate));
    }
    Duration::try_from_secs_f64(1.0 / rate).map_err(|_| format!("rate {} is too low", rate))
}

fn run_echo(
    node: &mut Node,
    running: &AtomicBool,
    topic: &str,
    info: TypeInfo,
    count: u64,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let seen = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&seen);
    let spec = SubscriberSpec::new(topic, info).with_callback(move |bytes: &[u8]| {
        let seq = counter.get() + 1;
        counter.set(seq);
        print_message(bytes, seq, raw);
        let _ = io::stdout().flush();
    });
    node.register_subscriber(spec)?;
    eprintln!("{} {} {}", ">>>".green().bold(), "Subscribing to".bold(), topic.cyan());
    eprintln!("{}", "Press Ctrl+C to stop".dimmed());

    let timeout = node.config().loop_timeout_ms;
    while running.load(Ordering::SeqCst) && !node.shutdown_requested() {
        if count > 0 && seen.get() >= count {
            break;
        }
        node.spin_once(timeout)?;
    }
    eprintln!("\n{} Received {} message(s)", "---".dimmed(), seen.get());
    Ok(())
}

fn run_serve(
    node: &mut Node,
    running: &AtomicBool,
    service: &str,
    info: TypeInfo,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = service.to_string();
    let spec = ServiceProviderSpec::new(service, info, move |request: &[u8]| {
        println!(
            "{} {} {} ({} bytes)",
            timestamp().dimmed(),
            "request".yellow(),
            name,
            request.len()
        );
        Ok(request.to_vec())
    });
    node.register_service_provider(spec)?;
    eprintln!(
        "{} {} {} at {}",
        ">>>".green().bold(),
        "Serving".bold(),
        service.cyan(),
        node.service_uri()
    );

    let timeout = node.config().loop_timeout_ms;
    while running.load(Ordering::SeqCst) && !node.shutdown_requested() {
        node.spin_once(timeout)?;
    }
    Ok(())
}

fn run_call(
    node: &mut Node,
    running: &AtomicBool,
    service: &str,
    info: TypeInfo,
    text: &str,
    timeout_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = node.register_service_caller(ServiceCallerSpec::new(service, info))?;
    node.call_service(id, encode_string(text))?;

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        node.spin_once(node.config().loop_timeout_ms.min(50))?;
        if let Some(result) = node.take_responses(id)?.into_iter().next() {
            return match result {
                Ok(bytes) => {
                    print_message(&bytes, 1, false);
                    Ok(())
                }
                Err(text) => Err(format!("service call failed: {}", text).into()),
            };
        }
    }
    Err(format!("no response from {} within {} ms", service, timeout_ms).into())
}

// ============================================================================
// Output
// ============================================================================

fn timestamp() -> String {
    format!("[{}]", Local::now().format("%H:%M:%S%.3f"))
}

fn print_message(bytes: &[u8], seq: u64, raw: bool) {
    println!(
        "{} {} ({} bytes)",
        timestamp().dimmed(),
        format!("#{}", seq).yellow(),
        bytes.len()
    );
    if raw {
        print_hex_dump(bytes);
        return;
    }
    match decode_string(bytes) {
        Some(text) => println!("  {}: {}", "data".cyan(), format!("{:?}", text).green()),
        None => print_hex_dump(bytes),
    }
}

/// ROS string: u32 length followed by the bytes, no terminator.
fn encode_string(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + text.len());
    bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
    bytes.extend_from_slice(text.as_bytes());
    bytes
}

fn decode_string(bytes: &[u8]) -> Option<&str> {
    let len = u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?) as usize;
    if bytes.len() != 4 + len {
        return None;
    }
    std::str::from_utf8(&bytes[4..]).ok()
}

fn print_hex_dump(data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        println!("  {:04x}  {:<48} |{}|", i * 16, hex.join(" "), ascii);
    }
}

fn is_tty() -> bool {
    #[cfg(unix)]
    unsafe {
        libc::isatty(libc::STDOUT_FILENO) != 0
    }
    #[cfg(not(unix))]
    true
}

// ============================================================================
// Tests
// ============================================================================
