use std::collections::BTreeMap;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use kanin_core::{
    AckOptions, Channel, Delivery, EngineConfig, NackOptions, ProtocolIntent, SubscribeOptions,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kanin", about = "Consumer acknowledgment engine driver")]
struct Cli {
    /// Engine config file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish messages through a loopback channel and settle them
    Simulate {
        /// Queue name
        #[arg(long, default_value = "kanin.simulate")]
        queue: String,

        /// Number of competing consumers
        #[arg(long, default_value = "1")]
        consumers: usize,

        /// Number of messages to publish
        #[arg(long, default_value = "10")]
        messages: usize,

        /// Use manual acknowledgment instead of automatic
        #[arg(long)]
        manual: bool,

        /// Nack (with requeue) this many deliveries before acking any
        #[arg(long, default_value = "0")]
        nack_first: usize,

        /// Ack with `multiple` every N completed deliveries
        #[arg(long, default_value = "1")]
        batch: usize,

        /// Give up waiting for deliveries after this many milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a config file and print the effective settings
    CheckConfig,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    channel_id: u16,
    queue: String,
    ack_mode: &'static str,
    published: usize,
    completed: usize,
    redelivered: usize,
    acks_emitted: usize,
    nacks_emitted: usize,
    rejects_emitted: usize,
    abandoned: usize,
    per_consumer: BTreeMap<String, usize>,
    elapsed_ms: u128,
}

struct Completion {
    consumer_tag: String,
    redelivered: bool,
}

fn load_config(path: Option<&str>) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };
    match EngineConfig::load(path) {
        Ok(config) => {
            info!(path, "loaded config");
            config
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    config: &EngineConfig,
    queue: String,
    consumers: usize,
    messages: usize,
    manual: bool,
    nack_first: usize,
    batch: usize,
    timeout: Duration,
    json: bool,
) {
    let (intent_tx, intent_rx) = crossbeam_channel::unbounded::<ProtocolIntent>();
    let channel = Channel::open(1, config, Arc::new(intent_tx));
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<Completion>();
    let nacks_left = Arc::new(AtomicUsize::new(nack_first));
    let completed = Arc::new(AtomicUsize::new(0));
    let batch = batch.max(1);

    let options = if manual {
        SubscribeOptions::manual()
    } else {
        SubscribeOptions::automatic()
    };

    for _ in 0..consumers.max(1) {
        let channel_in_handler = channel.clone();
        let done_tx = done_tx.clone();
        let nacks_left = Arc::clone(&nacks_left);
        let completed = Arc::clone(&completed);
        let handler = move |d: Delivery| {
            if manual {
                let take_nack = nacks_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if take_nack {
                    match channel_in_handler.nack(d.delivery_tag, NackOptions::requeue()) {
                        Ok(_) => return,
                        // Already settled by another consumer's cumulative ack
                        Err(e) => warn!(delivery_tag = d.delivery_tag, error = %e, "nack failed"),
                    }
                }
                let n = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if n % batch == 0 {
                    let options = AckOptions {
                        multiple: batch > 1,
                    };
                    if let Err(e) = channel_in_handler.ack(d.delivery_tag, options) {
                        warn!(delivery_tag = d.delivery_tag, error = %e, "ack failed");
                    }
                }
            }
            let _ = done_tx.send(Completion {
                consumer_tag: d.consumer_tag,
                redelivered: d.redelivered,
            });
        };

        if let Err(e) = channel.subscribe(&queue, options.clone(), handler) {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
    drop(done_tx);

    let started = Instant::now();
    for i in 0..messages {
        if let Err(e) = channel.publish(&queue, format!("message-{i}").into_bytes()) {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }

    let mut summary = Summary {
        channel_id: channel.id(),
        queue,
        ack_mode: if manual { "manual" } else { "automatic" },
        published: messages,
        ..Summary::default()
    };
    let deadline = started + timeout;
    while summary.completed < messages {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done_rx.recv_timeout(remaining) {
            Ok(c) => {
                summary.completed += 1;
                if c.redelivered {
                    summary.redelivered += 1;
                }
                *summary.per_consumer.entry(c.consumer_tag).or_default() += 1;
            }
            Err(_) => {
                warn!(
                    completed = summary.completed,
                    expected = messages,
                    "timed out waiting for deliveries"
                );
                break;
            }
        }
    }

    // Settle the tail of an incomplete batch
    if manual && channel.pending_count() > 0 && summary.completed == messages {
        if let Err(e) = channel.ack(0, AckOptions::multiple()) {
            warn!(error = %e, "final ack failed");
        }
    }

    summary.abandoned = channel.close().len();
    summary.elapsed_ms = started.elapsed().as_millis();
    for intent in intent_rx.try_iter() {
        match intent {
            ProtocolIntent::Ack { .. } => summary.acks_emitted += 1,
            ProtocolIntent::Nack { .. } => summary.nacks_emitted += 1,
            ProtocolIntent::Reject { .. } => summary.rejects_emitted += 1,
        }
    }

    if json {
        match serde_json::to_string_pretty(&summary) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    } else {
        print_summary(&summary);
    }

    if summary.completed < messages {
        process::exit(2);
    }
}

fn print_summary(summary: &Summary) {
    println!("Channel {} on queue \"{}\"", summary.channel_id, summary.queue);
    println!("  Ack mode:     {}", summary.ack_mode);
    println!("  Published:    {}", summary.published);
    println!("  Completed:    {}", summary.completed);
    println!("  Redelivered:  {}", summary.redelivered);
    println!(
        "  Intents:      {} ack, {} nack, {} reject",
        summary.acks_emitted, summary.nacks_emitted, summary.rejects_emitted
    );
    println!("  Abandoned:    {}", summary.abandoned);
    println!("  Elapsed:      {} ms", summary.elapsed_ms);

    if !summary.per_consumer.is_empty() {
        println!();
        let tag_width = summary
            .per_consumer
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(8)
            .max(8);
        println!("  {:<tag_width$}  {:>9}", "CONSUMER", "COMPLETED");
        for (tag, count) in &summary.per_consumer {
            println!("  {:<tag_width$}  {:>9}", tag, count);
        }
    }
}

fn cmd_check_config(config: &EngineConfig) {
    println!("{:<28}  VALUE", "KEY");
    println!("{:<28}  {:?}", "channel.redelivery", config.channel.redelivery);
    println!(
        "{:<28}  {}",
        "channel.event_capacity", config.channel.event_capacity
    );
    println!(
        "{:<28}  {}",
        "dispatcher.thread_name_prefix", config.dispatcher.thread_name_prefix
    );
}

fn main() {
    kanin_core::telemetry::init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Simulate {
            queue,
            consumers,
            messages,
            manual,
            nack_first,
            batch,
            timeout_ms,
            json,
        } => cmd_simulate(
            &config,
            queue,
            consumers,
            messages,
            manual,
            nack_first,
            batch,
            Duration::from_millis(timeout_ms),
            json,
        ),
        Commands::CheckConfig => cmd_check_config(&config),
    }
}
