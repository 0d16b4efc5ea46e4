//! weft - acceptance harness for the weft runtime
//!
//! Two end-to-end scenarios as subcommands:
//!
//!   weft pipeline   # N producers feed one consumer over a buffered channel
//!   weft select     # a selector multiplexes two channels
//!
//! The pipeline prints the delivered sequence to stdout; with one producer
//! it is the classic squares pipeline (0 1 4 9 16 ...). The select scenario
//! runs a producer pushing 123 into one channel, a receiver draining 456s
//! from another, and a selector strand alternating between the two until
//! both sides close - the selector's deadlock error ends the loop, so the
//! scenario needs no sleep-based shutdown.
//!
//! `--timeout-ms` arms a hard abort so a wedged scenario cannot hang a test
//! run. Logging goes through RUST_LOG (tracing env-filter) to stderr.

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use weft_runtime::scheduler;
use weft_runtime::{Channel, SelectError, Selection, Selector};

#[derive(Parser)]
#[command(name = "weft")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Demo scenarios for the weft channel runtime", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Abort the process if the scenario runs longer than this
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Producers feed one consumer over a single channel
    Pipeline {
        /// Number of producer strands
        #[arg(long, default_value_t = 1)]
        producers: usize,
        /// Values each producer sends
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Channel capacity (0 = rendezvous)
        #[arg(long, default_value_t = 2)]
        capacity: usize,
    },
    /// A selector multiplexes receiving from one channel with sending into
    /// another
    Select {
        /// Values the producer sends (and the receiver expects)
        #[arg(long, default_value_t = 2)]
        count: usize,
        /// Capacity of both channels (0 = rendezvous)
        #[arg(long, default_value_t = 2)]
        capacity: usize,
    },
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    scheduler::init();
    if let Some(ms) = args.timeout_ms {
        arm_timeout(ms);
    }

    let outcome = match args.command {
        Command::Pipeline {
            producers,
            count,
            capacity,
        } => run_pipeline(producers, count, capacity).map(|delivered| {
            let rendered: Vec<String> = delivered.iter().map(|v| v.to_string()).collect();
            println!("{}", rendered.join(" "));
        }),
        Command::Select { count, capacity } => {
            run_select(count, capacity).map(|(taken, received)| {
                println!(
                    "selector took {} values, receiver got {}",
                    taken.len(),
                    received.len()
                );
            })
        }
    };

    if let Err(e) = outcome {
        eprintln!("weft: {e}");
        std::process::exit(1);
    }

    scheduler::wait_all_strands();
    weft_runtime::report::emit();
}

/// Hard abort on a plain thread - deliberately not a strand, so
/// `wait_all_strands` does not wait for it.
fn arm_timeout(ms: u64) {
    let _ = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(ms));
        eprintln!("weft: timeout after {ms} ms, aborting");
        std::process::exit(124);
    });
}

/// N producers send squares into one channel; the calling thread consumes
/// until the channel closes and returns the delivered sequence.
fn run_pipeline(producers: usize, count: usize, capacity: usize) -> std::io::Result<Vec<i64>> {
    let producers = producers.max(1);
    info!(producers, count, capacity, "pipeline scenario");

    let data = Channel::new(capacity);
    let done = Channel::new(producers);

    for p in 0..producers {
        let tx = data.clone();
        let done_tx = done.clone();
        scheduler::spawn(format!("producer-{p}"), move || {
            for i in 0..count {
                let n = (p * count + i) as i64;
                if tx.send(n * n).is_err() {
                    break;
                }
            }
            let _ = done_tx.send(());
        })?;
    }

    // The channel closes once, after every producer has signalled done.
    let closer_data = data.clone();
    let closer_done = done.clone();
    scheduler::spawn("closer", move || {
        for _ in 0..producers {
            let _ = closer_done.receive();
        }
        let _ = closer_data.close();
    })?;

    let mut delivered = Vec::new();
    while let Some(v) = data.receive() {
        delivered.push(v);
    }
    Ok(delivered)
}

/// The two-channel alternation scenario: a producer pushes 123 into
/// `prod_chan`, a receiver drains `rec_chan`, and a selector strand
/// multiplexes receiving from one with sending 456 into the other.
///
/// Returns (values the selector took from the producer, values the receiver
/// got from the selector).
fn run_select(count: usize, capacity: usize) -> std::io::Result<(Vec<i64>, Vec<i64>)> {
    info!(count, capacity, "select scenario");

    let prod_chan = Channel::new(capacity);
    let rec_chan = Channel::new(capacity);
    let taken_out = Channel::new(1);
    let received_out = Channel::new(1);

    let tx = prod_chan.clone();
    scheduler::spawn("producer", move || {
        for _ in 0..count {
            println!("pushed    -> 123");
            if tx.send(123).is_err() {
                break;
            }
        }
        let _ = tx.close();
    })?;

    let rx = rec_chan.clone();
    let out = received_out.clone();
    scheduler::spawn("receiver", move || {
        let mut got = Vec::new();
        for _ in 0..count {
            match rx.receive() {
                Some(v) => {
                    println!("received  -> {v}");
                    got.push(v);
                }
                None => break,
            }
        }
        let _ = rx.close();
        let _ = out.send(got);
    })?;

    let sel_prod = prod_chan.clone();
    let sel_rec = rec_chan.clone();
    let out = taken_out.clone();
    scheduler::spawn("selector", move || {
        let mut taken = Vec::new();
        let mut producer_open = true;
        loop {
            let mut slot = None;
            let mut sel = Selector::new();
            if producer_open {
                sel.recv(&sel_prod, &mut slot);
            }
            sel.send(&sel_rec, 456);
            match sel.wait() {
                Ok(Selection::Received(_)) => {
                    if let Some(v) = slot.take() {
                        println!("case recv <- {v}");
                        taken.push(v);
                    }
                }
                Ok(Selection::Sent(_)) => println!("case send -> 456"),
                Ok(Selection::Closed(_)) => producer_open = false,
                Ok(Selection::Default) => {}
                // Everything left is a send on a closed channel: both sides
                // are finished, so the alternation loop is too.
                Err(SelectError::Deadlock) => break,
            }
        }
        println!("done.");
        let _ = out.send(taken);
    })?;

    let taken = taken_out.receive().unwrap_or_default();
    let received = received_out.receive().unwrap_or_default();
    Ok((taken, received))
}
