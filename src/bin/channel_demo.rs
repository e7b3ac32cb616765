//! Buffered, unbuffered and closed queues, and the deadlocks they invite.
//!
//! Run with: cargo run --bin channel_demo [config.toml]

use colored::{ColoredString, Colorize};
use rendezvous_queue::scenarios::{self, Operate, Outcome, ReceiveOrder};
use rendezvous_queue::{ConfigError, DemoConfig, RendezvousQueue};
use std::env;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};

fn describe<T: Debug>(outcome: &Outcome<T>) -> ColoredString {
    match outcome {
        Outcome::Completed(value) => format!("completed with {:?}", value).green(),
        Outcome::Blocked => "blocked forever (probe expired)".red(),
    }
}

// =============================================================================
// Part 1: Reading from a buffered queue
// =============================================================================

fn read_chan(config: &DemoConfig) {
    match scenarios::read_chan(config.buffer_capacity) {
        Some(report) => {
            println!("The first value received from the queue is {}", report.first);
            println!("The second value received from the queue is {}", report.second);
            println!("cap = {}, len = {}", report.cap, report.len);
        }
        None => println!("{}", "capacity too small for the read-back demo".yellow()),
    }
}

fn print_in_chan(config: &DemoConfig) {
    for elem in scenarios::int_queue(config.preload).iter() {
        println!("The element in the queue: {}", elem);
    }
}

// =============================================================================
// Part 2: Deadlocks
// =============================================================================

fn deadlocks(config: &DemoConfig) {
    let probe = config.probe();

    println!("1. Unbuffered send, nobody receiving:");
    println!("   {}", describe(&scenarios::send_without_receiver(probe)));

    println!("1b. Same, but the send runs on its own thread:");
    match scenarios::handoff_with_sender(2) {
        Some(value) => println!("   {}", format!("received {}", value).green()),
        None => println!("   {}", "sender thread failed".red()),
    }

    println!("2. Helper sends twice, caller receives once:");
    let orphan = scenarios::orphaned_sender(probe);
    println!("   caller received {:?}", orphan.received);
    println!("   helper {}", describe(&orphan.helper));

    println!("3. Crossed handoff, matched receive order:");
    println!(
        "   {}",
        describe(&scenarios::crossed_handoff(ReceiveOrder::Matched, probe))
    );
    println!("3b. Crossed handoff, reversed receive order:");
    println!(
        "   {}",
        describe(&scenarios::crossed_handoff(ReceiveOrder::Reversed, probe))
    );

    println!("4. Two helpers waiting on each other:");
    println!("   {}", describe(&scenarios::mutual_tasks(probe)));

    println!("5. Draining a queue that is never closed:");
    let report = scenarios::drain_with_probe(vec![1, 2], false, probe);
    println!("   drained {:?}", report.drained);
    if report.terminated {
        println!("   {}", "loop ended".green());
    } else {
        println!("   {}", "loop still waiting for more".red());
    }
}

// =============================================================================
// Part 3: Many producers, shared elements
// =============================================================================

fn fan_in(config: &DemoConfig) {
    match scenarios::fan_in(config.producers, config.per_producer, config.buffer_capacity) {
        Some(values) => println!(
            "{} producers x {} values -> received {}",
            config.producers,
            config.per_producer,
            values.len()
        ),
        None => println!("{}", "a producer panicked".red()),
    }
}

fn shared_elements() {
    let queue = RendezvousQueue::new(1);

    let array = ["a", "b", "c"];
    let shared = Arc::new(Mutex::new(vec!["x", "y", "z"]));
    queue.send((array, Arc::clone(&shared)));

    // Change both after the send, before the receive.
    let mut local = array;
    local[1] = "x";
    if let Ok(mut items) = shared.lock() {
        items[1] = "i";
    }

    if let Some((received_array, received_shared)) = queue.recv() {
        println!("The local array: {:?}", local);
        println!("The received array: {:?}", received_array);
        if let Ok(items) = received_shared.lock() {
            println!("The received shared vector: {:?}", *items);
        }
    }
}

// =============================================================================
// Part 4: Function values
// =============================================================================

fn add(x: i32, y: i32) -> i32 {
    x + y
}

fn multiply(x: i32, y: i32) -> i32 {
    x * y
}

fn function_values() {
    match scenarios::calculate(1, 2, Some(add as Operate)) {
        Ok(res) => println!("res1: {}", res),
        Err(err) => println!("res1: {}", err.to_string().red()),
    }
    match scenarios::calculate(2, 3, Some(multiply as Operate)) {
        Ok(res) => println!("res2: {}", res),
        Err(err) => println!("res2: {}", err.to_string().red()),
    }

    let calculator = scenarios::gen_calculator(Some(add as Operate));
    match calculator(56, 78) {
        Ok(res) => println!("res3: {}", res),
        Err(err) => println!("res3: {}", err.to_string().red()),
    }

    let ops = vec![Some(add as Operate), None, Some(multiply as Operate)];
    match scenarios::queued_operations(6, 7, ops) {
        Some(results) => {
            for result in results {
                match result {
                    Ok(value) => println!("   queued op -> {}", value.to_string().green()),
                    Err(err) => println!("   queued op -> {}", err.to_string().red()),
                }
            }
        }
        None => println!("{}", "worker thread failed".red()),
    }
}

fn load_config() -> Result<DemoConfig, ConfigError> {
    let path = env::args().nth(1).map(PathBuf::from);
    DemoConfig::load_or_default(path.as_deref())
}

fn show_config(config: &DemoConfig) {
    match config.to_toml_string() {
        Ok(rendered) => println!("{}\n{}", "Effective config:".dimmed(), rendered),
        Err(err) => eprintln!("{}", err.to_string().yellow()),
    }
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.to_string().red());
            process::exit(1);
        }
    };
    show_config(&config);

    println!("{}", "=== Reading from a Buffered Queue ===\n".bold());
    read_chan(&config);

    println!("{}", "\n=== Ranging over a Closed Queue ===\n".bold());
    print_in_chan(&config);

    println!("{}", "\n=== Deadlocks ===\n".bold());
    deadlocks(&config);

    println!("{}", "\n=== Fan-in ===\n".bold());
    fan_in(&config);

    println!("{}", "\n=== Values vs Shared Handles ===\n".bold());
    shared_elements();

    println!("{}", "\n=== Function Values through a Queue ===\n".bold());
    function_values();

    println!("\n=== Key Points ===");
    println!("1. An unbuffered send needs a receiver at the same moment");
    println!("2. Close a queue you range over, or the loop never ends");
    println!("3. Buffered values survive close; recv yields None after them");
    println!("4. The queue moves values; shared handles still alias");
    println!("5. Function values travel through a queue like any other value");
}
