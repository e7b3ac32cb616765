//! Select over several queues: random choice, default, close and timeout.
//!
//! Run with: cargo run --bin select_demo [config.toml]

use colored::Colorize;
use rendezvous_queue::scenarios::{self, SelectPick};
use rendezvous_queue::{timer, ConfigError, DemoConfig, RendezvousQueue, Select};
use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

fn do_select(config: &DemoConfig) {
    match scenarios::select_random_index(config.select_candidates) {
        Some((index, pick)) => {
            println!("The index: {}", index);
            match pick {
                SelectPick::Candidate { index, element } => println!(
                    "Candidate case {} is selected, the element is {:?}.",
                    index, element
                ),
                SelectPick::Default => println!("No candidate case is selected!"),
            }
        }
        None => println!("{}", "no candidates configured".yellow()),
    }
}

fn do_select_with_cycle(config: &DemoConfig) {
    println!("Waiting up to {:?} for the queue to close...", config.close_after());
    match scenarios::close_during_select(config.close_after()) {
        None => println!("{}", "The candidate case is closed.".green()),
        Some(value) => println!("The candidate case is selected: {}", value),
    }
}

fn simulate_timeout(config: &DemoConfig) {
    // Nothing is ever sent here, only the timeout can end the loop.
    let queue: RendezvousQueue<i32> = RendezvousQueue::new(2);
    let timeout = timer::after(config.timeout());
    loop {
        let done = Select::new()
            .recv(&queue, |elem| {
                println!("Queue got value {:?}", elem);
                false
            })
            .recv(&timeout, |_| {
                println!("{}", "Timeout".yellow());
                true
            })
            .wait();
        if done {
            return;
        }
    }
}

fn timeout_with_feed(config: &DemoConfig) {
    let feed: Vec<i32> = (1..=config.preload as i32).collect();
    let seen = scenarios::timeout_loop(feed, Duration::from_millis(config.probe_ms));
    println!("Values seen before the timeout: {:?}", seen);
}

fn fairness(config: &DemoConfig) {
    let counts = scenarios::select_fairness(config.select_candidates, config.fairness_trials);
    for (index, count) in counts.iter().enumerate() {
        let share = *count as f64 * 100.0 / config.fairness_trials.max(1) as f64;
        println!("  case {}: {:>6} picks ({:.1}%)", index, count, share);
    }
    if counts.iter().all(|&count| count > 0) {
        println!("{}", "Every ready case was picked at least once".green());
    } else {
        println!("{}", "A ready case starved".red());
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

    println!("{}", "=== Select with Default ===\n".bold());
    do_select(&config);

    println!("{}", "\n=== Select on a Queue that Closes ===\n".bold());
    do_select_with_cycle(&config);

    println!("{}", "\n=== Simulated Timeout ===\n".bold());
    simulate_timeout(&config);

    println!("{}", "\n=== Timeout with a Producer ===\n".bold());
    timeout_with_feed(&config);

    println!("{}", "\n=== Fairness ===\n".bold());
    fairness(&config);

    println!("\n=== Key Points ===");
    println!("1. Ready cases are chosen at random, not in listed order");
    println!("2. default turns select into a non-blocking poll");
    println!("3. A closed queue makes its case ready with None");
    println!("4. A timer queue bounds an otherwise endless wait");
}
