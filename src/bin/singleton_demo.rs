// Singleton Pattern - contention run
// Releases many callers at once against one lazily-built instance and checks
// that exactly one construction happened.
//
// Configure with SINGLETON_DEMO_CONFIG=path/to/demo.toml, log with RUST_LOG.

use std::process::ExitCode;

use colored::*;
use lazy_singleton::demo::{self, DemoReport};
use lazy_singleton::{logging, DemoConfig};
use tracing::error;

fn print_report(report: &DemoReport) {
    println!("=== Singleton Contention Run ===");
    println!("  callers:            {}", report.callers);
    println!("  constructions:      {}", report.constructions);
    println!(
        "  attempts/failures:  {}/{}",
        report.stats.attempts, report.stats.failures
    );
    println!("  winning attempt:    {}", report.winning_attempt);
    println!("  distinct handles:   {}", report.distinct_handles);
    println!("  partial views:      {}", report.partial_views);
    println!("  instance id:        {}", report.instance_id);
    println!(
        "  read storm:         {} reads, {} mismatches",
        report.read_storm, report.storm_mismatches
    );
    println!("  elapsed:            {:?}", report.elapsed);
    println!();

    if report.is_singleton() {
        println!("{}", "Same instance for every caller".green().bold());
    } else {
        println!("{}", "Singleton guarantee violated".red().bold());
    }
}

fn main() -> ExitCode {
    let config = match DemoConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {}", "config error:".red().bold(), err);
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log_level);

    match demo::run(&config) {
        Ok(report) => {
            print_report(&report);
            if report.is_singleton() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            error!(error = %err, "demo run failed");
            ExitCode::FAILURE
        }
    }
}
