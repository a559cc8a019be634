//==============================================================================
// Contention demo: many callers, one provider
//==============================================================================

use std::collections::HashSet;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DemoConfig;
use crate::error::{ConstructionFailure, DemoError};
use crate::provider::{LazyProvider, ProviderStats};
use crate::resource::{ResourceFactory, SharedResource};

/// DemoReport: what one contention run observed.
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub callers: usize,
    /// Successful factory runs. Anything other than 1 is a broken singleton.
    pub constructions: u32,
    pub stats: ProviderStats,
    /// Distinct addresses handed to the callers.
    pub distinct_handles: usize,
    /// Callers whose instance was not fully built when they received it.
    pub partial_views: usize,
    pub instance_id: Uuid,
    pub winning_attempt: u32,
    pub read_storm: usize,
    /// Fast-path reads that returned something other than the winner.
    pub storm_mismatches: usize,
    pub elapsed: Duration,
}

impl DemoReport {
    pub fn is_singleton(&self) -> bool {
        self.constructions == 1
            && self.distinct_handles == 1
            && self.partial_views == 0
            && self.storm_mismatches == 0
    }
}

/// Runs `config.callers` threads against one fresh provider, released
/// together through a barrier, then hammers the populated slot with
/// `config.read_storm` parallel reads.
pub fn run(config: &DemoConfig) -> Result<DemoReport, DemoError> {
    config.validate()?;

    let factory = ResourceFactory::new(config.construction_delay(), config.fail_first);
    let provider = LazyProvider::new(|| factory.build());
    let barrier = Barrier::new(config.callers);
    let started = Instant::now();

    info!(
        callers = config.callers,
        fail_first = config.fail_first,
        delay_ms = config.construction_delay_ms,
        "releasing callers"
    );

    let views = thread::scope(|s| {
        let handles: Vec<_> = (0..config.callers)
            .map(|caller| {
                let provider = &provider;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let resource = acquire(provider, config.max_attempts)?;
                    debug!(caller, id = %resource.id(), "caller got instance");
                    Ok::<_, DemoError>((address(resource), resource.is_complete()))
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| DemoError::WorkerPanicked).and_then(|r| r))
            .collect::<Result<Vec<(usize, bool)>, DemoError>>()
    })?;

    let winner = acquire(&provider, config.max_attempts)?;
    let expected = address(winner);

    let storm_mismatches = (0..config.read_storm)
        .into_par_iter()
        .filter(|_| !matches!(provider.get_instance(), Ok(r) if address(r) == expected))
        .count();

    let report = DemoReport {
        callers: config.callers,
        constructions: factory.constructed(),
        stats: provider.stats(),
        distinct_handles: views.iter().map(|&(a, _)| a).collect::<HashSet<_>>().len(),
        partial_views: views.iter().filter(|&&(_, complete)| !complete).count(),
        instance_id: winner.id(),
        winning_attempt: winner.attempt(),
        read_storm: config.read_storm,
        storm_mismatches,
        elapsed: started.elapsed(),
    };

    info!(
        constructions = report.constructions,
        distinct_handles = report.distinct_handles,
        "run finished"
    );
    Ok(report)
}

/// Calls `get_instance` until it succeeds or `max_attempts` calls failed.
fn acquire<F>(
    provider: &LazyProvider<SharedResource, F>,
    max_attempts: u32,
) -> Result<&SharedResource, DemoError>
where
    F: Fn() -> Result<SharedResource, ConstructionFailure>,
{
    let mut attempt = 1;
    loop {
        match provider.get_instance() {
            Ok(resource) => return Ok(resource),
            Err(err) if attempt < max_attempts => {
                debug!(attempt, error = %err, "retrying get_instance");
                attempt += 1;
            }
            Err(last) => {
                return Err(DemoError::Exhausted {
                    attempts: attempt,
                    last,
                })
            }
        }
    }
}

fn address(resource: &SharedResource) -> usize {
    resource as *const SharedResource as usize
}
