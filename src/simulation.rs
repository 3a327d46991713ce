//! Simulated workers that drive a [`Progress`] towards a target.
//!
//! Used by the demo binary, and handy in tests that want realistic, monotonically
//! increasing reports.

use std::{thread, time::Duration};

use tracing::debug;

use crate::{progress::Progress, value::ProgressValue};

/// Parameters of one simulated worker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationConfig<T> {
    /// Amount added on each report.
    pub step: T,
    /// Pause before each report.
    pub delay: Duration,
    /// Final value, always reported last.
    pub max: T,
}

/// Reports `step`, `2 * step`, ... on `progress` while the next value stays below
/// `max`, sleeping `delay` before each report, then reports `max`.
///
/// Stops stepping early if adding `step` no longer increases the value (a zero step
/// or saturation), so the worker always terminates. Blocks the calling thread.
pub fn simulate<T: ProgressValue>(progress: &Progress<T>, config: &SimulationConfig<T>) {
    let mut value = T::zero();
    let mut reports = 0usize;

    while let Some(next) = next_step(value, config) {
        thread::sleep(config.delay);
        value = next;
        progress.report(value);
        reports += 1;
    }

    thread::sleep(config.delay);
    progress.report(config.max);
    debug!(source = %progress.id(), reports = reports + 1, "simulation finished");
}

fn next_step<T: ProgressValue>(value: T, config: &SimulationConfig<T>) -> Option<T> {
    // Values never exceed `max`, so headroom is non-negative and the add cannot overflow.
    let headroom = config.max - value;
    if config.step <= T::zero() || config.step >= headroom {
        return None;
    }
    Some(value + config.step)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use parking_lot::Mutex;

    use super::{SimulationConfig, simulate};
    use crate::{CombinedProgress, progress::Progress};

    fn record(progress: &Progress<u8>) -> Arc<Mutex<Vec<u8>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_ref = seen.clone();
        progress.subscribe(move |_, v| seen_ref.lock().push(v));
        seen
    }

    /// Stepping
    /// Values increase by `step` and end exactly at `max`.
    #[test]
    fn test_steps_to_max() {
        let p = Progress::new("worker");
        let seen = record(&p);

        simulate(&p, &SimulationConfig {
            step: 3,
            delay: Duration::ZERO,
            max: 10,
        });

        assert_eq!(*seen.lock(), vec![3, 6, 9, 10]);
    }

    /// Saturation Safety
    /// A step that would overflow the value type stops the loop instead of wrapping.
    #[test]
    fn test_no_overflow() {
        let p = Progress::new("worker");
        let seen = record(&p);

        simulate(&p, &SimulationConfig {
            step: 200,
            delay: Duration::ZERO,
            max: u8::MAX,
        });

        assert_eq!(*seen.lock(), vec![200, 255]);
    }

    /// Zero Step
    /// A worker that cannot advance still finishes by reporting `max`.
    #[test]
    fn test_zero_step() {
        let p = Progress::new("worker");
        let seen = record(&p);

        simulate(&p, &SimulationConfig {
            step: 0,
            delay: Duration::ZERO,
            max: 5,
        });

        assert_eq!(*seen.lock(), vec![5]);
    }

    /// Parallel Workers
    /// Workers on separate threads drive the combined value to the common maximum.
    #[test]
    fn test_parallel_workers() {
        let combined = CombinedProgress::<u32>::new();
        let workers: Vec<_> = (1..=4u32)
            .map(|step| {
                let p = Progress::new(format!("worker_{step}"));
                combined.attach(&p).unwrap();
                std::thread::spawn(move || {
                    simulate(&p, &SimulationConfig {
                        step,
                        delay: Duration::from_millis(1),
                        max: 20,
                    });
                })
            })
            .collect();

        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(combined.snapshot().combined(), 20);
    }
}
