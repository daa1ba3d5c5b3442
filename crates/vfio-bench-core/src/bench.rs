//! Copy bandwidth between a host buffer and a mapped window.
//!
//! Timing uses the monotonic [`Instant`] clock. Bandwidth is the nominal volume
//! (`iterations × block`) divided by the elapsed time; copied bytes are never checked.

use crate::control::DeviceControl;
use crate::error::Result;
use crate::mapping::Mapping;
use crate::util::{MIB, NamedProgress};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Direction of a copy benchmark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Window to host buffer
    DeviceToHost,
    /// Host buffer to window
    HostToDevice,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::DeviceToHost => write!(f, "Device to host"),
            Direction::HostToDevice => write!(f, "Host to device"),
        }
    }
}

/// Fills `buf` with `byte[i] = i mod 256`.
pub fn fill_pattern(buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b = i as u8;
    }
}

/// Bandwidth in MiB/s for `bytes` moved in `elapsed`.
///
/// Returns `f64::INFINITY` for a zero duration.
pub fn bandwidth_mib_s(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return f64::INFINITY;
    }
    bytes as f64 / MIB / secs
}

/// Result of one timed copy loop.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BenchResult {
    /// Copy direction
    pub direction: Direction,
    /// Bytes per iteration
    pub block_size: usize,
    /// Number of iterations
    pub iterations: usize,
    /// Wall-clock time of the whole loop
    pub elapsed: Duration,
    /// Fastest single iteration, if per-iteration latency was recorded
    pub min_latency: Option<Duration>,
    /// Slowest single iteration, if per-iteration latency was recorded
    pub max_latency: Option<Duration>,
}

impl BenchResult {
    /// Nominal volume moved.
    pub fn total_bytes(&self) -> usize {
        self.block_size * self.iterations
    }

    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1e3
    }

    /// Nominal bandwidth in MiB/s.
    pub fn bandwidth_mib_s(&self) -> f64 {
        bandwidth_mib_s(self.total_bytes(), self.elapsed)
    }
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} x {} B in {:.3} ms ({:.2} MiB/s)",
            self.direction,
            self.iterations,
            self.block_size,
            self.elapsed_ms(),
            self.bandwidth_mib_s()
        )?;
        if let (Some(min), Some(max)) = (self.min_latency, self.max_latency) {
            write!(f, " [latency min {:?}, max {:?}]", min, max)?;
        }
        Ok(())
    }
}

struct Timing {
    elapsed: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

fn time_loop(
    iterations: usize,
    per_iteration: bool,
    mut f: impl FnMut() -> Result<()>,
) -> Result<Timing> {
    let mut min: Option<Duration> = None;
    let mut max: Option<Duration> = None;
    let start = Instant::now();
    for _ in 0..iterations {
        if per_iteration {
            let t = Instant::now();
            f()?;
            let d = t.elapsed();
            min = Some(min.map_or(d, |m| m.min(d)));
            max = Some(max.map_or(d, |m| m.max(d)));
        } else {
            f()?;
        }
    }
    Ok(Timing {
        elapsed: start.elapsed(),
        min,
        max,
    })
}

fn run_device_to_host<C: DeviceControl>(
    window: &Mapping<'_, C>,
    block: usize,
    iterations: usize,
    per_iteration: bool,
) -> Result<BenchResult> {
    window.check_range(0, block)?;
    let mut buf = vec![0u8; block];
    debug!("Copying {} x {} B from window to host", iterations, block);
    let timing = time_loop(iterations, per_iteration, || {
        window.read_bytes(0, black_box(&mut buf))
    })?;
    black_box(&buf);
    Ok(BenchResult {
        direction: Direction::DeviceToHost,
        block_size: block,
        iterations,
        elapsed: timing.elapsed,
        min_latency: timing.min,
        max_latency: timing.max,
    })
}

fn run_host_to_device<C: DeviceControl>(
    window: &mut Mapping<'_, C>,
    block: usize,
    iterations: usize,
    per_iteration: bool,
) -> Result<BenchResult> {
    window.check_range(0, block)?;
    let mut buf = vec![0u8; block];
    fill_pattern(&mut buf);
    debug!("Copying {} x {} B from host to window", iterations, block);
    let timing = time_loop(iterations, per_iteration, || {
        window.write_bytes(0, black_box(&buf))
    })?;
    Ok(BenchResult {
        direction: Direction::HostToDevice,
        block_size: block,
        iterations,
        elapsed: timing.elapsed,
        min_latency: timing.min,
        max_latency: timing.max,
    })
}

/// Copies `block` bytes from window offset 0 into a host buffer, `iterations` times.
///
/// # Errors
///
/// Returns [`Error::OutOfBounds`](crate::Error::OutOfBounds) before timing starts if
/// `block` exceeds the window.
pub fn device_to_host<C: DeviceControl>(
    window: &Mapping<'_, C>,
    block: usize,
    iterations: usize,
) -> Result<BenchResult> {
    let result = run_device_to_host(window, block, iterations, false)?;
    info!("{}", result);
    Ok(result)
}

/// Copies a [`fill_pattern`] buffer of `block` bytes to window offset 0, `iterations` times.
///
/// # Errors
///
/// Returns [`Error::OutOfBounds`](crate::Error::OutOfBounds) before timing starts if
/// `block` exceeds the window.
pub fn host_to_device<C: DeviceControl>(
    window: &mut Mapping<'_, C>,
    block: usize,
    iterations: usize,
) -> Result<BenchResult> {
    let result = run_host_to_device(window, block, iterations, false)?;
    info!("{}", result);
    Ok(result)
}

/// Results of a block-size sweep.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SweepResult {
    /// One result per block size and direction, in measurement order
    pub results: Vec<BenchResult>,
}

impl SweepResult {
    /// The measurement with the highest bandwidth in a direction.
    pub fn best(&self, direction: Direction) -> Option<&BenchResult> {
        self.results
            .iter()
            .filter(|r| r.direction == direction)
            .max_by(|a, b| a.bandwidth_mib_s().total_cmp(&b.bandwidth_mib_s()))
    }
}

/// Iterations moving `total_bytes` in blocks of `block` bytes, at least one.
pub fn sweep_iterations(total_bytes: usize, block: usize) -> usize {
    (total_bytes / block.max(1)).max(1)
}

/// Runs both directions for every block size, each moving about `total_bytes`.
///
/// Per-iteration latency is recorded. With `write` unset only device-to-host copies run.
/// All block sizes are checked against the window before the first measurement.
///
/// # Errors
///
/// Returns [`Error::OutOfBounds`](crate::Error::OutOfBounds) if a block exceeds the window.
pub fn sweep<C: DeviceControl>(
    window: &mut Mapping<'_, C>,
    blocks: &[usize],
    total_bytes: usize,
    write: bool,
    progress: Option<&MultiProgress>,
) -> Result<SweepResult> {
    for &block in blocks {
        window.check_range(0, block)?;
    }
    let steps = blocks.len() as u64 * if write { 2 } else { 1 };
    let bar = match progress {
        Some(p) => p.add(ProgressBar::new(steps)),
        None => ProgressBar::hidden(),
    };
    bar.set_style(ProgressStyle::named_bar("Block size sweep"));
    let mut sweep = SweepResult::default();
    for &block in blocks {
        let iterations = sweep_iterations(total_bytes, block);
        bar.set_message(format!("{} B", block));
        let result = run_device_to_host(window, block, iterations, true)?;
        debug!("{}", result);
        sweep.results.push(result);
        bar.inc(1);
        if write {
            let result = run_host_to_device(window, block, iterations, true)?;
            debug!("{}", result);
            sweep.results.push(result);
            bar.inc(1);
        }
    }
    bar.finish_and_clear();
    for direction in [Direction::DeviceToHost, Direction::HostToDevice] {
        if let Some(best) = sweep.best(direction) {
            info!(
                "Best {} bandwidth: {:.2} MiB/s at {} B blocks",
                direction.to_string().to_lowercase(),
                best.bandwidth_mib_s(),
                best.block_size
            );
        }
    }
    Ok(sweep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_wraps_at_256() {
        let mut buf = vec![0xaa; 600];
        fill_pattern(&mut buf);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[255], 255);
        assert_eq!(buf[256], 0);
        assert_eq!(buf[257], 1);
        assert_eq!(buf[599], (599 % 256) as u8);
    }

    #[test]
    fn bandwidth_is_bytes_over_time() {
        assert_eq!(bandwidth_mib_s(1 << 20, Duration::from_secs(1)), 1.0);
        assert_eq!(bandwidth_mib_s(4096 * 1024, Duration::from_millis(500)), 8.0);
        assert_eq!(bandwidth_mib_s(3 << 20, Duration::from_secs(2)), 1.5);
        assert_eq!(bandwidth_mib_s(1, Duration::ZERO), f64::INFINITY);
    }

    #[test]
    fn result_accessors() {
        let result = BenchResult {
            direction: Direction::DeviceToHost,
            block_size: 4096,
            iterations: 256,
            elapsed: Duration::from_millis(250),
            min_latency: None,
            max_latency: None,
        };
        assert_eq!(result.total_bytes(), 1 << 20);
        assert_eq!(result.elapsed_ms(), 250.0);
        assert_eq!(result.bandwidth_mib_s(), 4.0);
        assert!(result.to_string().contains("4.00 MiB/s"));
    }

    #[test]
    fn sweep_iteration_counts() {
        assert_eq!(sweep_iterations(1 << 20, 4096), 256);
        assert_eq!(sweep_iterations(100, 4096), 1);
        assert_eq!(sweep_iterations(0, 64), 1);
    }

    #[test]
    fn best_picks_highest_bandwidth() {
        let mk = |direction, block_size, ms| BenchResult {
            direction,
            block_size,
            iterations: 1,
            elapsed: Duration::from_millis(ms),
            min_latency: None,
            max_latency: None,
        };
        let sweep = SweepResult {
            results: vec![
                mk(Direction::DeviceToHost, 64, 10),
                mk(Direction::DeviceToHost, 4096, 10),
                mk(Direction::HostToDevice, 4096, 20),
            ],
        };
        assert_eq!(sweep.best(Direction::DeviceToHost).unwrap().block_size, 4096);
        assert_eq!(sweep.best(Direction::HostToDevice).unwrap().block_size, 4096);
        assert!(SweepResult::default().best(Direction::HostToDevice).is_none());
    }
}
