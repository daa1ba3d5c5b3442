//! The linear acquisition, benchmark and inspection sequence.

use crate::bench;
use crate::config::SessionConfig;
use crate::control::{DeviceControl, VFIO_API_VERSION};
use crate::error::{Error, Result};
use crate::handle::Container;
use crate::inspect::inspect;
use crate::report::SessionReport;
use indicatif::MultiProgress;
use log::{error, info};

/// One run against one device region.
///
/// # Examples
///
/// ```
/// use vfio_bench_core::{DeviceControl, Session, SessionConfig};
///
/// fn bench_group_16<C: DeviceControl>(ctl: C) -> vfio_bench_core::Result<()> {
///     let config = SessionConfig {
///         group_path: Some("/dev/vfio/16".into()),
///         ..Default::default()
///     };
///     let report = Session::new(ctl, config).run()?;
///     println!("{}", report);
///     Ok(())
/// }
/// ```
pub struct Session<C: DeviceControl> {
    ctl: C,
    config: SessionConfig,
    progress: Option<MultiProgress>,
}

impl<C: DeviceControl> Session<C> {
    /// Creates a session that drives `ctl` with `config`.
    pub fn new(ctl: C, config: SessionConfig) -> Self {
        Session {
            ctl,
            config,
            progress: None,
        }
    }

    /// Shows sweep progress on `progress`.
    pub fn progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs the whole sequence.
    ///
    /// Acquires container, group, device and mapping in that order, each step gated on
    /// the previous one, then benchmarks and inspects the window. Whatever was acquired is
    /// released in reverse order when this returns, on success and failure alike.
    ///
    /// # Errors
    ///
    /// The first failing step aborts the run. The error names the step and carries the
    /// code the process should exit with.
    pub fn run(self) -> Result<SessionReport> {
        let Session {
            ctl,
            config,
            progress,
        } = self;
        run(ctl, &config, progress.as_ref())
    }
}

/// Logs the failing step while everything acquired so far is still held.
fn failed(e: Error) -> Error {
    error!("{} failed: {} (code {})", e.step(), e, e.code());
    e
}

fn run<C: DeviceControl>(
    ctl: C,
    config: &SessionConfig,
    progress: Option<&MultiProgress>,
) -> Result<SessionReport> {
    config.validate().map_err(failed)?;
    let group_path = config
        .group_path
        .as_deref()
        .ok_or_else(|| failed(Error::InvalidConfig("no IOMMU group path configured".into())))?;

    let container = Container::open(ctl, &config.container_path).map_err(failed)?;
    container.check_api_version(VFIO_API_VERSION).map_err(failed)?;
    container.check_extension(config.iommu).map_err(failed)?;

    let group = container.open_group(group_path).map_err(failed)?;
    group.ensure_viable().map_err(failed)?;
    group.attach().map_err(failed)?;
    container.set_iommu(config.iommu).map_err(failed)?;

    let device = group.device(&config.device).map_err(failed)?;
    let device_info = device.info().map_err(failed)?;
    info!("{}", device_info);
    let region = device.region(config.region).map_err(failed)?;
    info!("{}", region);
    if !region.is_mappable() {
        return Err(failed(Error::RegionNotMappable {
            index: region.index,
            flags: region.flags,
        }));
    }

    let mut window = device.map(&region, config.map_len.bytes()).map_err(failed)?;
    let mut report = SessionReport::new(config.clone(), device_info, region, window.len());

    let write = config.write && region.is_writable();
    if config.write && !write {
        info!("Region {} is read-only, skipping writes", region.index);
    }

    let bench_config = &config.bench;
    if !bench_config.skip {
        report.benchmarks.push(bench::device_to_host(
            &window,
            bench_config.read_block.bytes(),
            bench_config.read_iterations,
        ).map_err(failed)?);
        if write {
            report.benchmarks.push(bench::host_to_device(
                &mut window,
                bench_config.write_block.bytes(),
                bench_config.write_iterations,
            ).map_err(failed)?);
        }
        if !bench_config.sweep_blocks.is_empty() {
            let blocks: Vec<usize> =
                bench_config.sweep_blocks.iter().map(|b| b.bytes()).collect();
            report.sweep = Some(bench::sweep(
                &mut window,
                &blocks,
                bench_config.sweep_bytes.bytes(),
                write,
                progress,
            ).map_err(failed)?);
        }
    }

    let pattern = config.write.then_some(config.pattern);
    for offset in &config.probe_offsets {
        report.inspections.push(inspect(
            &mut window,
            offset.bytes(),
            config.dump_len.bytes(),
            pattern,
        ).map_err(failed)?);
    }

    info!("Session on {} complete", config.device);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::VFIO_REGION_INFO_FLAG_READ;
    use crate::testing::FakeControl;
    use log::{LevelFilter, Log, Metadata, Record};
    use std::sync::{Mutex, Once};
    use std::thread::{self, ThreadId};

    static RECORDS: Mutex<Vec<(ThreadId, String)>> = Mutex::new(Vec::new());

    struct Capture;

    impl Log for Capture {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }
        fn log(&self, record: &Record) {
            RECORDS
                .lock()
                .unwrap()
                .push((thread::current().id(), record.args().to_string()));
        }
        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture;

    /// Messages logged by the calling thread.
    fn captured() -> Vec<String> {
        let me = thread::current().id();
        RECORDS
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == me)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    fn install_capture() {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            log::set_logger(&CAPTURE).unwrap();
            log::set_max_level(LevelFilter::Debug);
        });
    }

    #[test]
    fn failure_logged_before_release() {
        install_capture();
        let ctl = FakeControl::new();
        ctl.region_flags.set(VFIO_REGION_INFO_FLAG_READ);
        let config = SessionConfig {
            group_path: Some("/dev/vfio/1".into()),
            ..Default::default()
        };
        let err = Session::new(&ctl, config).run().unwrap_err();
        assert!(matches!(err, Error::RegionNotMappable { index: 0, .. }));

        let messages = captured();
        let position = |needle: &str| {
            messages
                .iter()
                .position(|m| m.contains(needle))
                .unwrap_or_else(|| panic!("no log line containing {needle:?} in {messages:?}"))
        };
        let failure = position("failed: Region 0 is not mappable");
        assert!(failure < position("Closing device"));
        assert!(failure < position("Closing group"));
        assert!(failure < position("Closing container"));
        assert_eq!(ctl.closed.borrow().len(), 3);
    }
}
