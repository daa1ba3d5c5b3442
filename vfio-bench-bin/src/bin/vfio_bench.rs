use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::MultiProgress;
use log::{error, info, warn};
use vfio_bench_bin::cli::CliArgs;
use vfio_bench_bin::init_logging_with_progress;
use vfio_bench_core::Session;
use vfio_bench_ioctl::{Sysfs, VfioIoctl};

fn run(args: &CliArgs, progress: MultiProgress) -> Result<()> {
    let mut config = args.session_config()?;
    let sysfs = Sysfs::new(&args.sysfs, "/dev/vfio");
    match sysfs.bound_driver(&config.device) {
        Ok(Some(driver)) if driver == "vfio-pci" => {}
        Ok(Some(driver)) => warn!("{} is bound to {}, not vfio-pci", config.device, driver),
        Ok(None) => warn!("{} is not bound to any driver", config.device),
        Err(e) => warn!("Cannot read driver of {}: {}", config.device, e),
    }
    if config.group_path.is_none() {
        let group_path = sysfs
            .group_path(&config.device)
            .with_context(|| format!("no --group given for {}", config.device))?;
        info!("Using IOMMU group {:?}", group_path);
        config.group_path = Some(group_path);
    }

    let report = Session::new(VfioIoctl::new(), config)
        .progress(progress)
        .run()?;
    println!("{}", report);
    if let Some(output) = &args.output {
        report.save_to_file(output)?;
    }
    Ok(())
}

/// Exit with the code of the failing step, truncated to 8 bits.
///
/// Session errors are logged by the session itself.
fn exit_code(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<vfio_bench_core::Error>() {
        Some(e) => ExitCode::from(e.code() as u8),
        None => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let progress = match init_logging_with_progress(args.verbose) {
        Ok(progress) => progress,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match run(&args, progress) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_code(&e),
    }
}
