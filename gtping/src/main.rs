use std::{
    process::ExitCode,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use clap::Parser;
use gtping::{
    ConsoleReporter, JsonReporter, MonotonicClock, Probe, Reporter,
    UdpTransport,
};
use nix::{
    libc,
    sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
};
use tracing::debug;

mod args;
mod logger;

static TIME_TO_DIE: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    TIME_TO_DIE.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() -> Result<()> {
    // No SA_RESTART: a pending poll returns EINTR and the loop sees the flag
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // Safety: the handler only stores to an atomic
        unsafe { sigaction(signal, &action)? };
    }
    Ok(())
}

fn run(opts: &args::Opts) -> Result<bool> {
    install_signal_handlers()?;

    let config = opts.probe_config();
    debug!(?config, "starting");
    let transport = UdpTransport::connect(&config)?;

    let mut reporter: Box<dyn Reporter> = if opts.json {
        Box::new(JsonReporter::stdout())
    } else {
        Box::new(ConsoleReporter::stdout())
    };

    let mut probe = Probe::new(config, transport, MonotonicClock::new());
    let report = probe.run(&TIME_TO_DIE, &mut *reporter)?;
    Ok(report.success())
}

fn main() -> ExitCode {
    // Usage errors exit with 2 from here
    let opts = args::Opts::parse();
    logger::init(opts.verbose);

    match run(&opts) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("gtping: {:#}", err);
            ExitCode::from(1)
        }
    }
}
