use anyhow::{Context, Result};
use log::info;

use loghttpd::daemon::Daemonize;
use loghttpd::server::{create_listener, serve, set_signal_handlers, Supervisor};
use loghttpd::Config;

const COPYRIGHT: &str = "copyright (c) 2021 Tom Dryer";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!(
        "{}/{}, {}.",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        COPYRIGHT,
    );

    let config = Config::from_command_line()?;
    config.validate()?;

    let listener = create_listener(&config)?;

    let daemonize = config
        .want_daemon
        .then(|| Daemonize::start().context("failed to daemonize"))
        .transpose()?;

    set_signal_handlers()?;

    daemonize
        .map(|daemonize| daemonize.finish().context("failed to daemonize"))
        .transpose()?;

    let mut supervisor = Supervisor::new(config);
    serve(&listener, &mut supervisor)?;

    info!(
        "shutting down, waiting for {} connection(s)",
        supervisor.active()
    );
    supervisor.shutdown();
    Ok(())
}
