//! Signal monitor

use std::io;

use log::info;

/// Create a monitor future for signals
///
/// It will exit when received `SIGTERM` or `SIGINT`.
#[cfg(unix)]
pub async fn create_signal_monitor() -> io::Result<()> {
    use futures::future::{self, Either, FutureExt};
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let signal_name = match future::select(sigterm.recv().boxed(), sigint.recv().boxed()).await {
        Either::Left(..) => "SIGTERM",
        Either::Right(..) => "SIGINT",
    };

    info!("received {}, exiting", signal_name);

    Ok(())
}

/// Create a monitor future for signals
///
/// It will exit when received Ctrl-C.
#[cfg(not(unix))]
pub async fn create_signal_monitor() -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received CTRL-C, exiting");
    Ok(())
}
