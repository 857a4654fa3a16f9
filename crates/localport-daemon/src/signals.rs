use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::types::ControlEvent;

/// Installs the daemon's signal streams and spawns the task that translates
/// them into control events. TERM and INT request shutdown, USR1 requests a
/// config reload. The handler does nothing else; reload and shutdown run on
/// the normal scheduler.
#[cfg(unix)]
pub fn spawn_signal_task(
    events: mpsc::Sender<ControlEvent>, cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{
        signal,
        SignalKind,
    };

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = term.recv() => ControlEvent::Shutdown,
                _ = int.recv() => ControlEvent::Shutdown,
                _ = usr1.recv() => ControlEvent::Reload,
            };

            debug!("Received signal, queueing {event:?}");
            if events.send(event).await.is_err() {
                break;
            }
        }
        debug!("Signal task finished");
    }))
}

/// Platforms without POSIX signals get only the in-process control API; the
/// task exists so shutdown still flows through the same channel.
#[cfg(not(unix))]
pub fn spawn_signal_task(
    _events: mpsc::Sender<ControlEvent>, cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        cancel.cancelled().await;
    }))
}
