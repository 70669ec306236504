use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::TimerCommand;

/// Auto-advance loop.
///
/// The timer starts disarmed. While armed it fires `tick` once `interval` has
/// elapsed since the reference time, then restarts the interval from the
/// moment it fired. Cancellation stops it without firing.
pub async fn run<F>(
    interval: Duration,
    mut commands: UnboundedReceiver<TimerCommand>,
    cancel: CancellationToken,
    mut tick: F,
) -> Result<()>
where
    F: FnMut() + Send,
{
    let mut armed = false;
    let mut reference = Instant::now();

    loop {
        let deadline = reference + interval;
        select! {
            biased;

            _ = cancel.cancelled() => break,

            cmd = commands.recv() => match cmd {
                Some(TimerCommand::Resume(at)) => {
                    debug!("auto-advance armed");
                    armed = true;
                    reference = at;
                }
                Some(TimerCommand::Suspend) => {
                    debug!("auto-advance suspended");
                    armed = false;
                }
                Some(TimerCommand::Reset(at)) => {
                    reference = at;
                }
                None => break,
            },

            _ = sleep_until(deadline), if armed => {
                tick();
                reference = Instant::now();
            }
        }
    }

    info!("timer task stopped");
    Ok(())
}
