use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::download::{Downloader, file_extension, remove_if_exists, verify_image};
use crate::engine::EngineCore;
use crate::events::{FetchCommand, ImageJob, ImageRecord};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Keeps the image cache topped up.
///
/// Sleeps until woken, then downloads as many images as the engine asks for,
/// one at a time. Failed downloads go back to the queue and the loop backs
/// off exponentially before the next attempt. Only cancellation or a queue
/// capacity violation ends the loop.
///
/// Cancellation also aborts a download in flight instead of letting it run
/// to completion: the partial file is removed and the job goes back to the
/// queue, so exit never waits out the download timeout.
pub(crate) async fn run<D>(
    core: Arc<EngineCore>,
    downloader: D,
    mut wake_rx: UnboundedReceiver<FetchCommand>,
    cancel: CancellationToken,
) -> Result<()>
where
    D: Downloader,
{
    let cache_dir = core.settings().cache_dir.clone();
    let mut delay = INITIAL_BACKOFF;

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            cmd = wake_rx.recv() => {
                if cmd.is_none() {
                    break;
                }
            }
        }
        // Coalesce wakes that piled up while downloading.
        while wake_rx.try_recv().is_ok() {}

        loop {
            let budget = core.fetch_budget();
            if budget == 0 {
                break;
            }
            for _ in 0..budget {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let job = core.take_job()?;
                let dest = cache_dir.join(format!("{}{}", job.hash, file_extension(&job.url)));
                debug!(url = %job.url, "downloading image");

                let outcome = select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    outcome = fetch_one(&downloader, &job, &dest) => Some(outcome),
                };
                let Some(outcome) = outcome else {
                    discard(&dest);
                    core.requeue(job)?;
                    return Ok(());
                };

                match outcome {
                    Ok(bytes) => {
                        delay = INITIAL_BACKOFF;
                        debug!(path = %dest.display(), bytes, "saved image");
                        core.admit(ImageRecord {
                            hash: job.hash,
                            path: dest,
                            url: job.url,
                        })?;
                    }
                    Err(err) => {
                        error!(url = %job.url, error = %err, "failed to download image");
                        discard(&dest);
                        core.requeue(job)?;
                        select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = sleep(delay) => {}
                        }
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
    }

    info!("fetch task stopped");
    Ok(())
}

async fn fetch_one<D: Downloader>(
    downloader: &D,
    job: &ImageJob,
    dest: &Path,
) -> crate::error::Result<u64> {
    let bytes = downloader.download(&job.url, dest).await?;
    verify_image(dest)?;
    Ok(bytes)
}

fn discard(path: &Path) {
    match remove_if_exists(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial download"),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to remove partial download")
        }
    }
}
