use async_io::Timer;
use futures_lite::{future, FutureExt, StreamExt};
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};
use stopper::Stopper;
use trillium_session_store::{Result, SessionError, Store};

/**
The background expiry sweep.

Runs on a dedicated thread so it does not depend on whichever async
runtime is serving requests. Each tick calls
[`Store::delete_expired`], abandoning the attempt after
`sweep_timeout`. The loop exits between ticks once stopped; an
in-flight sweep is allowed to finish (or time out) first.
*/
pub(crate) struct ExpirySweep {
    stopper: Stopper,
    finished: async_channel::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl Debug for ExpirySweep {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirySweep")
            .field("stopped", &self.stopper.is_stopped())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl ExpirySweep {
    pub(crate) fn start(
        store: Arc<dyn Store>,
        interval: Duration,
        sweep_timeout: Duration,
    ) -> Result<Self> {
        let stopper = Stopper::new();
        let (finished_sender, finished) = async_channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name(String::from("session-expiry-sweep"))
            .spawn({
                let stopper = stopper.clone();
                move || {
                    future::block_on(run(store, stopper, interval, sweep_timeout));
                    drop(finished_sender);
                }
            })?;

        log::debug!("started session expiry sweep every {interval:?}");

        Ok(Self {
            stopper,
            finished,
            thread: Some(thread),
        })
    }

    /// whether the sweep loop has exited
    pub(crate) fn is_finished(&self) -> bool {
        self.finished.is_closed()
    }

    /// signals the loop to stop and waits for it to exit
    pub(crate) async fn stop(mut self) {
        self.stopper.stop();
        // the only sender is dropped when the loop exits
        self.finished.recv().await.ok();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("session expiry sweep panicked");
            }
        }
        log::debug!("stopped session expiry sweep");
    }
}

impl Drop for ExpirySweep {
    fn drop(&mut self) {
        self.stopper.stop();
    }
}

async fn run(store: Arc<dyn Store>, stopper: Stopper, interval: Duration, sweep_timeout: Duration) {
    let ticks = stopper.stop_stream(Timer::interval(interval));
    futures_lite::pin!(ticks);
    while ticks.next().await.is_some() {
        let timeout = async {
            Timer::after(sweep_timeout).await;
            Err(SessionError::Timeout(sweep_timeout))
        };

        match store.delete_expired().or(timeout).await {
            Ok(0) => log::trace!("expiry sweep found nothing to remove"),
            Ok(removed) => log::debug!("expiry sweep removed {removed} sessions"),
            Err(e) => log::warn!("expiry sweep failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use trillium_session_store::{MemoryStore, Session};

    #[test]
    fn sweeps_on_interval_and_stops() {
        future::block_on(async {
            let store = Arc::new(MemoryStore::new());
            let hour = Duration::from_secs(60 * 60);
            let expired = Session::new("expired", "csrf", hour)
                .with_created_at(SystemTime::now() - hour * 2);
            store.set(&expired).await.unwrap();
            store.set(&Session::new("live", "csrf", hour)).await.unwrap();

            let sweep = ExpirySweep::start(
                store.clone(),
                Duration::from_millis(10),
                Duration::from_secs(1),
            )
            .unwrap();

            for _ in 0..100 {
                if store.len().await == 1 {
                    break;
                }
                Timer::after(Duration::from_millis(10)).await;
            }

            assert_eq!(store.len().await, 1);
            assert!(store.get("live").await.is_ok());
            assert!(!sweep.is_finished());

            sweep.stop().await;
        });
    }

    #[test]
    fn stop_between_ticks_returns_promptly() {
        future::block_on(async {
            let sweep = ExpirySweep::start(
                Arc::new(MemoryStore::new()),
                Duration::from_secs(60 * 60),
                Duration::from_secs(1),
            )
            .unwrap();

            let started = std::time::Instant::now();
            sweep.stop().await;
            assert!(started.elapsed() < Duration::from_secs(5));
        });
    }
}
