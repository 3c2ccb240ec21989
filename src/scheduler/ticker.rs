use crossbeam_channel::{Sender, bounded, select, tick};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Background thread that calls back at a fixed interval
///
/// Dropping the ticker stops the thread and waits for it. The callback
/// returning `false` also ends it.
pub(crate) struct Ticker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub(crate) fn start(
        name: &str,
        interval: Duration,
        mut on_tick: impl FnMut() -> bool + Send + 'static,
    ) -> io::Result<Self> {
        let (stop, stopped) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let ticks = tick(interval);
                loop {
                    select! {
                        recv(ticks) -> _ => {
                            if !on_tick() {
                                break;
                            }
                        }
                        recv(stopped) -> _ => break,
                    }
                }
                debug!("ticker stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
