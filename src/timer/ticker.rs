use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::utils::clock::Clock;

use super::{TimerEngine, TimerReading};

/// Drives live stopwatch displays. Emits the readings of every timer at a fixed interval and
/// finishes on its own once no timers are left.
pub struct TimerTicker {
    engine: Arc<Mutex<TimerEngine>>,
    next: mpsc::Sender<Vec<TimerReading>>,
    shutdown: CancellationToken,
    interval: Duration,
    time_provider: Arc<dyn Clock>,
    reload_every: u32,
}

impl TimerTicker {
    pub fn new(
        engine: Arc<Mutex<TimerEngine>>,
        next: mpsc::Sender<Vec<TimerReading>>,
        shutdown: CancellationToken,
        interval: Duration,
        time_provider: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            next,
            shutdown,
            interval,
            time_provider,
            reload_every: 0,
        }
    }

    /// Re-reads persisted timers every `ticks` ticks so timers stopped by another process
    /// disappear. 0 never reloads.
    pub fn with_reload_every(mut self, ticks: u32) -> Self {
        self.reload_every = ticks;
        self
    }

    /// Executes the refresh loop.
    pub async fn run(self) -> Result<()> {
        let mut tick_point = self.time_provider.instant();
        let mut ticks = 0u32;
        loop {
            tick_point += self.interval;

            let mut engine = self.engine.lock().await;
            if self.reload_every > 0 && ticks > 0 && ticks % self.reload_every == 0 {
                if let Err(e) = engine.reload().await {
                    warn!("Failed to reload timers, keeping the current ones: {e:?}");
                }
            }
            ticks = ticks.wrapping_add(1);
            let readings = engine.readings();
            drop(engine);
            if readings.is_empty() {
                debug!("No active timers left, stopping ticker");
                return Ok(());
            }

            trace!("Tick with {} timers", readings.len());
            if self.next.send(readings).await.is_err() {
                debug!("Display went away, stopping ticker");
                return Ok(());
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(tick_point) => ()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc, time::Duration};

    use anyhow::Result;
    use tempfile::tempdir;
    use tokio::sync::{mpsc, Mutex};
    use tokio_util::sync::CancellationToken;

    use crate::{
        store::prefs::Preferences,
        timer::TimerEngine,
        utils::{clock::test_clock::ManualClock, logging::TEST_LOGGING},
    };

    use super::TimerTicker;

    const TICK: Duration = Duration::from_millis(100);

    async fn engine_in(dir: &Path, clock: &ManualClock) -> Result<TimerEngine> {
        TimerEngine::restore(
            Preferences::new(dir.join("prefs.json")),
            Arc::new(clock.clone()),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_when_timers_are_gone() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = ManualClock::at(2024, 5, 1, 9);
        let mut engine = engine_in(dir.path(), &clock).await?;
        engine.start("Work").await?;
        let engine = Arc::new(Mutex::new(engine));

        let (sender, mut receiver) = mpsc::channel(4);
        let ticker = TimerTicker::new(
            engine.clone(),
            sender,
            CancellationToken::new(),
            TICK,
            Arc::new(clock.clone()),
        );

        let (ticked, display) = tokio::join!(ticker.run(), async {
            let mut frames = vec![];
            for _ in 0..3 {
                let frame = receiver.recv().await.unwrap();
                frames.push(frame[0].elapsed_ms);
                clock.advance_ms(100);
            }
            engine.lock().await.stop("Work").await.unwrap();
            // Drain whatever was sent before the stop was noticed.
            while receiver.recv().await.is_some() {}
            frames
        });

        ticked?;
        assert_eq!(display, vec![0, 100, 200]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_notices_timers_stopped_elsewhere() -> Result<()> {
        let dir = tempdir()?;
        let clock = ManualClock::at(2024, 5, 1, 9);
        let mut engine = engine_in(dir.path(), &clock).await?;
        engine.start("Work").await?;

        let (sender, mut receiver) = mpsc::channel(4);
        let ticker = TimerTicker::new(
            Arc::new(Mutex::new(engine)),
            sender,
            CancellationToken::new(),
            TICK,
            Arc::new(clock.clone()),
        )
        .with_reload_every(1);

        let (ticked, _) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(10), ticker.run()),
            async {
                receiver.recv().await.unwrap();
                let mut other = engine_in(dir.path(), &clock).await.unwrap();
                other.stop("Work").await.unwrap();
                while receiver.recv().await.is_some() {}
            }
        );

        // Without reloading the ticker would keep going until the timeout.
        ticked??;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_without_timers_returns_immediately() -> Result<()> {
        let dir = tempdir()?;
        let clock = ManualClock::at(2024, 5, 1, 9);
        let engine = engine_in(dir.path(), &clock).await?;
        let (sender, mut receiver) = mpsc::channel(4);

        TimerTicker::new(
            Arc::new(Mutex::new(engine)),
            sender,
            CancellationToken::new(),
            TICK,
            Arc::new(clock),
        )
        .run()
        .await?;

        assert!(receiver.recv().await.is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_honours_cancellation() -> Result<()> {
        let dir = tempdir()?;
        let clock = ManualClock::at(2024, 5, 1, 9);
        let mut engine = engine_in(dir.path(), &clock).await?;
        engine.start("Work").await?;

        let shutdown = CancellationToken::new();
        let (sender, mut receiver) = mpsc::channel(4);
        let ticker = TimerTicker::new(
            Arc::new(Mutex::new(engine)),
            sender,
            shutdown.clone(),
            TICK,
            Arc::new(clock),
        );

        let (ticked, _) = tokio::join!(ticker.run(), async {
            receiver.recv().await;
            shutdown.cancel();
        });
        ticked?;
        Ok(())
    }
}
