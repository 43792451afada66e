//! Periodic task that paints the store onto a [`Display`].
//!
//! Composing the text touches the store and stays on the scheduler thread.
//! Painting a [`blocking`](Display::blocking) backend moves the panel onto
//! tokio's blocking pool for the call and takes it back afterwards, the same
//! hand-off the sensor tasks use for their drivers.

use std::time::Duration;

use tracing::{debug, warn};

use super::format::SensorFormat;
use super::Display;
use crate::error::DisplayError;
use crate::runtime::Task;
use crate::store::{SharedStateStore, Snapshot};

pub struct DisplayRenderer {
    /// `None` only while a paint is in flight, or after its worker panicked
    display: Option<Box<dyn Display>>,
    store: SharedStateStore,
    /// configured sensors, in configuration order
    layout: Vec<(String, SensorFormat)>,
    interval: Duration,
}

impl DisplayRenderer {
    pub fn new(
        display: Box<dyn Display>,
        store: SharedStateStore,
        layout: Vec<(String, SensorFormat)>,
        interval: Duration,
    ) -> Self {
        Self {
            display: Some(display),
            store,
            layout,
            interval,
        }
    }

    /// Joins the rendered text of every configured sensor present in
    /// `snapshot`. Sensors that have not reported yet are left out, as are
    /// sensors whose template cannot be filled from their reading.
    pub fn compose(&self, snapshot: &Snapshot) -> String {
        let mut text = String::new();
        for (name, format) in &self.layout {
            let Some(reading) = snapshot.get(name) else {
                continue;
            };
            match format.render(reading) {
                Ok(part) => text.push_str(&part),
                Err(e) => warn!(sensor = %name, error = %e, "sensor left off the display"),
            }
        }
        text
    }

    /// One paint. Errors come from the display backend, or from the blocking
    /// worker if it panicked; the panel is gone for good in that case.
    pub async fn tick(&mut self) -> Result<(), DisplayError> {
        let snapshot = self.store.snapshot();
        debug!(?snapshot, "display tick");
        let text = self.compose(&snapshot);

        let mut display = self
            .display
            .take()
            .ok_or_else(|| DisplayError::Worker("panel lost by an earlier paint".into()))?;
        let (display, result) = if display.blocking() {
            tokio::task::spawn_blocking(move || {
                let result = display.show_text(&text);
                (display, result)
            })
            .await
            .map_err(|e| DisplayError::Worker(e.to_string()))?
        } else {
            let result = display.show_text(&text);
            (display, result)
        };
        self.display = Some(display);
        result
    }
}

impl Task for DisplayRenderer {
    fn name(&self) -> &str {
        "display"
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match self.tick().await {
                Ok(()) => {}
                Err(e @ DisplayError::Worker(_)) => return Err(e.into()),
                Err(e) => warn!(error = %e, "display update failed, skipping this tick"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
