use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, warn};

use crate::drivers::source::CycleSource;
use crate::drivers::{SyncQueue, TriggeringError};
use crate::engine::RunFlag;
use crate::settings::{self, Settings, SubscriptionId};
use crate::types::Measurement;

/// Groups cycles from a [`CycleSource`] into measurements.
///
/// The batch size follows `frames_per_measurement`; a change takes effect at
/// the start of the next batch.
pub struct Reader<S: CycleSource> {
    source: S,
    settings: Arc<Settings>,
    frames: Arc<AtomicUsize>,
    subscription: SubscriptionId,
}

impl<S: CycleSource> Reader<S> {
    pub fn new(source: S, settings: Arc<Settings>) -> Result<Self, TriggeringError> {
        let frames = Arc::new(AtomicUsize::new(settings.frames_per_measurement()?));
        let watched = Arc::clone(&frames);
        let subscription = settings.subscribe(settings::FRAMES_PER_MEASUREMENT, move |value| {
            match settings::as_count(value) {
                Some(count) => {
                    debug!("Frames per measurement now {count}");
                    watched.store(count, Ordering::Relaxed);
                }
                None => warn!("Ignoring frames per measurement {value:?}"),
            }
        });
        Ok(Self {
            source,
            settings,
            frames,
            subscription,
        })
    }

    pub fn frames_per_measurement(&self) -> usize {
        self.frames.load(Ordering::Relaxed)
    }

    /// Reads one full measurement, stamping each cycle as it arrives.
    pub fn read_measurement(&mut self) -> Result<Measurement, TriggeringError> {
        let frames = self.frames_per_measurement();
        let mut measurement = Measurement::with_capacity(frames);
        for _ in 0..frames {
            let cycle = self.source.read_cycle()?;
            measurement.push(cycle, SystemTime::now());
        }
        Ok(measurement)
    }

    /// Produces measurements until the flag is cleared or the source fails.
    pub fn run(
        &mut self,
        output: &SyncQueue<Measurement>,
        flag: &RunFlag,
    ) -> Result<(), TriggeringError> {
        while flag.is_running() {
            let measurement = self.read_measurement()?;
            if output.push(measurement).is_some() {
                warn!("Analysis is falling behind; dropped the oldest measurement");
            }
        }
        Ok(())
    }
}

impl<S: CycleSource> Drop for Reader<S> {
    fn drop(&mut self) {
        self.settings
            .unsubscribe(settings::FRAMES_PER_MEASUREMENT, self.subscription);
    }
}
