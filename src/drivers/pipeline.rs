use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::drivers::acquisition::Reader;
use crate::drivers::analysis::{LocalAnalysis, MeasurementArchive};
use crate::drivers::history::HistoryService;
use crate::drivers::source::CycleSource;
use crate::drivers::trigger::{Publisher, TriggerStage};
use crate::drivers::{OverflowPolicy, SyncQueue, TriggeringError};
use crate::engine::{Fault, FaultSignal, Worker};
use crate::settings::Settings;
use crate::types::{AnalysisResult, Measurement};

/// Acquisition, analysis and trigger stages wired together by two queues.
///
/// Each stage runs on its own [`Worker`]. The first stage to fail raises the
/// shared [`FaultSignal`]; the owner decides when to [`stop`](Self::stop).
pub struct TriggeringPipeline {
    box_id: u32,
    measurements: Arc<SyncQueue<Measurement>>,
    results: Arc<SyncQueue<AnalysisResult>>,
    archive: Arc<MeasurementArchive>,
    faults: FaultSignal,
    acquisition: Option<Worker>,
    analysis: Option<Worker>,
    trigger: Option<Worker>,
}

impl TriggeringPipeline {
    pub fn start<S, P>(
        settings: Arc<Settings>,
        source: S,
        publisher: P,
    ) -> Result<Self, TriggeringError>
    where
        S: CycleSource + Send + 'static,
        P: Publisher + Send + 'static,
    {
        let box_id = settings.box_id()?;
        let depth = settings.queue_depth()?;
        let measurements = Arc::new(SyncQueue::bounded(depth, OverflowPolicy::DropOldest));
        let results = Arc::new(SyncQueue::bounded(depth, OverflowPolicy::DropOldest));
        let archive = Arc::new(MeasurementArchive::with_capacity(settings.storage_windows()?)?);
        let faults = FaultSignal::new();

        let mut reader = Reader::new(source, Arc::clone(&settings))?;
        let mut local_analysis = LocalAnalysis::new(Arc::clone(&settings), Arc::clone(&archive))?;
        let mut trigger_stage = TriggerStage::new(publisher);

        let trigger_input = Arc::clone(&results);
        let trigger = Worker::start("trigger", faults.clone(), move |flag| {
            trigger_stage.run(&trigger_input, &flag)
        })?;
        let analysis_input = Arc::clone(&measurements);
        let analysis_output = Arc::clone(&results);
        let analysis = Worker::start("analysis", faults.clone(), move |flag| {
            local_analysis.run(&analysis_input, &analysis_output, &flag)
        })?;
        let acquisition_output = Arc::clone(&measurements);
        let acquisition = Worker::start("acquisition", faults.clone(), move |flag| {
            reader.run(&acquisition_output, &flag)
        })?;
        info!("Triggering pipeline started for box {box_id}, queue depth {depth}");

        Ok(Self {
            box_id,
            measurements,
            results,
            archive,
            faults,
            acquisition: Some(acquisition),
            analysis: Some(analysis),
            trigger: Some(trigger),
        })
    }

    /// Archive of raw measurements analysed so far.
    pub fn time_series(&self) -> &Arc<MeasurementArchive> {
        &self.archive
    }

    pub fn history(&self) -> HistoryService {
        HistoryService::new(self.box_id, Arc::clone(&self.archive))
    }

    pub fn fault(&self) -> Option<Fault> {
        self.faults.fault()
    }

    pub fn wait_for_fault(&self, timeout: Duration) -> Option<Fault> {
        self.faults.wait_timeout(timeout)
    }

    /// Stops acquisition, then lets analysis and triggering drain what is queued.
    pub fn stop(&mut self) {
        if let Some(mut acquisition) = self.acquisition.take() {
            acquisition.stop();
        }
        self.measurements.close();
        if let Some(mut analysis) = self.analysis.take() {
            analysis.join();
        }
        self.results.close();
        if let Some(mut trigger) = self.trigger.take() {
            trigger.join();
            info!(
                "Triggering pipeline stopped; {} measurements and {} results dropped on overflow",
                self.measurements.dropped(),
                self.results.dropped()
            );
        }
    }
}

impl Drop for TriggeringPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
