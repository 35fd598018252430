// src/drivers/mod.rs
pub mod acquisition;
pub mod analysis;
pub mod buffer;
pub mod error;
pub mod fft;
pub mod filter;
pub mod history;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod source;
pub mod trigger;
// Re-exports for callers outside the driver layer
pub use acquisition::Reader;
pub use analysis::{estimate_frequency, AnalysisState, LocalAnalysis, MeasurementArchive};
pub use buffer::TimeSeries;
pub use error::TriggeringError;
pub use fft::{harmonic_distortion, MeasurementSpectrum};
pub use filter::{FilterKind, FirFilter};
pub use history::{DataRequest, DataResponse, HistoryService};
pub use message::{DataMessage, TriggerMessage};
pub use metrics::{MetricStat, MetricsMessage, MetricsSummary, SummaryPublisher};
pub use pipeline::TriggeringPipeline;
pub use queue::{OverflowPolicy, SyncQueue};
pub use source::{CycleSource, DeviceSource, ManualSource, SimulatedSource};
pub use trigger::{ChannelPublisher, JsonLinePublisher, LogPublisher, Publisher, TriggerStage};
