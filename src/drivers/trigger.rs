use std::io::Write;
use std::sync::mpsc::Sender;

use log::{info, warn};

use crate::drivers::message::TriggerMessage;
use crate::drivers::{SyncQueue, TriggeringError};
use crate::engine::{RunFlag, POLL_INTERVAL};
use crate::types::AnalysisResult;

/// Destination for analysis results leaving the box.
pub trait Publisher {
    fn publish(&mut self, result: &AnalysisResult) -> Result<(), TriggeringError>;
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn publish(&mut self, result: &AnalysisResult) -> Result<(), TriggeringError> {
        (**self).publish(result)
    }
}

/// Writes one [`TriggerMessage`] JSON object per line.
pub struct JsonLinePublisher<W: Write> {
    writer: W,
    box_id: u32,
}

impl<W: Write> JsonLinePublisher<W> {
    pub fn new(writer: W, box_id: u32) -> Self {
        Self { writer, box_id }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Publisher for JsonLinePublisher<W> {
    fn publish(&mut self, result: &AnalysisResult) -> Result<(), TriggeringError> {
        let message = TriggerMessage::from_result(self.box_id, result);
        let line = serde_json::to_string(&message).map_err(|e| TriggeringError::Publish(e.to_string()))?;
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| TriggeringError::Publish(e.to_string()))
    }
}

/// Hands results to an in-process consumer.
pub struct ChannelPublisher {
    sender: Sender<AnalysisResult>,
}

impl ChannelPublisher {
    pub fn new(sender: Sender<AnalysisResult>) -> Self {
        Self { sender }
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&mut self, result: &AnalysisResult) -> Result<(), TriggeringError> {
        self.sender
            .send(result.clone())
            .map_err(|_| TriggeringError::Publish("receiver hung up".into()))
    }
}

/// Only logs each result.
#[derive(Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&mut self, result: &AnalysisResult) -> Result<(), TriggeringError> {
        info!(
            "trigger: rms {:.2} V, f {:.3} Hz, thd {:.4}, transient {:.2} V, counter {}",
            result.rms, result.frequency, result.thd, result.transient, result.current_counter
        );
        Ok(())
    }
}

/// Final stage: forwards each analysis result to a [`Publisher`].
///
/// Delivery is fire-and-forget. A failed publish is logged and the stage
/// moves on to the next result.
pub struct TriggerStage<P: Publisher> {
    publisher: P,
    published: u64,
    failed: u64,
}

impl<P: Publisher> TriggerStage<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            published: 0,
            failed: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn publish(&mut self, result: &AnalysisResult) {
        match self.publisher.publish(result) {
            Ok(()) => self.published += 1,
            Err(err) => {
                self.failed += 1;
                warn!("Dropped trigger for counter {}: {err}", result.current_counter);
            }
        }
    }

    /// Publishes results until the input is closed and drained or the flag is cleared.
    pub fn run(
        &mut self,
        input: &SyncQueue<AnalysisResult>,
        flag: &RunFlag,
    ) -> Result<(), TriggeringError> {
        while flag.is_running() {
            match input.pop_timeout(POLL_INTERVAL) {
                Some(result) => self.publish(&result),
                None if input.is_closed() => break,
                None => {}
            }
        }
        info!(
            "Trigger stage published {} results, {} failed",
            self.published, self.failed
        );
        Ok(())
    }

    pub fn into_publisher(self) -> P {
        self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::message::from_millis;
    use crate::types::HISTOGRAM_BINS;
    use std::sync::mpsc;

    fn result(counter: u16) -> AnalysisResult {
        AnalysisResult {
            rms: 120.0,
            frequency: 60.0,
            thd: 0.01,
            transient: 0.0,
            start: from_millis(5_000),
            last_pulse_counter: 0,
            current_counter: counter,
            flags: 0,
            histogram: [0; HISTOGRAM_BINS],
        }
    }

    /// Fails every other publish.
    struct Flaky {
        calls: u32,
        delivered: Vec<u16>,
    }

    impl Publisher for Flaky {
        fn publish(&mut self, result: &AnalysisResult) -> Result<(), TriggeringError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(TriggeringError::Publish("link down".into()));
            }
            self.delivered.push(result.current_counter);
            Ok(())
        }
    }

    #[test]
    fn json_lines_carry_box_id() {
        let mut publisher = JsonLinePublisher::new(Vec::new(), 4);
        publisher.publish(&result(1)).unwrap();
        publisher.publish(&result(2)).unwrap();
        let text = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: TriggerMessage = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.box_id, 4);
        assert_eq!(second.current_count, 2);
        assert_eq!(second.time, 5_000);
    }

    #[test]
    fn stage_preserves_order_and_drains_on_close() {
        let (tx, rx) = mpsc::channel();
        let mut stage = TriggerStage::new(ChannelPublisher::new(tx));
        let input = SyncQueue::new();
        for counter in 0..5 {
            input.push(result(counter));
        }
        input.close();
        stage.run(&input, &RunFlag::new()).unwrap();
        let counters: Vec<u16> = rx.try_iter().map(|r| r.current_counter).collect();
        assert_eq!(counters, vec![0, 1, 2, 3, 4]);
        assert_eq!(stage.published(), 5);
    }

    #[test]
    fn failed_publish_does_not_stop_the_stage() {
        let mut stage = TriggerStage::new(Flaky {
            calls: 0,
            delivered: Vec::new(),
        });
        let input = SyncQueue::new();
        for counter in 0..4 {
            input.push(result(counter));
        }
        input.close();
        stage.run(&input, &RunFlag::new()).unwrap();
        assert_eq!((stage.published(), stage.failed()), (2, 2));
        assert_eq!(stage.into_publisher().delivered, vec![0, 2]);
    }

    #[test]
    fn hung_up_channel_is_a_publish_error() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut publisher = ChannelPublisher::new(tx);
        assert!(matches!(
            publisher.publish(&result(0)),
            Err(TriggeringError::Publish(_))
        ));
    }
}
