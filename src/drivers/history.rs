use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::drivers::analysis::MeasurementArchive;
use crate::drivers::message::{from_millis, DataMessage};

/// Request for archived raw data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataRequest {
    Ping,
    /// Measurements starting in `[back, forward)`, both ms since epoch.
    Read { back: u64, forward: u64 },
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataResponse {
    Pong,
    Data { messages: Vec<DataMessage> },
    Error { reason: String },
}

/// Answers historical data requests from the measurement archive.
#[derive(Clone)]
pub struct HistoryService {
    box_id: u32,
    archive: Arc<MeasurementArchive>,
}

impl HistoryService {
    pub fn new(box_id: u32, archive: Arc<MeasurementArchive>) -> Self {
        Self { box_id, archive }
    }

    pub fn handle(&self, request: &DataRequest) -> DataResponse {
        match *request {
            DataRequest::Ping => DataResponse::Pong,
            DataRequest::Read { back, forward } if back > forward => DataResponse::Error {
                reason: format!("empty window: {back} is after {forward}"),
            },
            DataRequest::Read { back, forward } => {
                let messages: Vec<DataMessage> = self
                    .archive
                    .range(from_millis(back), from_millis(forward))
                    .iter()
                    .map(|m| DataMessage::from_measurement(self.box_id, m))
                    .collect();
                debug!("Serving {} measurements for [{back}, {forward})", messages.len());
                DataResponse::Data { messages }
            }
            DataRequest::Unsupported => DataResponse::Error {
                reason: "unsupported request".into(),
            },
        }
    }

    /// Line protocol: one JSON request in, one JSON response out.
    pub fn handle_json(&self, request: &str) -> String {
        let response = match serde_json::from_str::<DataRequest>(request) {
            Ok(request) => self.handle(&request),
            Err(err) => DataResponse::Error {
                reason: format!("malformed request: {err}"),
            },
        };
        serde_json::to_string(&response).unwrap_or_else(|err| error_line(&err.to_string()))
    }
}

fn error_line(reason: &str) -> String {
    json!({ "type": "error", "reason": reason }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cycle, Measurement, SAMPLES_PER_CYCLE};

    fn service() -> HistoryService {
        let archive = Arc::new(MeasurementArchive::with_capacity(10).unwrap());
        for i in 0..5u64 {
            let mut m = Measurement::default();
            m.push(Cycle::new([i as i16; SAMPLES_PER_CYCLE]), from_millis(1_000 * i));
            m.push(Cycle::new([i as i16; SAMPLES_PER_CYCLE]), from_millis(1_000 * i + 17));
            archive.insert(from_millis(1_000 * i), Arc::new(m)).unwrap();
        }
        HistoryService::new(9, archive)
    }

    #[test]
    fn ping_pong() {
        assert_eq!(service().handle(&DataRequest::Ping), DataResponse::Pong);
    }

    #[test]
    fn read_returns_half_open_window() {
        let response = service().handle(&DataRequest::Read {
            back: 1_000,
            forward: 3_000,
        });
        let DataResponse::Data { messages } = response else {
            panic!("expected data, got {response:?}");
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].box_id, 9);
        assert_eq!(messages[0].cycles[1].time, 1_017);
        assert_eq!(messages[1].cycles[0].data[0], 2);
    }

    #[test]
    fn inverted_window_is_an_error() {
        let response = service().handle(&DataRequest::Read {
            back: 3_000,
            forward: 1_000,
        });
        assert!(matches!(response, DataResponse::Error { .. }));
    }

    #[test]
    fn json_line_protocol() {
        let service = service();
        assert_eq!(service.handle_json(r#"{"type":"ping"}"#), r#"{"type":"pong"}"#);
        let unknown: DataResponse =
            serde_json::from_str(&service.handle_json(r#"{"type":"subscribe"}"#)).unwrap();
        assert_eq!(
            unknown,
            DataResponse::Error {
                reason: "unsupported request".into()
            }
        );
        let garbage: DataResponse = serde_json::from_str(&service.handle_json("{not json")).unwrap();
        assert!(matches!(garbage, DataResponse::Error { .. }));
        let read: DataResponse = serde_json::from_str(
            &service.handle_json(r#"{"type":"read","back":0,"forward":100000}"#),
        )
        .unwrap();
        assert!(matches!(read, DataResponse::Data { ref messages } if messages.len() == 5));
    }

    #[test]
    fn error_line_escapes_the_reason() {
        let reason = r#"bad "key" at C:\data"#;
        let parsed: DataResponse = serde_json::from_str(&error_line(reason)).unwrap();
        assert_eq!(
            parsed,
            DataResponse::Error {
                reason: reason.into()
            }
        );
    }
}
