//! Message framing for classifier backends.
//!
//! One JSON envelope per line:
//!
//! ```text
//! -> {"event":"predict","data":{"landmarks":[...],"target":"A"}}
//! -> {"event":"predict","data":{"sequence":[[...],[...]]}}
//! <- {"event":"prediction","data":{"success":true,"letter":"A","confidence":0.93,"stable":true}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ChannelResult;
use crate::encoder::FeatureVector;

pub const PREDICT_EVENT: &str = "predict";
pub const PREDICTION_EVENT: &str = "prediction";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Outbound classification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictRequest {
    Landmarks {
        landmarks: Vec<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Sequence {
        sequence: Vec<Vec<f32>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
}

impl PredictRequest {
    pub fn landmarks(features: FeatureVector, target: Option<String>) -> Self {
        Self::Landmarks {
            landmarks: features.into_inner(),
            target,
        }
    }

    pub fn sequence(frames: Vec<FeatureVector>, target: Option<String>) -> Self {
        Self::Sequence {
            sequence: frames.into_iter().map(FeatureVector::into_inner).collect(),
            target,
        }
    }

    /// Frames carried by this request.
    pub fn frame_count(&self) -> usize {
        match self {
            Self::Landmarks { .. } => 1,
            Self::Sequence { sequence, .. } => sequence.len(),
        }
    }

    pub fn to_line(&self) -> ChannelResult<String> {
        let envelope = Envelope {
            event: PREDICT_EVENT.to_string(),
            data: serde_json::to_value(self)?,
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Prediction payload as sent by the backends. Different backends name the
/// label field differently.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawPrediction {
    #[serde(default = "default_success")]
    success: bool,
    label: Option<String>,
    word: Option<String>,
    letter: Option<String>,
    sentence: Option<String>,
    confidence: Option<f64>,
    stable: Option<bool>,
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// A classifier result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEvent {
    pub label: String,
    /// Clamped into `[0,1]`.
    pub confidence: f32,
    /// `None` when the backend does not report stability.
    pub stable: Option<bool>,
    pub received_at: DateTime<Utc>,
}

impl PredictionEvent {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence: clamp_confidence(confidence as f64),
            stable: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_stable(mut self, stable: bool) -> Self {
        self.stable = Some(stable);
        self
    }
}

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Prediction(PredictionEvent),
    /// Backend reported `success: false` or sent no usable label.
    Failed(String),
    /// Any other event (handshake acknowledgements and the like).
    Other(String),
}

pub fn decode_line(line: &str) -> ChannelResult<Inbound> {
    let envelope: Envelope = serde_json::from_str(line.trim())?;
    if envelope.event != PREDICTION_EVENT {
        return Ok(Inbound::Other(envelope.event));
    }

    let raw: RawPrediction = serde_json::from_value(envelope.data)?;
    if !raw.success {
        return Ok(Inbound::Failed(
            raw.error.unwrap_or_else(|| "unspecified backend error".to_string()),
        ));
    }

    let label = [raw.label, raw.word, raw.letter, raw.sentence]
        .into_iter()
        .flatten()
        .map(|l| l.trim().to_string())
        .find(|l| !l.is_empty());

    Ok(match label {
        Some(label) => Inbound::Prediction(PredictionEvent {
            label,
            confidence: clamp_confidence(raw.confidence.unwrap_or(0.0)),
            stable: raw.stable,
            received_at: Utc::now(),
        }),
        None => Inbound::Failed("prediction without a label".to_string()),
    })
}

/// Encode a prediction the way a backend would. Used by test peers and replay tooling.
pub fn prediction_line(event: &PredictionEvent) -> ChannelResult<String> {
    let mut data = serde_json::json!({
        "success": true,
        "label": event.label,
        "confidence": event.confidence,
    });
    if let Some(stable) = event.stable {
        data["stable"] = Value::Bool(stable);
    }
    let envelope = Envelope {
        event: PREDICTION_EVENT.to_string(),
        data,
    };
    Ok(serde_json::to_string(&envelope)?)
}

fn clamp_confidence(value: f64) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_request_shapes() {
        let line = PredictRequest::landmarks(
            FeatureVector::from_vec(vec![0.5, 0.25]),
            Some("A".to_string()),
        )
        .to_line()
        .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "predict");
        assert_eq!(value["data"]["landmarks"][1], 0.25);
        assert_eq!(value["data"]["target"], "A");

        let line = PredictRequest::sequence(vec![FeatureVector::zeros(2); 3], None)
            .to_line()
            .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["data"]["sequence"].as_array().unwrap().len(), 3);
        assert!(value["data"].get("target").is_none());
    }

    #[test]
    fn test_decode_label_field_variants() {
        for field in ["label", "word", "letter", "sentence"] {
            let line = format!(
                r#"{{"event":"prediction","data":{{"success":true,"{field}":" Hello ","confidence":0.8}}}}"#
            );
            let Inbound::Prediction(event) = decode_line(&line).unwrap() else {
                panic!("expected prediction for {field}");
            };
            assert_eq!(event.label, "Hello");
            assert_eq!(event.stable, None);
        }
    }

    #[test]
    fn test_decode_clamps_confidence() {
        let line = r#"{"event":"prediction","data":{"label":"B","confidence":1.7,"stable":false}}"#;
        let Inbound::Prediction(event) = decode_line(line).unwrap() else {
            panic!("expected prediction");
        };
        assert_eq!(event.confidence, 1.0);
        assert_eq!(event.stable, Some(false));

        let line = r#"{"event":"prediction","data":{"label":"B","confidence":-3}}"#;
        let Inbound::Prediction(event) = decode_line(line).unwrap() else {
            panic!("expected prediction");
        };
        assert_eq!(event.confidence, 0.0);
    }

    #[test]
    fn test_decode_failures_and_other_events() {
        let failed = r#"{"event":"prediction","data":{"success":false,"error":"no hands"}}"#;
        assert_eq!(decode_line(failed).unwrap(), Inbound::Failed("no hands".to_string()));

        let ack = r#"{"event":"connection_response","data":{"status":"ok"}}"#;
        assert_eq!(
            decode_line(ack).unwrap(),
            Inbound::Other("connection_response".to_string())
        );

        assert!(decode_line("not json").is_err());
    }

    #[test]
    fn test_prediction_line_decodes_back() {
        let event = PredictionEvent::new("C", 0.9).with_stable(true);
        let Inbound::Prediction(decoded) = decode_line(&prediction_line(&event).unwrap()).unwrap()
        else {
            panic!("expected prediction");
        };
        assert_eq!(decoded.label, "C");
        assert_eq!(decoded.stable, Some(true));
    }
}
