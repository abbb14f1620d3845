use log::debug;
use serde_json::{Map, Value};
use shared::{ClassificationResult, Probabilities};

use crate::classification::models::{ClassificationFailure, ClassificationOutcome};

pub const DEFAULT_PREDICTOR_ERROR: &str = "Unknown error";
pub const PROBABILITY_TOLERANCE: f64 = 1e-3;

/// Turns the predictor's stdout into a [`ClassificationOutcome`].
///
/// The default lenient mode fills missing numeric fields with `0.0` and a
/// missing label with `""`, so a zero confidence cannot be told apart from an
/// absent one. Strict mode rejects such payloads instead, along with
/// confidences outside `[0, 1]` and probabilities that do not add up to one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassificationResultCodec {
    strict: bool,
}

impl ClassificationResultCodec {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn strict() -> Self {
        Self::new(true)
    }

    pub fn decode(&self, raw: &str) -> ClassificationOutcome {
        match self.decode_result(raw) {
            Ok(result) => ClassificationOutcome::Success(result),
            Err(failure) => ClassificationOutcome::Failure(failure),
        }
    }

    fn decode_result(&self, raw: &str) -> Result<ClassificationResult, ClassificationFailure> {
        let root: Value = serde_json::from_str(raw.trim()).map_err(|e| {
            debug!("Predictor output is not JSON: {}", e);
            ClassificationFailure::MalformedResponse(e.to_string())
        })?;
        let root = root.as_object().ok_or_else(|| {
            ClassificationFailure::MalformedResponse("expected a JSON object".to_string())
        })?;

        if !root.get("success").and_then(Value::as_bool).unwrap_or(false) {
            let error = root
                .get("error")
                .and_then(Value::as_str)
                .filter(|e| !e.trim().is_empty())
                .unwrap_or(DEFAULT_PREDICTOR_ERROR);
            return Err(ClassificationFailure::PredictorReportedFailure(
                error.to_string(),
            ));
        }

        let result = root.get("result").and_then(Value::as_object);
        if result.is_none() && self.strict {
            return Err(ClassificationFailure::MalformedResponse(
                "missing object `result`".to_string(),
            ));
        }

        let prediction = self.label(result)?;
        let confidence = self.number(result, &["confidence"])?;
        let edible = self.number(result, &["probabilities", "edible"])?;
        let poisonous = self.number(result, &["probabilities", "poisonous"])?;

        if self.strict {
            check_unit_interval("confidence", confidence)?;
            check_unit_interval("probabilities.edible", edible)?;
            check_unit_interval("probabilities.poisonous", poisonous)?;
            let total = edible + poisonous;
            if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(ClassificationFailure::MalformedResponse(format!(
                    "probabilities sum to {} instead of 1",
                    total
                )));
            }
        }

        Ok(ClassificationResult {
            prediction,
            confidence,
            probabilities: Probabilities { edible, poisonous },
        })
    }

    fn label(&self, result: Option<&Map<String, Value>>) -> Result<String, ClassificationFailure> {
        let label = result.and_then(|r| r.get("prediction")).and_then(Value::as_str);
        match label {
            Some(label) if !self.strict || !label.trim().is_empty() => Ok(label.to_string()),
            _ if self.strict => Err(ClassificationFailure::MalformedResponse(
                "missing string field `result.prediction`".to_string(),
            )),
            _ => Ok(String::new()),
        }
    }

    fn number(
        &self,
        result: Option<&Map<String, Value>>,
        path: &[&str],
    ) -> Result<f64, ClassificationFailure> {
        let mut node = result;
        for key in &path[..path.len() - 1] {
            node = node.and_then(|n| n.get(*key)).and_then(Value::as_object);
        }
        let value = path.last().and_then(|key| node.and_then(|n| n.get(*key)));

        match value.and_then(Value::as_f64) {
            Some(n) => Ok(n),
            None if self.strict => Err(ClassificationFailure::MalformedResponse(format!(
                "missing numeric field `result.{}`",
                path.join(".")
            ))),
            None => Ok(0.0),
        }
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<(), ClassificationFailure> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ClassificationFailure::MalformedResponse(format!(
            "`result.{}` = {} is outside [0, 1]",
            field, value
        )))
    }
}
