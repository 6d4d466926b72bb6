//! Parsing of `/predict` payloads into a bounded [`GenerationRequest`].
//!
//! Out-of-range sampling parameters are coerced to the nearest bound, never
//! rejected. Only values that cannot be read as numbers fail.

use std::num::IntErrorKind;

use serde_json::{Map, Value};

use crate::error::ServiceError;

pub const TEMPERATURE_MIN: f64 = 0.1;
pub const TEMPERATURE_MAX: f64 = 2.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

pub const TOP_K_MIN: i64 = 1;
pub const TOP_K_MAX: i64 = 100;
pub const DEFAULT_TOP_K: i64 = 50;

/// Saturates `value` into `[min, max]`.
///
/// A NaN input compares false against both bounds and comes back unchanged;
/// callers reject NaN before clamping.
pub fn clamp<T: PartialOrd>(value: T, min: T, max: T) -> T {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// A prompt plus sampling parameters, always within bounds. Only
/// [`GenerationRequest::from_payload`] and [`GenerationRequest::from_body`]
/// build one.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    temperature: f64,
    top_k: i64,
}

impl GenerationRequest {
    /// Parses a raw request body. Anything but a JSON object is rejected.
    pub fn from_body(body: &[u8]) -> Result<Self, ServiceError> {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(payload)) => Self::from_payload(&payload),
            _ => Err(ServiceError::invalid_parameter(
                "request body must be a JSON object",
            )),
        }
    }

    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, ServiceError> {
        let prompt = match payload.get("prompt") {
            None => "",
            Some(Value::String(s)) => s.trim(),
            Some(_) => return Err(ServiceError::invalid_parameter("prompt must be a string")),
        };

        let temperature = match payload.get("temp") {
            None => DEFAULT_TEMPERATURE,
            Some(value) => coerce_float(value).map_err(|cause| {
                ServiceError::invalid_parameter(format!("temp: {cause}"))
            })?,
        };
        let top_k = match payload.get("top_k") {
            None => DEFAULT_TOP_K,
            Some(value) => coerce_int(value).map_err(|cause| {
                ServiceError::invalid_parameter(format!("top_k: {cause}"))
            })?,
        };

        let temperature = clamp(temperature, TEMPERATURE_MIN, TEMPERATURE_MAX);
        let top_k = clamp(top_k, TOP_K_MIN, TOP_K_MAX);

        if prompt.is_empty() {
            return Err(ServiceError::Validation("Prompt is required".into()));
        }

        Ok(Self {
            prompt: prompt.to_string(),
            temperature,
            top_k,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn top_k(&self) -> i64 {
        self.top_k
    }
}

fn coerce_float(value: &Value) -> Result<f64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if !v.is_nan() => Ok(v),
        _ => Err(format!("could not convert {value} to float")),
    }
}

fn coerce_int(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX))
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| format!("could not convert {value} to int")),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(v) => Ok(v),
            Err(e) => match e.kind() {
                IntErrorKind::PosOverflow => Ok(i64::MAX),
                IntErrorKind::NegOverflow => Ok(i64::MIN),
                _ => Err(format!("invalid literal for int: {value}")),
            },
        },
        _ => Err(format!("could not convert {value} to int")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> Result<GenerationRequest, ServiceError> {
        match value {
            Value::Object(map) => GenerationRequest::from_payload(&map),
            other => panic!("test payload must be an object, got {other}"),
        }
    }

    fn validation_message(result: Result<GenerationRequest, ServiceError>) -> String {
        match result {
            Err(ServiceError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn clamp_saturates_at_bounds() {
        assert_eq!(clamp(0.05, 0.1, 2.0), 0.1);
        assert_eq!(clamp(3.0, 0.1, 2.0), 2.0);
        assert_eq!(clamp(0.7, 0.1, 2.0), 0.7);
        assert_eq!(clamp(0, 1, 100), 1);
        assert_eq!(clamp(500, 1, 100), 100);
    }

    #[test]
    fn clamp_is_bounded_and_idempotent() {
        let samples = [
            f64::NEG_INFINITY,
            -1e9,
            -1.0,
            0.0,
            0.1,
            0.55,
            1.999,
            2.0,
            7.5,
            f64::INFINITY,
        ];
        for x in samples {
            let once = clamp(x, TEMPERATURE_MIN, TEMPERATURE_MAX);
            assert!((TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&once), "{x}");
            assert_eq!(clamp(once, TEMPERATURE_MIN, TEMPERATURE_MAX), once);
        }
        for x in [i64::MIN, -3, 0, 1, 42, 100, 101, i64::MAX] {
            let once = clamp(x, TOP_K_MIN, TOP_K_MAX);
            assert!((TOP_K_MIN..=TOP_K_MAX).contains(&once), "{x}");
            assert_eq!(clamp(once, TOP_K_MIN, TOP_K_MAX), once);
        }
    }

    #[test]
    fn defaults_apply_when_parameters_are_omitted() {
        let request = parse(json!({ "prompt": "  Hello  " })).unwrap();
        assert_eq!(request.prompt(), "Hello");
        assert_eq!(request.temperature(), DEFAULT_TEMPERATURE);
        assert_eq!(request.top_k(), DEFAULT_TOP_K);
    }

    #[test]
    fn out_of_range_values_are_clamped_not_rejected() {
        let request = parse(json!({ "prompt": "hi", "temp": 9.0, "top_k": 0 })).unwrap();
        assert_eq!(request.temperature(), TEMPERATURE_MAX);
        assert_eq!(request.top_k(), TOP_K_MIN);

        let request = parse(json!({ "prompt": "hi", "temp": -1, "top_k": 1000 })).unwrap();
        assert_eq!(request.temperature(), TEMPERATURE_MIN);
        assert_eq!(request.top_k(), TOP_K_MAX);
    }

    #[test]
    fn numeric_strings_and_floats_are_coerced() {
        let request = parse(json!({ "prompt": "hi", "temp": " 1.25 ", "top_k": "20" })).unwrap();
        assert_eq!(request.temperature(), 1.25);
        assert_eq!(request.top_k(), 20);

        let request = parse(json!({ "prompt": "hi", "top_k": 12.9 })).unwrap();
        assert_eq!(request.top_k(), 12);
    }

    #[test]
    fn huge_integers_saturate_before_clamping() {
        let request = parse(json!({
            "prompt": "hi",
            "top_k": "99999999999999999999999",
        }))
        .unwrap();
        assert_eq!(request.top_k(), TOP_K_MAX);

        let request = parse(json!({ "prompt": "hi", "top_k": u64::MAX })).unwrap();
        assert_eq!(request.top_k(), TOP_K_MAX);
    }

    #[test]
    fn empty_or_missing_prompt_is_required() {
        for body in [json!({ "prompt": "" }), json!({ "prompt": " \n\t " }), json!({})] {
            assert_eq!(validation_message(parse(body)), "Prompt is required");
        }
    }

    #[test]
    fn non_numeric_parameters_fail() {
        let msg = validation_message(parse(json!({ "prompt": "hi", "temp": "abc" })));
        assert!(msg.starts_with("Invalid parameter:"), "{msg}");

        let msg = validation_message(parse(json!({ "prompt": "hi", "top_k": "4.5" })));
        assert!(msg.starts_with("Invalid parameter:"), "{msg}");

        let msg = validation_message(parse(json!({ "prompt": "hi", "temp": null })));
        assert!(msg.starts_with("Invalid parameter:"), "{msg}");

        let msg = validation_message(parse(json!({ "prompt": "hi", "temp": "NaN" })));
        assert!(msg.starts_with("Invalid parameter:"), "{msg}");
    }

    #[test]
    fn bad_parameter_is_reported_before_empty_prompt() {
        let msg = validation_message(parse(json!({ "prompt": "", "temp": "abc" })));
        assert!(msg.starts_with("Invalid parameter:"), "{msg}");
    }

    #[test]
    fn non_string_prompt_is_invalid() {
        let msg = validation_message(parse(json!({ "prompt": 12 })));
        assert_eq!(msg, "Invalid parameter: prompt must be a string");
    }

    #[test]
    fn body_must_be_a_json_object() {
        for body in [&b""[..], b"not json", b"[1, 2]", b"\"Hello\""] {
            let msg = validation_message(GenerationRequest::from_body(body));
            assert_eq!(
                msg, "Invalid parameter: request body must be a JSON object",
                "{body:?}"
            );
        }
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let request = GenerationRequest::from_body(
            br#"{"prompt": "Hello", "temp": 0.7, "top_k": 50, "_cacheBuster": 1712000000}"#,
        )
        .unwrap();
        assert_eq!(request.prompt(), "Hello");
    }
}
