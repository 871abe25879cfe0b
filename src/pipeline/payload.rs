// src/pipeline/payload.rs

//! Parsing the score/feedback payload a grading script prints on stdout.

use regex::Regex;
use serde_json::Value;

use crate::types::{PayloadFormat, PayloadSpec};

/// A successfully parsed grade.
#[derive(Debug, Clone, PartialEq)]
pub struct GradePayload {
    pub score: f64,
    pub feedback: String,
}

const MARKS_HEADING: &str = "## Marks";
const MARK_LINE: &str = r"^\*\s*(\w*)\s*:\s*([0-9]+(?:\.[0-9]+)?)\s*$";

/// Parse `stdout` according to `spec`. The error is a human-readable reason
/// suitable for `RunFailure::UnparsableResult`.
pub fn parse_payload(stdout: &str, spec: &PayloadSpec) -> Result<GradePayload, String> {
    match spec.format {
        PayloadFormat::Json => parse_json(stdout, spec),
        PayloadFormat::Marks => parse_marks(stdout),
    }
}

/// The last stdout line holding a JSON object wins, so scripts may log
/// freely before printing their result. Falls back to the whole stdout for
/// pretty-printed payloads.
fn parse_json(stdout: &str, spec: &PayloadSpec) -> Result<GradePayload, String> {
    let from_line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        });

    let object = match from_line {
        Some(map) => map,
        None => match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err("payload is not a JSON object".to_string()),
            Err(e) if stdout.trim().is_empty() => {
                return Err(format!("no payload on stdout ({e})"));
            }
            Err(e) => return Err(format!("no JSON object found on stdout: {e}")),
        },
    };

    let score = match object.get(&spec.score_field) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(_) => None,
        None => return Err(format!("missing '{}' field", spec.score_field)),
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| format!("'{}' is not a finite number", spec.score_field))?;

    let feedback = match object.get(&spec.feedback_field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    Ok(GradePayload { score, feedback })
}

/// `## Marks` followed by `* Category: value` lines. The score is the mean
/// of the values; the last marks section on stdout is used.
fn parse_marks(stdout: &str) -> Result<GradePayload, String> {
    let line_re = Regex::new(MARK_LINE).map_err(|e| e.to_string())?;
    let lines: Vec<&str> = stdout.lines().collect();

    let start = lines
        .iter()
        .rposition(|line| line.trim() == MARKS_HEADING)
        .ok_or_else(|| format!("no '{MARKS_HEADING}' section on stdout"))?;

    let mut marks: Vec<(String, f64)> = Vec::new();
    for line in &lines[start + 1..] {
        if let Some(caps) = line_re.captures(line.trim()) {
            let value: f64 = caps[2]
                .parse()
                .map_err(|e| format!("bad mark value '{}': {e}", &caps[2]))?;
            marks.push((caps[1].to_string(), value));
        }
    }

    if marks.is_empty() {
        return Err(format!("'{MARKS_HEADING}' section has no '* Category: value' lines"));
    }

    let score = marks.iter().map(|(_, v)| v).sum::<f64>() / marks.len() as f64;
    let feedback = marks
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(GradePayload { score, feedback })
}
