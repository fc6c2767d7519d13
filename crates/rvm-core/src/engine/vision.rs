//! Vision peer protocol: classification replies, detector/classifier
//! resolution, and photo replies.

use serde_json::{Map, Value};

use crate::controller::ActuatorCommand;
use crate::types::{ContainerKind, VisionVerdict};

/// Photo request sent to the vision peer.
pub const PHOTO_REQUEST: &str = r#"{"command":"get_photo"}"#;

/// Request text for a detection with no type hint.
pub const UNTYPED_REQUEST: &str = "none";

// ─── Classification replies ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionReply {
    pub verdict: VisionVerdict,
    pub confidence: Option<f64>,
}

/// Parse a classification reply. Accepts the bare words `bottle`, `bank`
/// (or `can`) and `none`, or `{"type"|"result": <word>, "confidence": n}`.
/// Anything else is not a classification reply.
pub fn parse_reply(raw: &str) -> Option<VisionReply> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw) else {
            return None;
        };
        let word = ["type", "result"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))?;
        return Some(VisionReply {
            verdict: parse_verdict(word)?,
            confidence: fields.get("confidence").and_then(Value::as_f64),
        });
    }
    Some(VisionReply {
        verdict: parse_verdict(raw)?,
        confidence: None,
    })
}

fn parse_verdict(word: &str) -> Option<VisionVerdict> {
    match word.trim().to_ascii_lowercase().as_str() {
        "bottle" => Some(VisionVerdict::Recognized(ContainerKind::Bottle)),
        "bank" | "can" => Some(VisionVerdict::Recognized(ContainerKind::Can)),
        "none" => Some(VisionVerdict::Unrecognized),
        _ => None,
    }
}

// ─── Resolution ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    NotRecognized,
    Recognized {
        kind: ContainerKind,
        confirm: ActuatorCommand,
    },
    /// Detector and classifier disagree. Nothing is actuated.
    Mismatch {
        detected: Option<ContainerKind>,
        classified: ContainerKind,
    },
}

/// Combine the detection memo with the classifier's verdict.
pub fn resolve(memo: Option<ContainerKind>, verdict: VisionVerdict) -> Resolution {
    match verdict {
        VisionVerdict::Unrecognized => Resolution::NotRecognized,
        VisionVerdict::Recognized(kind) if memo == Some(kind) => Resolution::Recognized {
            kind,
            confirm: confirm_command(kind),
        },
        VisionVerdict::Recognized(classified) => Resolution::Mismatch {
            detected: memo,
            classified,
        },
    }
}

fn confirm_command(kind: ContainerKind) -> ActuatorCommand {
    match kind {
        ContainerKind::Bottle => ActuatorCommand::ConfirmBottle,
        ContainerKind::Can => ActuatorCommand::ConfirmCan,
    }
}

// ─── Photo replies ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PhotoReply {
    /// Payload fields to forward (`photo_base64`, `timestamp`, `saved_path`, ...).
    Photo(Map<String, Value>),
    Failed(String),
}

/// Parse a photo reply. Returns `None` for messages that are not about a
/// photo (e.g. a late classification word).
pub fn parse_photo_reply(raw: &str) -> Option<PhotoReply> {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw.trim()) else {
        return None;
    };
    if fields.contains_key("photo_base64") {
        return Some(PhotoReply::Photo(fields));
    }
    match fields.get("error") {
        Some(Value::String(error)) => Some(PhotoReply::Failed(error.clone())),
        Some(other) => Some(PhotoReply::Failed(other.to_string())),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_words() {
        let r = parse_reply(" Bottle\n").unwrap();
        assert_eq!(r.verdict, VisionVerdict::Recognized(ContainerKind::Bottle));
        assert_eq!(r.confidence, None);
        assert_eq!(
            parse_reply("bank").unwrap().verdict,
            VisionVerdict::Recognized(ContainerKind::Can)
        );
        assert_eq!(parse_reply("NONE").unwrap().verdict, VisionVerdict::Unrecognized);
    }

    #[test]
    fn structured_reply_carries_confidence() {
        let r = parse_reply(r#"{"type":"bank","confidence":0.93}"#).unwrap();
        assert_eq!(r.verdict, VisionVerdict::Recognized(ContainerKind::Can));
        assert_eq!(r.confidence, Some(0.93));

        let r = parse_reply(r#"{"result":"none"}"#).unwrap();
        assert_eq!(r.verdict, VisionVerdict::Unrecognized);
        assert_eq!(r.confidence, None);
    }

    #[test]
    fn junk_is_not_a_reply() {
        assert!(parse_reply("").is_none());
        assert!(parse_reply("glass").is_none());
        assert!(parse_reply(r#"{"photo_base64":"AAAA"}"#).is_none());
        assert!(parse_reply("{not json").is_none());
    }

    #[test]
    fn matching_verdict_confirms() {
        assert_eq!(
            resolve(
                Some(ContainerKind::Can),
                VisionVerdict::Recognized(ContainerKind::Can)
            ),
            Resolution::Recognized {
                kind: ContainerKind::Can,
                confirm: ActuatorCommand::ConfirmCan,
            }
        );
    }

    #[test]
    fn disagreement_never_confirms() {
        let r = resolve(
            Some(ContainerKind::Bottle),
            VisionVerdict::Recognized(ContainerKind::Can),
        );
        assert_eq!(
            r,
            Resolution::Mismatch {
                detected: Some(ContainerKind::Bottle),
                classified: ContainerKind::Can,
            }
        );

        // Curtain-only trigger has no hint to agree with.
        let r = resolve(None, VisionVerdict::Recognized(ContainerKind::Bottle));
        assert!(matches!(r, Resolution::Mismatch { detected: None, .. }));
    }

    #[test]
    fn none_is_not_recognized_whatever_the_memo() {
        assert_eq!(
            resolve(Some(ContainerKind::Bottle), VisionVerdict::Unrecognized),
            Resolution::NotRecognized
        );
        assert_eq!(resolve(None, VisionVerdict::Unrecognized), Resolution::NotRecognized);
    }

    #[test]
    fn photo_replies() {
        let reply = parse_photo_reply(
            r#"{"photo_base64":"AAAA","timestamp":"2026-01-01T00:00:00Z","saved_path":"/tmp/p.jpg"}"#,
        )
        .unwrap();
        let PhotoReply::Photo(fields) = reply else {
            panic!("expected photo");
        };
        assert_eq!(fields["saved_path"], "/tmp/p.jpg");

        assert_eq!(
            parse_photo_reply(r#"{"error":"camera busy"}"#),
            Some(PhotoReply::Failed("camera busy".to_owned()))
        );
        assert_eq!(parse_photo_reply("bottle"), None);
        assert_eq!(parse_photo_reply(r#"{"type":"bottle"}"#), None);
    }
}
