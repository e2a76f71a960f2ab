//! Resource payloads used across the suites.

use serde_json::{json, Value};

/// A minimal Patient payload.
pub fn patient() -> Value {
    json!({
        "resourceType": "Patient",
        "name": [{"family": "Jameson", "given": ["Matt"]}]
    })
}

/// A Patient payload with a distinguishing marker value.
pub fn patient_with_marker(marker: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "name": [{"family": "Jameson", "given": ["Matt"]}],
        "marker": marker
    })
}

/// An Observation holding references at several depths.
pub fn observation() -> Value {
    json!({
        "resourceType": "Observation",
        "status": "final",
        "subject": {"reference": "Patient/example"},
        "performer": [{"reference": "Practitioner/p1"}],
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]}
    })
}

/// A Questionnaire whose `item` field is a candidate for hybrid offload.
pub fn questionnaire() -> Value {
    json!({
        "resourceType": "Questionnaire",
        "status": "active",
        "item": [
            {"linkId": "1", "text": "Do you have allergies?", "type": "boolean"},
            {"linkId": "2", "text": "General questions", "type": "group", "item": [
                {"linkId": "2.1", "text": "What is your gender?", "type": "string"}
            ]}
        ]
    })
}
