//! Admission requests.
//!
//! Two document shapes are accepted: a bare `{ "uid", "images": [...] }`
//! request, or a Kubernetes `AdmissionReview` whose object is a pod or any
//! workload carrying a pod template.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RequestError;

const CONTAINER_FIELDS: [&str; 3] = ["initContainers", "containers", "ephemeralContainers"];

/// A workload admission request: the images it wants to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    /// Request identifier, echoed in the decision.
    pub uid: String,
    /// Image references, deduplicated, in pod order.
    pub images: Vec<String>,
}

impl AdmissionRequest {
    /// Build a request from its parts.
    pub fn new(uid: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            uid: uid.into(),
            images,
        }
    }

    /// Parse a JSON request document.
    pub fn from_json(text: &str) -> Result<Self, RequestError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Parse one request document, or an array of them.
    pub fn from_json_many(text: &str) -> Result<Vec<Self>, RequestError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Array(items) => items.iter().map(Self::from_value).collect(),
            value => Ok(vec![Self::from_value(&value)?]),
        }
    }

    /// Interpret an already-parsed document.
    pub fn from_value(value: &Value) -> Result<Self, RequestError> {
        if value.get("kind").and_then(Value::as_str) == Some("AdmissionReview") {
            return Self::from_review(value);
        }
        if value.get("images").is_some() {
            let request: Self = serde_json::from_value(value.clone())?;
            return Ok(Self::new(request.uid, dedup(request.images)));
        }
        Err(RequestError::Unrecognized(
            "expected `images` or an AdmissionReview".to_owned(),
        ))
    }

    fn from_review(review: &Value) -> Result<Self, RequestError> {
        let request = review
            .get("request")
            .ok_or(RequestError::MissingField("request"))?;
        let uid = request
            .get("uid")
            .and_then(Value::as_str)
            .ok_or(RequestError::MissingField("request.uid"))?;
        let object = request
            .get("object")
            .ok_or(RequestError::MissingField("request.object"))?;
        let spec = pod_spec(object).ok_or(RequestError::MissingField("request.object.spec"))?;

        let images = CONTAINER_FIELDS
            .iter()
            .filter_map(|field| spec.get(*field).and_then(Value::as_array))
            .flatten()
            .filter_map(|container| container.get("image").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();
        Ok(Self::new(uid, dedup(images)))
    }
}

/// Locate the pod spec in a pod, a workload template, or a cron job.
fn pod_spec(object: &Value) -> Option<&Value> {
    let spec = object.get("spec")?;
    if let Some(template) = spec.pointer("/template/spec") {
        return Some(template);
    }
    if let Some(job) = spec.pointer("/jobTemplate/spec/template/spec") {
        return Some(job);
    }
    Some(spec)
}

fn dedup(images: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(images.len());
    for image in images {
        if !out.contains(&image) {
            out.push(image);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_request() {
        let req = AdmissionRequest::from_json(
            r#"{"uid":"r1","images":["ghcr.io/acme/api:v1","ghcr.io/acme/api:v1","nginx"]}"#,
        )
        .expect("parse");
        assert_eq!(req.uid, "r1");
        assert_eq!(req.images, vec!["ghcr.io/acme/api:v1", "nginx"]);
    }

    #[test]
    fn pod_admission_review() {
        let review = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "object": {
                    "kind": "Pod",
                    "spec": {
                        "initContainers": [{ "name": "init", "image": "busybox:1.36" }],
                        "containers": [
                            { "name": "app", "image": "ghcr.io/acme/api:v1" },
                            { "name": "sidecar", "image": "busybox:1.36" }
                        ]
                    }
                }
            }
        });
        let req = AdmissionRequest::from_value(&review).expect("parse");
        assert_eq!(req.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(req.images, vec!["busybox:1.36", "ghcr.io/acme/api:v1"]);
    }

    #[test]
    fn deployment_template_is_searched() {
        let review = serde_json::json!({
            "kind": "AdmissionReview",
            "request": {
                "uid": "d1",
                "object": {
                    "kind": "Deployment",
                    "spec": { "template": { "spec": {
                        "containers": [{ "name": "app", "image": "ghcr.io/acme/web:v2" }]
                    } } }
                }
            }
        });
        let req = AdmissionRequest::from_value(&review).expect("parse");
        assert_eq!(req.images, vec!["ghcr.io/acme/web:v2"]);
    }

    #[test]
    fn cron_job_template_is_searched() {
        let review = serde_json::json!({
            "kind": "AdmissionReview",
            "request": {
                "uid": "c1",
                "object": { "spec": { "jobTemplate": { "spec": { "template": { "spec": {
                    "containers": [{ "name": "job", "image": "ghcr.io/acme/batch:v3" }]
                } } } } } }
            }
        });
        let req = AdmissionRequest::from_value(&review).expect("parse");
        assert_eq!(req.images, vec!["ghcr.io/acme/batch:v3"]);
    }

    #[test]
    fn review_without_uid_is_rejected() {
        let review = serde_json::json!({
            "kind": "AdmissionReview",
            "request": { "object": { "spec": {} } }
        });
        assert!(matches!(
            AdmissionRequest::from_value(&review),
            Err(RequestError::MissingField("request.uid"))
        ));
    }

    #[test]
    fn unrecognized_document() {
        assert!(matches!(
            AdmissionRequest::from_json(r#"{"hello":"world"}"#),
            Err(RequestError::Unrecognized(_))
        ));
        assert!(matches!(AdmissionRequest::from_json("nope"), Err(RequestError::Json(_))));
    }

    #[test]
    fn arrays_of_requests() {
        let reqs = AdmissionRequest::from_json_many(
            r#"[{"uid":"a","images":["x"]},{"uid":"b","images":[]}]"#,
        )
        .expect("parse");
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[1].uid, "b");
    }
}
