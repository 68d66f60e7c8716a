//! End-to-end admission decisions over an in-memory attestation store.
//!
//! Each test signs vulnerability-scan attestations with a fresh P-256 key,
//! loads them into a `MemoryStore`, and checks the decision the engine
//! emits for a request.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aws_lc_rs::encoding::AsDer;
use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use der::pem::LineEnding;
use der::{Decode, EncodePem};
use portcullis_admission::{AdmissionEngine, AdmissionRequest, Decision, MemoryStore, Stage};
use portcullis_attest::envelope::pae;
use portcullis_attest::predicate::VULN_PREDICATE_TYPE;
use portcullis_attest::{
    Attestation, DsseEnvelope, DsseSignature, ImageReference, InTotoStatement, VerificationMaterial,
};
use portcullis_verify::{FailurePolicy, Policy, ValidationAction};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

const API_DIGEST: &str = "sha256:4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945";
const WEB_DIGEST: &str = "sha256:0d1ad6ff3b3a3fe5ab1c2b2c0e1a4cbf6b4c3b0ddbe1c6e0a1bcf1fc5b2f9a7e";

struct Signer {
    key: EcdsaKeyPair,
    pem: String,
}

fn signer() -> Signer {
    let rng = SystemRandom::new();
    let pkcs8 =
        EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).expect("keygen");
    let key =
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref()).expect("parse");
    let spki = key.public_key().as_der().expect("spki der");
    let pem = SubjectPublicKeyInfoOwned::from_der(spki.as_ref())
        .expect("spki")
        .to_pem(LineEnding::LF)
        .expect("pem");
    Signer { key, pem }
}

fn attest(signer: &Signer, digest: &str, predicate_type: &str, finished: DateTime<Utc>) -> Attestation {
    let statement = serde_json::json!({
        "_type": InTotoStatement::TYPE,
        "subject": [{
            "name": "ghcr.io/acme/api",
            "digest": { "sha256": digest.trim_start_matches("sha256:") }
        }],
        "predicateType": predicate_type,
        "predicate": {
            "scanner": {
                "uri": "pkg:github/aquasecurity/trivy@v0.50.0",
                "version": "0.50.0",
                "result": { "SchemaVersion": 2, "Results": [] }
            },
            "metadata": {
                "scanStartedOn": (finished - chrono::Duration::minutes(1)).to_rfc3339(),
                "scanFinishedOn": finished.to_rfc3339()
            }
        }
    })
    .to_string();
    let sig = signer
        .key
        .sign(
            &SystemRandom::new(),
            &pae(InTotoStatement::PAYLOAD_TYPE, statement.as_bytes()),
        )
        .expect("sign");
    Attestation {
        dsse_envelope: DsseEnvelope {
            payload_type: InTotoStatement::PAYLOAD_TYPE.to_owned(),
            payload: STANDARD.encode(statement),
            signatures: vec![DsseSignature {
                keyid: String::new(),
                sig: STANDARD.encode(sig.as_ref()),
            }],
        },
        verification_material: VerificationMaterial::PublicKey {
            hint: Some("ci".to_owned()),
        },
    }
}

fn fresh(signer: &Signer, digest: &str) -> Attestation {
    attest(signer, digest, VULN_PREDICATE_TYPE, Utc::now() - chrono::Duration::hours(2))
}

fn stale(signer: &Signer, digest: &str) -> Attestation {
    attest(signer, digest, VULN_PREDICATE_TYPE, Utc::now() - chrono::Duration::days(3))
}

struct PolicyOptions {
    action: ValidationAction,
    failure_policy: FailurePolicy,
    require_match: bool,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            action: ValidationAction::Enforce,
            failure_policy: FailurePolicy::Fail,
            require_match: false,
        }
    }
}

fn policy(trusted_pem: &str, options: &PolicyOptions) -> Policy {
    let doc = serde_json::json!({
        "name": "fresh-scans",
        "validation_failure_action": options.action,
        "failure_policy": options.failure_policy,
        "timeout_secs": 2,
        "require_match": options.require_match,
        "rules": [{
            "name": "acme",
            "image_references": ["ghcr.io/acme/*"],
            "attestors": { "keys": [{ "name": "ci", "pem": trusted_pem }] },
            "attestations": [{
                "predicate_type": VULN_PREDICATE_TYPE,
                "conditions": [
                    { "key": "metadata.scanFinishedOn", "operator": "MaxAge", "value": "24h" },
                    { "key": "scanner.uri", "operator": "Exists", "value": true }
                ]
            }]
        }]
    });
    Policy::from_json_str(&doc.to_string(), Path::new(".")).expect("policy")
}

fn image(reference: &str) -> ImageReference {
    ImageReference::parse(reference).expect("image reference")
}

fn api() -> String {
    format!("ghcr.io/acme/api@{API_DIGEST}")
}

async fn decide(store: MemoryStore, policy: Policy, images: &[&str]) -> Decision {
    let engine = AdmissionEngine::new(store, policy);
    let request = AdmissionRequest::new(
        "req-1",
        images.iter().map(|s| (*s).to_owned()).collect(),
    );
    engine.decide(&request).await
}

#[tokio::test]
async fn fresh_trusted_scan_is_allowed() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), fresh(&ci, API_DIGEST));

    let decision = decide(store, policy(&ci.pem, &PolicyOptions::default()), &[&api()]).await;
    assert!(decision.allowed, "{}", decision.reason);
    assert_eq!(decision.stage, None);
    assert_eq!(decision.uid, "req-1");
}

#[tokio::test]
async fn missing_attestations_deny_at_fetch() {
    let ci = signer();
    let decision = decide(
        MemoryStore::new(),
        policy(&ci.pem, &PolicyOptions::default()),
        &[&api()],
    )
    .await;
    assert!(!decision.allowed);
    assert_eq!(decision.stage, Some(Stage::Fetch));
    assert!(decision.reason.starts_with("fetch: no attestations found"), "{}", decision.reason);
}

#[tokio::test]
async fn wrong_predicate_type_denies_at_fetch() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(
        &image(&api()),
        attest(&ci, API_DIGEST, "https://slsa.dev/provenance/v1", Utc::now()),
    );
    let decision = decide(store, policy(&ci.pem, &PolicyOptions::default()), &[&api()]).await;
    assert_eq!(decision.stage, Some(Stage::Fetch));
    assert!(decision.reason.contains(VULN_PREDICATE_TYPE), "{}", decision.reason);
}

#[tokio::test]
async fn untrusted_signer_denies_at_verify() {
    let ci = signer();
    let mallory = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), fresh(&mallory, API_DIGEST));

    let decision = decide(store, policy(&ci.pem, &PolicyOptions::default()), &[&api()]).await;
    assert!(!decision.allowed);
    assert_eq!(decision.stage, Some(Stage::Verify));
    assert!(decision.reason.contains("no trusted key"), "{}", decision.reason);
}

#[tokio::test]
async fn attestation_for_other_digest_denies_at_verify() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), fresh(&ci, WEB_DIGEST));

    let decision = decide(store, policy(&ci.pem, &PolicyOptions::default()), &[&api()]).await;
    assert_eq!(decision.stage, Some(Stage::Verify));
    assert!(decision.reason.contains("does not match image digest"), "{}", decision.reason);
}

#[tokio::test]
async fn stale_scan_denies_at_condition() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), stale(&ci, API_DIGEST));

    let decision = decide(store, policy(&ci.pem, &PolicyOptions::default()), &[&api()]).await;
    assert!(!decision.allowed);
    assert_eq!(decision.stage, Some(Stage::Condition));
    assert!(decision.reason.contains("metadata.scanFinishedOn"), "{}", decision.reason);
}

#[tokio::test]
async fn any_passing_attestation_satisfies_the_rule() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), stale(&ci, API_DIGEST));
    store.insert_attestation(&image(&api()), fresh(&signer(), API_DIGEST));
    store.insert_attestation(&image(&api()), fresh(&ci, API_DIGEST));

    let decision = decide(store, policy(&ci.pem, &PolicyOptions::default()), &[&api()]).await;
    assert!(decision.allowed, "{}", decision.reason);
}

#[tokio::test]
async fn furthest_progress_is_reported() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), fresh(&signer(), API_DIGEST));
    store.insert_attestation(&image(&api()), stale(&ci, API_DIGEST));

    let decision = decide(store, policy(&ci.pem, &PolicyOptions::default()), &[&api()]).await;
    assert_eq!(decision.stage, Some(Stage::Condition), "{}", decision.reason);
}

#[tokio::test]
async fn tags_are_resolved_through_the_store() {
    let ci = signer();
    let mut store = MemoryStore::new();
    let tagged = image("ghcr.io/acme/api:v1");
    store.insert_tag(&tagged, API_DIGEST);
    store.insert_attestation(&image(&api()), fresh(&ci, API_DIGEST));

    let decision = decide(
        store,
        policy(&ci.pem, &PolicyOptions::default()),
        &["ghcr.io/acme/api:v1"],
    )
    .await;
    assert!(decision.allowed, "{}", decision.reason);
}

#[tokio::test]
async fn unresolvable_tag_denies_at_fetch() {
    let ci = signer();
    let decision = decide(
        MemoryStore::new(),
        policy(&ci.pem, &PolicyOptions::default()),
        &["ghcr.io/acme/api:v9"],
    )
    .await;
    assert_eq!(decision.stage, Some(Stage::Fetch));
    assert!(decision.reason.contains("cannot resolve tag"), "{}", decision.reason);
}

#[tokio::test]
async fn audit_mode_allows_with_warnings() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), stale(&ci, API_DIGEST));
    let options = PolicyOptions {
        action: ValidationAction::Audit,
        ..PolicyOptions::default()
    };

    let decision = decide(store, policy(&ci.pem, &options), &[&api()]).await;
    assert!(decision.allowed);
    assert_eq!(decision.warnings.len(), 1);
    assert!(decision.warnings[0].starts_with("condition: "), "{:?}", decision.warnings);
}

#[tokio::test]
async fn audit_mode_never_denies_on_verification_failure() {
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), fresh(&signer(), API_DIGEST));
    let options = PolicyOptions {
        action: ValidationAction::Audit,
        ..PolicyOptions::default()
    };

    let decision = decide(store, policy(&signer().pem, &options), &[&api()]).await;
    assert!(decision.allowed);
    assert!(decision.warnings[0].starts_with("verify: "), "{:?}", decision.warnings);
}

#[tokio::test]
async fn unmatched_images_are_allowed_unless_required() {
    let ci = signer();
    let decision = decide(
        MemoryStore::new(),
        policy(&ci.pem, &PolicyOptions::default()),
        &["nginx:1.25"],
    )
    .await;
    assert!(decision.allowed);
    assert_eq!(decision.reason, "policy: no rule matches");

    let options = PolicyOptions {
        require_match: true,
        ..PolicyOptions::default()
    };
    let decision = decide(MemoryStore::new(), policy(&ci.pem, &options), &["nginx:1.25"]).await;
    assert!(!decision.allowed);
    assert_eq!(decision.stage, Some(Stage::Policy));
}

#[tokio::test]
async fn invalid_reference_denies_at_policy() {
    let ci = signer();
    let decision = decide(
        MemoryStore::new(),
        policy(&ci.pem, &PolicyOptions::default()),
        &["ghcr.io/acme/api@sha256:short"],
    )
    .await;
    assert_eq!(decision.stage, Some(Stage::Policy));
}

#[tokio::test]
async fn traversal_reference_denies_at_policy() {
    let ci = signer();
    let image = format!("../../etc/api@{API_DIGEST}");
    let decision = decide(
        MemoryStore::new(),
        policy(&ci.pem, &PolicyOptions::default()),
        &[image.as_str()],
    )
    .await;
    assert!(!decision.allowed);
    assert_eq!(decision.stage, Some(Stage::Policy));
}

#[tokio::test]
async fn first_denied_image_decides() {
    let ci = signer();
    let web = format!("ghcr.io/acme/web@{WEB_DIGEST}");
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), fresh(&ci, API_DIGEST));

    let decision = decide(
        store,
        policy(&ci.pem, &PolicyOptions::default()),
        &[&api(), &web],
    )
    .await;
    assert!(!decision.allowed);
    assert!(decision.reason.contains("ghcr.io/acme/web"), "{}", decision.reason);
}

#[tokio::test(start_paused = true)]
async fn fetch_timeout_fails_closed() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), fresh(&ci, API_DIGEST));
    let store = store.with_latency(Duration::from_secs(60));

    let decision = decide(store, policy(&ci.pem, &PolicyOptions::default()), &[&api()]).await;
    assert!(!decision.allowed);
    assert_eq!(decision.stage, Some(Stage::Fetch));
    assert!(decision.reason.contains("timed out after 2s"), "{}", decision.reason);
}

#[tokio::test(start_paused = true)]
async fn fetch_timeout_fails_open_with_warning() {
    let ci = signer();
    let mut store = MemoryStore::new();
    store.insert_attestation(&image(&api()), fresh(&ci, API_DIGEST));
    let store = store.with_latency(Duration::from_secs(60));
    let options = PolicyOptions {
        failure_policy: FailurePolicy::Ignore,
        ..PolicyOptions::default()
    };

    let decision = decide(store, policy(&ci.pem, &options), &[&api()]).await;
    assert!(decision.allowed, "{}", decision.reason);
    assert_eq!(decision.warnings.len(), 1);
    assert!(decision.warnings[0].starts_with("fetch: "), "{:?}", decision.warnings);
}

#[tokio::test]
async fn every_stage_has_a_distinct_reason_prefix() {
    let ci = signer();
    let mut store = MemoryStore::new();
    let verify_digest = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
    let condition_digest = "sha256:2222222222222222222222222222222222222222222222222222222222222222";
    store.insert_attestation(
        &image(&format!("ghcr.io/acme/v@{verify_digest}")),
        fresh(&signer(), verify_digest),
    );
    store.insert_attestation(
        &image(&format!("ghcr.io/acme/c@{condition_digest}")),
        stale(&ci, condition_digest),
    );
    let engine = Arc::new(AdmissionEngine::new(
        store,
        policy(&ci.pem, &PolicyOptions::default()),
    ));

    let requests = vec![
        AdmissionRequest::new("fetch", vec![api()]),
        AdmissionRequest::new("verify", vec![format!("ghcr.io/acme/v@{verify_digest}")]),
        AdmissionRequest::new("condition", vec![format!("ghcr.io/acme/c@{condition_digest}")]),
        AdmissionRequest::new("policy", vec!["not a reference!".to_owned()]),
    ];
    let decisions = engine.decide_all(requests).await;

    let uids: Vec<&str> = decisions.iter().map(|d| d.uid.as_str()).collect();
    assert_eq!(uids, ["fetch", "verify", "condition", "policy"]);
    for decision in &decisions {
        assert!(!decision.allowed);
        let stage = decision.stage.expect("deny carries a stage");
        assert_eq!(stage.as_str(), decision.uid);
        assert!(
            decision.reason.starts_with(&format!("{}: ", decision.uid)),
            "{}",
            decision.reason
        );
    }
}
