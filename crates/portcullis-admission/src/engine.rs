//! The admission decision engine.
//!
//! For each request the engine routes images to policy rules, fetches and
//! verifies their attestations, evaluates predicate conditions, and emits a
//! single [`Decision`]. Every request walks the [`AdmissionState`] machine
//! once; the first failing stage decides it unless the policy is in audit
//! mode, in which case verification and condition failures become warnings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use portcullis_attest::{Attestation, ImageReference};
use portcullis_verify::digest::check_subject;
use portcullis_verify::{
    FailurePolicy, Policy, RequiredAttestation, Rule, ValidationAction, VerifiedAttestation,
    evaluate_all, verify_attestation,
};
use tokio::task::JoinSet;

use crate::decision::{AdmissionState, Decision, Stage, Verdict};
use crate::error::FetchError;
use crate::request::AdmissionRequest;
use crate::store::AttestationStore;

/// Bookkeeping for one request as it moves through the state machine.
struct Run<'a> {
    uid: &'a str,
    state: AdmissionState,
    action: ValidationAction,
    warnings: Vec<String>,
}

impl<'a> Run<'a> {
    const fn new(uid: &'a str, action: ValidationAction) -> Self {
        Self {
            uid,
            state: AdmissionState::Pending,
            action,
            warnings: Vec::new(),
        }
    }

    fn advance(&mut self, next: AdmissionState) -> Result<(), Decision> {
        match self.state.advance(next) {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(e) => Err(Decision::deny(self.uid, Stage::Config, e)),
        }
    }

    fn finish(&mut self, verdict: Verdict, decision: Decision) -> Decision {
        match self.state.advance(AdmissionState::Decided(verdict)) {
            Ok(state) => {
                self.state = state;
                decision.with_warnings(std::mem::take(&mut self.warnings))
            }
            Err(e) => Decision::deny(self.uid, Stage::Config, e),
        }
    }

    fn deny(&mut self, stage: Stage, detail: impl std::fmt::Display) -> Decision {
        let decision = Decision::deny(self.uid, stage, detail);
        self.finish(Verdict::Deny, decision)
    }

    fn allow(&mut self, decision: Decision) -> Decision {
        self.finish(Verdict::Allow, decision)
    }

    /// Record a verification or condition failure: deny when enforcing,
    /// warn and continue when auditing.
    fn failure(&mut self, stage: Stage, detail: String) -> Result<(), Decision> {
        match self.action {
            ValidationAction::Enforce => Err(self.deny(stage, detail)),
            ValidationAction::Audit => {
                tracing::warn!(uid = self.uid, %stage, detail = %detail, "audit mode: failure recorded as warning");
                self.warnings.push(format!("{stage}: {detail}"));
                Ok(())
            }
        }
    }

    fn warn(&mut self, stage: Stage, detail: String) {
        tracing::warn!(uid = self.uid, %stage, detail = %detail, "admission warning");
        self.warnings.push(format!("{stage}: {detail}"));
    }
}

/// A required attestation with the candidates that passed verification.
struct PendingCheck<'p> {
    image: String,
    rule: &'p str,
    required: &'p RequiredAttestation,
    verified: Vec<VerifiedAttestation>,
}

/// Decides admission requests against a policy and an attestation store.
///
/// The engine holds no per-request state and can be shared via [`Arc`].
#[derive(Debug)]
pub struct AdmissionEngine<S> {
    store: S,
    policy: Policy,
}

impl<S: AttestationStore> AdmissionEngine<S> {
    /// Build an engine.
    pub const fn new(store: S, policy: Policy) -> Self {
        Self { store, policy }
    }

    /// The policy in force.
    pub const fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Decide a request now.
    pub async fn decide(&self, request: &AdmissionRequest) -> Decision {
        self.decide_at(request, Utc::now()).await
    }

    /// Decide a request as of `now`.
    pub async fn decide_at(&self, request: &AdmissionRequest, now: DateTime<Utc>) -> Decision {
        let mut run = Run::new(&request.uid, self.policy.action());
        let decision = match self.evaluate(&mut run, request, now).await {
            Ok(decision) | Err(decision) => decision,
        };
        tracing::info!(
            uid = %decision.uid,
            allowed = decision.allowed,
            stage = decision.stage.map(Stage::as_str),
            warnings = decision.warnings.len(),
            reason = %decision.reason,
            "admission decided"
        );
        decision
    }

    async fn evaluate(
        &self,
        run: &mut Run<'_>,
        request: &AdmissionRequest,
        now: DateTime<Utc>,
    ) -> Result<Decision, Decision> {
        if request.images.is_empty() {
            return Ok(run.allow(Decision::allow_at(run.uid, Stage::Policy, "request has no images")));
        }

        let mut targets: Vec<(ImageReference, Vec<&Rule>)> = Vec::new();
        for raw in &request.images {
            let image = match ImageReference::parse(raw) {
                Ok(image) => image,
                Err(e) => return Err(run.deny(Stage::Policy, e)),
            };
            let rules = self.policy.rules_for(&image);
            if rules.is_empty() {
                if self.policy.require_match() {
                    return Err(run.deny(Stage::Policy, format!("no rule matches {image}")));
                }
                tracing::debug!(%image, "no rule matches image");
                continue;
            }
            targets.push((image, rules));
        }
        if targets.is_empty() {
            return Ok(run.allow(Decision::allow_at(run.uid, Stage::Policy, "no rule matches")));
        }

        run.advance(AdmissionState::Verifying)?;
        let mut pending = Vec::new();
        for (image, rules) in &targets {
            let Some((pinned, attestations)) = self.fetch(run, image).await? else {
                continue;
            };
            for &rule in rules {
                for required in rule.attestations() {
                    if let Some(check) =
                        Self::verify_required(run, &pinned, &attestations, rule, required, now)?
                    {
                        pending.push(check);
                    }
                }
            }
        }

        run.advance(AdmissionState::Evaluating)?;
        for check in &pending {
            let mut first_error = None;
            let satisfied = check.verified.iter().any(|verified| {
                match evaluate_all(
                    &check.required.predicate_type,
                    &verified.statement.predicate,
                    &check.required.conditions,
                    now,
                ) {
                    Ok(()) => {
                        tracing::debug!(
                            image = %check.image,
                            rule = check.rule,
                            signer = %verified.signer,
                            "conditions satisfied"
                        );
                        true
                    }
                    Err(e) => {
                        first_error.get_or_insert(e);
                        false
                    }
                }
            });
            if !satisfied {
                let reason = first_error.map_or_else(
                    || "no verified attestation to evaluate".to_owned(),
                    |e| e.to_string(),
                );
                run.failure(
                    Stage::Condition,
                    format!("{} (rule `{}`): {reason}", check.image, check.rule),
                )?;
            }
        }

        Ok(run.allow(Decision::allow(
            run.uid,
            format!(
                "{} image(s) checked against policy `{}`",
                targets.len(),
                self.policy.name()
            ),
        )))
    }

    /// Resolve and fetch within the policy deadline. `None` means the
    /// fetch timed out and the policy fails open.
    async fn fetch(
        &self,
        run: &mut Run<'_>,
        image: &ImageReference,
    ) -> Result<Option<(ImageReference, Vec<Attestation>)>, Decision> {
        let deadline = self.policy.timeout();
        let fetched = tokio::time::timeout(deadline, async {
            let pinned = self.store.resolve(image).await?;
            let attestations = self.store.fetch(&pinned).await?;
            Ok::<_, FetchError>((pinned, attestations))
        })
        .await
        .unwrap_or_else(|_| {
            Err(FetchError::Timeout {
                image: image.to_string(),
                after: deadline,
            })
        });

        match fetched {
            Ok((pinned, attestations)) => {
                tracing::debug!(image = %pinned, count = attestations.len(), "attestations fetched");
                Ok(Some((pinned, attestations)))
            }
            Err(e @ FetchError::Timeout { .. })
                if self.policy.failure_policy() == FailurePolicy::Ignore =>
            {
                run.warn(Stage::Fetch, format!("{e}; allowed by failure policy `ignore`"));
                Ok(None)
            }
            Err(e) => Err(run.deny(Stage::Fetch, e)),
        }
    }

    /// Verify the candidates for one required attestation.
    ///
    /// Returns the verified set, or `None` when all failed in audit mode.
    fn verify_required<'p>(
        run: &mut Run<'_>,
        pinned: &ImageReference,
        attestations: &[Attestation],
        rule: &'p Rule,
        required: &'p RequiredAttestation,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingCheck<'p>>, Decision> {
        let candidates: Vec<&Attestation> = attestations
            .iter()
            .filter(|a| {
                a.unverified_predicate_type().as_deref() == Some(required.predicate_type.as_str())
            })
            .collect();
        if candidates.is_empty() {
            let err = FetchError::NoMatchingAttestation {
                image: pinned.to_string(),
                predicate_type: required.predicate_type.clone(),
            };
            return Err(run.deny(Stage::Fetch, err));
        }

        let mut verified = Vec::new();
        let mut first_error = None;
        for attestation in candidates {
            let outcome = verify_attestation(attestation, rule.trust(), now).and_then(|v| {
                check_subject(&v.statement, pinned)?;
                Ok(v)
            });
            match outcome {
                Ok(v) => verified.push(v),
                Err(e) => {
                    tracing::debug!(
                        image = %pinned,
                        attestation = %attestation.content_digest(),
                        error = %e,
                        "attestation rejected"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if verified.is_empty() {
            let reason = first_error.map_or_else(
                || "no attestation verified".to_owned(),
                |e| e.to_string(),
            );
            run.failure(
                Stage::Verify,
                format!("{pinned} (rule `{}`): {reason}", rule.name()),
            )?;
            return Ok(None);
        }

        Ok(Some(PendingCheck {
            image: pinned.to_string(),
            rule: rule.name(),
            required,
            verified,
        }))
    }
}

impl<S: AttestationStore + 'static> AdmissionEngine<S> {
    /// Decide a batch of requests concurrently. Decisions are returned in
    /// request order.
    pub async fn decide_all(self: &Arc<Self>, requests: Vec<AdmissionRequest>) -> Vec<Decision> {
        let now = Utc::now();
        let uids: Vec<String> = requests.iter().map(|r| r.uid.clone()).collect();

        let mut tasks = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let engine = Arc::clone(self);
            tasks.spawn(async move { (index, engine.decide_at(&request, now).await) });
        }

        let mut decisions: Vec<Option<Decision>> = vec![None; uids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, decision)) => decisions[index] = Some(decision),
                Err(e) => tracing::error!(error = %e, "admission task failed"),
            }
        }

        decisions
            .into_iter()
            .zip(uids)
            .map(|(decision, uid)| {
                decision.unwrap_or_else(|| Decision::deny(uid, Stage::Config, "evaluation task failed"))
            })
            .collect()
    }
}
