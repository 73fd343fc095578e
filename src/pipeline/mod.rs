//! Pipeline orchestrator.
//!
//! One request moves linearly through
//! `RESOLVE → EXPAND → BUILD → SELECT → ENVELOPE → LLM → VALIDATE →
//! (FALLBACK → VALIDATE)? → PERSIST → EMIT_FINAL`, each stage under its own
//! deadline. The stages up to ENVELOPE run before the HTTP response opens so
//! the fingerprint headers are known; the rest runs on a spawned task that
//! owns the single NDJSON emitter. Only the LLM stage falls back on failure;
//! every other stage failure fails the request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use bv_types::{
    EvidenceBundle, LlmMode, MetaInfo, RequestMeta, ResponseEnvelope, RuntimeMeta, StreamEvent,
    ValidatorReport, WhyDecisionAnswer, WhyDecisionResponse,
};

use crate::artifacts::{persist_all, ArtifactStore, RequestArtifacts};
use crate::cache::{SnapshotCache, TTL_BUNDLE, TTL_RESOLVE};
use crate::error::{GatewayError, Result};
use crate::evidence;
use crate::evidence::selector::{select, Selection, SelectorConfig};
use crate::expander::GraphExpander;
use crate::llm::{templater, LlmCaller};
use crate::policy::RequestContext;
use crate::prompt::{seal, SealedEnvelope};
use crate::resolver::{ResolveResult, Resolver};
use crate::validator;

/// Unsent-line high-water mark of the NDJSON emitter; a full channel pauses
/// the model reader until the client drains.
pub const TOKEN_HIGH_WATER: usize = 50;

/// Pipeline stages, as they appear in timeouts and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Expand,
    Enrich,
    Build,
    Select,
    Envelope,
    Llm,
    Validate,
    Render,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Expand => "expand",
            Stage::Enrich => "enrich",
            Stage::Build => "build",
            Stage::Select => "select",
            Stage::Envelope => "envelope",
            Stage::Llm => "llm",
            Stage::Validate => "validate",
            Stage::Render => "render",
            Stage::Persist => "persist",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything computed before the stream opens.
pub struct Prepared {
    pub ctx: RequestContext,
    pub question: String,
    pub resolved: ResolveResult,
    pub evidence_pre: EvidenceBundle,
    pub selection: Selection,
    pub sealed: SealedEnvelope,
    pub stage_ms: BTreeMap<String, u64>,
    pub started: Instant,
}

pub struct Pipeline {
    resolver: Resolver,
    expander: GraphExpander,
    llm_caller: LlmCaller,
    store: Arc<dyn ArtifactStore>,
    cache: Arc<SnapshotCache>,
    selector_config: SelectorConfig,
}

impl Pipeline {
    pub fn new(
        resolver: Resolver,
        expander: GraphExpander,
        llm_caller: LlmCaller,
        store: Arc<dyn ArtifactStore>,
        cache: Arc<SnapshotCache>,
        selector_config: SelectorConfig,
    ) -> Self {
        Self {
            resolver,
            expander,
            llm_caller,
            store,
            cache,
            selector_config,
        }
    }

    /// Run RESOLVE through ENVELOPE. Fails the request on any stage error.
    pub async fn prepare(&self, ctx: RequestContext) -> Result<Prepared> {
        let started = Instant::now();
        let mut stage_ms: BTreeMap<String, u64> = BTreeMap::new();
        let budgets = &ctx.budgets.stage_timeouts_ms;

        // RESOLVE
        let stage_start = Instant::now();
        let resolve_key = SnapshotCache::key(
            "resolve",
            &ctx.snapshot_etag,
            &json!({ "input": ctx.input }),
        );
        let resolved: ResolveResult = match self.cache.get(&resolve_key).await {
            Some(hit) => {
                debug!("resolve cache hit");
                hit
            }
            None => {
                let result = tokio::time::timeout(
                    Duration::from_millis(budgets.resolve),
                    self.resolver.resolve(&ctx.input),
                )
                .await
                .map_err(|_| GatewayError::StageTimeout {
                    stage: Stage::Resolve,
                })??;
                self.cache
                    .put(resolve_key, &result, TTL_RESOLVE)
                    .await;
                result
            }
        };
        record(&mut stage_ms, Stage::Resolve, stage_start);
        info!(anchor_id = %resolved.anchor_id, confidence = resolved.confidence, "anchor resolved");

        // EXPAND + ENRICH (budgeted inside the expander)
        let stage_start = Instant::now();
        let neighborhood = self
            .expander
            .expand(&resolved.anchor_id, &ctx.snapshot_etag, budgets)
            .await?;
        record(&mut stage_ms, Stage::Expand, stage_start);

        // BUILD
        let stage_start = Instant::now();
        let adjacency = neighborhood.adjacency();
        let evidence_pre = evidence::build(neighborhood);
        record(&mut stage_ms, Stage::Build, stage_start);

        // SELECT (bundle-cached per snapshot + budgets)
        let stage_start = Instant::now();
        let bundle_key = SnapshotCache::key(
            "bundle",
            &ctx.snapshot_etag,
            &json!({
                "anchor": resolved.anchor_id,
                "max": self.selector_config.max_prompt_bytes,
                "soft": self.selector_config.soft_threshold_bytes,
                "min": self.selector_config.min_evidence_items,
            }),
        );
        let selection: Selection = match self.cache.get(&bundle_key).await {
            Some(hit) => hit,
            None => {
                let selection = select(evidence_pre.clone(), &self.selector_config);
                self.cache.put(bundle_key, &selection, TTL_BUNDLE).await;
                selection
            }
        };
        record(&mut stage_ms, Stage::Select, stage_start);

        // ENVELOPE
        let stage_start = Instant::now();
        let question = ctx
            .question
            .clone()
            .unwrap_or_else(|| format!("{}: {}", ctx.intent, resolved.anchor_id));
        let sealed = seal(
            ctx.intent,
            &question,
            &selection.bundle,
            &adjacency,
            &ctx.policy_fp,
            &ctx.schema_fp,
        );
        record(&mut stage_ms, Stage::Envelope, stage_start);

        Ok(Prepared {
            ctx,
            question,
            resolved,
            evidence_pre,
            selection,
            sealed,
            stage_ms,
            started,
        })
    }

    /// Spawn the streaming tail (LLM → VALIDATE → PERSIST → EMIT_FINAL) and
    /// hand back the line receiver. Lines are newline-terminated NDJSON.
    pub fn stream(self: Arc<Self>, prepared: Prepared) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel::<String>(TOKEN_HIGH_WATER);
        let pipeline = self;
        tokio::spawn(async move {
            if let Err(err) = pipeline.finish(prepared, &tx).await {
                warn!(code = err.code(), error = %err, "request failed mid-stream");
                let line = StreamEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                }
                .to_ndjson_line();
                let _ = tx.send(line).await;
            }
        });
        rx
    }

    async fn finish(&self, prepared: Prepared, tx: &mpsc::Sender<String>) -> Result<()> {
        let Prepared {
            ctx,
            question,
            resolved: _,
            evidence_pre,
            selection,
            sealed,
            mut stage_ms,
            started,
        } = prepared;

        // LLM
        let stage_start = Instant::now();
        let mut fallback_used = false;
        let mut fallback_reason: Option<&'static str> = None;
        let mut retries = 0u32;
        let mut raw_output: Option<String> = None;
        let mut candidate: Option<WhyDecisionAnswer> = None;

        if ctx.policy.llm.mode == LlmMode::Off {
            fallback_used = true;
            fallback_reason = Some("llm_off");
        } else {
            let (token_tx, mut token_rx) = mpsc::channel::<String>(TOKEN_HIGH_WATER);
            let emitter = tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(token) = token_rx.recv().await {
                    let line = StreamEvent::Token { token }.to_ndjson_line();
                    if emitter.send(line).await.is_err() {
                        // Client went away; dropping the receiver cancels
                        // the model read through backpressure.
                        break;
                    }
                }
            });

            let llm_budget = Duration::from_millis(ctx.budgets.stage_timeouts_ms.llm);
            let outcome = self.llm_caller.call(&sealed, llm_budget, token_tx).await;
            let _ = forwarder.await;

            match outcome {
                Ok(result) => {
                    retries = result.retries;
                    raw_output = Some(result.raw);
                    candidate = Some(result.answer);
                }
                Err((llm_error, burned)) => {
                    retries = burned;
                    fallback_used = true;
                    fallback_reason = Some(llm_error.fallback_reason());
                    warn!(retries, reason = llm_error.fallback_reason(), "model stage failed, using templater");
                }
            }
        }
        record(&mut stage_ms, Stage::Llm, stage_start);

        // VALIDATE (and FALLBACK → VALIDATE when needed)
        let stage_start = Instant::now();
        let flags = selection.bundle.completeness_flags();
        let (answer, report) = match candidate {
            Some(model_answer) => {
                let report = validator::validate(
                    ctx.intent,
                    &question,
                    &selection.bundle,
                    &flags,
                    &model_answer,
                );
                if report.ok {
                    (model_answer, report)
                } else {
                    info!(errors = ?report.errors, "model answer rejected by validator");
                    fallback_used = true;
                    fallback_reason = Some("llm_validation_failed");
                    self.templater_answer(&ctx, &question, &selection, &flags)?
                }
            }
            None => self.templater_answer(&ctx, &question, &selection, &flags)?,
        };
        record(&mut stage_ms, Stage::Validate, stage_start);

        // RENDER
        let stage_start = Instant::now();
        let runtime = RuntimeMeta {
            fallback_used,
            fallback_reason: fallback_reason.map(str::to_string),
            retries,
            latency_ms: started.elapsed().as_millis() as u64,
            stage_ms: {
                record(&mut stage_ms, Stage::Render, stage_start);
                stage_ms.clone()
            },
        };
        let meta = MetaInfo {
            request: RequestMeta {
                request_id: ctx.request_id.clone(),
                trace_id: ctx.trace_id.clone(),
                snapshot_etag: ctx.snapshot_etag.clone(),
            },
            policy: ctx.policy.to_meta(),
            budgets: ctx.budgets,
            fingerprints: sealed.fingerprints.clone(),
            evidence_counts: selection.evidence_counts.clone(),
            evidence_sets: selection.evidence_sets.clone(),
            selection_metrics: selection.selection_metrics.clone(),
            truncation_metrics: selection.truncation_metrics.clone(),
            runtime,
            validator: report.clone(),
        };
        let response = WhyDecisionResponse {
            intent: ctx.intent,
            evidence: selection.bundle.clone(),
            answer,
            completeness_flags: flags,
            meta,
        };

        // PERSIST (best-effort, contract order)
        let final_envelope = ResponseEnvelope::new(response.clone());
        let artifacts = RequestArtifacts {
            envelope: sealed.canonical.clone(),
            evidence_pre: canonical_of(&evidence_pre),
            evidence_post: canonical_of(&selection.bundle),
            llm_raw: raw_output
                .as_deref()
                .map(|raw| canonical_of(&raw))
                .unwrap_or_else(|| b"null".to_vec()),
            validator_report: canonical_of(&report),
            final_response: canonical_of(&final_envelope),
        };
        persist_all(self.store.as_ref(), &ctx.request_id, &artifacts).await;

        // EMIT_FINAL: exactly once, strictly after the last token.
        let line = StreamEvent::final_line(response).to_ndjson_line();
        if tx.send(line).await.is_err() {
            debug!("client disconnected before final line");
        }
        Ok(())
    }

    /// Produce the templater answer and validate it. The templater failing
    /// validation is a hard bug.
    fn templater_answer(
        &self,
        ctx: &RequestContext,
        question: &str,
        selection: &Selection,
        flags: &bv_types::CompletenessFlags,
    ) -> Result<(WhyDecisionAnswer, ValidatorReport)> {
        let answer = templater::fallback_answer(ctx.intent, &selection.bundle);
        let report = validator::validate(ctx.intent, question, &selection.bundle, flags, &answer);
        if !report.ok {
            error!(
                critical = true,
                errors = ?report.errors,
                "templater output failed validation"
            );
            return Err(GatewayError::Schema(
                "deterministic fallback failed validation".to_string(),
            ));
        }
        Ok((answer, report))
    }
}

fn record(stage_ms: &mut BTreeMap<String, u64>, stage: Stage, since: Instant) {
    stage_ms.insert(
        stage.as_str().to_string(),
        since.elapsed().as_millis() as u64,
    );
}

fn canonical_of<T: serde::Serialize>(value: &T) -> Vec<u8> {
    let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    bv_canon::canonical_bytes(&json)
}
