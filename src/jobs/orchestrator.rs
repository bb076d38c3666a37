use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use super::{CapabilityRegistry, JobError, JobKind, JobPayload, JobReceipt, JobState};
use crate::adapters::{AdapterError, Artifact, CapabilityAdapter, Estimate};
use crate::config::MeterConfig;
use crate::metering::conversions::record_conversion;
use crate::metering::ledger::{apply_debit, current_balance};
use crate::metering::{CostBasis, CostPolicy, Ledger, NewConversion, TransactionKind};
use crate::storage::{ArtifactStore, StagedFile};

/// Aborts the wrapped task when dropped, so an abandoned request does not
/// leave an engine running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct CostChecked {
    adapter: Arc<dyn CapabilityAdapter>,
    estimate: Estimate,
    tokens: i64,
}

/// key: job-orchestrator -> check cost, run engine, commit debit atomically
#[derive(Clone)]
pub struct JobOrchestrator {
    ledger: Ledger,
    registry: CapabilityRegistry,
    store: ArtifactStore,
    policy: CostPolicy,
    engine_timeout: Duration,
}

impl JobOrchestrator {
    pub fn new(
        ledger: Ledger,
        registry: CapabilityRegistry,
        store: ArtifactStore,
        policy: CostPolicy,
        engine_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            registry,
            store,
            policy,
            engine_timeout,
        }
    }

    pub fn from_config(
        ledger: Ledger,
        registry: CapabilityRegistry,
        store: ArtifactStore,
        config: &MeterConfig,
    ) -> Self {
        Self::new(
            ledger,
            registry,
            store,
            CostPolicy::new(config.chars_per_token, config.transcription_tokens_per_minute),
            config.engine_timeout,
        )
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn policy(&self) -> &CostPolicy {
        &self.policy
    }

    pub fn is_enabled(&self, kind: JobKind) -> bool {
        self.registry.is_enabled(kind)
    }

    /// Single entry point for metered jobs. The caller has already
    /// authenticated `account_id`. A staged upload in `payload` is deleted
    /// before this returns, whatever the outcome.
    pub async fn submit_job(
        &self,
        account_id: i64,
        payload: JobPayload,
    ) -> Result<JobReceipt, JobError> {
        let job_id = Uuid::new_v4();
        let kind = payload.kind();
        let span = info_span!("job", %job_id, kind = kind.as_str(), account_id);

        async move {
            let _input = payload
                .staged_input()
                .map(|path| self.store.adopt(path.to_path_buf()));
            log_state(JobState::Received);

            let checked = match self.check_cost(account_id, &payload).await {
                Ok(checked) => checked,
                Err(err) => {
                    finish(kind, JobState::Rejected, &err);
                    return Err(err);
                }
            };
            log_state(JobState::CostChecked);

            match self.execute_and_commit(job_id, account_id, &payload, checked).await {
                Ok(receipt) => {
                    log_state(JobState::Committed);
                    metrics::increment_counter!(
                        "media_meter_jobs_total",
                        "kind" => kind.as_str(),
                        "outcome" => "committed"
                    );
                    metrics::counter!(
                        "media_meter_tokens_charged_total",
                        receipt.tokens_charged.unsigned_abs(),
                        "kind" => kind.as_str()
                    );
                    Ok(receipt)
                }
                Err(err) => {
                    finish(kind, JobState::FailedCleaned, &err);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn check_cost(
        &self,
        account_id: i64,
        payload: &JobPayload,
    ) -> Result<CostChecked, JobError> {
        let kind = payload.kind();
        let adapter = self
            .registry
            .get(kind)
            .ok_or(JobError::FeatureDisabled(kind))?;

        // Every prepare is cheap: voice and length checks, URL shape, or a
        // metadata-only duration probe for uploads.
        let estimate = adapter.prepare(payload).await?;
        let tokens = self.policy.cost(&estimate.basis);

        let available = self.ledger.balance(account_id).await?;
        if tokens > available {
            return Err(JobError::InsufficientBalance {
                needed: tokens,
                available,
            });
        }

        Ok(CostChecked {
            adapter,
            estimate,
            tokens,
        })
    }

    async fn execute_and_commit(
        &self,
        job_id: Uuid,
        account_id: i64,
        payload: &JobPayload,
        checked: CostChecked,
    ) -> Result<JobReceipt, JobError> {
        let CostChecked {
            adapter,
            estimate,
            tokens,
        } = checked;
        let kind = payload.kind();

        let output = self
            .store
            .stage(kind, account_id, adapter.output_extension());
        log_state(JobState::Executing);

        // The engine task holds its own guard on the output path, so an abort
        // removes what the engine wrote even after this future is gone.
        let mut task = AbortOnDrop(tokio::spawn({
            let adapter = adapter.clone();
            let payload = payload.clone();
            let estimate = estimate.clone();
            let engine_output = self.store.adopt(output.path().to_path_buf());
            async move {
                let artifact = adapter
                    .execute(&payload, &estimate, engine_output.path())
                    .await?;
                engine_output.keep();
                Ok::<_, AdapterError>(artifact)
            }
            .in_current_span()
        }));

        let artifact = match tokio::time::timeout(self.engine_timeout, &mut task.0).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(JobError::Engine(format!("engine task failed: {join_err}")));
            }
            Err(_) => {
                task.0.abort();
                // Resolves once the engine future has been dropped.
                let _ = (&mut task.0).await;
                return Err(AdapterError::Timeout(self.engine_timeout).into());
            }
        };
        drop(task);

        let (voice, text_length) = match (payload, estimate.basis) {
            (JobPayload::Synthesis { voice, .. }, CostBasis::Characters(chars)) => (
                Some(voice.clone()),
                i64::try_from(chars).unwrap_or(i64::MAX),
            ),
            (JobPayload::Synthesis { voice, .. }, _) => (Some(voice.clone()), 0),
            _ => (None, 0),
        };
        let pending = PendingCommit {
            job_id,
            kind,
            account_id,
            tokens,
            note: ledger_note(kind, &estimate, &artifact),
            voice,
            text_length,
            artifact,
        };

        // Not aborted with the request: once started, the debit and the
        // artifact hand-off finish together.
        tokio::spawn(commit(self.ledger.clone(), pending, output).in_current_span())
            .await
            .map_err(|join_err| JobError::Storage(format!("commit task failed: {join_err}")))?
    }
}

struct PendingCommit {
    job_id: Uuid,
    kind: JobKind,
    account_id: i64,
    tokens: i64,
    note: String,
    voice: Option<String>,
    text_length: i64,
    artifact: Artifact,
}

/// Debits the account, records the conversion and releases the artifact
/// from its guard. A failure before the commit drops `output` armed.
async fn commit(
    ledger: Ledger,
    pending: PendingCommit,
    output: StagedFile,
) -> Result<JobReceipt, JobError> {
    let PendingCommit {
        job_id,
        kind,
        account_id,
        tokens,
        note,
        voice,
        text_length,
        artifact,
    } = pending;

    let _guard = ledger.lock_account(account_id).await;
    let mut tx = ledger.pool().begin().await?;
    let entry = apply_debit(
        &mut tx,
        account_id,
        tokens,
        TransactionKind::Use,
        None,
        &note,
    )
    .await?;

    let conversion_id = match voice.as_deref() {
        Some(voice) => {
            let record = record_conversion(
                &mut tx,
                NewConversion {
                    account_id,
                    text_length,
                    tokens_used: tokens,
                    voice,
                    filename: &artifact.file_name(),
                },
            )
            .await?;
            Some(record.id)
        }
        None => None,
    };

    let balance_after = current_balance(&mut tx, account_id).await?;
    tx.commit().await?;
    drop(_guard);

    let path = output.keep();
    info!(
        tokens,
        balance_after,
        entry_id = entry.id,
        path = %path.display(),
        "job committed"
    );

    Ok(JobReceipt {
        job_id,
        kind,
        artifact: Artifact { path, ..artifact },
        tokens_charged: tokens,
        balance_after,
        transaction_id: entry.id,
        conversion_id,
    })
}

fn log_state(state: JobState) {
    debug!(state = state.as_str(), "job state");
}

fn finish(kind: JobKind, state: JobState, err: &JobError) {
    if state == JobState::Rejected {
        info!(state = state.as_str(), reason = err.code(), error = %err, "job rejected");
    } else {
        error!(state = state.as_str(), reason = err.code(), error = %err, "job failed");
    }
    metrics::increment_counter!(
        "media_meter_jobs_total",
        "kind" => kind.as_str(),
        "outcome" => err.code()
    );
}

/// Journal note for the `use` entry of a committed job.
pub(crate) fn ledger_note(kind: JobKind, estimate: &Estimate, artifact: &Artifact) -> String {
    match (kind, estimate.basis) {
        (JobKind::Synthesis, CostBasis::Characters(chars)) => {
            format!("Text conversion ({chars} characters)")
        }
        (JobKind::Download, _) => format!(
            "Video download ({})",
            estimate.label.as_deref().unwrap_or("video")
        ),
        (JobKind::Transcription, CostBasis::Duration(seconds)) => format!(
            "Transcription ({:.1} min, {})",
            seconds / 60.0,
            artifact.language.as_deref().unwrap_or("unknown")
        ),
        (kind, _) => format!("{kind} job"),
    }
}
