//! Batch execution under a bounded worker pool
//!
//! - Worker permits: one shared semaphore bounds concurrent classifications
//!   across all batches and single requests.
//! - Admission: at most `max_pending_batches` batches in flight; further
//!   submissions are rejected instead of queued.
//! - Per-item timeout: the waiter gives up and fires the item's cancellation
//!   token. The item is recorded as failed. Its permit returns only when the
//!   blocking work observes the cancel, so CPU work never exceeds the pool.
//!
//! Every input id appears exactly once in the output. Output order follows
//! completion order, not input order.

use crate::engine::ClassificationEngine;
use crate::error::ClassifyError;
use crate::stats::ServiceStats;
use canticle_common::config::BatchConfig;
use canticle_common::models::ClassifyRequest;
use canticle_common::{BatchResult, ClassificationResult};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Request-level batch failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch contains no items")]
    Empty,

    #[error("batch has {count} items, maximum is {max}")]
    TooLarge { count: usize, max: usize },

    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("too many batches in flight (limit {limit}), retry later")]
    Busy { limit: usize },
}

/// One batch entry, parsed individually
#[derive(Debug, Clone)]
pub enum BatchItem {
    Signal {
        id: String,
        samples: Vec<f32>,
        sample_rate: u32,
    },
    /// Entry that could not be parsed; fails alone
    Rejected { id: String, reason: String },
}

impl BatchItem {
    pub fn id(&self) -> &str {
        match self {
            BatchItem::Signal { id, .. } | BatchItem::Rejected { id, .. } => id,
        }
    }

    /// Parse a raw JSON entry; entries without an id become `song_{index}`
    pub fn from_json(index: usize, value: serde_json::Value) -> Self {
        let id = ["id", "song_id"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("song_{}", index));

        match serde_json::from_value::<ClassifyRequest>(value) {
            Ok(request) => BatchItem::Signal {
                id,
                samples: request.signal,
                sample_rate: request.sample_rate,
            },
            Err(e) => BatchItem::Rejected {
                id,
                reason: e.to_string(),
            },
        }
    }
}

pub struct BatchOrchestrator {
    engine: Arc<ClassificationEngine>,
    stats: Arc<ServiceStats>,
    workers: usize,
    worker_permits: Arc<Semaphore>,
    admission: Arc<Semaphore>,
    max_items: usize,
    max_pending: usize,
    item_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        engine: Arc<ClassificationEngine>,
        stats: Arc<ServiceStats>,
        config: &BatchConfig,
    ) -> Self {
        let workers = config.effective_workers();
        Self {
            engine,
            stats,
            workers,
            worker_permits: Arc::new(Semaphore::new(workers)),
            admission: Arc::new(Semaphore::new(config.max_pending_batches)),
            max_items: config.max_items,
            max_pending: config.max_pending_batches,
            item_timeout: Duration::from_secs(config.item_timeout_secs),
        }
    }

    /// Override the per-item budget (sub-second budgets for tests and benches)
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn max_pending_batches(&self) -> usize {
        self.max_pending
    }

    pub fn item_timeout(&self) -> Duration {
        self.item_timeout
    }

    /// Batches currently admitted
    pub fn pending_batches(&self) -> usize {
        self.max_pending - self.admission.available_permits()
    }

    /// Workers currently busy
    pub fn busy_workers(&self) -> usize {
        self.workers - self.worker_permits.available_permits()
    }

    /// Classify a whole batch
    pub async fn run(&self, items: Vec<BatchItem>) -> Result<BatchResult, BatchError> {
        if items.is_empty() {
            return Err(BatchError::Empty);
        }
        if items.len() > self.max_items {
            return Err(BatchError::TooLarge {
                count: items.len(),
                max: self.max_items,
            });
        }
        if !self.engine.is_ready() {
            return Err(BatchError::ModelNotLoaded);
        }

        let _admission = match self.admission.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.record_batch_rejected();
                warn!(limit = self.max_pending, "Batch rejected: admission limit reached");
                return Err(BatchError::Busy {
                    limit: self.max_pending,
                });
            }
        };

        let total = items.len();
        let started = Instant::now();
        info!(items = total, workers = self.workers, "Batch started");

        let results: Vec<ClassificationResult> = stream::iter(items)
            .map(|item| self.run_item(item))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let batch = BatchResult::from_results(results);
        self.stats.record_batch_completed();
        info!(
            total = batch.summary.total,
            successful = batch.summary.successful,
            failed = batch.summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch completed"
        );
        Ok(batch)
    }

    /// Classify one signal through the shared worker pool
    pub async fn classify_one(
        &self,
        id: String,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<ClassificationResult, BatchError> {
        if !self.engine.is_ready() {
            return Err(BatchError::ModelNotLoaded);
        }
        Ok(self
            .run_item(BatchItem::Signal {
                id,
                samples,
                sample_rate,
            })
            .await)
    }

    async fn run_item(&self, item: BatchItem) -> ClassificationResult {
        let result = match item {
            BatchItem::Rejected { id, reason } => {
                debug!(song_id = %id, reason = %reason, "Rejected malformed batch entry");
                ClassificationResult::failed(
                    id,
                    ClassifyError::InvalidSignal(reason).to_result_message(),
                )
            }
            BatchItem::Signal {
                id,
                samples,
                sample_rate,
            } => self.execute(id, samples, sample_rate).await,
        };
        self.stats.record_item(result.success);
        result
    }

    async fn execute(&self, id: String, samples: Vec<f32>, sample_rate: u32) -> ClassificationResult {
        let permit = match self.worker_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ClassificationResult::failed(
                    id,
                    ClassifyError::ClassificationFailed("worker pool closed".to_string())
                        .to_result_message(),
                )
            }
        };

        let cancel = CancellationToken::new();
        let engine = self.engine.clone();
        let task_cancel = cancel.clone();
        let task_id = id.clone();
        // The permit lives as long as the blocking work, not the waiter
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine.classify_samples(&task_id, samples, sample_rate, &task_cancel)
        });

        match tokio::time::timeout(self.item_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!(song_id = %id, error = %join_error, "Classification worker panicked");
                ClassificationResult::failed(
                    id,
                    ClassifyError::FeatureExtractionFailed(format!("worker failed: {}", join_error))
                        .to_result_message(),
                )
            }
            Err(_) => {
                cancel.cancel();
                warn!(
                    song_id = %id,
                    timeout_secs = self.item_timeout.as_secs_f64(),
                    "Item timed out"
                );
                ClassificationResult::failed(
                    id,
                    ClassifyError::ItemTimeout(self.item_timeout).to_result_message(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::mock::{ConstantExtractor, StallingExtractor};
    use crate::features::{FeatureExtractor, FEATURE_COUNT};
    use crate::model::ModelBundle;
    use crate::signal::{ResampleMethod, SignalConditioner};
    use serde_json::json;
    use crate::features::{ExtractionError, FeatureVector};
    use crate::signal::ConditionedSignal;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bundle() -> Arc<ModelBundle> {
        let artifact = json!({
            "format_version": 1,
            "model_type": "random_forest",
            "feature_names": ["tempo"],
            "selected_feature_names": ["tempo"],
            "label_map": {"0": "Christian", "1": "Secular"},
            "transform_chain": [
                {"type": "variance_threshold", "support": [true]},
                {"type": "standard_scaler", "mean": [0.0], "scale": [1.0]},
                {"type": "select_k_best", "support": [true]}
            ],
            "classifier": {
                "n_classes": 2,
                "classes": [0, 1],
                "trees": [{
                    "children_left": [-1],
                    "children_right": [-1],
                    "feature": [-2],
                    "threshold": [-2.0],
                    "value": [[1.0, 3.0]]
                }]
            }
        });
        Arc::new(ModelBundle::from_json_str(&artifact.to_string()).unwrap())
    }

    fn orchestrator(extractor: Arc<dyn FeatureExtractor>, config: BatchConfig) -> BatchOrchestrator {
        let engine = ClassificationEngine::new(
            Some(bundle()),
            SignalConditioner::new(8000, 800, ResampleMethod::Linear),
            extractor,
        );
        BatchOrchestrator::new(Arc::new(engine), Arc::new(ServiceStats::new()), &config)
    }

    fn signal(id: &str, len: usize) -> BatchItem {
        BatchItem::Signal {
            id: id.to_string(),
            samples: vec![0.1; len],
            sample_rate: 8000,
        }
    }

    /// Ignores cancellation and records the most calls seen running at once
    struct OverlapExtractor {
        hold: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FeatureExtractor for OverlapExtractor {
        fn name(&self) -> &'static str {
            "overlap"
        }

        fn extract(
            &self,
            _signal: &ConditionedSignal,
            _cancel: &CancellationToken,
        ) -> Result<FeatureVector, ExtractionError> {
            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(self.hold);
            self.active.fetch_sub(1, Ordering::SeqCst);
            FeatureVector::from_values([0.0; FEATURE_COUNT])
        }
    }

    async fn wait_until_idle(orch: &BatchOrchestrator) -> bool {
        for _ in 0..200 {
            if orch.busy_workers() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn pool(workers: usize) -> BatchConfig {
        BatchConfig {
            workers,
            ..BatchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_empty_middle_item_fails_alone() {
        let orch = orchestrator(Arc::new(ConstantExtractor([0.0; FEATURE_COUNT])), pool(2));
        let batch = orch
            .run(vec![signal("one", 100), signal("two", 0), signal("three", 100)])
            .await
            .unwrap();

        assert_eq!(batch.summary.total, 3);
        assert_eq!(batch.summary.successful, 2);
        assert_eq!(batch.summary.failed, 1);
        let two = batch.results.iter().find(|r| r.song_id == "two").unwrap();
        assert!(two.error.as_deref().unwrap().starts_with("EMPTY_SIGNAL"));
    }

    #[tokio::test]
    async fn test_large_batch_preserves_ids() {
        let orch = orchestrator(Arc::new(ConstantExtractor([0.0; FEATURE_COUNT])), pool(4));
        let items: Vec<BatchItem> = (0..200).map(|i| signal(&format!("s{}", i), 50)).collect();
        let expected: HashSet<String> = items.iter().map(|i| i.id().to_string()).collect();

        let batch = orch.run(items).await.unwrap();

        let got: HashSet<String> = batch.results.iter().map(|r| r.song_id.clone()).collect();
        assert_eq!(batch.results.len(), 200);
        assert_eq!(got, expected);
        assert_eq!(batch.summary.successful + batch.summary.failed, 200);
    }

    #[tokio::test]
    async fn test_stuck_item_times_out_without_blocking_others() {
        let orch = orchestrator(
            Arc::new(StallingExtractor(Duration::from_secs(30))),
            pool(2),
        )
        .with_item_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let batch = orch.run(vec![signal("a", 10), signal("b", 10)]).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(batch.summary.failed, 2);
        assert!(batch
            .results
            .iter()
            .all(|r| r.error.as_deref().unwrap().starts_with("ITEM_TIMEOUT")));
        assert!(
            wait_until_idle(&orch).await,
            "timed-out items release their permits once cancelled"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_work_still_holds_its_worker() {
        // Given: one worker and an extractor that outlives the item budget
        let extractor = Arc::new(OverlapExtractor {
            hold: Duration::from_millis(300),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let orch = orchestrator(extractor.clone(), pool(1))
            .with_item_timeout(Duration::from_millis(100));

        // When: three items time out back to back
        let batch = orch
            .run(vec![signal("a", 10), signal("b", 10), signal("c", 10)])
            .await
            .unwrap();

        // Then: every item failed and no two extractions ever overlapped
        assert_eq!(batch.summary.failed, 3);
        assert!(wait_until_idle(&orch).await);
        assert_eq!(extractor.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_admission_limit_rejects_extra_batches() {
        let config = BatchConfig {
            workers: 1,
            max_pending_batches: 1,
            ..BatchConfig::default()
        };
        let orch = Arc::new(
            orchestrator(Arc::new(StallingExtractor(Duration::from_millis(500))), config)
                .with_item_timeout(Duration::from_secs(5)),
        );

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run(vec![signal("slow", 10)]).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = orch.run(vec![signal("late", 10)]).await;
        assert_eq!(second.unwrap_err(), BatchError::Busy { limit: 1 });

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.summary.successful, 1);
        assert_eq!(orch.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_request_level_errors() {
        let orch = orchestrator(
            Arc::new(ConstantExtractor([0.0; FEATURE_COUNT])),
            BatchConfig {
                max_items: 2,
                ..pool(1)
            },
        );
        assert_eq!(orch.run(vec![]).await.unwrap_err(), BatchError::Empty);
        assert_eq!(
            orch.run(vec![signal("a", 1), signal("b", 1), signal("c", 1)])
                .await
                .unwrap_err(),
            BatchError::TooLarge { count: 3, max: 2 }
        );
    }

    #[tokio::test]
    async fn test_missing_model_rejects_batch() {
        let engine = ClassificationEngine::new(
            None,
            SignalConditioner::new(8000, 800, ResampleMethod::Linear),
            Arc::new(ConstantExtractor([0.0; FEATURE_COUNT])),
        );
        let orch = BatchOrchestrator::new(Arc::new(engine), Arc::new(ServiceStats::new()), &pool(1));
        assert_eq!(
            orch.run(vec![signal("a", 1)]).await.unwrap_err(),
            BatchError::ModelNotLoaded
        );
    }

    #[test]
    fn test_batch_item_parsing() {
        let ok = BatchItem::from_json(0, json!({"audio_data": [0.1, 0.2], "song_id": "x"}));
        assert!(matches!(ok, BatchItem::Signal { ref id, .. } if id == "x"));

        let unnamed = BatchItem::from_json(4, json!({"signal": [0.1]}));
        assert_eq!(unnamed.id(), "song_4");

        let bad = BatchItem::from_json(2, json!({"signal": "not numbers"}));
        assert!(matches!(bad, BatchItem::Rejected { .. }));
        assert_eq!(bad.id(), "song_2");

        let scalar = BatchItem::from_json(7, json!(42));
        assert_eq!(scalar.id(), "song_7");
    }
}
