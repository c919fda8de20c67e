//! One run of the pipeline: fan out per city, join, aggregate, write once.

use std::{fmt, sync::Arc, time::Duration};
use tokio::task::JoinSet;

use crate::{
    batch::{BatchWriter, FailurePolicy, admit},
    config::Config,
    error::{PipelineError, RunError},
    model::{City, NormalizedRecord},
    source::{ObservationSource, RetryPolicy, fetch_city},
    storage::{ObjectKey, ObjectStore},
    transform::normalize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    FanOut,
    AwaitingAll,
    Aggregating,
    Writing,
    Done,
    Failed,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;

        matches!(
            (self, next),
            (Idle, FanOut)
                | (FanOut, AwaitingAll)
                | (AwaitingAll, Aggregating | Failed)
                | (Aggregating, Writing)
                | (Writing, Done | Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::FanOut => "fan-out",
            RunState::AwaitingAll => "awaiting-all",
            RunState::Aggregating => "aggregating",
            RunState::Writing => "writing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Successful run summary.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub destination: ObjectKey,
    pub rows: usize,
    /// Cities left out under the lenient policy.
    pub failures: Vec<PipelineError>,
    pub states: Vec<RunState>,
}

#[derive(Debug)]
struct StateLog(Vec<RunState>);

impl StateLog {
    fn new() -> Self {
        Self(vec![RunState::Idle])
    }

    fn current(&self) -> RunState {
        self.0.last().copied().unwrap_or(RunState::Idle)
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal transition {} -> {next}",
            self.current()
        );
        tracing::info!(from = %self.current(), to = %next, "run state");
        self.0.push(next);
    }
}

/// Gate, fetch and normalize one city.
pub async fn observe(
    source: &dyn ObservationSource,
    city: &City,
    retry: RetryPolicy,
) -> Result<NormalizedRecord, PipelineError> {
    let raw = fetch_city(source, city, retry).await?;
    normalize(raw, city)
}

#[derive(Debug, Clone)]
pub struct PipelineRunner {
    source: Arc<dyn ObservationSource>,
    store: Arc<dyn ObjectStore>,
    cities: Vec<City>,
    bucket: String,
    retry: RetryPolicy,
    timeout: Duration,
    policy: FailurePolicy,
}

impl PipelineRunner {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        store: Arc<dyn ObjectStore>,
        cities: Vec<City>,
        bucket: impl Into<String>,
    ) -> Self {
        let defaults = Config::default();
        Self {
            source,
            store,
            cities,
            bucket: bucket.into(),
            retry: defaults.fetch.into(),
            timeout: defaults.run.timeout(),
            policy: defaults.run.failure_policy,
        }
    }

    /// Runner for the cities, bucket and budgets in `config`.
    pub fn from_config(
        config: &Config,
        source: Arc<dyn ObservationSource>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self::new(source, store, config.cities.clone(), config.storage.bucket.clone())
            .retry(config.fetch.into())
            .timeout(config.run.timeout())
            .policy(config.run.failure_policy)
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Gate, fetch and normalize a single city without writing anything.
    pub async fn observe(&self, city: &City) -> Result<NormalizedRecord, PipelineError> {
        observe(self.source.as_ref(), city, self.retry).await
    }

    /// Execute one run. At most one object is written.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let mut states = StateLog::new();

        states.advance(RunState::FanOut);
        let mut tasks = JoinSet::new();
        for (index, city) in self.cities.iter().cloned().enumerate() {
            let source = Arc::clone(&self.source);
            let retry = self.retry;
            tasks.spawn(async move {
                let result = observe(source.as_ref(), &city, retry).await;
                (index, result)
            });
        }

        states.advance(RunState::AwaitingAll);
        // Dropping the join set on timeout aborts the remaining city tasks.
        let results = match tokio::time::timeout(self.timeout, self.join_all(tasks)).await {
            Ok(results) => results,
            Err(_) => {
                states.advance(RunState::Failed);
                let err = PipelineError::RunTimeout(self.timeout);
                tracing::error!(error = %err, "run failed");
                return Err(err.into());
            }
        };

        let admitted = match admit(results, self.policy) {
            Ok(admitted) => admitted,
            Err(err) => {
                states.advance(RunState::Failed);
                tracing::error!(error = %err, policy = %self.policy, "run failed");
                return Err(err);
            }
        };

        states.advance(RunState::Aggregating);
        let aggregated = admitted.into_batch();

        states.advance(RunState::Writing);
        let writer = BatchWriter::new(Arc::clone(&self.store), self.bucket.clone());
        let destination = match writer.write(&aggregated.batch).await {
            Ok(key) => key,
            Err(err) => {
                states.advance(RunState::Failed);
                tracing::error!(error = %err, "run failed");
                return Err(err.into());
            }
        };

        states.advance(RunState::Done);
        tracing::info!(
            destination = %destination,
            rows = aggregated.batch.len(),
            skipped = aggregated.failures.len(),
            "run finished"
        );

        Ok(RunReport {
            destination,
            rows: aggregated.batch.len(),
            failures: aggregated.failures,
            states: states.0,
        })
    }

    /// Run, retrying the whole run up to `retries` more times after a failure.
    pub async fn run_with_retries(
        &self,
        retries: u32,
        delay: Duration,
    ) -> Result<RunReport, RunError> {
        let mut attempt = 0;

        loop {
            match self.run().await {
                Ok(report) => return Ok(report),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %err,
                        attempt,
                        retries,
                        "run failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Barrier: wait for every city task and slot its result by city index.
    async fn join_all(
        &self,
        mut tasks: JoinSet<(usize, Result<NormalizedRecord, PipelineError>)>,
    ) -> Vec<Result<NormalizedRecord, PipelineError>> {
        let mut slots: Vec<Option<Result<NormalizedRecord, PipelineError>>> =
            vec![None; self.cities.len()];

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    let city = &self.cities[index];
                    match &result {
                        Ok(_) => tracing::info!(city = %city, "city ready"),
                        Err(err) => tracing::warn!(city = %city, error = %err, "city failed"),
                    }
                    slots[index] = Some(result);
                }
                Err(err) => tracing::error!(error = %err, "city task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(&self.cities)
            .map(|(slot, city)| {
                slot.unwrap_or_else(|| {
                    Err(PipelineError::FetchFailed {
                        city: city.to_string(),
                        attempts: 0,
                        reason: "task did not complete".to_string(),
                    })
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::{ScriptedSource, Step, observation};
    use crate::storage::testing::MemoryObjectStore;

    const CITIES: [&str; 3] = ["Paris", "Seoul", "Tokyo"];

    fn runner(source: ScriptedSource, store: &Arc<MemoryObjectStore>) -> PipelineRunner {
        PipelineRunner::new(
            Arc::new(source),
            store.clone(),
            CITIES.iter().copied().map(City::from).collect(),
            "weather-data-etl-s3",
        )
        .retry(RetryPolicy { max_attempts: 2, delay: Duration::from_millis(1) })
        .timeout(Duration::from_secs(5))
    }

    fn all_ok() -> ScriptedSource {
        CITIES
            .iter()
            .fold(ScriptedSource::new(), |s, c| s.script(c, vec![Step::Ok(observation(c, 290.0))]))
    }

    fn city_column(csv: &str) -> Vec<String> {
        csv.lines().skip(1).map(|l| l.split(',').next().unwrap().to_string()).collect()
    }

    #[tokio::test]
    async fn rows_follow_city_order_not_completion_order() {
        let source = all_ok()
            .delay("Paris", Duration::from_millis(60))
            .delay("Seoul", Duration::from_millis(30));
        let store = Arc::new(MemoryObjectStore::default());

        let report = runner(source, &store).run().await.unwrap();

        assert_eq!(report.rows, 3);
        assert!(report.failures.is_empty());
        assert!(report.destination.name.starts_with("current_weather_data_multi_city_"));
        assert_eq!(report.destination.bucket, "weather-data-etl-s3");
        assert_eq!(store.put_count(), 1);
        assert_eq!(city_column(&store.body(0)), CITIES);
        assert_eq!(
            report.states,
            [
                RunState::Idle,
                RunState::FanOut,
                RunState::AwaitingAll,
                RunState::Aggregating,
                RunState::Writing,
                RunState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn strict_run_writes_nothing_when_a_gate_never_opens() {
        let source = all_ok().script("Seoul", vec![Step::NotReady]);
        let store = Arc::new(MemoryObjectStore::default());
        let runner = runner(source, &store);

        let err = runner.run().await.unwrap_err();

        match err {
            RunError::Cities { total, failures } => {
                assert_eq!(total, 3);
                assert_eq!(failures.len(), 1);
                assert!(matches!(&failures[0], PipelineError::SourceUnavailable { city, .. } if city == "Seoul"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn lenient_run_writes_remaining_cities() {
        let source = all_ok().script("Seoul", vec![Step::NotReady]);
        let store = Arc::new(MemoryObjectStore::default());

        let report =
            runner(source, &store).policy(FailurePolicy::Lenient).run().await.unwrap();

        assert_eq!(report.rows, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].city(), Some("Seoul"));
        assert_eq!(city_column(&store.body(0)), ["Paris", "Tokyo"]);
    }

    #[tokio::test]
    async fn schema_mismatch_does_not_block_other_cities() {
        let source = all_ok().script("Tokyo", vec![Step::Malformed]);
        let store = Arc::new(MemoryObjectStore::default());

        let report =
            runner(source, &store).policy(FailurePolicy::Lenient).run().await.unwrap();

        assert_eq!(report.rows, 2);
        assert!(matches!(
            &report.failures[0],
            PipelineError::SchemaMismatch { city, .. } if city == "Tokyo"
        ));
    }

    const PARIS_WITHOUT_COUNTRY: &str = r#"{
        "name": "Paris",
        "sys": {"sunrise": 1699945000, "sunset": 1699978000},
        "weather": [{"description": "light rain"}],
        "main": {"temp": 300.15, "feels_like": 299.0, "temp_min": 298.0, "temp_max": 301.0,
                 "humidity": 40, "pressure": 1009},
        "wind": {"speed": 5.5},
        "dt": 1700000000,
        "timezone": 3600
    }"#;

    #[tokio::test]
    async fn payload_without_country_fails_only_that_city() {
        let source = all_ok().script("Paris", vec![Step::Body(PARIS_WITHOUT_COUNTRY)]);
        let store = Arc::new(MemoryObjectStore::default());

        let report =
            runner(source, &store).policy(FailurePolicy::Lenient).run().await.unwrap();

        assert_eq!(report.rows, 2);
        assert_eq!(
            report.failures,
            [PipelineError::SchemaMismatch {
                city: "Paris".into(),
                reason: "missing field `country`".into(),
            }]
        );
        assert_eq!(city_column(&store.body(0)), ["Seoul", "Tokyo"]);
    }

    #[tokio::test]
    async fn payload_without_country_fails_strict_run() {
        let source = all_ok().script("Paris", vec![Step::Body(PARIS_WITHOUT_COUNTRY)]);
        let store = Arc::new(MemoryObjectStore::default());
        let runner = runner(source, &store);

        let err = runner.run().await.unwrap_err();

        match err {
            RunError::Cities { total, failures } => {
                assert_eq!(total, 3);
                assert!(matches!(
                    &failures[..],
                    [PipelineError::SchemaMismatch { city, .. }] if city == "Paris"
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn panicked_city_task_is_attributed_to_its_city() {
        let source = all_ok().script("Seoul", vec![Step::Panic]);
        let store = Arc::new(MemoryObjectStore::default());

        let report =
            runner(source, &store).policy(FailurePolicy::Lenient).run().await.unwrap();

        assert_eq!(report.rows, 2);
        assert_eq!(
            report.failures,
            [PipelineError::FetchFailed {
                city: "Seoul".into(),
                attempts: 0,
                reason: "task did not complete".into(),
            }]
        );
        assert_eq!(city_column(&store.body(0)), ["Paris", "Tokyo"]);
    }

    #[tokio::test]
    async fn timeout_fails_run_without_writing() {
        let source = all_ok().delay("Tokyo", Duration::from_secs(30));
        let store = Arc::new(MemoryObjectStore::default());

        let err = runner(source, &store)
            .timeout(Duration::from_millis(50))
            .run()
            .await
            .unwrap_err();

        assert_eq!(err, RunError::Fatal(PipelineError::RunTimeout(Duration::from_millis(50))));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn write_failure_is_fatal() {
        let store = Arc::new(MemoryObjectStore::failing("quota exceeded"));

        let err = runner(all_ok(), &store).run().await.unwrap_err();

        assert!(matches!(
            err,
            RunError::Fatal(PipelineError::WriteFailed { ref reason, .. }) if reason == "quota exceeded"
        ));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn run_level_retry_recovers_from_failed_run() {
        // One attempt per city per run, so Seoul's first gate failure fails run one.
        let source = all_ok()
            .script("Seoul", vec![Step::NotReady, Step::Ok(observation("Seoul", 280.0))]);
        let store = Arc::new(MemoryObjectStore::default());
        let runner = runner(source, &store)
            .retry(RetryPolicy { max_attempts: 1, delay: Duration::from_millis(1) });

        let report = runner.run_with_retries(2, Duration::from_millis(1)).await.unwrap();

        assert_eq!(report.rows, 3);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn run_level_retry_gives_up_after_budget() {
        let source = all_ok().script("Seoul", vec![Step::Transient]);
        let store = Arc::new(MemoryObjectStore::default());

        let err = runner(source, &store)
            .run_with_retries(2, Duration::from_millis(1))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cities { .. }));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn observe_single_city() {
        let store = Arc::new(MemoryObjectStore::default());
        let record = runner(all_ok(), &store).observe(&City::from("Tokyo")).await.unwrap();

        assert_eq!(record.city, "Tokyo");
        assert!((record.temperature_c - 16.85).abs() < 1e-9);
        assert_eq!(store.put_count(), 0);
    }

    #[test]
    fn state_transitions() {
        use RunState::*;

        assert!(Idle.can_transition_to(FanOut));
        assert!(AwaitingAll.can_transition_to(Failed));
        assert!(Writing.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Writing));
        assert!(!Done.can_transition_to(Failed));
        assert!(!FanOut.can_transition_to(Done));
        assert!(!Aggregating.can_transition_to(Failed));
    }
}
