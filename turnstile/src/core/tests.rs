use super::{
    BucketState, JsonCache, LimiterError, MemoryStore, PolicyError, RateLimiter, RatePolicy,
    ScriptRef, Store, StoreError, TokenBucket, Verdict,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn at(secs: f64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs_f64(secs)
}

/// Store that fails on demand and counts calls
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_register: AtomicBool,
    fail_run: AtomicBool,
    registrations: AtomicUsize,
    runs: AtomicUsize,
}

#[async_trait]
impl Store for FlakyStore {
    async fn register_script(&self) -> Result<ScriptRef, StoreError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.register_script().await
    }

    async fn run_script(
        &self,
        script: &ScriptRef,
        key: &str,
        bucket: TokenBucket,
        now: f64,
        requested: u32,
    ) -> Result<bool, StoreError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_millis(250)));
        }
        self.inner
            .run_script(script, key, bucket, now, requested)
            .await
    }

    async fn inspect(&self, key: &str) -> Result<Option<BucketState>, StoreError> {
        self.inner.inspect(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.set_ex(key, value, ttl).await
    }
}

#[tokio::test]
async fn test_five_per_minute_scenario() {
    let limiter = RateLimiter::new(MemoryStore::new());
    let rate = 5.0 / 60.0;

    for i in 0..5 {
        assert!(
            limiter.allow_at("rl:login:a", rate, 5, 1, at(0.0)).await,
            "Request {} should be allowed",
            i + 1
        );
    }
    assert!(!limiter.allow_at("rl:login:a", rate, 5, 1, at(0.0)).await);

    // One minute later the bucket has fully refilled
    assert!(limiter.allow_at("rl:login:a", rate, 5, 1, at(60.0)).await);
    let state = limiter.inspect("rl:login:a").await.unwrap().unwrap();
    assert!((state.tokens - 4.0).abs() < 1e-9);
    assert_eq!(state.last_refill_at, 60.0);
}

#[tokio::test]
async fn test_state_written_back_on_denial() {
    let limiter = RateLimiter::new(MemoryStore::new());
    let bucket = TokenBucket::new(1.0, 10);

    // Drain the bucket at t=1000
    for _ in 0..10 {
        assert_eq!(
            limiter.verdict("k", bucket, 1, at(1_000.0)).await,
            Verdict::Allowed
        );
    }

    // Five seconds later only five tokens are back; asking for six is denied
    // but the refill is recorded
    assert_eq!(
        limiter.verdict("k", bucket, 6, at(1_005.0)).await,
        Verdict::Denied
    );
    let state = limiter.inspect("k").await.unwrap().unwrap();
    assert_eq!(state.tokens, 5.0);
    assert_eq!(state.last_refill_at, 1_005.0);

    assert_eq!(
        limiter.verdict("k", bucket, 5, at(1_005.0)).await,
        Verdict::Allowed
    );
}

#[tokio::test]
async fn test_monotonic_refill() {
    let limiter = RateLimiter::new(MemoryStore::new());
    let bucket = TokenBucket::new(0.5, 3);

    for _ in 0..3 {
        assert!(limiter.check("k", bucket, 1, at(10.0)).await.unwrap());
    }
    assert!(!limiter.check("k", bucket, 1, at(10.0)).await.unwrap());

    // capacity / rate = 6 seconds
    let refilled = at(16.0);
    for _ in 0..3 {
        assert!(limiter.check("k", bucket, 1, refilled).await.unwrap());
    }
    assert!(!limiter.check("k", bucket, 1, refilled).await.unwrap());
}

#[tokio::test]
async fn test_independent_keys() {
    let limiter = RateLimiter::new(MemoryStore::new());

    assert!(limiter.allow_at("rl:login:A", 0.1, 1, 1, at(5.0)).await);
    assert!(!limiter.allow_at("rl:login:A", 0.1, 1, 1, at(5.0)).await);

    assert!(limiter.allow_at("rl:login:B", 0.1, 1, 1, at(5.0)).await);
    assert!(limiter.allow_at("rl:search:A", 0.1, 1, 1, at(5.0)).await);
}

#[tokio::test]
async fn test_fail_open_when_store_unreachable() {
    let store = FlakyStore::default();
    store.fail_register.store(true, Ordering::SeqCst);
    let limiter = RateLimiter::new(store);

    // Any policy, any number of calls: always allowed
    for capacity in [1, 5, 100] {
        for _ in 0..20 {
            assert!(limiter.allow_at("k", 0.01, capacity, 1, at(0.0)).await);
        }
    }

    assert_eq!(
        limiter.verdict("k", TokenBucket::new(0.01, 1), 1, at(0.0)).await,
        Verdict::FailedOpen
    );
    assert!(matches!(
        limiter.check("k", TokenBucket::new(0.01, 1), 1, at(0.0)).await,
        Err(LimiterError::Store(StoreError::Unavailable(_)))
    ));
}

#[tokio::test]
async fn test_fail_open_on_invocation_error() {
    let store = FlakyStore::default();
    store.fail_run.store(true, Ordering::SeqCst);
    let limiter = RateLimiter::new(store);

    for _ in 0..10 {
        assert!(limiter.allow_at("k", 1.0, 1, 1, at(0.0)).await);
    }

    // One attempt per call, no retries
    assert_eq!(limiter.store().runs.load(Ordering::SeqCst), 10);
    // The script reference stays cached across invocation failures
    assert_eq!(limiter.store().registrations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_registration_is_not_cached() {
    let store = FlakyStore::default();
    store.fail_register.store(true, Ordering::SeqCst);
    let limiter = RateLimiter::new(store);

    assert!(limiter.allow_at("k", 1.0, 1, 1, at(0.0)).await);
    assert!(limiter.allow_at("k", 1.0, 1, 1, at(0.0)).await);
    assert_eq!(limiter.store().registrations.load(Ordering::SeqCst), 2);
    assert_eq!(limiter.store().runs.load(Ordering::SeqCst), 0);

    // Store recovers: the next call registers and limits normally
    limiter.store().fail_register.store(false, Ordering::SeqCst);
    assert!(limiter.allow_at("k", 1.0, 1, 1, at(0.0)).await);
    assert!(!limiter.allow_at("k", 1.0, 1, 1, at(0.0)).await);
    assert_eq!(limiter.store().registrations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_script_reregistered_after_flush() {
    let limiter = RateLimiter::new(MemoryStore::new());
    let bucket = TokenBucket::new(1.0, 1);

    assert_eq!(
        limiter.verdict("k", bucket, 1, at(0.0)).await,
        Verdict::Allowed
    );

    // Store restart forgets the script: this call fails open...
    limiter.store().flush_scripts();
    assert_eq!(
        limiter.verdict("k", bucket, 1, at(0.0)).await,
        Verdict::FailedOpen
    );

    // ...and the next one registers again and sees the real bucket
    assert_eq!(
        limiter.verdict("k", bucket, 1, at(0.0)).await,
        Verdict::Denied
    );
}

#[tokio::test]
async fn test_invalid_parameters_fail_open() {
    let limiter = RateLimiter::new(MemoryStore::new());

    for bucket in [
        TokenBucket::new(0.0, 5),
        TokenBucket::new(-1.0, 5),
        TokenBucket::new(f64::NAN, 5),
        TokenBucket::new(1.0, 0),
        // Subnormal and tiny rates would overflow the idle expiry
        TokenBucket::new(1e-320, 5),
        TokenBucket::new(1e-12, 5),
    ] {
        assert!(matches!(
            limiter.check("k", bucket, 1, at(0.0)).await,
            Err(LimiterError::InvalidPolicy(_))
        ));
        assert_eq!(
            limiter.verdict("k", bucket, 1, at(0.0)).await,
            Verdict::FailedOpen
        );
    }

    assert!(matches!(
        limiter.check("k", TokenBucket::new(1.0, 5), 0, at(0.0)).await,
        Err(LimiterError::InvalidPolicy(_))
    ));
    // Nothing was written
    assert!(limiter.inspect("k").await.unwrap().is_none());
}

#[test]
fn test_slowest_policy_is_accepted() {
    let policy = RatePolicy::per_minute("archive", 1, u32::MAX).unwrap();
    let bucket = policy.bucket();
    assert!(crate::core::policy::validate(bucket.rate(), bucket.capacity(), 1).is_ok());

    assert!(matches!(
        crate::core::policy::validate(1e-320, 5, 1),
        Err(PolicyError::RateTooSlow { capacity: 5, .. })
    ));
}

#[tokio::test]
async fn test_concurrent_requests() {
    let limiter = Arc::new(RateLimiter::new(MemoryStore::new()));
    let now = at(1_000.0);

    let mut handles = vec![];
    for _ in 0..20 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter.allow_at("concurrent_test", 0.001, 10, 1, now).await
        }));
    }

    let mut allowed_count = 0;
    for h in handles {
        if h.await.unwrap() {
            allowed_count += 1;
        }
    }

    // Exactly the burst capacity gets through
    assert_eq!(allowed_count, 10);
}

#[tokio::test]
async fn test_wall_clock_allow() {
    let limiter = RateLimiter::new(MemoryStore::new());

    assert!(limiter.allow("k", 1.0 / 60.0, 2).await);
    assert!(limiter.allow("k", 1.0 / 60.0, 2).await);
    assert!(!limiter.allow("k", 1.0 / 60.0, 2).await);
    assert!(!limiter.allow_n("other", 1.0 / 60.0, 2, 3).await);
}

#[tokio::test]
async fn test_json_cache_round_trip_and_expiry() {
    let cache = JsonCache::new(Arc::new(MemoryStore::new()));

    cache.set("stats", &serde_json::json!({"urls": 12})).await;
    let stats: Option<serde_json::Value> = cache.get("stats").await;
    assert_eq!(stats, Some(serde_json::json!({"urls": 12})));

    cache
        .set_with_ttl("short", &"value", Duration::from_millis(20))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get::<String>("short").await, None);

    // Wrong type decodes to a miss rather than an error
    assert_eq!(cache.get::<u32>("stats").await, None);
}

#[tokio::test]
async fn test_json_cache_swallows_store_errors() {
    let store = Arc::new(FlakyStore::default());
    let cache = JsonCache::new(Arc::clone(&store));

    store.fail_run.store(true, Ordering::SeqCst);
    cache.set("k", &1u32).await;
    assert_eq!(cache.get::<u32>("k").await, None);

    store.fail_run.store(false, Ordering::SeqCst);
    cache.set("k", &1u32).await;
    assert_eq!(cache.get::<u32>("k").await, Some(1));
}
