//! Concurrency tests for the policy cache
//!
//! Drives the public API from many tasks and threads at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lattice_policy_cache::{
    CompileError, FetchError, PolicyCache, PolicyCompiler, PolicyKey, PolicyProvider,
    PolicyResource, PolicySource, ReconcileOutcome, ReconcilerConfig,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Doc {
    text: String,
    version: String,
}

impl PolicyResource for Doc {
    fn revision(&self) -> Option<&str> {
        Some(&self.version)
    }
}

/// In-memory source of truth
#[derive(Default)]
struct MemorySource {
    docs: Mutex<HashMap<PolicyKey, Doc>>,
}

impl MemorySource {
    fn put(&self, key: &PolicyKey, text: &str, version: u32) {
        self.docs.lock().insert(
            key.clone(),
            Doc {
                text: text.to_string(),
                version: version.to_string(),
            },
        );
    }

    fn delete(&self, key: &PolicyKey) {
        self.docs.lock().remove(key);
    }
}

#[async_trait::async_trait]
impl PolicySource<Doc> for MemorySource {
    async fn fetch(&self, key: &PolicyKey) -> Result<Option<Doc>, FetchError> {
        tokio::task::yield_now().await;
        Ok(self.docs.lock().get(key).cloned())
    }
}

/// Compiles any text not starting with "!" into "<key>=<text>"
struct TextCompiler;

impl PolicyCompiler<Doc, String> for TextCompiler {
    fn compile(&self, key: &PolicyKey, resource: &Doc) -> Result<String, Vec<CompileError>> {
        if resource.text.starts_with('!') {
            return Err(vec![
                CompileError::parse("bang prefix"),
                CompileError::validation("unknown entity"),
            ]);
        }
        Ok(format!("{}={}", key, resource.text))
    }
}

fn setup() -> (Arc<MemorySource>, PolicyCache<Doc, String>) {
    let source = Arc::new(MemorySource::default());
    let cache = PolicyCache::new(
        source.clone(),
        Arc::new(TextCompiler),
        ReconcilerConfig::default(),
    );
    (source, cache)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_concurrent_readers_share_one_recompute() {
    let (source, cache) = setup();
    let reconciler = cache.reconciler();
    let cancel = CancellationToken::new();

    for name in ["c", "a", "b"] {
        let key = PolicyKey::namespaced("ns", name);
        source.put(&key, name, 1);
        reconciler.reconcile(&key, &cancel).await.unwrap();
    }

    let provider = cache.provider();
    let barrier = Arc::new(tokio::sync::Barrier::new(50));
    let handles: Vec<_> = (0..50)
        .map(|_| {
            let provider = provider.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                provider.compiled_policies(&CancellationToken::new())
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    let expected = vec![
        "ns/a=a".to_string(),
        "ns/b=b".to_string(),
        "ns/c=c".to_string(),
    ];
    for result in &results {
        assert_eq!(result, &expected);
    }
    assert_eq!(cache.metrics().snapshot_recomputes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reconciles_across_identities() {
    let (source, cache) = setup();
    let reconciler = cache.reconciler();

    let keys: Vec<PolicyKey> = (0..64)
        .map(|i| PolicyKey::namespaced("tenant", &format!("policy-{:02}", i)))
        .collect();
    for key in &keys {
        source.put(key, "permit", 1);
    }

    let handles: Vec<_> = keys
        .iter()
        .cloned()
        .map(|key| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                reconciler
                    .reconcile(&key, &CancellationToken::new())
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), ReconcileOutcome::Upserted);
    }

    let policies = cache
        .provider()
        .compiled_policies(&CancellationToken::new())
        .unwrap();
    let expected: Vec<String> = keys.iter().map(|k| format!("{}=permit", k)).collect();
    assert_eq!(policies, expected);
}

#[tokio::test]
async fn ordering_and_removal_scenarios() {
    let (source, cache) = setup();
    let reconciler = cache.reconciler();
    let provider = cache.provider();
    let cancel = CancellationToken::new();

    for name in ["c", "a", "b"] {
        let key = PolicyKey::namespaced("ns", name);
        source.put(&key, name, 1);
        reconciler.reconcile(&key, &cancel).await.unwrap();
    }
    assert_eq!(
        provider.compiled_policies(&cancel).unwrap(),
        vec!["ns/a=a", "ns/b=b", "ns/c=c"]
    );

    let b = PolicyKey::namespaced("ns", "b");
    source.delete(&b);
    assert_eq!(
        reconciler.reconcile(&b, &cancel).await.unwrap(),
        ReconcileOutcome::Removed
    );
    assert_eq!(
        provider.compiled_policies(&cancel).unwrap(),
        vec!["ns/a=a", "ns/c=c"]
    );
}

#[tokio::test]
async fn compile_failure_keeps_serving_last_good_policy() {
    let (source, cache) = setup();
    let reconciler = cache.reconciler();
    let provider = cache.provider();
    let cancel = CancellationToken::new();
    let key = PolicyKey::namespaced("ns", "x");

    source.put(&key, "v1", 1);
    reconciler.reconcile(&key, &cancel).await.unwrap();

    source.put(&key, "!broken", 2);
    let outcome = reconciler.reconcile(&key, &cancel).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Rejected { ref errors, .. } if errors.len() == 2));
    assert_eq!(provider.compiled_policies(&cancel).unwrap(), vec!["ns/x=v1"]);

    source.put(&key, "v3", 3);
    reconciler.reconcile(&key, &cancel).await.unwrap();
    assert_eq!(provider.compiled_policies(&cancel).unwrap(), vec!["ns/x=v3"]);
}

/// Readers racing a writer never see a snapshot older than the last
/// completed reconcile.
#[test]
fn readers_never_observe_stale_snapshot_after_reconcile_returns() {
    let (source, cache) = setup();
    let reconciler = cache.reconciler();
    let provider = cache.provider();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let committed = Arc::new(Mutex::new(0usize));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let provider = provider.clone();
            let done = done.clone();
            let committed = committed.clone();
            std::thread::spawn(move || {
                let cancel = CancellationToken::new();
                while !done.load(Ordering::Acquire) {
                    let floor = *committed.lock();
                    let policies = provider.compiled_policies(&cancel).unwrap();
                    assert!(
                        policies.len() >= floor,
                        "saw {} policies after {} were committed",
                        policies.len(),
                        floor
                    );
                    let mut sorted = policies.clone();
                    sorted.sort();
                    assert_eq!(policies, sorted);
                }
            })
        })
        .collect();

    let cancel = CancellationToken::new();
    for i in 0..200 {
        let key = PolicyKey::namespaced("ns", &format!("p{:03}", i));
        source.put(&key, "permit", 1);
        runtime
            .block_on(reconciler.reconcile(&key, &cancel))
            .unwrap();
        *committed.lock() = i + 1;
    }

    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(cache.store().len(), 200);
}
