//! Route entries and longest-prefix resolution.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::Mutex;

use crate::error::DispatchError;
use crate::host::{ApplicationHost, HostFactory, HostId, TenantRuntime, UnloadNotifier};

/// One registered tenant route.
///
/// Immutable after registration except for the tenant runtime slot, which
/// transitions between empty and created under `create_lock`.
pub struct RouteEntry {
    host: Option<String>,
    port: Option<u16>,
    path_prefix: String,
    physical_root: PathBuf,
    runtime: RwLock<Option<TenantRuntime>>,
    /// Spans the whole check-and-create sequence for this entry.
    create_lock: Mutex<()>,
}

impl RouteEntry {
    fn new(host: Option<String>, port: Option<u16>, path_prefix: String, physical_root: PathBuf) -> Self {
        Self {
            host,
            port,
            path_prefix,
            physical_root,
            runtime: RwLock::new(None),
            create_lock: Mutex::new(()),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn physical_root(&self) -> &Path {
        &self.physical_root
    }

    /// Whether this entry's context has been created.
    pub fn is_created(&self) -> bool {
        self.runtime.read().unwrap().is_some()
    }

    fn matches(&self, host: Option<&str>, port: u16, path: &str) -> bool {
        if let Some(expected) = &self.host {
            match host {
                Some(h) if expected.eq_ignore_ascii_case(h) => {}
                _ => return false,
            }
        }
        if let Some(expected) = self.port {
            if expected != port {
                return false;
            }
        }
        path.starts_with(&self.path_prefix)
    }

    fn created_runtime(&self) -> Option<TenantRuntime> {
        self.runtime.read().unwrap().clone()
    }

    /// Clear the runtime if it was created for `host`. Returns true on match.
    fn clear_if_host(&self, host: HostId) -> bool {
        let mut slot = self.runtime.write().unwrap();
        match slot.as_ref() {
            Some(rt) if rt.host.id() == host => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path_prefix", &self.path_prefix)
            .field("physical_root", &self.physical_root)
            .field("created", &self.is_created())
            .finish()
    }
}

/// A resolved tenant: the matched entry plus its (created) runtime.
#[derive(Clone)]
pub struct ResolvedTenant {
    pub entry: Arc<RouteEntry>,
    pub runtime: TenantRuntime,
}

/// Ordered set of tenant routes.
///
/// Registration happens at startup; resolution happens on every request.
pub struct RouteTable {
    entries: RwLock<Vec<Arc<RouteEntry>>>,
    factory: Arc<dyn HostFactory>,
    single_tenant: AtomicBool,
}

impl RouteTable {
    pub fn new(factory: Arc<dyn HostFactory>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            factory,
            single_tenant: AtomicBool::new(false),
        }
    }

    /// In single-tenant mode resolution always yields the sole entry.
    pub fn set_single_tenant(&self, single: bool) {
        self.single_tenant.store(single, Ordering::Relaxed);
    }

    pub fn is_single_tenant(&self) -> bool {
        self.single_tenant.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a tenant route. No de-duplication or conflict detection.
    ///
    /// The path prefix is normalized to carry a trailing '/'.
    pub fn register(
        &self,
        host: Option<String>,
        port: Option<u16>,
        path_prefix: &str,
        physical_root: impl Into<PathBuf>,
    ) {
        let mut prefix = path_prefix.to_string();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        let physical_root = physical_root.into();

        tracing::info!(
            host = host.as_deref().unwrap_or("any"),
            port = %port.map(|p| p.to_string()).unwrap_or_else(|| "any".into()),
            path_prefix = %prefix,
            physical_root = %physical_root.display(),
            "registering application"
        );

        let entry = Arc::new(RouteEntry::new(host, port, prefix, physical_root));
        self.entries.write().unwrap().push(entry);
    }

    /// Resolve a request to a tenant, creating its context on first use.
    ///
    /// Scans all entries and picks the longest matching path prefix;
    /// equal-length ties go to the most recently registered entry. When
    /// nothing matches and `default_to_root` is set, resolution retries
    /// once against `"/"`. `None` means no application is defined for the
    /// request and the caller must answer with a no-application condition.
    pub async fn resolve(
        self: &Arc<Self>,
        host: Option<&str>,
        port: u16,
        path: &str,
        default_to_root: bool,
    ) -> Result<Option<ResolvedTenant>, DispatchError> {
        let best = {
            let entries = self.entries.read().unwrap();
            if self.is_single_tenant() {
                entries.first().cloned()
            } else {
                // Reverse scan with a strictly-greater length requirement:
                // the most recent entry wins equal-length ties.
                let mut best: Option<Arc<RouteEntry>> = None;
                let mut best_len = 0usize;
                for entry in entries.iter().rev() {
                    let len = entry.path_prefix.len();
                    if len <= best_len || !entry.matches(host, port, path) {
                        continue;
                    }
                    best_len = len;
                    best = Some(entry.clone());
                }
                best
            }
        };

        match best {
            Some(entry) => {
                let runtime = self.get_or_create(&entry).await?;
                Ok(Some(ResolvedTenant { entry, runtime }))
            }
            None if default_to_root => {
                // Retry against the root path once; the cleared flag
                // prevents recursion.
                Box::pin(self.resolve(host, port, "/", false)).await
            }
            None => {
                tracing::debug!(
                    host = host.unwrap_or(""),
                    port,
                    path,
                    "no application defined"
                );
                Ok(None)
            }
        }
    }

    /// Create the entry's runtime at most once, under its exclusive lock.
    async fn get_or_create(self: &Arc<Self>, entry: &Arc<RouteEntry>) -> Result<TenantRuntime, DispatchError> {
        if let Some(runtime) = entry.created_runtime() {
            return Ok(runtime);
        }

        let _guard = entry.create_lock.lock().await;
        // Re-test after acquiring the lock: another first-request may have
        // created the context while we waited.
        if let Some(runtime) = entry.created_runtime() {
            return Ok(runtime);
        }

        let notifier: Arc<dyn UnloadNotifier> = Arc::new(TableUnloadNotifier {
            table: Arc::downgrade(self),
        });
        let runtime = self.factory.create_host(entry, notifier)?;
        tracing::info!(
            path_prefix = %entry.path_prefix,
            host_id = %runtime.host.id(),
            "created tenant context"
        );
        *entry.runtime.write().unwrap() = Some(runtime.clone());
        Ok(runtime)
    }

    /// Clear the entry whose created context is `host`.
    ///
    /// Called when a context is being torn down; the most recent match
    /// wins and scanning stops there.
    pub fn unregister(&self, host: HostId) {
        let entries = self.entries.read().unwrap().clone();
        for entry in entries.iter().rev() {
            if entry.clear_if_host(host) {
                tracing::info!(path_prefix = %entry.path_prefix, host_id = %host, "cleared tenant context");
                break;
            }
        }
    }

    /// Ask every created tenant context to unload.
    ///
    /// Contexts notify back through their unload handle, which clears
    /// their entries.
    pub fn unload_all(&self) {
        let entries = self.entries.read().unwrap().clone();
        for entry in entries {
            if let Some(runtime) = entry.created_runtime() {
                runtime.host.unload();
            }
        }
    }
}

struct TableUnloadNotifier {
    table: Weak<RouteTable>,
}

impl UnloadNotifier for TableUnloadNotifier {
    fn notify(&self, host: HostId) {
        if let Some(table) = self.table.upgrade() {
            table.unregister(host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RequestBroker;
    use crate::broker::RequestId;
    use crate::host::ApplicationHost;
    use crate::http::RequestHead;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    struct StubHost {
        id: HostId,
    }

    impl ApplicationHost for StubHost {
        fn id(&self) -> HostId {
            self.id
        }

        fn process_request(&self, _id: RequestId, _head: RequestHead) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }

        fn unload(&self) {}
    }

    struct CountingFactory {
        creations: AtomicUsize,
    }

    impl CountingFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                creations: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.creations.load(Ordering::SeqCst)
        }
    }

    impl HostFactory for CountingFactory {
        fn create_host(
            &self,
            _entry: &RouteEntry,
            _on_unload: Arc<dyn UnloadNotifier>,
        ) -> Result<TenantRuntime, DispatchError> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            Ok(TenantRuntime {
                host: Arc::new(StubHost { id: HostId::new() }),
                broker: Arc::new(RequestBroker::new()),
            })
        }
    }

    fn table_with(factory: Arc<CountingFactory>) -> Arc<RouteTable> {
        Arc::new(RouteTable::new(factory))
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let table = table_with(CountingFactory::new());
        table.register(None, None, "/", "/srv/root");
        table.register(None, None, "/blog/", "/srv/blog");

        let resolved = table
            .resolve(Some("example.com"), 80, "/blog/post/1", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.entry.path_prefix(), "/blog/");
    }

    #[tokio::test]
    async fn equal_length_tie_goes_to_most_recent() {
        let table = table_with(CountingFactory::new());
        table.register(None, None, "/app/", "/srv/old");
        table.register(None, None, "/app/", "/srv/new");

        let resolved = table.resolve(None, 80, "/app/x", false).await.unwrap().unwrap();
        assert_eq!(resolved.entry.physical_root(), Path::new("/srv/new"));
    }

    #[tokio::test]
    async fn any_host_any_port_matches() {
        let table = table_with(CountingFactory::new());
        table.register(None, None, "/", "/srv/app");

        let resolved = table
            .resolve(Some("example.com"), 80, "/x", false)
            .await
            .unwrap();
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn host_and_port_must_match_when_set() {
        let table = table_with(CountingFactory::new());
        table.register(Some("example.com".into()), Some(8080), "/", "/srv/app");

        assert!(table
            .resolve(Some("EXAMPLE.com"), 8080, "/x", false)
            .await
            .unwrap()
            .is_some());
        assert!(table
            .resolve(Some("other.com"), 8080, "/x", false)
            .await
            .unwrap()
            .is_none());
        assert!(table
            .resolve(Some("example.com"), 80, "/x", false)
            .await
            .unwrap()
            .is_none());
        assert!(table.resolve(None, 8080, "/x", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn default_to_root_retries_once() {
        let table = table_with(CountingFactory::new());
        table.register(None, None, "/blog/", "/srv/blog");

        // No root tenant: both forms come up empty.
        assert!(table.resolve(None, 80, "/other", false).await.unwrap().is_none());
        assert!(table.resolve(None, 80, "/other", true).await.unwrap().is_none());

        table.register(None, None, "/", "/srv/root");
        let resolved = table.resolve(None, 80, "/other", true).await.unwrap();
        // "/other" itself matches the root prefix directly.
        assert_eq!(resolved.unwrap().entry.path_prefix(), "/");
    }

    #[tokio::test]
    async fn resolve_is_idempotent_and_creates_once() {
        let factory = CountingFactory::new();
        let table = table_with(factory.clone());
        table.register(None, None, "/app/", "/srv/app");

        let a = table.resolve(None, 80, "/app/x", false).await.unwrap().unwrap();
        let b = table.resolve(None, 80, "/app/x", false).await.unwrap().unwrap();
        assert_eq!(a.runtime.host.id(), b.runtime.host.id());
        assert_eq!(factory.count(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_requests_create_one_context() {
        let factory = CountingFactory::new();
        let table = table_with(factory.clone());
        table.register(None, None, "/app/", "/srv/app");

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            tasks.push(tokio::spawn(async move {
                table.resolve(None, 80, "/app/x", false).await.unwrap().unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(factory.count(), 1);
    }

    #[tokio::test]
    async fn single_tenant_mode_skips_matching() {
        let table = table_with(CountingFactory::new());
        table.register(Some("only.example".into()), Some(9999), "/deep/", "/srv/only");
        table.set_single_tenant(true);

        let resolved = table
            .resolve(Some("unrelated.host"), 80, "/nowhere", false)
            .await
            .unwrap();
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn unregister_clears_most_recent_match_only() {
        let factory = CountingFactory::new();
        let table = table_with(factory.clone());
        table.register(None, None, "/a/", "/srv/a");
        table.register(None, None, "/b/", "/srv/b");

        let b = table.resolve(None, 80, "/b/x", false).await.unwrap().unwrap();
        table.unregister(b.runtime.host.id());
        assert!(!b.entry.is_created());

        // Next request recreates the context lazily.
        let again = table.resolve(None, 80, "/b/x", false).await.unwrap().unwrap();
        assert_ne!(again.runtime.host.id(), b.runtime.host.id());
        assert_eq!(factory.count(), 2);
    }

    #[tokio::test]
    async fn prefix_normalized_with_trailing_slash() {
        let table = table_with(CountingFactory::new());
        table.register(None, None, "/blog", "/srv/blog");

        let resolved = table.resolve(None, 80, "/blog/post", false).await.unwrap().unwrap();
        assert_eq!(resolved.entry.path_prefix(), "/blog/");
    }
}
