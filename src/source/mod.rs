//! Source abstraction and memoizer (component D).

pub mod direct;
pub mod http_mirror;
pub mod mapping;
pub mod mixin;
pub mod multi;
pub mod oci;
pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::meta::PackageMeta;
use crate::provider::{Platform, Provider, VersionList};

/// A provider resolution backend: a filesystem mirror, an HTTP/OCI
/// registry, or a composite over several of those.
pub trait Source: fmt::Debug + Send + Sync {
    /// The versions this source knows about for `provider`, plus any
    /// non-fatal warnings encountered while resolving them.
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error>;

    /// The installable package for an exact `(provider, version, platform)`.
    fn package_meta(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<PackageMeta, Error>;

    /// A human-readable label for this source, used in diagnostics.
    fn for_display(&self, provider: &Provider) -> String;
}

/// A cached outcome of one `(provider[, version, platform])` lookup.
/// `Error` does not implement `Clone`, so a previously observed error is
/// retained either as the distinguished, never-wrapped
/// [`Error::ProviderNotFound`] or as an opaque message replayed through
/// [`Error::Other`] -- callers that need the *original* error structure
/// beyond "not found vs. something else" should not rely on cache replay.
#[derive(Debug, Clone)]
enum CachedOutcome<T> {
    Ok(T),
    ProviderNotFound(Provider),
    Err(Arc<str>),
}

impl<T: Clone> CachedOutcome<T> {
    fn from_result(result: &Result<T, Error>, provider: &Provider) -> Self {
        match result {
            Ok(v) => CachedOutcome::Ok(v.clone()),
            Err(e) if e.is_provider_not_found() => CachedOutcome::ProviderNotFound(provider.clone()),
            Err(e) => CachedOutcome::Err(Arc::from(e.to_string())),
        }
    }

    fn to_result(&self) -> Result<T, Error> {
        match self {
            CachedOutcome::Ok(v) => Ok(v.clone()),
            CachedOutcome::ProviderNotFound(p) => Err(Error::ProviderNotFound { provider: p.clone() }),
            CachedOutcome::Err(msg) => Err(Error::Other(anyhow::anyhow!(msg.to_string()))),
        }
    }
}

type Slot<T> = Arc<Mutex<Option<CachedOutcome<T>>>>;

/// Wraps any [`Source`], coalescing concurrent identical requests and
/// caching every result -- including errors -- for the memoizer's lifetime.
///
/// Two-phase locking: a top-level mutex guards only the *map of per-key
/// mutexes*, never the underlying call. A request briefly locks the top
/// level to obtain (or create) its key's mutex, releases it, then locks the
/// per-key mutex for the actual (possibly slow) call. Concurrent callers
/// for the same key block on that per-key mutex and observe the same
/// cached outcome; callers for different keys never contend.
pub struct Memoizer<S> {
    inner: S,
    versions: Mutex<HashMap<Provider, Slot<(VersionList, Vec<String>)>>>,
    meta: Mutex<HashMap<(Provider, semver::Version, Platform), Slot<PackageMeta>>>,
}

impl<S: fmt::Debug> fmt::Debug for Memoizer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer").field("inner", &self.inner).finish()
    }
}

impl<S: Source> Memoizer<S> {
    pub fn new(inner: S) -> Self {
        Memoizer {
            inner,
            versions: Mutex::new(HashMap::new()),
            meta: Mutex::new(HashMap::new()),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn versions_slot(&self, provider: &Provider) -> Slot<(VersionList, Vec<String>)> {
        let mut top = self.versions.lock().unwrap();
        top.entry(provider.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn meta_slot(
        &self,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Slot<PackageMeta> {
        let key = (provider.clone(), version.clone(), platform.clone());
        let mut top = self.meta.lock().unwrap();
        top.entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}

impl<S: Source> Source for Memoizer<S> {
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error> {
        let slot = self.versions_slot(provider);
        let mut guard = slot.lock().unwrap();
        if let Some(outcome) = guard.as_ref() {
            return outcome.to_result();
        }
        let result = self.inner.available_versions(ctx, provider);
        *guard = Some(CachedOutcome::from_result(&result, provider));
        result
    }

    fn package_meta(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<PackageMeta, Error> {
        let slot = self.meta_slot(provider, version, platform);
        let mut guard = slot.lock().unwrap();
        if let Some(outcome) = guard.as_ref() {
            return outcome.to_result();
        }
        let result = self.inner.package_meta(ctx, provider, version, platform);
        *guard = Some(CachedOutcome::from_result(&result, provider));
        result
    }

    fn for_display(&self, provider: &Provider) -> String {
        self.inner.for_display(provider)
    }
}

/// A memoizer over a heterogeneous boxed source, for the common case of
/// memoizing one leg of a [`multi::MultiSource`] fan-out.
pub type DynMemoizer = Memoizer<Box<dyn Source>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Source for CountingSource {
        fn available_versions(
            &self,
            _ctx: &CancellationToken,
            provider: &Provider,
        ) -> Result<(VersionList, Vec<String>), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::provider_not_found(provider.clone()));
            }
            Ok((
                VersionList::new(vec![semver::Version::new(1, 0, 0)]),
                vec![],
            ))
        }

        fn package_meta(
            &self,
            _ctx: &CancellationToken,
            provider: &Provider,
            version: &semver::Version,
            platform: &Platform,
        ) -> Result<PackageMeta, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PackageMeta::new(
                provider.clone(),
                version.clone(),
                platform.clone(),
                "terraform-provider-foo",
                crate::location::PackageLocation::local_dir("/tmp/doesnotmatter"),
            ))
        }

        fn for_display(&self, provider: &Provider) -> String {
            provider.to_string()
        }
    }

    #[test]
    fn concurrent_identical_requests_coalesce_to_one_call() {
        let memo = Arc::new(Memoizer::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail: false,
        }));
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let ctx = CancellationToken::new();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let memo = memo.clone();
                let provider = provider.clone();
                let ctx = ctx.clone();
                scope.spawn(move || {
                    memo.available_versions(&ctx, &provider).unwrap();
                });
            }
        });

        assert_eq!(memo.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_are_cached_and_replayed() {
        let memo = Memoizer::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let provider = Provider::new("registry.example.com", "hashicorp", "foo");
        let ctx = CancellationToken::new();

        let first = memo.available_versions(&ctx, &provider).unwrap_err();
        let second = memo.available_versions(&ctx, &provider).unwrap_err();
        assert!(first.is_provider_not_found());
        assert!(second.is_provider_not_found());
        assert_eq!(memo.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_keys_do_not_share_a_cache_entry() {
        let memo = Memoizer::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let ctx = CancellationToken::new();
        let a = Provider::new("registry.example.com", "hashicorp", "aws");
        let b = Provider::new("registry.example.com", "hashicorp", "azure");

        memo.available_versions(&ctx, &a).unwrap();
        memo.available_versions(&ctx, &b).unwrap();
        assert_eq!(memo.inner.calls.load(Ordering::SeqCst), 2);
    }
}
