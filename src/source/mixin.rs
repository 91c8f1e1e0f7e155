//! Mixin source (component I): wraps another [`Source`] with a closure
//! that post-processes each resolved [`PackageMeta`] before it's returned,
//! without altering version resolution.

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::meta::PackageMeta;
use crate::provider::{Platform, Provider, VersionList};
use crate::source::Source;

/// Wraps an inner [`Source`], passing `available_versions` through
/// unchanged and running every resolved [`PackageMeta`] through `patch`
/// before returning it. Used to inject test fixtures (forcing a location or
/// stripping authentication) without a bespoke `Source` implementation per
/// test.
pub struct MixinSource<S, F> {
    inner: S,
    patch: F,
}

impl<S, F> MixinSource<S, F>
where
    S: Source,
    F: Fn(PackageMeta) -> PackageMeta + Send + Sync,
{
    pub fn new(inner: S, patch: F) -> Self {
        MixinSource { inner, patch }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, F> std::fmt::Debug for MixinSource<S, F>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixinSource").field("inner", &self.inner).finish()
    }
}

impl<S, F> Source for MixinSource<S, F>
where
    S: Source,
    F: Fn(PackageMeta) -> PackageMeta + Send + Sync,
{
    fn available_versions(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
    ) -> Result<(VersionList, Vec<String>), Error> {
        self.inner.available_versions(ctx, provider)
    }

    fn package_meta(
        &self,
        ctx: &CancellationToken,
        provider: &Provider,
        version: &semver::Version,
        platform: &Platform,
    ) -> Result<PackageMeta, Error> {
        let meta = self.inner.package_meta(ctx, provider, version, platform)?;
        Ok((self.patch)(meta))
    }

    fn for_display(&self, provider: &Provider) -> String {
        self.inner.for_display(provider)
    }
}
