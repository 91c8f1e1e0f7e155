//! Content-addressed package hashes and their provenance.
//!
//! Two schemes are recognized: `h1:`, a content hash over a directory tree
//! (the go-modules `h1` algorithm, ported verbatim), and `zh:`, a plain
//! SHA-256 of an archive file. Unknown schemes parse successfully -- they
//! simply never match anything -- so that old lock file entries using a
//! scheme this build doesn't understand don't hard-fail resolution.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::location::PackageLocation;

/// A scheme-tagged content hash, e.g. `h1:2jFGS...` or `zh:deadbeef...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hash {
    scheme: String,
    value: String,
}

pub const SCHEME_H1: &str = "h1";
pub const SCHEME_ZH: &str = "zh";

impl Hash {
    /// Parse `<scheme>:<value>`. Only the presence of a non-empty scheme
    /// followed by `:` is validated -- the value is never inspected here.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (scheme, value) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidHash(s.to_string()))?;
        if scheme.is_empty() {
            return Err(Error::InvalidHash(s.to_string()));
        }
        Ok(Hash {
            scheme: scheme.to_string(),
            value: value.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.scheme == scheme
    }

    fn new(scheme: &str, value: String) -> Self {
        Hash {
            scheme: scheme.to_string(),
            value,
        }
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.value)
    }
}

impl std::str::FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::parse(s)
    }
}

impl TryFrom<String> for Hash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Hash::parse(&value)
    }
}

impl From<Hash> for String {
    fn from(h: Hash) -> Self {
        h.to_string()
    }
}

/// Why a particular [`Hash`] is trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashDisposition {
    /// We computed this hash ourselves, over bytes we hold.
    pub verified_locally: bool,
    /// The provider's *origin* registry (never a mirror) reported this hash.
    pub reported_by_registry: bool,
    /// Key IDs of OpenPGP signatures covering this hash.
    pub signed_by_gpg_key_ids: HashSet<String>,
}

impl HashDisposition {
    pub fn verified_locally() -> Self {
        HashDisposition {
            verified_locally: true,
            ..Default::default()
        }
    }

    pub fn reported_by_registry(signed_by: impl IntoIterator<Item = String>) -> Self {
        HashDisposition {
            reported_by_registry: true,
            signed_by_gpg_key_ids: signed_by.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Set-union on key IDs, boolean OR on flags. Commutative, idempotent.
    pub fn merge(&self, other: &HashDisposition) -> HashDisposition {
        HashDisposition {
            verified_locally: self.verified_locally || other.verified_locally,
            reported_by_registry: self.reported_by_registry || other.reported_by_registry,
            signed_by_gpg_key_ids: self
                .signed_by_gpg_key_ids
                .union(&other.signed_by_gpg_key_ids)
                .cloned()
                .collect(),
        }
    }
}

/// A map from hash to its disposition. `BTreeMap` keeps iteration (and
/// therefore display/test) order deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashDispositions(BTreeMap<Hash, HashDisposition>);

impl HashDispositions {
    pub fn new() -> Self {
        HashDispositions(BTreeMap::new())
    }

    pub fn single(hash: Hash, disposition: HashDisposition) -> Self {
        let mut map = BTreeMap::new();
        map.insert(hash, disposition);
        HashDispositions(map)
    }

    pub fn insert(&mut self, hash: Hash, disposition: HashDisposition) {
        self.0
            .entry(hash)
            .and_modify(|existing| *existing = existing.merge(&disposition))
            .or_insert(disposition);
    }

    pub fn get(&self, hash: &Hash) -> Option<&HashDisposition> {
        self.0.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.0.contains_key(hash)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &HashDisposition)> {
        self.0.iter()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &Hash> {
        self.0.keys()
    }

    /// Per-key disposition merge; commutative.
    pub fn merge(&self, other: &HashDispositions) -> HashDispositions {
        let mut merged = self.clone();
        for (hash, disposition) in &other.0 {
            merged.insert(hash.clone(), disposition.clone());
        }
        merged
    }
}

impl FromIterator<(Hash, HashDisposition)> for HashDispositions {
    fn from_iter<T: IntoIterator<Item = (Hash, HashDisposition)>>(iter: T) -> Self {
        let mut out = HashDispositions::new();
        for (hash, disposition) in iter {
            out.insert(hash, disposition);
        }
        out
    }
}

/// Filter a set of candidate hash strings down to recognized schemes
/// (`h1:`, `zh:`), which are considered equally preferred.
pub fn preferred_hashes(given: impl IntoIterator<Item = Hash>) -> Vec<Hash> {
    given
        .into_iter()
        .filter(|h| h.has_scheme(SCHEME_H1) || h.has_scheme(SCHEME_ZH))
        .collect()
}

/// The go-modules "h1" content hash of a package: for every file (recursed,
/// nothing excluded; symlinks followed only at the root), hash the bytes
/// with SHA-256, write `"<hex>  <relative-path>\n"`, sort those lines
/// lexicographically by path, hash the concatenation with SHA-256, and
/// base64-encode the result. This byte layout is normative -- it must match
/// exactly between a `LocalDir` and the `LocalArchive` it was extracted
/// from (see the round-trip test in `tests/hash_properties.rs`).
pub fn package_hash_v1(location: &PackageLocation) -> Result<Hash, Error> {
    let lines = match location {
        PackageLocation::LocalDir(dir) => hash_lines_for_dir(dir.path())?,
        PackageLocation::LocalArchive(archive) => hash_lines_for_zip(archive.path())?,
        _ => {
            return Err(Error::Other(anyhow::anyhow!(
                "h1 hashing is only defined for LocalDir and LocalArchive locations"
            )))
        }
    };
    Ok(package_hash_from_lines(lines))
}

/// SHA-256 of the archive file's raw bytes, lowercase hex, `zh:`-prefixed.
/// `LocalDir` has no archive bytes to hash, so this scheme can never be
/// produced from one.
pub fn package_hash_legacy_zip(location: &PackageLocation) -> Result<Hash, Error> {
    let path = match location {
        PackageLocation::LocalArchive(archive) => archive.path(),
        _ => {
            return Err(Error::Other(anyhow::anyhow!(
                "zh: hashing is only defined for LocalArchive locations"
            )))
        }
    };
    let digest = sha256_file(path)?;
    Ok(Hash::new(SCHEME_ZH, hex::encode(digest)))
}

fn sha256_file(path: &Path) -> std::io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

fn package_hash_from_lines(mut lines: Vec<String>) -> Hash {
    lines.sort();
    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
    }
    let digest = hasher.finalize();
    Hash::new(SCHEME_H1, base64_standard(&digest))
}

fn base64_standard(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn hash_lines_for_dir(root: &Path) -> Result<Vec<String>, Error> {
    let mut lines = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| anyhow::anyhow!(e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let digest = sha256_file(entry.path())?;
        lines.push(format!("{}  {}\n", hex::encode(digest), rel));
    }
    Ok(lines)
}

fn hash_lines_for_zip(archive: &Path) -> Result<Vec<String>, Error> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| anyhow::anyhow!(e))?;
    let mut lines = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| anyhow::anyhow!(e))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = hasher.finalize();
        lines.push(format!("{}  {}\n", hex::encode(digest), name));
    }
    Ok(lines)
}

/// A lazily-evaluated stream of the hashes among `to_test` that actually
/// match `loc`. At most one `h1:` and one `zh:` hash are computed for the
/// package and cached across the traversal, regardless of how many
/// candidate hashes of each scheme are tested.
pub struct MatchingHashes<'a> {
    to_test: std::vec::IntoIter<Hash>,
    loc: &'a PackageLocation,
    h1: Option<Result<Hash, String>>,
    zh: Option<Result<Hash, String>>,
}

impl<'a> MatchingHashes<'a> {
    fn computed(&mut self, scheme: &str) -> &Result<Hash, String> {
        let slot = if scheme == SCHEME_H1 {
            &mut self.h1
        } else {
            &mut self.zh
        };
        if slot.is_none() {
            let computed = if scheme == SCHEME_H1 {
                package_hash_v1(self.loc)
            } else {
                package_hash_legacy_zip(self.loc)
            };
            *slot = Some(computed.map_err(|e| e.to_string()));
        }
        slot.as_ref().unwrap()
    }
}

impl<'a> Iterator for MatchingHashes<'a> {
    type Item = Hash;

    fn next(&mut self) -> Option<Hash> {
        while let Some(candidate) = self.to_test.next() {
            if candidate.has_scheme(SCHEME_H1) || candidate.has_scheme(SCHEME_ZH) {
                if let Ok(computed) = self.computed(candidate.scheme()) {
                    if computed == &candidate {
                        return Some(candidate);
                    }
                }
            }
            // Unrecognized scheme, or recognized scheme with no match:
            // never matches (not an error), keep scanning.
        }
        None
    }
}

/// Lazily find which of `to_test` match the package at `loc`.
pub fn hashes_matching_package(loc: &PackageLocation, to_test: Vec<Hash>) -> MatchingHashes<'_> {
    MatchingHashes {
        to_test: to_test.into_iter(),
        loc,
        h1: None,
        zh: None,
    }
}
