use crate::{error::*, Digest};
use std::collections::BTreeMap;

/// Set of digests supporting lookup by a unique hex prefix, i.e. the short image ID
#[derive(Debug, Clone, Default)]
pub struct DigestSet {
    entries: BTreeMap<String, Digest>,
}

impl DigestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, digest: Digest) {
        self.entries.insert(digest.encoded.clone(), digest);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the digest whose encoded part starts with `short`
    ///
    /// `short` is either a bare hex prefix or `algorithm:prefix`.
    /// More than one match is [Error::AmbiguousReference].
    pub fn lookup(&self, short: &str) -> Result<Digest> {
        let (algorithm, prefix) = match short.split_once(':') {
            Some((algorithm, prefix)) => (Some(algorithm), prefix),
            None => (None, short),
        };
        let mut found = self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(encoded, _)| encoded.starts_with(prefix))
            .map(|(_, digest)| digest)
            .filter(|digest| algorithm.map_or(true, |a| digest.algorithm == a));
        match (found.next(), found.next()) {
            (Some(digest), None) => Ok(digest.clone()),
            (Some(_), Some(_)) => Err(Error::AmbiguousReference(short.to_string())),
            (None, _) => Err(Error::NotFound(format!("image ID {}", short))),
        }
    }
}

impl FromIterator<Digest> for DigestSet {
    fn from_iter<T: IntoIterator<Item = Digest>>(iter: T) -> Self {
        let mut set = Self::new();
        for digest in iter {
            set.insert(digest);
        }
        set
    }
}
