//! Group repositories: a read-only view over ordered member repositories
//!
//! Lookups try metadata stored directly in the group first, then walk the
//! collected members in declared order. The first member that has the
//! artifact wins; failing members are logged and skipped.

use async_trait::async_trait;
use depot_core::{Configuration, Repository, RepositoryPath, RepositoryType};
use indexmap::IndexMap;
use indexmap::map::Entry;
use std::sync::Arc;

use super::{ProviderRegistry, RepositoryProvider};
use crate::collector::GroupRepositorySetCollector;
use crate::error::{RepoError, Result};
use crate::index::{ArtifactEntry, ArtifactIndex, ArtifactPredicate, Paginator};
use crate::routing::RoutingRuleChecker;
use crate::stream::{ArtifactInputStream, ArtifactOutputStream};

/// Upper bound on search widening rounds
pub const MAX_SEARCH_ROUNDS: u64 = 16;

/// Merged search results keyed by coordinates, with the owning member's position
type Merged = IndexMap<String, (usize, ArtifactEntry)>;

pub struct GroupRepositoryProvider {
    members: ProviderRegistry,
    index: Arc<ArtifactIndex>,
    max_rounds: u64,
}

impl GroupRepositoryProvider {
    /// `members` resolves the providers of concrete member repositories
    pub fn new(members: ProviderRegistry, index: Arc<ArtifactIndex>) -> Self {
        Self {
            members,
            index,
            max_rounds: MAX_SEARCH_ROUNDS,
        }
    }

    /// Override the search widening bound
    pub fn with_max_rounds(mut self, max_rounds: u64) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Member paths allowed by routing, in traversal order
    fn candidates(
        &self,
        config: &Configuration,
        path: &RepositoryPath,
    ) -> Vec<(RepositoryPath, Arc<dyn RepositoryProvider>)> {
        let group = path.repository();
        let checker = RoutingRuleChecker::new(&config.routing_rules);
        let collected = GroupRepositorySetCollector::new(config).collect(group, false);

        collected
            .repositories
            .iter()
            .filter(|member| member.in_service)
            .filter_map(|member| {
                let member_path = path.with_repository(member);
                if checker.is_denied(&group.id, &member_path) {
                    tracing::debug!("Routing denies {} through {}", member_path, group.key());
                    return None;
                }
                match self.members.for_repository(member) {
                    Some(provider) => Some((member_path, provider)),
                    None => {
                        tracing::warn!(
                            "No provider for {} member {}, skipping",
                            member.repo_type,
                            member.key()
                        );
                        None
                    }
                }
            })
            .collect()
    }

    fn unsupported(operation: &str, path: &RepositoryPath) -> RepoError {
        RepoError::UnsupportedOperation {
            operation: operation.to_string(),
            repository: path.key().to_string(),
        }
    }

    /// Keep the entry of the earliest declared member for each coordinate
    fn merge(merged: &mut Merged, position: usize, entries: Vec<ArtifactEntry>) {
        for entry in entries {
            match merged.entry(entry.coordinates.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert((position, entry));
                }
                Entry::Occupied(mut slot) => {
                    if position < slot.get().0 {
                        slot.insert((position, entry));
                    }
                }
            }
        }
    }

    /// Search every member without a window
    async fn search_all(
        &self,
        config: &Configuration,
        members: &[Repository],
        predicate: &ArtifactPredicate,
        merged: &mut Merged,
    ) {
        for (position, member) in members.iter().enumerate() {
            let entries = self
                .search_member(config, member, predicate, &Paginator::unbounded())
                .await;
            Self::merge(merged, position, entries);
        }
    }

    /// Widen per-member windows until `target` distinct entries are merged
    async fn search_rounds(
        &self,
        config: &Configuration,
        repository: &Repository,
        members: &[Repository],
        predicate: &ArtifactPredicate,
        target: u64,
        merged: &mut Merged,
    ) {
        let page = target.div_ceil(members.len() as u64).max(1);
        let mut round = 0;
        loop {
            if round >= self.max_rounds {
                tracing::warn!(
                    "Search in {} stopped after {} rounds with {} of {} entries",
                    repository.key(),
                    self.max_rounds,
                    merged.len(),
                    target
                );
                return;
            }

            let local = Paginator::new(round.saturating_mul(page), page);
            let mut produced = false;
            for (position, member) in members.iter().enumerate() {
                let entries = self.search_member(config, member, predicate, &local).await;
                produced |= !entries.is_empty();
                Self::merge(merged, position, entries);
            }

            if merged.len() as u64 >= target || !produced {
                return;
            }
            round += 1;
        }
    }

    /// Hand each windowed entry to the earliest member that also holds it
    ///
    /// A bounded round only sees the head of each member, so an earlier
    /// member may hold a coordinate deeper than the window reached.
    async fn attribute_to_first_holder(
        &self,
        config: &Configuration,
        members: &[Repository],
        predicate: &ArtifactPredicate,
        window: &mut [(usize, ArtifactEntry)],
    ) {
        for (owner, entry) in window.iter_mut() {
            let exact = predicate.clone().with_coordinates(entry.coordinates.clone());
            for (position, member) in members.iter().enumerate().take(*owner) {
                let found = self
                    .search_member(config, member, &exact, &Paginator::new(0, 1))
                    .await;
                if let Some(earlier) = found.into_iter().next() {
                    *owner = position;
                    *entry = earlier;
                    break;
                }
            }
        }
    }

    async fn search_member(
        &self,
        config: &Configuration,
        member: &Repository,
        predicate: &ArtifactPredicate,
        paginator: &Paginator,
    ) -> Vec<ArtifactEntry> {
        let Some(provider) = self.members.for_repository(member) else {
            return Vec::new();
        };
        match provider.search(config, member, predicate, paginator).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Search in member {} failed: {}", member.key(), e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl RepositoryProvider for GroupRepositoryProvider {
    fn alias(&self) -> RepositoryType {
        RepositoryType::Group
    }

    async fn resolve_path(
        &self,
        config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<RepositoryPath>> {
        if path.is_metadata() && tokio::fs::try_exists(path.absolute()).await? {
            return Ok(Some(path.clone()));
        }

        for (member_path, provider) in self.candidates(config, path) {
            match provider.resolve_path(config, &member_path).await {
                Ok(Some(resolved)) => return Ok(Some(resolved)),
                Ok(None) => {}
                Err(e) => tracing::warn!("Resolving {} failed, trying next member: {}", member_path, e),
            }
        }
        Ok(None)
    }

    async fn get_input_stream(
        &self,
        config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<ArtifactInputStream>> {
        if path.is_metadata() {
            if let Some(stream) = ArtifactInputStream::open(path.clone()).await? {
                return Ok(Some(stream));
            }
        }

        for (member_path, provider) in self.candidates(config, path) {
            match provider.get_input_stream(config, &member_path).await {
                Ok(Some(stream)) => {
                    tracing::debug!("{} served from {}", path, member_path.key());
                    return Ok(Some(stream));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Reading {} failed, trying next member: {}", member_path, e),
            }
        }
        Ok(None)
    }

    async fn get_output_stream(
        &self,
        _config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<ArtifactOutputStream>> {
        Err(Self::unsupported("write", path))
    }

    async fn delete(&self, _config: &Configuration, path: &RepositoryPath) -> Result<bool> {
        Err(Self::unsupported("delete", path))
    }

    async fn search(
        &self,
        config: &Configuration,
        repository: &Repository,
        predicate: &ArtifactPredicate,
        paginator: &Paginator,
    ) -> Result<Vec<ArtifactEntry>> {
        let members = GroupRepositorySetCollector::new(config)
            .collect(repository, false)
            .repositories;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let mut merged = Merged::new();

        let Some(target) = paginator.end() else {
            self.search_all(config, &members, predicate, &mut merged).await;
            return Ok(paginator
                .slice(merged.into_values().collect())
                .into_iter()
                .map(|(_, entry)| entry)
                .collect());
        };

        self.search_rounds(config, repository, &members, predicate, target, &mut merged)
            .await;

        let mut window = paginator.slice(merged.into_values().collect::<Vec<_>>());
        self.attribute_to_first_holder(config, &members, predicate, &mut window)
            .await;
        Ok(window.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn count(
        &self,
        config: &Configuration,
        repository: &Repository,
        predicate: &ArtifactPredicate,
    ) -> Result<u64> {
        let scope = GroupRepositorySetCollector::new(config)
            .collect(repository, true)
            .keys();
        self.index.count(&scope, predicate)
    }
}
