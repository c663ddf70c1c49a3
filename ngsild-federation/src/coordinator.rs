//! Scatter-Gather Coordinator
//!
//! Resolves one query against the local store and every matched context
//! source under a single deadline.
//!
//! ## Resolution Flow
//!
//! 1. Validate criteria (nothing is dispatched for invalid input)
//! 2. Read a registry snapshot; an outage degrades to local-only
//! 3. Match registrations and decide whether the local store is needed
//! 4. Dispatch local + remotes concurrently, one task per remote
//! 5. Gather until all finish or `deadline + drain`; stragglers are aborted
//!    and reported as timeouts
//! 6. Merge by precedence, paginate, report

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{FutureExt, OptionFuture};
use ngsild_model::{
    AttributeObservation, Entity, MergedEntity, Origin, QueryCriteria,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::client::{
    ContextSourceClient, DispatchError, DispatchOutcome, DispatchResult, HttpContextSourceClient,
    Payload,
};
use crate::config::FederationConfig;
use crate::context::{compact_entity, expand_criteria, ContextResolver};
use crate::error::{FederationError, Result};
use crate::matcher::{CapabilityMatcher, ExclusiveScope, SourceMatch, LOCAL_BAND};
use crate::merge::{merge_entities, merge_temporal, paginate};
use crate::registry::RegistrationStore;
use crate::report::{Resolution, ResolveReport, SourceReport, SourceWarning, WarningKind};
use crate::stats::{FederationStats, StatsSnapshot};
use crate::store::LocalStore;

/// Federated query engine.
pub struct FederatedQueryEngine {
    registry: Arc<dyn RegistrationStore>,
    store: Arc<dyn LocalStore>,
    client: Arc<dyn ContextSourceClient>,
    matcher: CapabilityMatcher,
    config: FederationConfig,
    stats: Arc<FederationStats>,
}

/// Local store answer.
struct LocalAnswer {
    payload: Payload,
    latency: Duration,
}

impl FederatedQueryEngine {
    pub fn new(
        config: FederationConfig,
        registry: Arc<dyn RegistrationStore>,
        store: Arc<dyn LocalStore>,
        client: Arc<dyn ContextSourceClient>,
    ) -> Self {
        Self {
            registry,
            store,
            client,
            matcher: CapabilityMatcher::new(config.public_url.as_deref()),
            config,
            stats: Arc::new(FederationStats::default()),
        }
    }

    /// Engine dispatching to remote brokers over HTTP.
    pub fn with_http_client(
        config: FederationConfig,
        registry: Arc<dyn RegistrationStore>,
        store: Arc<dyn LocalStore>,
    ) -> Result<Self> {
        let client = HttpContextSourceClient::new(&config)?;
        Ok(Self::new(config, registry, store, Arc::new(client)))
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Get service statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolve with the configured default deadline.
    pub async fn resolve_default(&self, criteria: &QueryCriteria) -> Result<Resolution> {
        self.resolve(criteria, Instant::now() + self.config.default_deadline)
            .await
    }

    /// Resolve criteria written in compact terms, answering in compact terms.
    pub async fn resolve_with_context(
        &self,
        criteria: &QueryCriteria,
        resolver: &dyn ContextResolver,
        deadline: Instant,
    ) -> Result<Resolution> {
        let expanded = expand_criteria(resolver, criteria);
        let mut resolution = self.resolve(&expanded, deadline).await?;
        resolution.entities = resolution
            .entities
            .into_iter()
            .map(|entity| compact_entity(resolver, entity))
            .collect();
        Ok(resolution)
    }

    /// Retrieve one entity by id from every source that may hold it.
    pub async fn retrieve_entity(
        &self,
        id: &str,
        attrs: &[String],
        deadline: Instant,
    ) -> Result<(MergedEntity, ResolveReport)> {
        let criteria = QueryCriteria::for_entity(id).with_attrs(attrs.iter().cloned());
        let resolution = self.resolve(&criteria, deadline).await?;
        let report = resolution.report;
        resolution
            .entities
            .into_iter()
            .find(|e| e.id == id)
            .map(|entity| (entity, report))
            .ok_or_else(|| FederationError::NotFound(id.to_string()))
    }

    /// Resolve `criteria` against the local store and matched sources.
    ///
    /// Returns after every source answered or at `deadline` plus the drain
    /// allowance, whichever comes first. Only invalid criteria and local
    /// store failures are errors; remote problems become report warnings.
    pub async fn resolve(&self, criteria: &QueryCriteria, deadline: Instant) -> Result<Resolution> {
        let start = Instant::now();
        self.stats.record_query();

        if let Err(e) = criteria.validate() {
            self.stats.record_failure();
            debug!(error = %e, "Rejecting invalid criteria");
            return Err(e.into());
        }

        let mut warnings = Vec::new();
        let registrations = self.registry_snapshot(deadline, &mut warnings).await;

        let matches = self
            .matcher
            .match_sources(criteria, &registrations, Utc::now());
        let local_needed = !matches.iter().any(|m| m.covers(criteria));
        if !local_needed {
            self.stats.record_local_skipped();
        }

        debug!(
            operation = ?criteria.operation(),
            registrations = registrations.len(),
            matched = matches.len(),
            local = local_needed,
            "Dispatching federated query"
        );

        // Every source returns enough rows to fill the requested page after merging.
        let mut outbound = criteria.clone();
        outbound.offset = 0;
        outbound.limit = criteria
            .limit
            .map(|limit| limit.saturating_add(criteria.offset));

        // A local failure drops the scatter future, which aborts its tasks.
        let local_leg = OptionFuture::from(local_needed.then(|| self.query_local(&outbound, deadline)))
            .map(Option::transpose);
        let remote_leg = self
            .scatter(&matches, &outbound, deadline)
            .map(Ok::<_, FederationError>);
        let (local, remote) = match tokio::try_join!(local_leg, remote_leg) {
            Ok(answers) => answers,
            Err(e) => {
                self.stats.record_failure();
                error!(error = %e, "Local store failed, failing query");
                return Err(e);
            }
        };

        for (result, matched) in remote.iter().zip(&matches) {
            self.stats.record_dispatch(&result.outcome);
            if let Some(warning) = warning_for(result, matched) {
                warn!(
                    csr_id = %matched.id(),
                    endpoint = %matched.registration.endpoint,
                    kind = ?warning.kind,
                    latency_ms = result.latency.as_millis() as u64,
                    "Source degraded: {}",
                    warning.message
                );
                warnings.push(warning);
            }
        }

        let mut sources = Vec::with_capacity(remote.len() + 1);
        if let Some(local) = &local {
            sources.push(SourceReport {
                origin: Origin::Local,
                status: ngsild_model::SourceStatus::Ok,
                results: local.payload.len(),
                latency: local.latency,
            });
        }
        sources.extend(remote.iter().map(|r| SourceReport {
            origin: r.source.clone(),
            status: r.outcome.status(),
            results: r.payload.len(),
            latency: r.latency,
        }));

        let scope = ExclusiveScope::from_matches(&matches);
        let (entities, type_conflicts) = if criteria.is_temporal() {
            let entities = merge_observations(criteria, local.map(|l| l.payload), remote, &matches, &scope);
            (entities, 0)
        } else {
            merge_point_in_time(local.map(|l| l.payload), remote, &matches, &scope)
        };
        let entities = paginate(entities, criteria.offset, criteria.limit);

        let report = ResolveReport {
            sources,
            warnings,
            local_queried: local_needed,
            matched_sources: matches.len(),
            type_conflicts,
            elapsed: start.elapsed(),
        };
        if !report.is_complete() {
            self.stats.record_degraded();
        }

        info!(
            operation = ?criteria.operation(),
            matched = report.matched_sources,
            local = report.local_queried,
            entities = entities.len(),
            warnings = report.warnings.len(),
            type_conflicts = report.type_conflicts,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Federated query resolved"
        );

        Ok(Resolution { entities, report })
    }

    async fn registry_snapshot(
        &self,
        deadline: Instant,
        warnings: &mut Vec<SourceWarning>,
    ) -> Vec<ngsild_model::ContextSourceRegistration> {
        let registry_deadline = deadline.min(Instant::now() + self.config.registry_timeout);
        let message = match timeout_at(registry_deadline, self.registry.list_all()).await {
            Ok(Ok(registrations)) => return registrations,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "registry did not answer within {:?}",
                self.config.registry_timeout
            ),
        };

        self.stats.record_registry_outage();
        warn!(error = %message, "Registry unavailable, resolving from local store only");
        warnings.push(SourceWarning::registry_unavailable(message));
        Vec::new()
    }

    async fn query_local(&self, criteria: &QueryCriteria, deadline: Instant) -> Result<LocalAnswer> {
        let start = Instant::now();
        let query = async {
            if criteria.is_temporal() {
                self.store
                    .query_temporal(criteria)
                    .await
                    .map(Payload::Observations)
            } else {
                self.store
                    .query_entities(criteria)
                    .await
                    .map(Payload::Entities)
            }
        };

        match timeout_at(deadline, query).await {
            Ok(Ok(payload)) => Ok(LocalAnswer {
                payload,
                latency: start.elapsed(),
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(FederationError::LocalTimeout(start.elapsed())),
        }
    }

    /// Dispatch to every match concurrently; results come back in match order.
    async fn scatter(
        &self,
        matches: &[SourceMatch],
        criteria: &QueryCriteria,
        deadline: Instant,
    ) -> Vec<DispatchResult> {
        if matches.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_dispatches));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(matches.len());

        for (index, matched) in matches.iter().enumerate() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let registration = matched.registration.clone();
            let outbound = matched.narrowed_criteria(criteria);

            let handle = tasks.spawn(async move {
                let start = Instant::now();
                // Waiting for a permit counts against the same deadline.
                let _permit = match timeout_at(deadline, semaphore.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    _ => {
                        return DispatchResult::failed(
                            Origin::registration(registration.id.clone()),
                            &outbound,
                            DispatchOutcome::Timeout,
                            start.elapsed(),
                        )
                    }
                };
                client.query(&registration, &outbound, deadline).await
            });
            pending.insert(handle.id(), index);
        }

        let mut results: Vec<Option<DispatchResult>> = vec![None; matches.len()];
        let hard_stop = deadline + self.config.drain_allowance;
        loop {
            match timeout_at(hard_stop, tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, result)))) => {
                    if let Some(index) = pending.remove(&id) {
                        results[index] = Some(result);
                    }
                }
                Ok(Some(Err(join_error))) => {
                    if let Some(index) = pending.remove(&join_error.id()) {
                        warn!(csr_id = %matches[index].id(), error = %join_error, "Dispatch task failed");
                        results[index] = Some(DispatchResult::failed(
                            matches[index].origin(),
                            criteria,
                            DispatchOutcome::Error(DispatchError::Task(join_error.to_string())),
                            Duration::ZERO,
                        ));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(pending = pending.len(), "Deadline reached, aborting pending dispatches");
                    tasks.abort_all();
                    break;
                }
            }
        }

        let elapsed_at_stop = Instant::now().saturating_duration_since(deadline);
        matches
            .iter()
            .zip(results)
            .map(|(matched, result)| {
                result.unwrap_or_else(|| {
                    DispatchResult::failed(
                        matched.origin(),
                        criteria,
                        DispatchOutcome::Timeout,
                        elapsed_at_stop,
                    )
                })
            })
            .collect()
    }
}

fn warning_for(result: &DispatchResult, matched: &SourceMatch) -> Option<SourceWarning> {
    let (kind, message) = match &result.outcome {
        DispatchOutcome::Success => return None,
        DispatchOutcome::Partial { dropped } => (
            WarningKind::PartialResponse,
            format!("partial response, {} element(s) dropped", dropped),
        ),
        DispatchOutcome::Timeout => (
            WarningKind::Timeout,
            "no answer before the deadline".to_string(),
        ),
        DispatchOutcome::Unreachable(reason) => (WarningKind::Unreachable, reason.clone()),
        DispatchOutcome::Error(e) => (WarningKind::RemoteError, e.to_string()),
    };
    Some(SourceWarning::for_source(matched.id(), kind, message))
}

/// Sources in merge precedence band order; matcher order holds within a band.
fn precedence_order<T>(
    local: Option<T>,
    remote: Vec<(T, &SourceMatch)>,
) -> Vec<(Origin, T)> {
    let mut ranked: Vec<(u8, Origin, T)> = remote
        .into_iter()
        .map(|(data, matched)| (matched.band(), matched.origin(), data))
        .collect();
    if let Some(local) = local {
        ranked.push((LOCAL_BAND, Origin::Local, local));
    }
    ranked.sort_by_key(|(band, _, _)| *band);
    ranked
        .into_iter()
        .map(|(_, origin, data)| (origin, data))
        .collect()
}

fn merge_point_in_time(
    local: Option<Payload>,
    remote: Vec<DispatchResult>,
    matches: &[SourceMatch],
    scope: &ExclusiveScope,
) -> (Vec<MergedEntity>, usize) {
    let local = local.map(|payload| {
        let mut entities = into_entities(payload);
        for entity in &mut entities {
            scope.mask(entity);
        }
        entities
    });
    let remote: Vec<(Vec<Entity>, &SourceMatch)> = remote
        .into_iter()
        .zip(matches)
        .filter(|(result, _)| result.outcome.is_usable())
        .map(|(result, matched)| (into_entities(result.payload), matched))
        .collect();

    let merged = merge_entities(precedence_order(local, remote));
    (merged.entities, merged.type_conflicts)
}

fn merge_observations(
    criteria: &QueryCriteria,
    local: Option<Payload>,
    remote: Vec<DispatchResult>,
    matches: &[SourceMatch],
    scope: &ExclusiveScope,
) -> Vec<MergedEntity> {
    // Ties: local first, then registrations in match order.
    let mut priority: HashMap<Origin, usize> = HashMap::from([(Origin::Local, 0)]);
    for (index, matched) in matches.iter().enumerate() {
        priority.insert(matched.origin(), index + 1);
    }

    let mut observations: Vec<AttributeObservation> = Vec::new();
    if let Some(payload) = local {
        observations.extend(
            into_observations(payload)
                .into_iter()
                .filter(|o| {
                    let types = o
                        .entity_type
                        .as_ref()
                        .map(|t| vec![t.clone()])
                        .unwrap_or_else(|| criteria.types.clone());
                    !scope.claims(&o.entity_id, &types, &o.attribute_name)
                })
                .map(|o| o.with_origin(Origin::Local)),
        );
    }
    for (result, matched) in remote.into_iter().zip(matches) {
        if !result.outcome.is_usable() {
            continue;
        }
        let origin = matched.origin();
        observations.extend(
            into_observations(result.payload)
                .into_iter()
                .map(|o| o.with_origin(origin.clone())),
        );
    }

    let last_n = criteria.temporal.as_ref().and_then(|t| t.last_n);
    merge_temporal(observations, &priority, last_n, &criteria.types)
}

fn into_entities(payload: Payload) -> Vec<Entity> {
    match payload {
        Payload::Entities(entities) => entities,
        Payload::Observations(_) => Vec::new(),
    }
}

fn into_observations(payload: Payload) -> Vec<AttributeObservation> {
    match payload {
        Payload::Observations(observations) => observations,
        Payload::Entities(_) => Vec::new(),
    }
}
