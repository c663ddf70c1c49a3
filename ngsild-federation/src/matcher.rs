//! Capability Matcher
//!
//! Decides which registrations might hold data for a query. Matching is a
//! pure predicate over a `MatchFilter` built once per query; the matcher
//! never talks to the network or the registry itself.
//!
//! ## Ordering
//!
//! Matches come out in dispatch precedence order:
//!
//! 1. mode: exclusive, inclusive, auxiliary
//! 2. specific registrations before wildcards (no information entries)
//! 3. newest `createdAt` first
//! 4. registration id, ascending

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use ngsild_model::{
    compile_id_pattern, ContextSourceRegistration, Entity, EntityInfo, GeoQuery, Operation,
    Origin, QueryCriteria, RegistrationInfo, RegistrationMode,
};
use regex::Regex;
use tracing::{debug, warn};

/// Merge precedence band of the local store.
pub const LOCAL_BAND: u8 = 1;

/// A registration selected for dispatch, with the entries that matched.
#[derive(Debug, Clone)]
pub struct SourceMatch {
    pub registration: ContextSourceRegistration,
    /// Matched information entries; empty for a wildcard registration
    pub entries: Vec<RegistrationInfo>,
}

impl SourceMatch {
    pub fn id(&self) -> &str {
        &self.registration.id
    }

    pub fn origin(&self) -> Origin {
        Origin::registration(self.registration.id.clone())
    }

    pub fn is_wildcard(&self) -> bool {
        self.registration.is_wildcard()
    }

    pub fn mode(&self) -> RegistrationMode {
        self.registration.mode
    }

    /// Merge precedence band, lower wins.
    ///
    /// exclusive 0, local 1 (`LOCAL_BAND`), inclusive specific 2, inclusive
    /// wildcard 3, auxiliary 4.
    pub fn band(&self) -> u8 {
        match (self.registration.mode, self.is_wildcard()) {
            (RegistrationMode::Exclusive, _) => 0,
            (RegistrationMode::Inclusive, false) => 2,
            (RegistrationMode::Inclusive, true) => 3,
            (RegistrationMode::Auxiliary, _) => 4,
        }
    }

    /// Whether this exclusive match fully covers the query, so the local
    /// store has nothing to contribute.
    pub fn covers(&self, criteria: &QueryCriteria) -> bool {
        if !self.registration.is_exclusive() || criteria.attrs.is_empty() {
            return false;
        }
        self.entries.iter().any(|entry| {
            let attrs_covered = criteria
                .attrs
                .iter()
                .all(|a| entry.attribute_names().any(|n| n == a));
            attrs_covered
                && (entry.entities.is_empty()
                    || entry.entities.iter().any(|s| selector_covers(s, criteria)))
        })
    }

    /// Outbound criteria restricted to what this source declared.
    pub fn narrowed_criteria(&self, criteria: &QueryCriteria) -> QueryCriteria {
        let mut narrowed = criteria.clone();
        if self.entries.is_empty() {
            return narrowed;
        }

        if !self.entries.iter().any(RegistrationInfo::all_attributes) {
            let declared: Vec<&String> = self
                .entries
                .iter()
                .flat_map(RegistrationInfo::attribute_names)
                .collect();
            if criteria.attrs.is_empty() {
                narrowed.attrs = Vec::new();
                for name in declared {
                    if !narrowed.attrs.contains(name) {
                        narrowed.attrs.push(name.clone());
                    }
                }
            } else {
                narrowed.attrs.retain(|a| declared.contains(&a));
            }
        }

        let selectors: Vec<&EntityInfo> =
            self.entries.iter().flat_map(|e| e.entities.iter()).collect();
        let unrestricted = self.entries.iter().any(|e| e.entities.is_empty());
        if !unrestricted && !selectors.is_empty() {
            if !criteria.types.is_empty() {
                narrowed.types.retain(|t| {
                    selectors
                        .iter()
                        .any(|s| s.entity_type.as_ref().map_or(true, |st| st == t))
                });
            }
            if !criteria.ids.is_empty() {
                let ids: Vec<String> = criteria
                    .ids
                    .iter()
                    .filter(|id| selectors.iter().any(|s| selector_accepts_id(s, id)))
                    .cloned()
                    .collect();
                if !ids.is_empty() {
                    narrowed.ids = ids;
                }
            }
        }

        narrowed
    }
}

fn selector_covers(selector: &EntityInfo, criteria: &QueryCriteria) -> bool {
    let type_covered = match &selector.entity_type {
        None => true,
        Some(t) => !criteria.types.is_empty() && criteria.types.iter().all(|q| q == t),
    };
    let id_covered = match (&selector.id, &selector.id_pattern) {
        (None, None) => true,
        _ if criteria.id_pattern.is_some() || criteria.ids.is_empty() => false,
        _ => criteria.ids.iter().all(|id| selector_accepts_id(selector, id)),
    };
    type_covered && id_covered
}

/// Whether a selector admits a concrete entity id. An invalid pattern admits nothing.
fn selector_accepts_id(selector: &EntityInfo, id: &str) -> bool {
    if let Some(own) = &selector.id {
        return own == id;
    }
    match &selector.id_pattern {
        Some(pattern) => compile_id_pattern(pattern)
            .map(|re| re.is_match(id))
            .unwrap_or(false),
        None => true,
    }
}

/// Query dimensions the matcher compares against registrations.
#[derive(Debug)]
pub struct MatchFilter<'a> {
    pub types: &'a [String],
    pub ids: &'a [String],
    pub id_pattern: Option<Regex>,
    pub attrs: &'a [String],
    pub geo: Option<&'a GeoQuery>,
    pub time_range: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)>,
    pub operation: Operation,
}

impl<'a> MatchFilter<'a> {
    pub fn from_criteria(criteria: &'a QueryCriteria) -> Self {
        Self {
            types: &criteria.types,
            ids: &criteria.ids,
            // validate() has already rejected invalid patterns
            id_pattern: criteria
                .id_pattern
                .as_deref()
                .and_then(|p| compile_id_pattern(p).ok()),
            attrs: &criteria.attrs,
            geo: criteria.geo.as_ref(),
            time_range: criteria.temporal.as_ref().map(|t| t.bounds()),
            operation: criteria.operation(),
        }
    }

    /// Entity dimension of one information entry.
    fn entities_match(&self, entry: &RegistrationInfo, registration_id: &str) -> bool {
        entry.entities.is_empty()
            || entry
                .entities
                .iter()
                .any(|selector| self.selector_matches(selector, registration_id))
    }

    fn selector_matches(&self, selector: &EntityInfo, registration_id: &str) -> bool {
        let type_ok = match &selector.entity_type {
            Some(t) => self.types.is_empty() || self.types.contains(t),
            None => true,
        };
        if !type_ok {
            return false;
        }

        let selector_pattern = match selector.id_pattern.as_deref().map(compile_id_pattern) {
            Some(Err(e)) => {
                warn!(csr_id = %registration_id, error = %e, "Ignoring selector with invalid idPattern");
                return false;
            }
            Some(Ok(re)) => Some(re),
            None => None,
        };

        if self.ids.is_empty() && self.id_pattern.is_none() {
            return true;
        }
        if let Some(id) = &selector.id {
            return if self.ids.is_empty() {
                self.id_pattern.as_ref().is_some_and(|re| re.is_match(id))
            } else {
                self.ids.contains(id)
            };
        }
        if let Some(re) = selector_pattern {
            // Two patterns cannot be intersected; assume they may overlap.
            return self.ids.is_empty() || self.ids.iter().any(|id| re.is_match(id));
        }
        true
    }

    fn attributes_match(&self, entry: &RegistrationInfo) -> bool {
        self.attrs.is_empty()
            || entry.all_attributes()
            || entry.attribute_names().any(|name| self.attrs.contains(name))
    }

    /// Whether one information entry can contribute to the query.
    pub fn entry_matches(&self, entry: &RegistrationInfo, registration_id: &str) -> bool {
        self.entities_match(entry, registration_id) && self.attributes_match(entry)
    }

    /// Registration-level scope: operation, geography, observation interval.
    pub fn scope_matches(&self, registration: &ContextSourceRegistration) -> bool {
        if !registration.supports(self.operation) {
            return false;
        }
        if let (Some(geo), Some(location)) = (self.geo, &registration.location) {
            if !geo.may_match_region(location) {
                return false;
            }
        }
        if let (Some((start, end)), Some(interval)) =
            (self.time_range, &registration.observation_interval)
        {
            if !interval.overlaps(start, end) {
                return false;
            }
        }
        true
    }
}

/// Selects and orders registrations for a query.
#[derive(Debug, Clone, Default)]
pub struct CapabilityMatcher {
    own_endpoint: Option<String>,
}

fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_ascii_lowercase()
}

impl CapabilityMatcher {
    /// Matcher that skips registrations pointing at `public_url`.
    pub fn new(public_url: Option<&str>) -> Self {
        Self {
            own_endpoint: public_url.map(normalize_endpoint),
        }
    }

    fn is_self(&self, registration: &ContextSourceRegistration) -> bool {
        self.own_endpoint
            .as_deref()
            .is_some_and(|own| normalize_endpoint(&registration.endpoint) == own)
    }

    /// Registrations that might answer `criteria`, in precedence order.
    pub fn match_sources(
        &self,
        criteria: &QueryCriteria,
        registrations: &[ContextSourceRegistration],
        now: DateTime<Utc>,
    ) -> Vec<SourceMatch> {
        let filter = MatchFilter::from_criteria(criteria);

        let mut matches: Vec<SourceMatch> = registrations
            .iter()
            .filter(|r| {
                if r.is_expired(now) {
                    debug!(csr_id = %r.id, "Skipping expired registration");
                    return false;
                }
                if self.is_self(r) {
                    debug!(csr_id = %r.id, "Skipping registration of this broker");
                    return false;
                }
                filter.scope_matches(r)
            })
            .filter_map(|r| {
                if r.is_wildcard() {
                    return Some(SourceMatch {
                        registration: r.clone(),
                        entries: Vec::new(),
                    });
                }
                let entries: Vec<RegistrationInfo> = r
                    .information
                    .iter()
                    .filter(|entry| filter.entry_matches(entry, &r.id))
                    .cloned()
                    .collect();
                (!entries.is_empty()).then(|| SourceMatch {
                    registration: r.clone(),
                    entries,
                })
            })
            .collect();

        matches.sort_by(compare_matches);
        matches
    }
}

fn compare_matches(a: &SourceMatch, b: &SourceMatch) -> Ordering {
    a.mode()
        .rank()
        .cmp(&b.mode().rank())
        .then_with(|| a.is_wildcard().cmp(&b.is_wildcard()))
        .then_with(|| {
            b.registration
                .registered_at()
                .cmp(&a.registration.registered_at())
        })
        .then_with(|| a.id().cmp(b.id()))
}

/// Attribute scope claimed by exclusive matches.
///
/// Data in this scope from the local store is discarded before merging.
/// Selector patterns are compiled once per query.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveScope {
    entries: Vec<ClaimedEntry>,
}

#[derive(Debug, Clone)]
struct ClaimedEntry {
    attributes: Vec<String>,
    /// Empty means every entity.
    selectors: Vec<ClaimSelector>,
}

#[derive(Debug, Clone)]
struct ClaimSelector {
    entity_type: Option<String>,
    id: IdRule,
}

#[derive(Debug, Clone)]
enum IdRule {
    Any,
    Exact(String),
    Pattern(Regex),
    Nothing,
}

impl ClaimSelector {
    fn from_info(selector: &EntityInfo) -> Self {
        let id = match (&selector.id, &selector.id_pattern) {
            (Some(id), _) => IdRule::Exact(id.clone()),
            (None, Some(pattern)) => match compile_id_pattern(pattern) {
                Ok(re) => IdRule::Pattern(re),
                Err(_) => IdRule::Nothing,
            },
            (None, None) => IdRule::Any,
        };
        Self {
            entity_type: selector.entity_type.clone(),
            id,
        }
    }

    fn accepts(&self, entity_id: &str, types: &[String]) -> bool {
        let type_ok = self.entity_type.as_ref().map_or(true, |t| types.contains(t));
        type_ok
            && match &self.id {
                IdRule::Any => true,
                IdRule::Exact(id) => id == entity_id,
                IdRule::Pattern(re) => re.is_match(entity_id),
                IdRule::Nothing => false,
            }
    }
}

impl ExclusiveScope {
    pub fn from_matches(matches: &[SourceMatch]) -> Self {
        let entries = matches
            .iter()
            .filter(|m| m.registration.is_exclusive())
            .flat_map(|m| m.entries.iter())
            .map(|entry| ClaimedEntry {
                attributes: entry.attribute_names().cloned().collect(),
                selectors: entry.entities.iter().map(ClaimSelector::from_info).collect(),
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `attribute` of the given entity is claimed exclusively.
    pub fn claims(&self, entity_id: &str, types: &[String], attribute: &str) -> bool {
        self.entries.iter().any(|entry| {
            entry.attributes.iter().any(|n| n == attribute)
                && (entry.selectors.is_empty()
                    || entry.selectors.iter().any(|s| s.accepts(entity_id, types)))
        })
    }

    /// Remove claimed attributes from a local entity.
    pub fn mask(&self, entity: &mut Entity) {
        if self.is_empty() {
            return;
        }
        let id = entity.id.clone();
        let types = entity.types.clone();
        entity.retain_attributes(|name| !self.claims(&id, &types, name));
    }
}
