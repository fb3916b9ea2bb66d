//! Identity resolution.
//!
//! Collapses the raw (identifier, name) spellings of a student into a single
//! [`StudentIdentity`]. Resolution runs in two phases: a frequency tally over
//! the complete batch, then a pure mapping applied to every record. All ties
//! are broken lexicographically, so the result does not depend on row order.
//!
//! Two policies exist and are kept separate:
//!
//! - [`ResolutionStrategy::IdentifierKeyed`]: the truncated identifier is the
//!   ground truth. Among the names seen for it, names containing a Han
//!   character win over romanized or placeholder names, then the majority.
//! - [`ResolutionStrategy::NameKeyed`]: the whitespace-stripped name is the
//!   ground truth and the most frequent identifier of that name is reassigned
//!   to all of its records.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::models::{NormalizedRecord, ResolvedRecord, StudentIdentity};
use crate::transform::normalize::matching_name;

static HAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{Han}").expect("static pattern"));

/// True when the name contains at least one ideographic (Han) character.
pub fn has_ideograph(name: &str) -> bool {
    HAN.is_match(name)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    #[default]
    #[serde(rename = "identifier", alias = "id")]
    IdentifierKeyed,
    #[serde(rename = "name")]
    NameKeyed,
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "identifier" | "id" => Ok(Self::IdentifierKeyed),
            "name" => Ok(Self::NameKeyed),
            other => Err(format!("unknown strategy '{}' (expected 'identifier' or 'name')", other)),
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentifierKeyed => write!(f, "identifier"),
            Self::NameKeyed => write!(f, "name"),
        }
    }
}

// =============================================================================
// Phase 1: frequency tally
// =============================================================================

/// Counts observed inside one resolution group.
#[derive(Debug, Default)]
struct GroupTally {
    /// canonical identifier -> records
    ids: BTreeMap<String, usize>,
    /// matching name -> records
    names: BTreeMap<String, usize>,
    /// matching name -> display spelling -> records
    spellings: BTreeMap<String, BTreeMap<String, usize>>,
}

impl GroupTally {
    fn add(&mut self, record: &NormalizedRecord) {
        *self.ids.entry(record.student_id.clone()).or_default() += 1;
        *self.names.entry(record.name_key.clone()).or_default() += 1;
        *self
            .spellings
            .entry(record.name_key.clone())
            .or_default()
            .entry(record.name.clone())
            .or_default() += 1;
    }

    /// Most frequent display spelling of a matching name.
    fn display_for(&self, name_key: &str) -> String {
        self.spellings
            .get(name_key)
            .and_then(|s| most_frequent(s.iter()))
            .cloned()
            .unwrap_or_else(|| name_key.to_string())
    }

    fn variant_ids(&self) -> Vec<String> {
        self.ids.keys().cloned().collect()
    }

    fn variant_names(&self) -> Vec<String> {
        self.spellings
            .values()
            .flat_map(|s| s.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Highest count wins; among equal counts the smallest value, because the
/// candidates arrive in ascending order and only a strictly greater count
/// replaces the current best.
fn most_frequent<'a, I>(candidates: I) -> Option<&'a String>
where
    I: IntoIterator<Item = (&'a String, &'a usize)>,
{
    candidates
        .into_iter()
        .fold(None::<(&'a String, usize)>, |best, (value, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((value, count)),
        })
        .map(|(value, _)| value)
}

fn tally_by<F>(records: &[NormalizedRecord], key: F) -> BTreeMap<String, GroupTally>
where
    F: Fn(&NormalizedRecord) -> &str,
{
    let mut groups: BTreeMap<String, GroupTally> = BTreeMap::new();
    for record in records {
        groups.entry(key(record).to_string()).or_default().add(record);
    }
    groups
}

// =============================================================================
// Phase 2: mapping
// =============================================================================

/// Matching key -> identity, for one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMap {
    strategy: ResolutionStrategy,
    identities: BTreeMap<String, Arc<StudentIdentity>>,
}

impl IdentityMap {
    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Key a record is looked up by under this map's strategy.
    pub fn key_of<'a>(&self, record: &'a NormalizedRecord) -> &'a str {
        match self.strategy {
            ResolutionStrategy::IdentifierKeyed => &record.student_id,
            ResolutionStrategy::NameKeyed => &record.name_key,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Arc<StudentIdentity>> {
        self.identities.get(key)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<StudentIdentity>)> {
        self.identities.iter()
    }
}

/// Build the identity map for a complete batch.
pub fn resolve(records: &[NormalizedRecord], strategy: ResolutionStrategy) -> IdentityMap {
    let identities = match strategy {
        ResolutionStrategy::IdentifierKeyed => resolve_by_identifier(records),
        ResolutionStrategy::NameKeyed => resolve_by_name(records),
    };
    IdentityMap {
        strategy,
        identities,
    }
}

fn resolve_by_identifier(records: &[NormalizedRecord]) -> BTreeMap<String, Arc<StudentIdentity>> {
    tally_by(records, |r| r.student_id.as_str())
        .into_iter()
        .map(|(id, tally)| {
            let ideographic = tally.names.iter().filter(|(name, _)| has_ideograph(name));
            let best = match most_frequent(ideographic) {
                Some(name) => Some(name),
                None => most_frequent(tally.names.iter()),
            };
            let canonical_name = best
                .map(|key| tally.display_for(key))
                .unwrap_or_default();

            let identity = StudentIdentity {
                canonical_id: id.clone(),
                canonical_name,
                variant_ids: tally.variant_ids(),
                variant_names: tally.variant_names(),
            };
            (id, Arc::new(identity))
        })
        .collect()
}

fn resolve_by_name(records: &[NormalizedRecord]) -> BTreeMap<String, Arc<StudentIdentity>> {
    tally_by(records, |r| r.name_key.as_str())
        .into_iter()
        .map(|(name_key, tally)| {
            let identity = StudentIdentity {
                canonical_id: most_frequent(tally.ids.iter()).cloned().unwrap_or_default(),
                canonical_name: tally.display_for(&name_key),
                variant_ids: tally.variant_ids(),
                variant_names: tally.variant_names(),
            };
            (name_key, Arc::new(identity))
        })
        .collect()
}

/// Bind every record to its identity.
///
/// A record whose key is missing from the map (the map was built from another
/// batch) resolves to an identity made of its own id and name.
pub fn apply(records: Vec<NormalizedRecord>, map: &IdentityMap) -> Vec<ResolvedRecord> {
    records
        .into_iter()
        .map(|record| {
            let identity = map
                .get(map.key_of(&record))
                .cloned()
                .unwrap_or_else(|| {
                    Arc::new(StudentIdentity {
                        canonical_id: record.student_id.clone(),
                        canonical_name: record.name.clone(),
                        variant_ids: vec![record.student_id.clone()],
                        variant_names: vec![record.name.clone()],
                    })
                });
            ResolvedRecord { identity, record }
        })
        .collect()
}

// =============================================================================
// Exclusion
// =============================================================================

#[derive(Debug, Clone)]
pub struct ExclusionResult {
    pub records: Vec<ResolvedRecord>,
    pub removed: usize,
    /// Exclusion entries that matched no identity.
    pub unmatched: Vec<String>,
}

/// Whether an exclusion entry designates this identity, by identifier or by
/// name (names compared with all whitespace removed).
fn matches_entry(identity: &StudentIdentity, entry: &str) -> bool {
    let entry = entry.trim();
    let entry_key = matching_name(entry);
    identity.canonical_id == entry
        || identity.variant_ids.iter().any(|id| id == entry)
        || matching_name(&identity.canonical_name) == entry_key
        || identity
            .variant_names
            .iter()
            .any(|name| matching_name(name) == entry_key)
}

/// Remove every record of the listed identities.
pub fn exclude(records: Vec<ResolvedRecord>, list: &[String]) -> ExclusionResult {
    let entries: Vec<&str> = list
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect();
    let mut matched: BTreeSet<&str> = BTreeSet::new();
    let before = records.len();

    let kept: Vec<ResolvedRecord> = records
        .into_iter()
        .filter(|r| {
            let hit = entries
                .iter()
                .copied()
                .find(|entry| matches_entry(&r.identity, entry));
            if let Some(entry) = hit {
                matched.insert(entry);
            }
            hit.is_none()
        })
        .collect();

    let unmatched = entries
        .iter()
        .filter(|e| !matched.contains(*e))
        .map(|e| e.to_string())
        .collect();

    ExclusionResult {
        removed: before - kept.len(),
        records: kept,
        unmatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;
    use crate::transform::normalize::Normalizer;

    fn rec(id: &str, name: &str) -> RawRecord {
        RawRecord::new(id, name, "2026/02/16", "Math", "10", "5")
    }

    fn normalize(raw: Vec<RawRecord>) -> Vec<NormalizedRecord> {
        Normalizer::default().normalize(&raw)
    }

    #[test]
    fn test_has_ideograph() {
        assert!(has_ideograph("田中太郎"));
        assert!(has_ideograph("佐々木"));
        assert!(!has_ideograph("Tanaka Taro"));
        assert!(!has_ideograph("たなか"));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("ID".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::IdentifierKeyed));
        assert_eq!("name".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::NameKeyed));
        assert!("email".parse::<ResolutionStrategy>().is_err());
    }

    #[test]
    fn test_identifier_keyed_shares_canonical_id() {
        let records = normalize(vec![
            RawRecord::new("AB1234", "田中 太郎", "2026/02/16", "Math", "20", "10"),
            RawRecord::new("AB1234", "田中太郎", "2026/02/16", "Math", "10", "8"),
        ]);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        let resolved = apply(records, &map);

        assert_eq!(map.len(), 1);
        assert_eq!(resolved[0].identity.canonical_id, "AB1234");
        assert_eq!(resolved[1].identity.canonical_id, "AB1234");
        assert!(Arc::ptr_eq(&resolved[0].identity, &resolved[1].identity));
    }

    #[test]
    fn test_identifier_keyed_prefers_ideographic_names() {
        let records = normalize(vec![
            rec("AB1234", "Tanaka Taro"),
            rec("AB1234", "Tanaka Taro"),
            rec("AB1234", "Tanaka Taro"),
            rec("AB1234", "田中 太郎"),
        ]);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        let identity = map.get("AB1234").unwrap();

        assert_eq!(identity.canonical_name, "田中 太郎");
        assert_eq!(identity.variant_names, vec!["Tanaka Taro", "田中 太郎"]);
    }

    #[test]
    fn test_identifier_keyed_majority_within_class() {
        let records = normalize(vec![
            rec("AB1234", "田中太郎"),
            rec("AB1234", "田中大郎"),
            rec("AB1234", "田中大郎"),
        ]);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        assert_eq!(map.get("AB1234").unwrap().canonical_name, "田中大郎");
    }

    #[test]
    fn test_identifier_keyed_without_ideographs_uses_majority() {
        let records = normalize(vec![rec("AB1234", "Taro"), rec("AB1234", "TARO"), rec("AB1234", "TARO")]);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        assert_eq!(map.get("AB1234").unwrap().canonical_name, "TARO");
    }

    #[test]
    fn test_identifier_keyed_tie_is_lexicographic() {
        let records = normalize(vec![rec("AB1234", "田中太郎"), rec("AB1234", "田中一郎")]);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        // "一" (U+4E00) sorts before "太" (U+592A).
        assert_eq!(map.get("AB1234").unwrap().canonical_name, "田中一郎");
    }

    #[test]
    fn test_identifier_keyed_truncation_merges_ids() {
        let records = normalize(vec![rec("AB1234-1", "田中太郎"), rec("AB1234-2", "田中太郎")]);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        assert_eq!(map.len(), 1);
        assert!(map.get("AB1234").is_some());
    }

    #[test]
    fn test_identity_determinism_under_permutation() {
        let rows = vec![
            rec("AB1234", "田中太郎"),
            rec("AB1234", "Tanaka"),
            rec("AB1234", "田中一郎"),
            rec("CD5678", "Suzuki"),
            rec("CD5678", "SUZUKI"),
            rec("CD5678", "鈴木 花子"),
            rec("CD5678", "鈴木花子"),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();
        let mut rotated = rows.clone();
        rotated.rotate_left(3);

        let a = resolve(&normalize(rows), ResolutionStrategy::IdentifierKeyed);
        let b = resolve(&normalize(reversed), ResolutionStrategy::IdentifierKeyed);
        let c = resolve(&normalize(rotated), ResolutionStrategy::IdentifierKeyed);

        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_name_keyed_picks_most_frequent_id() {
        let records = normalize(vec![
            rec("AB1243", "田中 太郎"),
            rec("AB1234", "田中太郎"),
            rec("AB1234", "田中　太郎"),
        ]);
        let map = resolve(&records, ResolutionStrategy::NameKeyed);
        let resolved = apply(records, &map);

        assert_eq!(map.len(), 1);
        assert!(resolved.iter().all(|r| r.identity.canonical_id == "AB1234"));
        assert_eq!(resolved[0].identity.variant_ids, vec!["AB1234", "AB1243"]);
        // Display spelling: "田中 太郎" seen twice after normalization.
        assert_eq!(resolved[0].identity.canonical_name, "田中 太郎");
    }

    #[test]
    fn test_name_keyed_tie_takes_smallest_id() {
        let records = normalize(vec![rec("ZZ0001", "佐藤花子"), rec("AA0001", "佐藤花子")]);
        let map = resolve(&records, ResolutionStrategy::NameKeyed);
        assert_eq!(map.get("佐藤花子").unwrap().canonical_id, "AA0001");
    }

    #[test]
    fn test_single_record_resolves_to_itself() {
        let records = normalize(vec![rec("XY0001", "山田 一")]);
        for strategy in [ResolutionStrategy::IdentifierKeyed, ResolutionStrategy::NameKeyed] {
            let map = resolve(&records, strategy);
            let resolved = apply(records.clone(), &map);
            assert_eq!(resolved[0].identity.canonical_id, "XY0001");
            assert_eq!(resolved[0].identity.canonical_name, "山田 一");
        }
    }

    #[test]
    fn test_strategies_disagree_on_shared_id() {
        // Two people typed the same identifier.
        let records = normalize(vec![rec("AB1234", "田中太郎"), rec("AB1234", "鈴木花子")]);

        let by_id = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        let by_name = resolve(&records, ResolutionStrategy::NameKeyed);

        assert_eq!(by_id.len(), 1);
        assert_eq!(by_name.len(), 2);
    }

    #[test]
    fn test_apply_with_foreign_map_falls_back() {
        let map = resolve(&[], ResolutionStrategy::IdentifierKeyed);
        let resolved = apply(normalize(vec![rec("AB1234", "田中 太郎")]), &map);
        assert_eq!(resolved[0].identity.canonical_id, "AB1234");
        assert_eq!(resolved[0].identity.canonical_name, "田中 太郎");
    }

    #[test]
    fn test_exclude_by_name_and_id() {
        let records = normalize(vec![
            rec("AB1234", "田中太郎"),
            rec("TEST01", "テスト"),
            rec("CD5678", "藤野 滉大"),
            rec("CD5678", "藤野滉大"),
        ]);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        let resolved = apply(records, &map);

        let result = exclude(
            resolved,
            &["藤野滉大".to_string(), "TEST01".to_string(), "nobody".to_string()],
        );

        assert_eq!(result.removed, 3);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].identity.canonical_id, "AB1234");
        assert_eq!(result.unmatched, vec!["nobody"]);
    }

    #[test]
    fn test_exclude_empty_list_keeps_everything() {
        let records = normalize(vec![rec("AB1234", "田中太郎")]);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        let result = exclude(apply(records, &map), &[]);
        assert_eq!(result.removed, 0);
        assert!(result.unmatched.is_empty());
    }
}
