//! Aggregation of annotated GO terms onto a GO slim.
//!
//! The slim map is an external, precomputed reference and is treated as
//! authoritative: a term that no namespace of the map knows about is dropped
//! from the counts rather than reported.

use std::collections::{BTreeMap, HashMap};
use std::convert::TryFrom;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::{FeatureTree, GalesError, Namespace, Result};

/// Bucket for terms the slim map lists without a slim ancestor.
pub const UNKNOWN_BUCKET: &str = "unknown";

pub type GoTermCounts = BTreeMap<String, u64>;
pub type SlimCounts = BTreeMap<Namespace, BTreeMap<String, u64>>;

/// Full GO term id to slim term id, per namespace. `None` means unmapped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SlimMap {
    namespaces: BTreeMap<Namespace, HashMap<String, Option<String>>>,
}

impl SlimMap {
    pub fn new() -> SlimMap {
        SlimMap::default()
    }

    /// Records a mapping. A root term target is stored as unmapped, so the
    /// namespace roots can never become slim buckets.
    pub fn insert(&mut self, namespace: Namespace, go_id: &str, slim: Option<&str>) {
        let slim = slim
            .filter(|slim| !Namespace::is_root_term(slim))
            .map(str::to_string);
        self.namespaces.entry(namespace)
            .or_insert_with(HashMap::new)
            .insert(normalize_go_id(go_id), slim);
    }

    pub fn get(&self, namespace: Namespace, go_id: &str) -> Option<&Option<String>> {
        self.namespaces.get(&namespace).and_then(|terms| terms.get(go_id))
    }

    pub fn namespaces(&self) -> impl Iterator<Item=Namespace> + '_ {
        self.namespaces.keys().copied()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<SlimMap> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GalesError::MissingInput(path.to_path_buf()));
        }
        let file = std::fs::File::open(path).map_err(|e| GalesError::io(path, e))?;
        SlimMap::parse_from(std::io::BufReader::new(file), path)
    }

    /// Reads `namespace<TAB>go_id<TAB>slim_id` rows. An empty or `-` slim
    /// column, or a missing one, marks the term as unmapped.
    pub fn parse_from<R: Read>(reader: R, path: &Path) -> Result<SlimMap> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .flexible(true)
            .from_reader(reader);

        let mut map = SlimMap::new();
        let mut row = csv::StringRecord::new();
        while csv_reader.read_record(&mut row)
            .map_err(|source| GalesError::Csv { path: path.to_path_buf(), source })?
        {
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            if row.len() < 2 {
                return Err(GalesError::Parse {
                    path: path.to_path_buf(),
                    line,
                    message: format!("expected at least 2 columns, found {}", row.len()),
                });
            }

            let namespace = Namespace::try_from(row[0].trim())
                .map_err(|_| GalesError::Parse {
                    path: path.to_path_buf(),
                    line,
                    message: format!("unknown GO namespace `{}`", &row[0]),
                })?;
            let slim = row.get(2)
                .map(str::trim)
                .filter(|slim| !slim.is_empty() && *slim != "-");
            map.insert(namespace, row[1].trim(), slim);
        }

        debug!(
            path = %path.display(),
            terms = map.namespaces.values().map(HashMap::len).sum::<usize>(),
            "loaded GO slim map"
        );
        Ok(map)
    }
}

/// Prefixes bare accessions such as `0005524` with `GO:`.
fn normalize_go_id(go_id: &str) -> String {
    if go_id.starts_with("GO:") {
        go_id.to_string()
    } else {
        format!("GO:{}", go_id)
    }
}

/// Counts every GO term occurrence over all polypeptide annotations.
pub fn go_term_counts(tree: &FeatureTree) -> GoTermCounts {
    let mut counts = GoTermCounts::new();
    for annotation in tree.annotations() {
        for term in &annotation.go_terms {
            *counts.entry(normalize_go_id(term)).or_insert(0) += 1;
        }
    }
    counts
}

/// Folds raw term counts into slim buckets.
///
/// Each term belongs to the first namespace whose map contains it. Terms
/// found in no namespace are dropped.
pub fn map_to_slim(source_terms: &GoTermCounts, slim_map: &SlimMap) -> SlimCounts {
    let mut counts: SlimCounts = slim_map.namespaces()
        .map(|ns| {
            let mut buckets = BTreeMap::new();
            buckets.insert(UNKNOWN_BUCKET.to_string(), 0);
            (ns, buckets)
        })
        .collect();

    for (term, &count) in source_terms {
        let term = normalize_go_id(term);
        let hit = slim_map.namespaces()
            .find_map(|ns| slim_map.get(ns, &term).map(|slim| (ns, slim)));

        let (namespace, slim) = match hit {
            Some(hit) => hit,
            None => continue,
        };
        let bucket = slim.as_deref().unwrap_or(UNKNOWN_BUCKET);
        if let Some(buckets) = counts.get_mut(&namespace) {
            *buckets.entry(bucket.to_string()).or_insert(0) += count;
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gff::tests::sample_tree;
    use std::io::Cursor;

    fn slim_map() -> SlimMap {
        let mut map = SlimMap::new();
        map.insert(Namespace::MolecularFunction, "GO:0005524", Some("GO:0000166"));
        map.insert(Namespace::MolecularFunction, "GO:0016887", Some("GO:0016787"));
        map.insert(Namespace::MolecularFunction, "GO:0004672", None);
        map.insert(Namespace::BiologicalProcess, "GO:0006412", Some("GO:0006412"));
        map.insert(Namespace::BiologicalProcess, "GO:0009987", Some("GO:0008150"));
        map.insert(Namespace::CellularComponent, "GO:0005737", Some("GO:0005737"));
        map
    }

    #[test]
    fn test_counts_land_in_slim_bucket() {
        let mut terms = GoTermCounts::new();
        terms.insert("GO:0005524".to_string(), 7);
        let counts = map_to_slim(&terms, &slim_map());
        assert_eq!(counts[&Namespace::MolecularFunction]["GO:0000166"], 7);
        assert_eq!(counts[&Namespace::MolecularFunction][UNKNOWN_BUCKET], 0);
        assert!(!counts[&Namespace::BiologicalProcess].contains_key("GO:0000166"));
    }

    #[test]
    fn test_unmapped_goes_to_unknown() {
        let mut terms = GoTermCounts::new();
        terms.insert("GO:0004672".to_string(), 3);
        let counts = map_to_slim(&terms, &slim_map());
        assert_eq!(counts[&Namespace::MolecularFunction][UNKNOWN_BUCKET], 3);
    }

    #[test]
    fn test_terms_missing_from_map_are_dropped() {
        let mut terms = GoTermCounts::new();
        terms.insert("GO:9999999".to_string(), 5);
        let counts = map_to_slim(&terms, &slim_map());
        for buckets in counts.values() {
            assert_eq!(buckets.values().sum::<u64>(), 0);
        }
    }

    #[test]
    fn test_roots_never_become_buckets() {
        let mut terms = GoTermCounts::new();
        terms.insert("GO:0009987".to_string(), 4);
        terms.insert("GO:0006412".to_string(), 2);
        let counts = map_to_slim(&terms, &slim_map());

        for buckets in counts.values() {
            for ns in Namespace::ALL.iter() {
                assert!(!buckets.contains_key(ns.root_term()));
            }
        }
        assert_eq!(counts[&Namespace::BiologicalProcess][UNKNOWN_BUCKET], 4);
        assert_eq!(counts[&Namespace::BiologicalProcess]["GO:0006412"], 2);
    }

    #[test]
    fn test_namespace_sums_match_raw_counts() {
        let mut terms = GoTermCounts::new();
        terms.insert("GO:0005524".to_string(), 7);
        terms.insert("GO:0016887".to_string(), 2);
        terms.insert("GO:0004672".to_string(), 1);
        terms.insert("GO:0006412".to_string(), 11);
        terms.insert("GO:0005737".to_string(), 5);
        terms.insert("GO:0000001".to_string(), 100);
        let map = slim_map();
        let counts = map_to_slim(&terms, &map);

        for ns in map.namespaces() {
            let expected: u64 = terms.iter()
                .filter(|(term, _)| map.get(ns, term).is_some())
                .map(|(_, count)| count)
                .sum();
            let actual: u64 = counts[&ns].values().sum();
            assert_eq!(actual, expected, "namespace {:?}", ns);
        }
    }

    #[test]
    fn test_first_namespace_wins() {
        let mut map = SlimMap::new();
        map.insert(Namespace::BiologicalProcess, "GO:0000001", Some("GO:0000002"));
        map.insert(Namespace::CellularComponent, "GO:0000001", Some("GO:0000003"));
        let mut terms = GoTermCounts::new();
        terms.insert("GO:0000001".to_string(), 1);

        let counts = map_to_slim(&terms, &map);
        let total: u64 = counts.values().flat_map(|b| b.values()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_bare_accessions_are_normalized() {
        let mut terms = GoTermCounts::new();
        terms.insert("0005524".to_string(), 2);
        let counts = map_to_slim(&terms, &slim_map());
        assert_eq!(counts[&Namespace::MolecularFunction]["GO:0000166"], 2);
    }

    #[test]
    fn test_parse_slim_map() {
        let input = "# namespace\tterm\tslim\n\
                     molecular_function\tGO:0005524\tGO:0000166\n\
                     F\tGO:0004672\t-\n\
                     P\tGO:0009987\tGO:0008150\n\
                     C\tGO:0005737\n";
        let map = SlimMap::parse_from(Cursor::new(input), Path::new("slim.tsv")).unwrap();
        assert_eq!(map.get(Namespace::MolecularFunction, "GO:0005524"), Some(&Some("GO:0000166".to_string())));
        assert_eq!(map.get(Namespace::MolecularFunction, "GO:0004672"), Some(&None));
        assert_eq!(map.get(Namespace::BiologicalProcess, "GO:0009987"), Some(&None));
        assert_eq!(map.get(Namespace::CellularComponent, "GO:0005737"), Some(&None));
    }

    #[test]
    fn test_parse_slim_map_rejects_unknown_namespace() {
        let input = "Z\tGO:0005524\tGO:0000166\n";
        let err = SlimMap::parse_from(Cursor::new(input), Path::new("slim.tsv")).unwrap_err();
        assert!(matches!(err, GalesError::Parse { .. }));
    }

    #[test]
    fn test_go_term_counts_from_tree() {
        let counts = go_term_counts(&sample_tree());
        assert_eq!(counts["GO:0005524"], 2);
        assert_eq!(counts["GO:0016887"], 1);
    }

    #[test]
    fn test_slim_counts_json_shape() {
        let mut terms = GoTermCounts::new();
        terms.insert("GO:0005737".to_string(), 5);
        let counts = map_to_slim(&terms, &slim_map());
        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json["cellular_component"]["GO:0005737"], 5);
        assert_eq!(json["biological_process"]["unknown"], 0);
    }
}
