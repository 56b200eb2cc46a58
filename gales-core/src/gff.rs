//! GFF3 parsing into an arena-backed feature tree.
//!
//! Features are stored in a single `Vec` and addressed by [`FeatureKey`];
//! parent and child links are indices into that vector.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{GalesError, Result};

#[derive(Debug, Hash, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureKey(pub usize);

#[derive(Debug, Hash, Eq, PartialEq, Clone, Serialize, Deserialize)]
pub enum FeatureKind {
    #[serde(rename = "gene")]
    Gene,
    #[serde(rename = "mRNA")]
    MRna,
    #[serde(rename = "rRNA")]
    RRna,
    #[serde(rename = "tRNA")]
    TRna,
    #[serde(rename = "exon")]
    Exon,
    #[serde(rename = "CDS")]
    Cds,
    #[serde(rename = "polypeptide")]
    Polypeptide,
    Other(String),
}

impl From<&str> for FeatureKind {
    fn from(value: &str) -> Self {
        match value {
            "gene" => FeatureKind::Gene,
            "mRNA" => FeatureKind::MRna,
            "rRNA" => FeatureKind::RRna,
            "tRNA" => FeatureKind::TRna,
            "exon" => FeatureKind::Exon,
            "CDS" => FeatureKind::Cds,
            "polypeptide" => FeatureKind::Polypeptide,
            other => FeatureKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Hash, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
    #[serde(rename = ".")]
    Unknown,
}

impl From<&str> for Strand {
    fn from(value: &str) -> Self {
        match value {
            "+" => Strand::Forward,
            "-" => Strand::Reverse,
            _ => Strand::Unknown,
        }
    }
}

/// Functional annotation carried by a polypeptide.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub product_name: Option<String>,
    pub gene_symbol: Option<String>,
    pub go_terms: Vec<String>,
    pub ec_numbers: Vec<String>,
    pub dbxrefs: Vec<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: Option<String>,
    pub kind: FeatureKind,
    /// Index into [`FeatureTree::assemblies`].
    pub assembly: usize,
    pub fmin: u64,
    pub fmax: u64,
    pub strand: Strand,
    pub parent: Option<FeatureKey>,
    pub children: Vec<FeatureKey>,
    pub annotation: Option<Annotation>,
}

impl Feature {
    pub fn length(&self) -> u64 {
        self.fmax.saturating_sub(self.fmin)
    }
}

/// A sequence molecule and the genes located on it, in file order.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    pub id: String,
    pub genes: Vec<FeatureKey>,
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct FeatureTree {
    pub assemblies: Vec<Molecule>,
    pub features: Vec<Feature>,
}

impl FeatureTree {
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<FeatureTree> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| GalesError::io(path, e))?;
        FeatureTree::parse_from(std::io::BufReader::new(file), path)
    }

    pub fn parse_from<R: Read>(reader: R, path: &Path) -> Result<FeatureTree> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .quoting(false)
            .flexible(true)
            .from_reader(reader);

        let mut tree = FeatureTree::default();
        let mut assembly_index: HashMap<String, usize> = HashMap::new();
        let mut parent_ids: Vec<Option<String>> = Vec::new();
        let mut feature_index: HashMap<String, usize> = HashMap::new();

        let mut row = csv::StringRecord::new();
        loop {
            let more = csv_reader.read_record(&mut row)
                .map_err(|source| GalesError::Csv { path: path.to_path_buf(), source })?;
            if !more { break; }

            let line = row.position().map(|p| p.line()).unwrap_or(0);
            let parse_error = |message: String| GalesError::Parse {
                path: path.to_path_buf(),
                line,
                message,
            };

            let first = row.get(0).unwrap_or("");
            // Embedded ##FASTA section
            if first.starts_with('>') { break; }
            if row.len() == 1 && first.trim().is_empty() { continue; }
            if row.len() < 9 {
                return Err(parse_error(format!("expected 9 columns, found {}", row.len())));
            }

            let start: u64 = row[3].trim().parse()
                .map_err(|_| parse_error(format!("invalid start coordinate `{}`", &row[3])))?;
            let end: u64 = row[4].trim().parse()
                .map_err(|_| parse_error(format!("invalid end coordinate `{}`", &row[4])))?;
            if start == 0 || end < start {
                return Err(parse_error(format!("invalid interval {}..{}", start, end)));
            }

            let seqid = row[0].to_string();
            let assembly = *assembly_index.entry(seqid.clone()).or_insert_with(|| {
                tree.assemblies.push(Molecule { id: seqid, genes: Vec::new() });
                tree.assemblies.len() - 1
            });

            let kind = FeatureKind::from(&row[2]);
            let attributes = parse_attributes(&row[8]);
            let first_value = |key: &str| attributes.get(key).and_then(|v| v.first()).cloned();

            let mut parent = first_value("Parent");
            if parent.is_none() && kind == FeatureKind::Polypeptide {
                parent = first_value("Derives_from");
            }

            let annotation = if kind == FeatureKind::Polypeptide {
                annotation_from(&attributes)
            } else {
                None
            };

            let id = first_value("ID");

            // Discontinuous features repeat their ID on every row; fold them into one
            if let Some(&existing) = id.as_ref().and_then(|id| feature_index.get(id)) {
                let feature = &mut tree.features[existing];
                if feature.kind == kind && feature.assembly == assembly {
                    feature.fmin = feature.fmin.min(start - 1);
                    feature.fmax = feature.fmax.max(end);
                    if feature.annotation.is_none() {
                        feature.annotation = annotation;
                    }
                    if parent_ids[existing].is_none() {
                        parent_ids[existing] = parent;
                    }
                    continue;
                }
                warn!(id = ?feature.id, line, "ID reused by an unrelated feature, keeping both");
            }
            if let Some(id) = &id {
                feature_index.entry(id.clone()).or_insert(tree.features.len());
            }

            tree.features.push(Feature {
                id,
                kind,
                assembly,
                fmin: start - 1,
                fmax: end,
                strand: Strand::from(&row[6]),
                parent: None,
                children: Vec::new(),
                annotation,
            });
            parent_ids.push(parent);
        }

        tree.link(parent_ids);
        debug!(
            path = %path.display(),
            features = tree.features.len(),
            assemblies = tree.assemblies.len(),
            "parsed GFF3 feature tree"
        );
        Ok(tree)
    }

    /// Resolves textual parent ids into arena links. Parents may appear after
    /// their children in the file, so this runs once every row is loaded.
    fn link(&mut self, parent_ids: Vec<Option<String>>) {
        let by_id: HashMap<String, FeatureKey> = self.features.iter()
            .enumerate()
            .filter_map(|(i, f)| f.id.clone().map(|id| (id, FeatureKey(i))))
            .collect();

        for (i, parent_id) in parent_ids.into_iter().enumerate() {
            let key = FeatureKey(i);
            match parent_id {
                Some(parent_id) => match by_id.get(&parent_id) {
                    Some(&parent) => {
                        self.features[i].parent = Some(parent);
                        self.features[parent.0].children.push(key);
                    }
                    None => warn!(
                        feature = ?self.features[i].id,
                        parent = %parent_id,
                        "parent feature not found, leaving feature unattached"
                    ),
                },
                None if self.features[i].kind == FeatureKind::Gene => {
                    let assembly = self.features[i].assembly;
                    self.assemblies[assembly].genes.push(key);
                }
                None => {}
            }
        }
    }

    pub fn get(&self, key: FeatureKey) -> Option<&Feature> {
        self.features.get(key.0)
    }

    /// All genes, grouped by assembly in file order.
    pub fn genes(&self) -> impl Iterator<Item=(FeatureKey, &Feature)> + '_ {
        self.assemblies.iter()
            .flat_map(|molecule| molecule.genes.iter())
            .map(move |&key| (key, &self.features[key.0]))
    }

    pub fn children_of(&self, key: FeatureKey, kind: FeatureKind)
        -> impl Iterator<Item=(FeatureKey, &Feature)> + '_
    {
        self.features[key.0].children.iter()
            .map(move |&child| (child, &self.features[child.0]))
            .filter(move |(_, feature)| feature.kind == kind)
    }

    pub fn mrnas(&self, gene: FeatureKey) -> impl Iterator<Item=(FeatureKey, &Feature)> + '_ {
        self.children_of(gene, FeatureKind::MRna)
    }

    pub fn polypeptides(&self, mrna: FeatureKey) -> impl Iterator<Item=(FeatureKey, &Feature)> + '_ {
        self.children_of(mrna, FeatureKind::Polypeptide)
    }

    /// Every polypeptide annotation reachable through gene -> mRNA -> polypeptide.
    pub fn annotations(&self) -> impl Iterator<Item=&Annotation> + '_ {
        self.genes()
            .flat_map(move |(gene, _)| self.mrnas(gene))
            .flat_map(move |(mrna, _)| self.polypeptides(mrna))
            .filter_map(|(_, polypeptide)| polypeptide.annotation.as_ref())
    }
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Parses column 9 (`key=value;key=v1,v2`) with GFF3 percent-decoding.
fn parse_attributes(column: &str) -> HashMap<String, Vec<String>> {
    column.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, values)| {
            let values = values.split(',')
                .filter(|v| !v.is_empty())
                .map(decode)
                .collect();
            (decode(key), values)
        })
        .collect()
}

fn annotation_from(attributes: &HashMap<String, Vec<String>>) -> Option<Annotation> {
    const KEYS: &[&str] = &["product_name", "gene_symbol", "Ontology_term", "Dbxref"];
    if !KEYS.iter().any(|key| attributes.contains_key(*key)) {
        return None;
    }

    let first = |key: &str| attributes.get(key).and_then(|v| v.first()).cloned();
    let mut annotation = Annotation {
        product_name: first("product_name"),
        gene_symbol: first("gene_symbol"),
        ..Annotation::default()
    };

    if let Some(terms) = attributes.get("Ontology_term") {
        annotation.go_terms = terms.iter()
            .filter(|term| term.starts_with("GO:"))
            .cloned()
            .collect();
    }

    if let Some(xrefs) = attributes.get("Dbxref") {
        for xref in xrefs {
            match xref.strip_prefix("EC:") {
                Some(ec) => annotation.ec_numbers.push(ec.to_string()),
                None => annotation.dbxrefs.push(xref.clone()),
            }
        }
    }

    Some(annotation)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) const SAMPLE_GFF: &str = "##gff-version 3
ctg1\tGALES\tgene\t101\t400\t.\t+\t.\tID=gene1
ctg1\tGALES\tmRNA\t101\t400\t.\t+\t.\tID=mRNA1;Parent=gene1
ctg1\tGALES\tpolypeptide\t101\t400\t.\t+\t.\tID=pp1;Parent=mRNA1;product_name=hypothetical protein;Ontology_term=GO:0005524,GO:0016887
ctg1\tGALES\tgene\t1001\t1100\t.\t-\t.\tID=gene2
ctg1\tGALES\tmRNA\t1001\t1100\t.\t-\t.\tID=mRNA2;Parent=gene2
ctg1\tGALES\tpolypeptide\t1001\t1100\t.\t-\t.\tID=pp2;Parent=mRNA2;product_name=ATP synthase subunit alpha;gene_symbol=atpA;Ontology_term=GO:0005524;Dbxref=EC:3.6.3.14,UniRef100:UniRef100_P0ABB0
ctg2\tGALES\tgene\t1\t50\t.\t+\t.\tID=gene3
ctg2\tGALES\trRNA\t1\t50\t.\t+\t.\tID=rRNA1;Parent=gene3
ctg2\tGALES\tgene\t61\t80\t.\t+\t.\tID=gene4
ctg2\tGALES\ttRNA\t61\t80\t.\t+\t.\tID=tRNA1;Parent=gene4
##FASTA
>ctg1
ACGT
";

    pub(crate) fn sample_tree() -> FeatureTree {
        FeatureTree::parse_from(Cursor::new(SAMPLE_GFF), Path::new("sample.gff3")).unwrap()
    }

    #[test]
    fn test_parse_hierarchy() {
        let tree = sample_tree();
        assert_eq!(tree.assemblies.len(), 2);
        assert_eq!(tree.assemblies[0].id, "ctg1");
        assert_eq!(tree.genes().count(), 4);

        let (gene1, feature) = tree.genes().next().unwrap();
        assert_eq!(feature.fmin, 100);
        assert_eq!(feature.fmax, 400);
        assert_eq!(feature.length(), 300);
        assert_eq!(feature.strand, Strand::Forward);

        let (mrna1, _) = tree.mrnas(gene1).next().unwrap();
        let (_, polypeptide) = tree.polypeptides(mrna1).next().unwrap();
        let annotation = polypeptide.annotation.as_ref().unwrap();
        assert_eq!(annotation.product_name.as_deref(), Some("hypothetical protein"));
        assert_eq!(annotation.go_terms, vec!["GO:0005524", "GO:0016887"]);
    }

    #[test]
    fn test_dbxref_splits_ec_numbers() {
        let tree = sample_tree();
        let annotation = tree.annotations().nth(1).unwrap();
        assert_eq!(annotation.gene_symbol.as_deref(), Some("atpA"));
        assert_eq!(annotation.ec_numbers, vec!["3.6.3.14"]);
        assert_eq!(annotation.dbxrefs, vec!["UniRef100:UniRef100_P0ABB0"]);
    }

    #[test]
    fn test_parent_declared_after_child() {
        let gff = "c\tX\tmRNA\t1\t10\t.\t+\t.\tID=m1;Parent=g1\nc\tX\tgene\t1\t10\t.\t+\t.\tID=g1\n";
        let tree = FeatureTree::parse_from(Cursor::new(gff), Path::new("t.gff3")).unwrap();
        let (gene, _) = tree.genes().next().unwrap();
        assert_eq!(tree.mrnas(gene).count(), 1);
    }

    #[test]
    fn test_polypeptide_derives_from() {
        let gff = "c\tX\tgene\t1\t10\t.\t+\t.\tID=g1\n\
                   c\tX\tmRNA\t1\t10\t.\t+\t.\tID=m1;Parent=g1\n\
                   c\tX\tpolypeptide\t1\t10\t.\t+\t.\tID=p1;Derives_from=m1;product_name=kinase%3B putative\n";
        let tree = FeatureTree::parse_from(Cursor::new(gff), Path::new("t.gff3")).unwrap();
        let annotation = tree.annotations().next().unwrap();
        assert_eq!(annotation.product_name.as_deref(), Some("kinase; putative"));
    }

    #[test]
    fn test_annotation_only_on_polypeptides() {
        let gff = "c\tX\tgene\t1\t10\t.\t+\t.\tID=g1;product_name=not kept\n";
        let tree = FeatureTree::parse_from(Cursor::new(gff), Path::new("t.gff3")).unwrap();
        assert!(tree.features[0].annotation.is_none());
    }

    #[test]
    fn test_short_row_is_error() {
        let gff = "c\tX\tgene\t1\n";
        let err = FeatureTree::parse_from(Cursor::new(gff), Path::new("t.gff3")).unwrap_err();
        assert!(matches!(err, GalesError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_bad_coordinate_is_error() {
        let gff = "c\tX\tgene\tone\t10\t.\t+\t.\tID=g1\n";
        let err = FeatureTree::parse_from(Cursor::new(gff), Path::new("t.gff3")).unwrap_err();
        assert!(matches!(err, GalesError::Parse { .. }));
    }

    #[test]
    fn test_rows_sharing_id_are_one_feature() {
        let gff = "c\tX\tgene\t1\t100\t.\t+\t.\tID=g1\n\
                   c\tX\tmRNA\t1\t40\t.\t+\t.\tID=m1;Parent=g1\n\
                   c\tX\tmRNA\t61\t100\t.\t+\t.\tID=m1;Parent=g1\n\
                   c\tX\tgene\t201\t260\t.\t+\t.\tID=g2\n\
                   c\tX\tgene\t301\t340\t.\t+\t.\tID=g2\n";
        let tree = FeatureTree::parse_from(Cursor::new(gff), Path::new("t.gff3")).unwrap();
        assert_eq!(tree.features.len(), 3);
        assert_eq!(tree.genes().count(), 2);

        let (gene, _) = tree.genes().next().unwrap();
        let mrnas: Vec<_> = tree.mrnas(gene).collect();
        assert_eq!(mrnas.len(), 1);
        assert_eq!((mrnas[0].1.fmin, mrnas[0].1.fmax), (0, 100));

        let (_, second) = tree.genes().nth(1).unwrap();
        assert_eq!((second.fmin, second.fmax), (200, 340));
    }

    #[test]
    fn test_tree_serde_round_trip() {
        let tree = sample_tree();
        let json = serde_json::to_string(&tree).unwrap();
        let restored: FeatureTree = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, restored);
    }
}
