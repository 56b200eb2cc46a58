//! Summary statistics shown on the viewer's landing page.
//!
//! Field names double as the JSON keys the UI reads, so they must not change.

use serde::{Deserialize, Serialize};

use crate::{Assembly, FeatureKind, FeatureTree};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastaStats {
    pub success: u8,
    pub stats_assembly_count: u64,
    pub stats_assembly_sum_length: u64,
    pub stats_assembly_longest_length: Option<u64>,
    pub stats_assembly_shortest_length: Option<u64>,
    /// Percentage with one decimal place, e.g. `"38.2%"`.
    pub stats_assembly_gc: String,
}

impl FastaStats {
    pub fn from_assemblies<'a, I>(assemblies: I) -> FastaStats
        where I: IntoIterator<Item=&'a Assembly>
    {
        let mut count = 0;
        let mut sum_length = 0;
        let mut gc_count = 0;
        let mut longest: Option<u64> = None;
        let mut shortest: Option<u64> = None;

        for assembly in assemblies {
            count += 1;
            sum_length += assembly.length;
            gc_count += assembly.gc_count;
            longest = Some(longest.map_or(assembly.length, |l| l.max(assembly.length)));
            shortest = Some(shortest.map_or(assembly.length, |s| s.min(assembly.length)));
        }

        let gc_percent = if sum_length == 0 {
            0.0
        } else {
            gc_count as f64 / sum_length as f64 * 100.0
        };

        FastaStats {
            success: 1,
            stats_assembly_count: count,
            stats_assembly_sum_length: sum_length,
            stats_assembly_longest_length: longest,
            stats_assembly_shortest_length: shortest,
            stats_assembly_gc: format!("{:.1}%", gc_percent),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GffStats {
    pub success: u8,
    pub stats_gene_count: u64,
    pub stats_hypo_gene_count: u64,
    pub stats_gene_mean_length: Option<String>,
    pub stats_specific_annot_count: u64,
    #[serde(rename = "stats_rRNA_count")]
    pub stats_rrna_count: u64,
    #[serde(rename = "stats_tRNA_count")]
    pub stats_trna_count: u64,
    pub stats_go_terms_assigned: u64,
    pub stats_ec_numbers_assigned: u64,
    pub stats_gene_symbols_assigned: u64,
    pub stats_dbxrefs_assigned: u64,
    pub stats_mean_go_terms_per_gene: Option<String>,
}

impl GffStats {
    pub fn from_tree(tree: &FeatureTree) -> GffStats {
        let mut stats = GffStats {
            success: 0,
            stats_gene_count: 0,
            stats_hypo_gene_count: 0,
            stats_gene_mean_length: None,
            stats_specific_annot_count: 0,
            stats_rrna_count: 0,
            stats_trna_count: 0,
            stats_go_terms_assigned: 0,
            stats_ec_numbers_assigned: 0,
            stats_gene_symbols_assigned: 0,
            stats_dbxrefs_assigned: 0,
            stats_mean_go_terms_per_gene: None,
        };
        let mut gene_length_sum = 0;

        for (gene, feature) in tree.genes() {
            stats.stats_gene_count += 1;
            gene_length_sum += feature.length();
            stats.stats_rrna_count += tree.children_of(gene, FeatureKind::RRna).count() as u64;
            stats.stats_trna_count += tree.children_of(gene, FeatureKind::TRna).count() as u64;

            // A gene is classified by its first mRNA's first polypeptide only
            let product = tree.mrnas(gene).next()
                .and_then(|(mrna, _)| tree.polypeptides(mrna).next())
                .and_then(|(_, polypeptide)| polypeptide.annotation.as_ref())
                .and_then(|annotation| annotation.product_name.as_deref());
            match product {
                Some(name) if name.contains("hypothetical") => stats.stats_hypo_gene_count += 1,
                Some(_) => stats.stats_specific_annot_count += 1,
                None => {}
            }
        }

        for annotation in tree.annotations() {
            stats.stats_go_terms_assigned += annotation.go_terms.len() as u64;
            stats.stats_ec_numbers_assigned += annotation.ec_numbers.len() as u64;
            stats.stats_dbxrefs_assigned += annotation.dbxrefs.len() as u64;
            if annotation.gene_symbol.is_some() {
                stats.stats_gene_symbols_assigned += 1;
            }
        }

        if stats.stats_gene_count > 0 {
            let genes = stats.stats_gene_count as f64;
            stats.stats_gene_mean_length = Some(format!("{:.1}", gene_length_sum as f64 / genes));
            stats.stats_mean_go_terms_per_gene =
                Some(format!("{:.1}", stats.stats_go_terms_assigned as f64 / genes));
        }

        stats.success = 1;
        stats
    }
}
