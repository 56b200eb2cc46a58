//! Sequences every derived file the viewer needs, computing only the ones
//! missing from the input directory.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    check_platform, go_term_counts, map_to_slim, CacheGate, CacheStatus, FastaReader, FastaStats,
    FeatureTree, GalesError, GffStats, Result, SlimMap, ToolCommand,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrackKind {
    Annotation,
    Blast,
    Hmm,
}

/// File names of one browser track: upstream source, then convert, sort and
/// index outputs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TrackLayout {
    pub kind: TrackKind,
    pub name: &'static str,
    pub source: &'static str,
}

impl TrackLayout {
    pub const ALL: [TrackLayout; 3] = [
        TrackLayout { kind: TrackKind::Annotation, name: "annotation", source: InputLayout::GFF_FILE },
        TrackLayout { kind: TrackKind::Blast, name: "blast", source: "blast.btab" },
        TrackLayout { kind: TrackKind::Hmm, name: "hmm", source: "hmmscan.htab" },
    ];

    pub fn converted(&self) -> String { format!("{}.bed", self.name) }
    pub fn sorted(&self) -> String { format!("{}.sorted.bed", self.name) }
    pub fn indexed(&self) -> String { format!("{}.bb", self.name) }
}

/// Fixed names inside the input directory. Cache hits across runs depend on
/// these staying stable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InputLayout {
    pub dir: PathBuf,
}

impl InputLayout {
    pub const GFF_FILE: &'static str = "attributor.annotation.gff3";
    pub const FASTA_STATS: &'static str = "fasta_stats.json";
    pub const FEATURE_CACHE: &'static str = "gff.stored.features.json";
    pub const GFF_STATS: &'static str = "gff_stats.json";
    pub const SLIM_COUNTS: &'static str = "obo_slim_counts.json";
    pub const TWO_BIT: &'static str = "genome.2bit";
    pub const CHROM_SIZES: &'static str = "genome.chrom.sizes";

    pub fn new<P: Into<PathBuf>>(dir: P) -> InputLayout {
        InputLayout { dir: dir.into() }
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn gff(&self) -> PathBuf { self.file(Self::GFF_FILE) }
    pub fn fasta_stats(&self) -> PathBuf { self.file(Self::FASTA_STATS) }
    pub fn feature_cache(&self) -> PathBuf { self.file(Self::FEATURE_CACHE) }
    pub fn gff_stats(&self) -> PathBuf { self.file(Self::GFF_STATS) }
    pub fn slim_counts(&self) -> PathBuf { self.file(Self::SLIM_COUNTS) }
    pub fn two_bit(&self) -> PathBuf { self.file(Self::TWO_BIT) }
    pub fn chrom_sizes(&self) -> PathBuf { self.file(Self::CHROM_SIZES) }
}

/// External converters used to build the browser tracks.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Toolchain {
    pub two_bit: ToolCommand,
    pub chrom_sizes: ToolCommand,
    pub annotation_track: ToolCommand,
    pub blast_track: ToolCommand,
    pub hmm_track: ToolCommand,
    pub sort: ToolCommand,
    pub index: ToolCommand,
}

impl Default for Toolchain {
    fn default() -> Self {
        Toolchain {
            two_bit: ToolCommand::new("faToTwoBit", &["{input}", "{output}"]),
            chrom_sizes: ToolCommand::new("twoBitInfo", &["{input}", "{output}"]),
            annotation_track: ToolCommand::new("gff3ToBed", &["{input}"]),
            blast_track: ToolCommand::new("btabToBed", &["{input}"]),
            hmm_track: ToolCommand::new("htabToBed", &["{input}"]),
            sort: ToolCommand::new("sort", &["-k1,1", "-k2,2n", "{input}"]),
            index: ToolCommand::new("bedToBigBed", &["{input}", "{sizes}", "{output}"]),
        }
    }
}

impl Toolchain {
    /// Defaults, with each program overridable through `GALES_TOOL_<STEP>`.
    pub fn from_env() -> Toolchain {
        let defaults = Toolchain::default();
        let program = |var: &str, tool: ToolCommand| match std::env::var(var) {
            Ok(program) if !program.is_empty() => tool.with_program(program),
            _ => tool,
        };

        Toolchain {
            two_bit: program("GALES_TOOL_TWO_BIT", defaults.two_bit),
            chrom_sizes: program("GALES_TOOL_CHROM_SIZES", defaults.chrom_sizes),
            annotation_track: program("GALES_TOOL_ANNOTATION_TRACK", defaults.annotation_track),
            blast_track: program("GALES_TOOL_BLAST_TRACK", defaults.blast_track),
            hmm_track: program("GALES_TOOL_HMM_TRACK", defaults.hmm_track),
            sort: program("GALES_TOOL_SORT", defaults.sort),
            index: program("GALES_TOOL_INDEX", defaults.index),
        }
    }

    fn converter(&self, kind: TrackKind) -> &ToolCommand {
        match kind {
            TrackKind::Annotation => &self.annotation_track,
            TrackKind::Blast => &self.blast_track,
            TrackKind::Hmm => &self.hmm_track,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub fasta_file: PathBuf,
    pub slim_map_file: PathBuf,
    pub toolchain: Toolchain,
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct PipelineReport {
    pub steps: Vec<(String, CacheStatus)>,
    pub external_invocations: usize,
}

impl PipelineReport {
    fn record(&mut self, step: &str, status: CacheStatus) {
        self.steps.push((step.to_string(), status));
    }

    pub fn status(&self, step: &str) -> Option<CacheStatus> {
        self.steps.iter()
            .find(|(name, _)| name == step)
            .map(|(_, status)| *status)
    }

    pub fn computed(&self) -> usize {
        self.steps.iter()
            .filter(|(_, status)| *status == CacheStatus::Computed)
            .count()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    layout: InputLayout,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Pipeline {
        let layout = InputLayout::new(&config.input_dir);
        Pipeline { config, layout }
    }

    pub fn layout(&self) -> &InputLayout {
        &self.layout
    }

    fn check_inputs(&self) -> Result<()> {
        let required = [
            self.config.input_dir.clone(),
            self.config.fasta_file.clone(),
            self.layout.gff(),
        ];
        match required.iter().find(|path| !path.exists()) {
            Some(missing) => Err(GalesError::MissingInput(missing.clone())),
            None => Ok(()),
        }
    }

    /// Brings every derived file into existence, in dependency order. The
    /// first failure aborts the run; outputs completed before it stay cached.
    pub fn run(&self) -> Result<PipelineReport> {
        check_platform()?;
        self.check_inputs()?;

        let layout = &self.layout;
        let config = &self.config;
        let tools = &config.toolchain;
        let mut gate = CacheGate::new();
        let mut report = PipelineReport::default();
        let mut tree: Option<FeatureTree> = None;
        let feature_cache = layout.feature_cache();

        info!(dir = %layout.dir.display(), "checking for stored statistics and analyses");

        let status = gate.ensure(&layout.fasta_stats(), |staging| {
            let assemblies = FastaReader::open(&config.fasta_file)?.assemblies()?;
            write_json(staging, &FastaStats::from_assemblies(&assemblies))
        })?;
        report.record("fasta_stats", status);

        let status = gate.ensure(&feature_cache, |staging| {
            let parsed = FeatureTree::parse_file(layout.gff())?;
            write_json(staging, &parsed)?;
            tree = Some(parsed);
            Ok(())
        })?;
        report.record("feature_tree", status);

        let status = gate.ensure(&layout.gff_stats(), |staging| {
            let tree = load_tree(&mut tree, &feature_cache)?;
            write_json(staging, &GffStats::from_tree(tree))
        })?;
        report.record("gff_stats", status);

        let two_bit = layout.two_bit();
        let chrom_sizes = layout.chrom_sizes();
        run_external(&mut gate, &mut report, "two_bit", &tools.two_bit,
            &config.fasta_file, &two_bit, None)?;
        run_external(&mut gate, &mut report, "chrom_sizes", &tools.chrom_sizes,
            &two_bit, &chrom_sizes, None)?;

        for track in TrackLayout::ALL.iter() {
            let source = layout.file(track.source);
            let converted = layout.file(&track.converted());
            let sorted = layout.file(&track.sorted());
            let indexed = layout.file(&track.indexed());

            run_external(&mut gate, &mut report, &format!("{}.convert", track.name),
                tools.converter(track.kind), &source, &converted, None)?;
            run_external(&mut gate, &mut report, &format!("{}.sort", track.name),
                &tools.sort, &converted, &sorted, None)?;
            run_external(&mut gate, &mut report, &format!("{}.index", track.name),
                &tools.index, &sorted, &indexed, Some(&chrom_sizes))?;
        }

        let status = gate.ensure(&layout.slim_counts(), |staging| {
            let tree = load_tree(&mut tree, &feature_cache)?;
            let slim_map = SlimMap::load(&config.slim_map_file)?;
            let counts = map_to_slim(&go_term_counts(tree), &slim_map);
            write_json(staging, &counts)
        })?;
        report.record("slim_counts", status);

        info!(
            computed = report.computed(),
            reused = report.steps.len() - report.computed(),
            external_invocations = report.external_invocations,
            "all derived files are in place"
        );
        Ok(report)
    }
}

/// One gated external step. Declared dependencies must already exist; they
/// are checked only when the output actually has to be built.
fn run_external(
    gate: &mut CacheGate,
    report: &mut PipelineReport,
    step: &str,
    tool: &ToolCommand,
    input: &Path,
    output: &Path,
    sizes: Option<&Path>,
) -> Result<()> {
    let status = gate.ensure(output, |staging| {
        let missing = std::iter::once(input)
            .chain(sizes)
            .find(|dependency| !dependency.exists());
        if let Some(path) = missing {
            return Err(GalesError::MissingDependency { step: step.to_string(), path: path.to_path_buf() });
        }

        info!(step, program = %tool.program, "running external converter");
        report.external_invocations += 1;
        tool.run(input, staging, sizes)
    })?;
    report.record(step, status);
    Ok(())
}

fn load_tree<'a>(slot: &'a mut Option<FeatureTree>, path: &Path) -> Result<&'a FeatureTree> {
    let tree = match slot.take() {
        Some(tree) => tree,
        None => {
            debug!(path = %path.display(), "loading stored feature tree");
            read_json(path)?
        }
    };
    Ok(slot.insert(tree))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| GalesError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)
        .map_err(|source| GalesError::Json { path: path.to_path_buf(), source })?;
    writer.flush().map_err(|e| GalesError::io(path, e))?;
    writer.get_ref().sync_all().map_err(|e| GalesError::io(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| GalesError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|source| GalesError::Json { path: path.to_path_buf(), source })
}
