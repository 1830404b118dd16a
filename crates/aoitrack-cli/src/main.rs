//! Command-line front end for gaze segmentation and AOI mapping.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use aoitrack::aoi::{ClusterSortKey, MarkerAoiModel, RecordedMarkers};
use aoitrack::board_layout::{BoardLayout, BoardSpec};
use aoitrack::pipeline::{self, AnalysisConfig, ClusterMethod, MappingSummary};
use aoitrack::segmentation::DispersionMetric;
use aoitrack::tracker::{AoiHit, AoiTracker};
use aoitrack::video::{FramesAndGaze, ImageSequenceSource, VideoSync};
use aoitrack::{EventFilter, FixationMetrics, GazeEvents, GazeSeries};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "aoitrack")]
#[command(about = "Segment eye-tracker recordings and map gaze onto tracked areas of interest")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment a gaze stream into fixations (and optionally saccades).
    Segment(SegmentArgs),

    /// Print a marker board layout and its reference quadrilateral.
    BoardInfo {
        /// Board JSON (aoitrack.board.v1); the default 3x2 board when omitted.
        #[arg(long)]
        board: Option<PathBuf>,
    },

    /// Map gaze onto marker-board AOIs across an image sequence.
    Map(MapArgs),

    /// Fit cluster AOIs to fixations and label them.
    Cluster(ClusterArgs),

    /// Fixation and per-AOI metrics of an event store.
    Metrics(MetricsArgs),
}

#[derive(Debug, Clone, Args)]
struct SegmentArgs {
    /// Gaze samples JSON: array of {"ts", "x", "y"}.
    #[arg(long)]
    gaze: PathBuf,

    /// Path to write the event store (JSON); stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    idt: IdtArgs,
}

#[derive(Debug, Clone, Args)]
struct IdtArgs {
    /// Analysis config JSON; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum fixation dispersion (gaze units).
    #[arg(long)]
    dispersion: Option<f64>,

    /// Minimum fixation duration (ms).
    #[arg(long)]
    duration: Option<f64>,

    /// Upper bound on reported fixation durations (ms).
    #[arg(long)]
    max_duration: Option<u64>,

    /// Window dispersion measure.
    #[arg(long, value_enum)]
    metric: Option<MetricArg>,

    /// Emit saccades between consecutive fixations.
    #[arg(long)]
    saccades: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricArg {
    CentroidRadius,
    BoundingBoxSum,
}

impl MetricArg {
    fn to_core(self) -> DispersionMetric {
        match self {
            Self::CentroidRadius => DispersionMetric::CentroidRadius,
            Self::BoundingBoxSum => DispersionMetric::BoundingBoxSum,
        }
    }
}

impl IdtArgs {
    fn load_config(&self) -> CliResult<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_json_file(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(v) = self.dispersion {
            config.idt.dispersion_threshold = v;
        }
        if let Some(v) = self.duration {
            config.idt.duration_threshold = v;
        }
        if let Some(v) = self.max_duration {
            config.idt.max_fixation_duration = v;
        }
        if let Some(m) = self.metric {
            config.idt.metric = m.to_core();
        }
        if self.saccades {
            config.idt.emit_saccades = true;
        }
        config.idt.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
struct MapArgs {
    /// Directory of frame images, played back in file-name order.
    #[arg(long)]
    frames: PathBuf,

    /// Frame rate of the image sequence.
    #[arg(long, default_value = "30.0")]
    fps: f64,

    /// Gaze samples JSON: array of {"ts", "x", "y"}.
    #[arg(long)]
    gaze: PathBuf,

    /// Recorded marker detections JSON: one list of {"id", "corners"} per frame.
    #[arg(long)]
    markers: PathBuf,

    /// Board AOI as `label` (default layout) or `label=board.json`. Repeatable.
    #[arg(long = "board", required = true)]
    boards: Vec<String>,

    /// Gaze/video synchronisation pairs JSON: array of {"gaze_ts", "video_ts"}.
    #[arg(long)]
    sync: Option<PathBuf>,

    /// Existing event store to annotate; a fresh segmentation of --gaze otherwise.
    #[arg(long)]
    events: Option<PathBuf>,

    /// Containment tolerance in frame pixels.
    #[arg(long)]
    tolerance: Option<f64>,

    /// Only hit-test AOIs detected in the current frame.
    #[arg(long)]
    no_fallback: bool,

    /// Path to write summary, hits and events (JSON); stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    idt: IdtArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    Gmm,
    Dbscan,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    X,
    Y,
}

#[derive(Debug, Clone, Args)]
struct ClusterArgs {
    /// Event store JSON with fixations; use --gaze to segment first instead.
    #[arg(long, conflicts_with = "gaze", required_unless_present = "gaze")]
    events: Option<PathBuf>,

    /// Gaze samples JSON, segmented with the I-DT settings.
    #[arg(long)]
    gaze: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = MethodArg::Gmm)]
    method: MethodArg,

    /// Number of GMM components.
    #[arg(long)]
    n_components: Option<usize>,

    /// DBSCAN neighbourhood radius.
    #[arg(long)]
    eps: Option<f64>,

    /// DBSCAN core-point neighbourhood size.
    #[arg(long)]
    min_samples: Option<usize>,

    /// Comma-separated cluster labels, assigned after sorting.
    #[arg(long, value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Order clusters by centroid coordinate before labelling.
    #[arg(long, value_enum)]
    sort: Option<SortArg>,

    /// Only cluster fixations at or after this timestamp.
    #[arg(long)]
    from: Option<f64>,

    /// Only cluster fixations at or before this timestamp.
    #[arg(long)]
    to: Option<f64>,

    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    idt: IdtArgs,
}

#[derive(Debug, Clone, Args)]
struct MetricsArgs {
    /// Event store JSON.
    #[arg(long)]
    events: PathBuf,

    /// Stimulus onset for time-to-first-fixation.
    #[arg(long, default_value = "0.0")]
    onset: f64,

    #[arg(long)]
    from: Option<f64>,

    #[arg(long)]
    to: Option<f64>,

    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Segment(args) => run_segment(&args),
        Commands::BoardInfo { board } => run_board_info(board.as_deref()),
        Commands::Map(args) => run_map(&args),
        Commands::Cluster(args) => run_cluster(&args),
        Commands::Metrics(args) => run_metrics(&args),
    }
}

fn write_json<T: serde::Serialize>(value: &T, out: Option<&Path>) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, &json)?;
            tracing::info!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn load_events(path: &Path) -> CliResult<GazeEvents> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| -> CliError { format!("failed to read {}: {}", path.display(), e).into() })?;
    Ok(serde_json::from_str(&data)?)
}

fn interval(from: Option<f64>, to: Option<f64>) -> Option<EventFilter> {
    match (from, to) {
        (None, None) => None,
        (from, to) => Some(EventFilter::between(
            from.unwrap_or(f64::NEG_INFINITY),
            to.unwrap_or(f64::INFINITY),
        )),
    }
}

fn segment_file(path: &Path, config: &AnalysisConfig) -> CliResult<(GazeSeries, GazeEvents)> {
    tracing::info!("Loading gaze: {}", path.display());
    let gaze = GazeSeries::from_json_file(path)?;
    let mut events = GazeEvents::new();
    pipeline::segment_into(&mut events, gaze.samples(), &config.idt)?;
    Ok((gaze, events))
}

// ── segment ────────────────────────────────────────────────────────────

fn run_segment(args: &SegmentArgs) -> CliResult<()> {
    let config = args.idt.load_config()?;
    let (gaze, events) = segment_file(&args.gaze, &config)?;
    tracing::info!(
        "{} samples -> {} fixations, {} saccades",
        gaze.len(),
        events.fixations(None).len(),
        events.saccades(None).len()
    );
    write_json(&events, args.out.as_deref())
}

// ── board-info ─────────────────────────────────────────────────────────

fn run_board_info(path: Option<&Path>) -> CliResult<()> {
    let board = match path {
        Some(p) => BoardLayout::from_json_file(p)?,
        None => BoardLayout::default(),
    };
    let [bw, bh] = board.board_size();
    let [tw, th] = board.template_size;

    println!("aoitrack marker board");
    println!("  name:           {}", board.name);
    println!("  grid:           {}x{}", board.markers_x, board.markers_y);
    println!(
        "  marker ids:     {}..{}",
        board.first_marker_id,
        board.first_marker_id as usize + board.n_markers()
    );
    println!("  marker length:  {}", board.marker_length);
    println!("  separation:     {}", board.marker_separation);
    println!("  board size:     {:.3}x{:.3}", bw, bh);
    println!("  template:       {}x{} px ({})", tw, th, board.snapshot_name());
    for (corner, p) in ["TL", "TR", "BR", "BL"].iter().zip(board.reference_quad()) {
        println!("  reference {}:   ({:.1}, {:.1})", corner, p[0], p[1]);
    }

    Ok(())
}

// ── map ────────────────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct MapOutput<'a> {
    summary: MappingSummary,
    hits: Vec<&'a AoiHit>,
    events: &'a GazeEvents,
}

fn parse_board_arg(arg: &str) -> CliResult<(String, BoardSpec)> {
    match arg.split_once('=') {
        Some((label, path)) => Ok((label.to_string(), BoardSpec::from_json_file(Path::new(path))?)),
        None => Ok((arg.to_string(), BoardSpec::default())),
    }
}

fn run_map(args: &MapArgs) -> CliResult<()> {
    let mut config = args.idt.load_config()?;
    if let Some(t) = args.tolerance {
        config.tracker.containment_tolerance = t;
    }
    if args.no_fallback {
        config.tracker.reuse_prior_regions = false;
    }

    let (gaze, mut events) = match &args.events {
        Some(path) => (GazeSeries::from_json_file(&args.gaze)?, load_events(path)?),
        None => segment_file(&args.gaze, &config)?,
    };

    let recorded = RecordedMarkers::from_json_file(&args.markers)?;
    tracing::info!("Loaded marker detections for {} frames", recorded.remaining());
    let mut model = MarkerAoiModel::with_config(recorded, config.marker.clone());
    for arg in &args.boards {
        let (label, spec) = parse_board_arg(arg)?;
        model.create_board_aoi(&label, spec)?;
    }

    let sync = match &args.sync {
        Some(path) => VideoSync::from_json_file(path)?,
        None => VideoSync::default(),
    };
    let source = ImageSequenceSource::open(&args.frames, args.fps)?;
    let frames = FramesAndGaze::new(source, gaze, sync)?;

    let mut tracker = AoiTracker::with_config(config.tracker.clone());
    let summary = pipeline::map_aois(frames, &mut model, &mut tracker, &mut events);

    let output = MapOutput {
        summary,
        hits: tracker.all_hits(),
        events: &events,
    };
    write_json(&output, args.out.as_deref())
}

// ── cluster ────────────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct ClusterOutput<'a> {
    clusters: Vec<aoitrack::aoi::FittedCluster>,
    events: &'a GazeEvents,
}

fn run_cluster(args: &ClusterArgs) -> CliResult<()> {
    let mut config = args.idt.load_config()?;
    if let Some(n) = args.n_components {
        config.gmm.n_components = n;
    }
    if let Some(eps) = args.eps {
        config.dbscan.eps = eps;
    }
    if let Some(m) = args.min_samples {
        config.dbscan.min_samples = m;
    }

    let mut events = match (&args.events, &args.gaze) {
        (Some(path), _) => load_events(path)?,
        (None, Some(path)) => segment_file(path, &config)?.1,
        (None, None) => return Err("either --events or --gaze is required".into()),
    };

    let method = match args.method {
        MethodArg::Gmm => ClusterMethod::Gmm,
        MethodArg::Dbscan => ClusterMethod::Dbscan,
    };
    let sort_key = args.sort.map(|s| match s {
        SortArg::X => ClusterSortKey::CentroidX,
        SortArg::Y => ClusterSortKey::CentroidY,
    });
    let ts_filter = interval(args.from, args.to);

    let clusters = pipeline::cluster_fixations(
        &mut events,
        &config,
        method,
        args.labels.clone(),
        sort_key,
        ts_filter.as_ref(),
    )?;
    for c in &clusters {
        tracing::info!(
            "{}: {} fixations around ({:.1}, {:.1})",
            c.label,
            c.n_points,
            c.centroid[0],
            c.centroid[1]
        );
    }

    let output = ClusterOutput {
        clusters,
        events: &events,
    };
    write_json(&output, args.out.as_deref())
}

// ── metrics ────────────────────────────────────────────────────────────

fn run_metrics(args: &MetricsArgs) -> CliResult<()> {
    let events = load_events(&args.events)?;
    let filter = interval(args.from, args.to);
    let metrics = FixationMetrics::new(&events, filter.as_ref());
    tracing::info!("{} fixations selected", metrics.fixation_count());
    write_json(&metrics.report(args.onset), args.out.as_deref())
}
