//! CLI commands for hh-route

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hh_route::build::{ArtifactWriter, GridSpec, HierarchyBuilder, RoadNetwork};
use hh_route::logging::LogFormat;
use hh_route::query::dijkstra::reference_distance;
use hh_route::query::SearchStats;
use hh_route::{BuildConfig, Engine, EngineConfig, Route, RouteSegment, VertexId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "hh-route")]
#[command(about = "Highway hierarchies routing over paged graph artifacts", long_about = None)]
pub struct Cli {
    /// Log output format (stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Human, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an artifact from a JSON road network
    Build {
        /// Input road network (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output artifact
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Generate a synthetic grid network and build its artifact
    Grid {
        /// Output artifact
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value = "32")]
        rows: u32,

        #[arg(long, default_value = "32")]
        cols: u32,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Share of one-way roads
        #[arg(long, default_value = "0.1")]
        oneway_ratio: f64,

        /// Share of grid roads left out
        #[arg(long, default_value = "0.2")]
        drop_ratio: f64,

        /// Also write the generated network as JSON
        #[arg(long)]
        network_out: Option<PathBuf>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Print header, level metadata and engine settings
    Info {
        artifact: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Check checksums, decode every block, optionally cross-check queries
    Verify {
        artifact: PathBuf,

        /// Random queries to compare against plain Dijkstra
        #[arg(long, default_value = "0")]
        queries: usize,

        #[arg(long, default_value = "7")]
        seed: u64,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Nearest level-0 vertex to a coordinate
    Nearest {
        artifact: PathBuf,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Shortest route between two coordinates or two vertex ids
    Route {
        artifact: PathBuf,

        /// Start coordinate (lat,lon)
        #[arg(long, allow_hyphen_values = true, requires = "to", conflicts_with = "source_id")]
        from: Option<String>,

        /// End coordinate (lat,lon)
        #[arg(long, allow_hyphen_values = true, requires = "from")]
        to: Option<String>,

        #[arg(long, requires = "target_id")]
        source_id: Option<u32>,

        #[arg(long, requires = "source_id")]
        target_id: Option<u32>,

        /// Print the route as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Builder settings; flags override the config file
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// BuildConfig JSON file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub max_levels: Option<u8>,

    #[arg(long)]
    pub block_vertices: Option<u32>,

    /// Neighborhood radius of core vertices
    #[arg(long)]
    pub radius: Option<u32>,

    /// Leave hop indices off shortcuts
    #[arg(long)]
    pub no_hop_indices: bool,

    /// Largest top level that gets a distance table (0 disables it)
    #[arg(long)]
    pub table_max_vertices: Option<u32>,
}

impl BuildArgs {
    fn load(&self) -> Result<BuildConfig> {
        let mut config = match &self.config {
            Some(path) => BuildConfig::from_file(path)
                .with_context(|| format!("loading build config {}", path.display()))?,
            None => BuildConfig::default(),
        };
        if let Some(v) = self.max_levels {
            config.max_levels = v;
        }
        if let Some(v) = self.block_vertices {
            config.block_vertices = v;
        }
        if let Some(v) = self.radius {
            config.neighborhood_radius = v;
        }
        if self.no_hop_indices {
            config.hop_indices = false;
        }
        if let Some(v) = self.table_max_vertices {
            config.distance_table_max_vertices = v;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Engine settings; flags override the config file
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// EngineConfig JSON file
    #[arg(long = "engine-config")]
    pub config: Option<PathBuf>,

    /// Block cache budget in MiB
    #[arg(long)]
    pub cache_mb: Option<u64>,

    /// Per-read storage timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Skip the body checksum at open
    #[arg(long)]
    pub no_verify: bool,

    /// Ignore the artifact's distance table
    #[arg(long)]
    pub no_distance_table: bool,
}

impl EngineArgs {
    fn load(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("loading engine config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(mb) = self.cache_mb {
            config.cache_bytes = mb * 1024 * 1024;
        }
        if let Some(ms) = self.timeout_ms {
            config.storage_timeout_ms = Some(ms);
        }
        if self.no_verify {
            config.verify_checksum = false;
        }
        if self.no_distance_table {
            config.use_distance_table = false;
        }
        config.validate()?;
        Ok(config)
    }

    /// Open an artifact; `quiet` keeps stdout free for machine output.
    fn open(&self, artifact: &Path, quiet: bool) -> Result<Engine> {
        let config = self.load()?;
        let start = Instant::now();
        let engine = Engine::open(artifact, config)
            .with_context(|| format!("opening {}", artifact.display()))?;
        if quiet {
            return Ok(engine);
        }
        println!(
            "  ✓ Opened {} ({} vertices) in {:.1} ms",
            artifact.display(),
            engine.num_vertices(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(engine)
    }
}

#[derive(Serialize)]
struct RouteOutput<'a> {
    source: VertexId,
    target: VertexId,
    distance: u32,
    route: &'a Route,
    segments: Vec<RouteSegment>,
    stats: &'a SearchStats,
}

fn parse_coord(s: &str) -> Result<(f64, f64)> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        bail!("Coordinate must be in format 'lat,lon', got '{s}'");
    }
    let lat = parts[0].trim().parse::<f64>().context("parsing latitude")?;
    let lon = parts[1].trim().parse::<f64>().context("parsing longitude")?;
    Ok((lat, lon))
}

fn build_artifact(network: &RoadNetwork, output: &Path, build: &BuildArgs) -> Result<()> {
    let config = build.load()?;
    let start = Instant::now();
    let hierarchy = HierarchyBuilder::new(config.clone())
        .build(network)
        .context("building hierarchy")?;
    println!(
        "  ✓ {} levels in {:.1} ms",
        hierarchy.num_levels(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    for (l, level) in hierarchy.levels.iter().enumerate() {
        println!(
            "    level {l}: {} vertices, {} edges",
            level.vertices.len(),
            level.num_edges()
        );
    }

    let header = ArtifactWriter::new(config)
        .write(&hierarchy, output)
        .with_context(|| format!("writing {}", output.display()))?;
    let size = std::fs::metadata(output)?.len();
    println!(
        "  ✓ Wrote {} ({} blocks, {:.1} KB, distance table: {})",
        output.display(),
        header.num_blocks,
        size as f64 / 1024.0,
        if header.has_distance_table() { "yes" } else { "no" }
    );
    Ok(())
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Build {
                input,
                output,
                build,
            } => {
                println!("Reading road network {}", input.display());
                let network = RoadNetwork::from_file(&input)
                    .with_context(|| format!("reading {}", input.display()))?;
                println!(
                    "  ✓ {} vertices, {} roads",
                    network.num_vertices(),
                    network.edges.len()
                );
                build_artifact(&network, &output, &build)?;
            }

            Commands::Grid {
                output,
                rows,
                cols,
                seed,
                oneway_ratio,
                drop_ratio,
                network_out,
                build,
            } => {
                if rows == 0 || cols == 0 {
                    bail!("grid needs at least one row and one column");
                }
                let network = RoadNetwork::grid(GridSpec {
                    rows,
                    cols,
                    seed,
                    oneway_ratio,
                    drop_ratio,
                });
                println!(
                    "Generated {rows}x{cols} grid: {} vertices, {} roads",
                    network.num_vertices(),
                    network.edges.len()
                );
                if let Some(path) = network_out {
                    network
                        .to_file(&path)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("  ✓ Wrote network {}", path.display());
                }
                build_artifact(&network, &output, &build)?;
            }

            Commands::Info { artifact, engine } => {
                let engine = engine.open(&artifact, false)?;
                let header = engine.header();
                let created = chrono::DateTime::from_timestamp(header.created_unix, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| header.created_unix.to_string());
                println!("\n=== Artifact ===");
                println!("  Created: {created}");
                println!("  Blocks: {}", header.num_blocks);
                println!(
                    "  Vertex ids: {} block bits + {} offset bits",
                    header.bits_per_block_id, header.bits_per_vertex_offset
                );
                println!("  Hop indices: {}", header.has_hop_indices());
                println!(
                    "  Bounding box: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                    header.bbox.min_lat as f64 / 1e6,
                    header.bbox.min_lon as f64 / 1e6,
                    header.bbox.max_lat as f64 / 1e6,
                    header.bbox.max_lon as f64 / 1e6
                );
                match &engine.graph().store().artifact().distance_table {
                    Some(table) => println!("  Distance table: {} vertices", table.len()),
                    None => println!("  Distance table: none"),
                }
                println!("\n=== Levels ===");
                for (l, level) in header.levels.iter().enumerate() {
                    println!(
                        "  {l}: blocks {}..{}, {} vertices, {} edges",
                        level.first_block,
                        level.first_block + level.num_blocks,
                        level.num_vertices,
                        level.num_edges
                    );
                }
                let config = engine.config();
                println!("\n=== Engine ===");
                println!("  Cache budget: {:.1} MiB", config.cache_bytes as f64 / (1024.0 * 1024.0));
                match config.storage_timeout_ms {
                    Some(ms) => println!(
                        "  Storage reads: {} threads, {ms} ms timeout",
                        config.reader_threads
                    ),
                    None => println!("  Storage reads: inline"),
                }
                println!("  Use distance table: {}", config.use_distance_table);
            }

            Commands::Verify {
                artifact,
                queries,
                seed,
                engine,
            } => {
                // the body checksum is the point of this command
                let engine = EngineArgs {
                    no_verify: false,
                    ..engine
                }
                .open(&artifact, false)?;
                println!("  ✓ Header and body checksums match");

                let start = Instant::now();
                let store = engine.graph().store();
                for block_id in 0..store.num_blocks() {
                    store
                        .get_block(block_id)
                        .with_context(|| format!("decoding block {block_id}"))?;
                }
                println!(
                    "  ✓ Decoded {} blocks in {:.1} ms",
                    store.num_blocks(),
                    start.elapsed().as_secs_f64() * 1000.0
                );

                let vertices = engine.level_zero_vertices();
                if queries > 0 && !vertices.is_empty() {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut mismatches = 0usize;
                    for _ in 0..queries {
                        let s = vertices[rng.random_range(0..vertices.len())];
                        let t = vertices[rng.random_range(0..vertices.len())];
                        let got = engine.shortest_path(s, t)?.map(|r| r.distance);
                        let want = reference_distance(engine.graph(), s, t)?;
                        if got != want {
                            mismatches += 1;
                            eprintln!("  ✗ {s} -> {t}: hierarchy {got:?}, Dijkstra {want:?}");
                        }
                    }
                    if mismatches > 0 {
                        bail!("{mismatches} of {queries} queries disagree with Dijkstra");
                    }
                    println!("  ✓ {queries} random queries match Dijkstra");
                }
            }

            Commands::Nearest {
                artifact,
                lat,
                lon,
                engine,
            } => {
                let engine = engine.open(&artifact, false)?;
                match engine.nearest_vertex(lat, lon)? {
                    Some(id) => {
                        let v = engine.get_vertex(id)?;
                        let (vlat, vlon) = v.coord.map(|c| (c.lat_deg(), c.lon_deg())).unwrap_or_default();
                        println!("  ✓ Vertex {id} at ({vlat:.6}, {vlon:.6}), {} outbound edges", v.out_degree);
                    }
                    None => println!("  Artifact has no vertices"),
                }
            }

            Commands::Route {
                artifact,
                from,
                to,
                source_id,
                target_id,
                json,
                engine,
            } => {
                let engine = engine.open(&artifact, json)?;
                let (s, t) = match (from, to, source_id, target_id) {
                    (Some(from), Some(to), _, _) => {
                        let (flat, flon) = parse_coord(&from)?;
                        let (tlat, tlon) = parse_coord(&to)?;
                        let s = engine
                            .nearest_vertex(flat, flon)?
                            .context("no vertex near the start")?;
                        let t = engine
                            .nearest_vertex(tlat, tlon)?
                            .context("no vertex near the end")?;
                        (s, t)
                    }
                    (_, _, Some(s), Some(t)) => (VertexId(s), VertexId(t)),
                    _ => bail!("give either --from/--to or --source-id/--target-id"),
                };

                let start = Instant::now();
                let Some((route, stats)) = engine.route(s, t, None)? else {
                    println!("  No route from {s} to {t}");
                    return Ok(());
                };
                let elapsed = start.elapsed();
                let segments = engine.describe(&route)?;

                if json {
                    let out = RouteOutput {
                        source: s,
                        target: t,
                        distance: route.distance,
                        route: &route,
                        segments,
                        stats: &stats,
                    };
                    println!("{}", serde_json::to_string_pretty(&out)?);
                } else {
                    let length: f64 = segments.iter().map(|s| s.length_m).sum();
                    println!("\n=== Route {s} -> {t} ===");
                    println!("  Distance: {}", route.distance);
                    println!("  Length: {:.0} m over {} edges", length, route.edges.len());
                    println!(
                        "  Query: {:.3} ms, settled {} + {}, {} ascents",
                        elapsed.as_secs_f64() * 1000.0,
                        stats.settled[0],
                        stats.settled[1],
                        stats.ascents
                    );
                    let mut last_name: Option<&str> = None;
                    for name in segments
                        .iter()
                        .filter_map(|seg| seg.name.as_deref().or(seg.reference.as_deref()))
                    {
                        if last_name != Some(name) {
                            println!("    via {name}");
                            last_name = Some(name);
                        }
                    }
                    let cache = engine.cache_stats();
                    println!(
                        "  Cache: {} hits, {} misses, {} blocks resident",
                        cache.hits, cache.misses, cache.entries
                    );
                }
            }
        }
        Ok(())
    }
}
