pub mod candidates;
pub mod colormap;
pub mod config;
pub mod data;
pub mod geometry;
pub mod plots;
pub mod prj;
pub mod projection;
pub mod render;
pub mod results;
pub mod scrape;
pub mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use render::Figure;
use scrape::{BoldTagSource, HttpFetcher, TagLayout};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use types::{Candidate, Election};

#[derive(Parser)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Where to write the figure or table. Figures default to the
    /// `output.figure` config entry.
    #[arg(short, long, value_name = "FILE", global = true)]
    out: Option<PathBuf>,

    /// Candidate whose precinct map to draw. Without one, Emanuel and
    /// Garcia are drawn side by side.
    candidate: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Two candidates' precinct maps side by side
    Compare { first: String, second: String },
    /// One candidate's precinct map
    Precincts { candidate: String },
    /// Ward-level map for the 2011 or 2015 election
    Wards {
        candidate: String,
        #[arg(long, value_enum, default_value = "2015")]
        year: Election,
    },
    /// Ward areas with precinct lines colored by a candidate's share
    Boundaries {
        #[arg(long, default_value = "Rahm Emanuel")]
        candidate: String,
    },
    /// A ward's outline over the census tracts it overlaps
    Tracts {
        #[arg(long)]
        ward: u32,
        #[arg(long, default_value_t = 1e-4)]
        threshold: f64,
    },
    /// Print the census tracts overlapping a ward
    Overlap {
        #[arg(long)]
        ward: u32,
        #[arg(long, default_value_t = 1e-4)]
        threshold: f64,
    },
    /// Highlight census tracts with invalid polygons
    InvalidTracts,
    /// Census tracts shaded by field / total
    Census {
        #[arg(long)]
        field: String,
        #[arg(long)]
        total: String,
    },
    /// Print ward number and alderman
    Aldermen {
        #[arg(long, value_enum, default_value = "2011")]
        year: Election,
    },
    /// Scrape 2015 precinct results into a CSV table
    Scrape,
    /// Convert a Board of Elections ward report into a CSV table
    ConvertWards {
        input: PathBuf,
        #[arg(long, value_enum)]
        year: Election,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;
    let figure_path = cli.out.clone().unwrap_or_else(|| config.output.figure.clone());

    let command = match cli.command {
        Some(command) => command,
        None => {
            let figure = match cli.candidate.as_deref() {
                Some(name) => plots::precinct_results(&config, &[candidates::normalize(name)])?,
                None => plots::compare(&config, Candidate::RahmEmanuel, Candidate::ChuyGarcia)?,
            };
            return save(figure, &figure_path);
        }
    };

    match command {
        Commands::Compare { first, second } => {
            let figure = plots::compare(&config, candidates::normalize(&first), candidates::normalize(&second))?;
            save(figure, &figure_path)?;
        }
        Commands::Precincts { candidate } => {
            let figure = plots::precinct_results(&config, &[candidates::normalize(&candidate)])?;
            save(figure, &figure_path)?;
        }
        Commands::Wards { candidate, year } => {
            let figure = plots::ward_results(&config, candidates::normalize(&candidate), year)?;
            save(figure, &figure_path)?;
        }
        Commands::Boundaries { candidate } => {
            save(plots::boundaries(&config, candidates::normalize(&candidate))?, &figure_path)?;
        }
        Commands::Tracts { ward, threshold } => {
            save(plots::ward_tracts(&config, ward, threshold)?, &figure_path)?;
        }
        Commands::Overlap { ward, threshold } => {
            let shares = plots::ward_tract_overlap(&config, ward, threshold)?;
            println!("Ward {} overlaps {} census tracts:", ward, shares.len());
            for share in shares {
                println!("  {:>10}  {:.4}", share.tract, share.fraction);
            }
        }
        Commands::InvalidTracts => {
            save(plots::invalid_tracts(&config)?, &figure_path)?;
        }
        Commands::Census { field, total } => {
            save(plots::census_share(&config, &field, &total)?, &figure_path)?;
        }
        Commands::Aldermen { year } => {
            let layer_cfg = match year {
                Election::Mayor2011 => &config.layers.wards_2011,
                Election::Mayor2015 => &config.layers.wards_2015,
            };
            let layer = data::load_layer(&layer_cfg.path)?;
            for (ward, name) in data::aldermen(&layer, &layer_cfg.ward_field, &layer_cfg.alderman_field) {
                println!("{:>2}  {}", ward, name);
            }
        }
        Commands::Scrape => {
            let out = cli.out.context("scrape needs --out FILE")?;
            let layout = TagLayout::from_config(&config.scrape);
            let fetcher = HttpFetcher::new(&config.scrape.url_template)?;
            let election = Election::Mayor2015;
            let source = BoldTagSource::new(fetcher, election.candidates().to_vec(), layout);
            let table = scrape::scrape_precincts(&source, 1..=config.scrape.wards, election.candidates())?;
            table.write_csv_file(&out)?;
            info!("Wrote {} precinct rows to {:?}", table.len(), out);
        }
        Commands::ConvertWards { input, year } => {
            let out = cli.out.context("convert-wards needs --out FILE")?;
            let table = results::load_ward_text_file(&input, year)?;
            table.write_csv_file(&out)?;
            info!("Wrote {} ward rows to {:?}", table.len(), out);
        }
    }

    Ok(())
}

fn save(figure: Figure, path: &Path) -> Result<()> {
    figure.save(path)?;
    info!("Saved figure to {:?}", path);
    Ok(())
}
