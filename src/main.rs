use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod cache;
mod enrich;
mod export;
mod filter;
mod models;
mod normalize;
mod report;
mod sanitize;
mod schema;
mod source;

use aggregate::GroupBy;
use filter::{CompletionFilter, FilterOptions, ViewFilter, ViewerType};
use models::CanonicalField;
use normalize::{NormalizeOptions, UnknownCompletion};
use source::Sources;

#[derive(Parser)]
#[command(name = "freefuse-engagement")]
#[command(about = "Clean FreeFuse video-viewing exports and summarize engagement", long_about = None)]
struct Cli {
    /// Spreadsheet export to read (xlsx, xls, ods or csv)
    #[arg(long, global = true, env = "FREEFUSE_DATA", default_value = "Freefuse_Data.xlsx")]
    source: PathBuf,
    /// Per-video view counts joined onto the watch log
    #[arg(long, global = true, env = "FREEFUSE_COUNTS")]
    counts: Option<PathBuf>,
    /// Parent/child and category sheet joined onto the watch log
    #[arg(long, global = true, env = "FREEFUSE_META")]
    meta: Option<PathBuf>,
    /// How to treat completion values outside the yes/no lexicon
    #[arg(long, global = true, value_enum, default_value_t = UnknownCompletion::Drop)]
    unknown_completion: UnknownCompletion,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the column mapping, row loss and filter domains
    Inspect {
        #[arg(long)]
        json: bool,
    },
    /// Print key engagement metrics
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print view counts grouped for one chart
    Series {
        #[arg(long, value_enum)]
        by: GroupBy,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Per-video views, duration spread and repeat share
    Leaderboard {
        #[command(flatten)]
        filter: FilterArgs,
        /// Leave out videos with fewer views
        #[arg(long, default_value_t = 0)]
        min_views: usize,
        /// Print only the first N videos
        #[arg(long)]
        top: Option<usize>,
        #[arg(long, conflicts_with = "out")]
        json: bool,
        /// Write CSV to this file instead of printing
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown engagement report
    Report {
        #[command(flatten)]
        filter: FilterArgs,
        /// Leave out videos with fewer views from the top videos
        #[arg(long, default_value_t = 0)]
        min_views: usize,
        #[arg(long, default_value = "engagement_report.md")]
        out: PathBuf,
    },
    /// Export the filtered canonical table as CSV
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// Keep only these videos (repeatable)
    #[arg(long = "video")]
    videos: Vec<String>,
    #[arg(long, value_enum, default_value_t = CompletionFilter::All)]
    completion: CompletionFilter,
    /// First view date to include (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last view date to include (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=23))]
    hour_from: Option<u32>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=23))]
    hour_to: Option<u32>,
    /// Keep only views with (true) or without (false) a questionnaire
    #[arg(long)]
    questionnaire: Option<bool>,
    #[arg(long, value_enum, default_value_t = ViewerType::All)]
    viewer_type: ViewerType,
    /// Category or module from the metadata sheet
    #[arg(long)]
    category: Option<String>,
    /// Parent/child level from the metadata sheet
    #[arg(long)]
    parent_or_child: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> ViewFilter {
        let dates = (self.from.is_some() || self.to.is_some()).then(|| {
            self.from.unwrap_or(NaiveDate::MIN)..=self.to.unwrap_or(NaiveDate::MAX)
        });
        let hours = (self.hour_from.is_some() || self.hour_to.is_some())
            .then(|| self.hour_from.unwrap_or(0)..=self.hour_to.unwrap_or(23));
        ViewFilter {
            videos: self.videos.clone(),
            completion: self.completion,
            dates,
            hours,
            has_questionnaire: self.questionnaire,
            viewer_type: self.viewer_type,
            category: self.category.clone(),
            parent_or_child: self.parent_or_child.clone(),
        }
    }
}

fn init_logging() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let options = NormalizeOptions {
        unknown_completion: cli.unknown_completion,
    };
    let sources = Sources {
        watch: cli.source.clone(),
        counts: cli.counts.clone(),
        metadata: cli.meta.clone(),
    };
    let mut cache = cache::PipelineCache::new();
    let dataset = cache
        .get_or_load(&sources, options)
        .with_context(|| format!("failed to load {}", cli.source.display()))?;

    match cli.command {
        Commands::Inspect { json } => {
            let options = FilterOptions::from_table(&dataset.table);
            if json {
                let value = serde_json::json!({
                    "mapping": dataset.mapping,
                    "row_loss": dataset.loss,
                    "joins": dataset.joins,
                    "filter_options": options,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }

            println!("Column mapping for {}:", cli.source.display());
            for field in CanonicalField::ALL {
                match dataset.mapping.get(field) {
                    Some(column) => println!("- {field}: {column}"),
                    None => println!("- {field}: (not found)"),
                }
            }
            let missing = dataset.mapping.missing();
            if missing.iter().any(|field| field.is_required()) {
                println!("Required fields are missing; every row will be dropped.");
            }
            let loss = dataset.loss;
            println!(
                "Kept {} of {} rows ({} unusable title, {} bad date, {} bad duration, {} unknown completion, {} duplicates).",
                loss.kept,
                loss.raw_rows,
                loss.missing_title,
                loss.missing_date,
                loss.bad_duration,
                loss.unknown_completion,
                loss.duplicates
            );
            if sources.counts.is_some() || sources.metadata.is_some() {
                println!(
                    "Joined view counts onto {} rows and metadata onto {} rows.",
                    dataset.joins.with_view_count, dataset.joins.with_metadata
                );
            }
            println!("{} distinct videos.", options.video_names.len());
            if !options.categories.is_empty() {
                println!("Categories: {}.", options.categories.join(", "));
            }
            if let (Some(first), Some(last)) = (options.first_view, options.last_view) {
                println!("Views from {first} to {last}.");
            }
        }
        Commands::Summary { filter, json } => {
            let view = filter.to_filter().apply(&dataset.table);
            let kpis = aggregate::kpis(&view);
            if json {
                println!("{}", serde_json::to_string_pretty(&kpis)?);
                return Ok(());
            }

            if view.is_empty() {
                println!("No views match these filters.");
                return Ok(());
            }
            println!("Total views: {}", kpis.total_views);
            println!("Unique viewers: {}", kpis.unique_viewers);
            println!("Videos watched: {}", kpis.videos_watched);
            if let Some(avg) = kpis.avg_duration {
                println!("Avg duration (min): {avg:.2}");
            }
            if let Some(rate) = kpis.completion_rate {
                println!("Completion rate: {:.1}%", rate * 100.0);
            }
            if let Some(rate) = kpis.repeat_view_rate {
                println!("Repeat view rate: {:.1}%", rate * 100.0);
            }
        }
        Commands::Series { by, filter, json } => {
            let view = filter.to_filter().apply(&dataset.table);
            let series = aggregate::group_counts(&view, by);
            if json {
                println!("{}", serde_json::to_string_pretty(&series)?);
                return Ok(());
            }
            for group in series.iter() {
                println!("{}\t{}", group.key, group.views);
            }
        }
        Commands::Leaderboard {
            filter,
            min_views,
            top,
            json,
            out,
        } => {
            let view = filter.to_filter().apply(&dataset.table);
            let mut board = aggregate::video_leaderboard(&view, min_views);
            if let Some(top) = top {
                board.truncate(top);
            }
            if let Some(path) = out {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                export::write_leaderboard_csv(&board, file)?;
                eprintln!("Wrote {} videos to {}.", board.len(), path.display());
                return Ok(());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&board)?);
                return Ok(());
            }
            if board.is_empty() {
                println!("No videos match these filters.");
            }
            for video in board.iter() {
                println!(
                    "{}\t{} views\t{} viewers\tavg {:.2} min\tIQR {:.2}-{:.2}",
                    video.video_name,
                    video.views,
                    video.unique_viewers,
                    video.avg_duration,
                    video.q25_duration,
                    video.q75_duration
                );
            }
        }
        Commands::Report {
            filter,
            min_views,
            out,
        } => {
            let view = filter.to_filter().apply(&dataset.table);
            let report = report::build_report(
                &cli.source.display().to_string(),
                &view,
                &dataset.loss,
                min_views,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { filter, out } => {
            let view = filter.to_filter().apply(&dataset.table);
            match out {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    export::write_csv(&view, file)?;
                    eprintln!("Exported {} rows to {}.", view.len(), path.display());
                }
                None => export::write_csv(&view, std::io::stdout().lock())?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn filter_args_build_open_ended_ranges() {
        let cli = Cli::try_parse_from([
            "freefuse-engagement",
            "summary",
            "--from",
            "2024-01-01",
            "--hour-to",
            "12",
            "--completion",
            "not-completed",
            "--video",
            "Intro to Biology",
        ])
        .expect("arguments parse");
        let Commands::Summary { filter, .. } = cli.command else {
            panic!("expected summary command");
        };
        let filter = filter.to_filter();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(filter.dates, Some(start..=NaiveDate::MAX));
        assert_eq!(filter.hours, Some(0..=12));
        assert_eq!(filter.completion, CompletionFilter::NotCompleted);
        assert_eq!(filter.videos, vec!["Intro to Biology".to_string()]);
    }

    #[test]
    fn hours_outside_the_day_are_rejected() {
        let result = Cli::try_parse_from(["freefuse-engagement", "summary", "--hour-from", "24"]);
        assert!(result.is_err());
    }

    #[test]
    fn leaderboard_arguments_parse() {
        let cli = Cli::try_parse_from([
            "freefuse-engagement",
            "--counts",
            "counts.xlsx",
            "leaderboard",
            "--min-views",
            "5",
            "--top",
            "3",
            "--category",
            "Forces",
        ])
        .expect("arguments parse");
        assert_eq!(cli.counts, Some(PathBuf::from("counts.xlsx")));
        let Commands::Leaderboard {
            filter,
            min_views,
            top,
            json,
            out,
        } = cli.command
        else {
            panic!("expected leaderboard command");
        };
        assert_eq!(min_views, 5);
        assert_eq!(top, Some(3));
        assert!(!json);
        assert!(out.is_none());
        assert_eq!(filter.to_filter().category.as_deref(), Some("Forces"));
    }

    #[test]
    fn leaderboard_json_and_out_conflict() {
        let result = Cli::try_parse_from([
            "freefuse-engagement",
            "leaderboard",
            "--json",
            "--out",
            "board.csv",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn no_filter_flags_means_no_ranges() {
        let cli = Cli::try_parse_from(["freefuse-engagement", "export"]).expect("arguments parse");
        let Commands::Export { filter, out } = cli.command else {
            panic!("expected export command");
        };
        let filter = filter.to_filter();
        assert!(filter.dates.is_none());
        assert!(filter.hours.is_none());
        assert!(out.is_none());
    }
}
