use anyhow::{Context, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::fs::{File, create_dir_all};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(version, about = "Helper tool for data and evaluation chores")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// mirrors the daily input and target rasters of a date range from the bucket
    DownloadRasters {
        /// first day, YYYY-MM-DD
        start: NaiveDate,
        /// last day (inclusive), YYYY-MM-DD
        end: NaiveDate,
        #[arg(long, default_value = "data")]
        dest: PathBuf,
        #[arg(long, default_value = "wind-downscaling")]
        bucket: String,
        #[arg(long, default_value = "img_prediction_files")]
        prefix: String,
        /// fetch blurred COSMO inputs instead of ERA5 inputs
        #[arg(long)]
        cosmo_blurred: bool,
    },
    /// prints the best epochs per metric of a metric record
    ShowMetrics {
        record: PathBuf,
        #[arg(short, default_value_t = 3)]
        n: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::DownloadRasters {
            start,
            end,
            dest,
            bucket,
            prefix,
            cosmo_blurred,
        } => {
            if end < start {
                bail!("end date {end} is before start date {start}");
            }
            let input = if cosmo_blurred { "x_cosmo_" } else { "x_" };
            let client = Client::builder()
                .timeout(Duration::from_secs(300))
                .build()?;
            create_dir_all(&dest)?;
            for date in start.iter_days().take_while(|d| *d <= end) {
                let stamp = date.format("%Y%m%d");
                for name in [format!("{input}{stamp}.bin"), format!("y_{stamp}.bin")] {
                    let url = format!("https://{bucket}.s3.amazonaws.com/{prefix}/{name}");
                    println!("🔽 downloading {url}");
                    match download(&client, &url, &dest.join(&name)) {
                        Ok(_) => println!("✅ {name}"),
                        Err(e) => eprintln!("❌ {name}: {e:#}"),
                    }
                }
            }
        }
        Commands::ShowMetrics { record, n } => show_metrics(&record, n)?,
    }
    Ok(())
}

fn download(client: &Client, url: &str, output: &Path) -> anyhow::Result<()> {
    let mut response = client.get(url).send()?;
    if !response.status().is_success() {
        bail!("server answered {}", response.status());
    }

    let total_size = response.content_length().unwrap_or(0);
    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{wide_bar} {bytes}/{total_bytes} ({eta})")?
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );

    let mut dest = File::create(output)
        .with_context(|| format!("cannot create {}", output.display()))?;
    let mut buffer = [0; 8192];
    let mut downloaded = 0;
    loop {
        let n = response.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        dest.write_all(&buffer[..n])?;
        downloaded += n as u64;
        pb.set_position(downloaded);
    }
    pb.finish_and_clear();
    Ok(())
}

/// Mirror of the metric record written by `evaluate_checkpoints`.
#[derive(Deserialize)]
struct MetricTable {
    metrics: Vec<String>,
    rows: Vec<MetricRow>,
}

#[derive(Deserialize)]
struct MetricRow {
    epoch: usize,
    values: Vec<f64>,
}

fn show_metrics(path: &Path, n: usize) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let table: MetricTable = ron::de::from_reader(file)?;
    println!("{} checkpoints", table.rows.len());
    for (column, metric) in table.metrics.iter().enumerate() {
        let mut ranked: Vec<(usize, f64)> = table
            .rows
            .iter()
            .filter_map(|r| r.values.get(column).map(|v| (r.epoch, *v)))
            .filter(|(_, v)| !v.is_nan())
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best: Vec<String> = ranked
            .iter()
            .take(n)
            .map(|(epoch, v)| format!("{epoch} ({v:.4})"))
            .collect();
        println!("{metric}: {}", best.join(", "));
    }
    Ok(())
}
