//! Progress reporting for key searches
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::config::to_hex;
use crate::job::{JobProgress, JobReport};
use crate::search::CandidateResult;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use num_bigint::BigUint;
use std::path::Path;
use std::time::Duration;

/// Characters of plaintext shown per candidate
const PREVIEW_LEN: usize = 48;

/// Progress reporter that displays search status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        // Literal template; keep the default style if it fails to parse
        if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &JobProgress) {
        let best = match progress.best_cost {
            Some(cost) => format!("{:.5}", cost),
            None => "-".to_string(),
        };

        let msg = format!(
            "Blocks: {}/{} | Keys: {} | Rate: {:.0}/s | Best: {}",
            format_number(progress.blocks_completed),
            format_big(&progress.blocks_total),
            format_number(progress.keys_evaluated),
            progress.keys_per_second(),
            best,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    group_digits(&n.to_string())
}

fn format_big(n: &BigUint) -> String {
    group_digits(&n.to_str_radix(10))
}

fn group_digits(s: &str) -> String {
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Printable preview of a decryption; non-printable bytes become '.'
pub fn preview(plaintext: &[u8]) -> String {
    let mut out: String = plaintext
        .iter()
        .take(PREVIEW_LEN)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect();
    if plaintext.len() > PREVIEW_LEN {
        out.push_str("...");
    }
    out
}

fn print_candidate(rank: usize, candidate: &CandidateResult) {
    println!(
        "  {:>2}. {} {:<20} {}",
        rank + 1,
        style(format!("{:>10.5}", candidate.cost)).bold(),
        to_hex(&candidate.key_bytes),
        style(preview(&candidate.decryption)).dim()
    );
}

/// Print a summary of the search results
pub fn print_summary(report: &JobReport) {
    let duration_secs = report.duration.as_secs_f64();

    println!();
    if report.completed {
        println!("{}", style("Search Complete").green().bold());
    } else {
        println!("{}", style("Search Incomplete").yellow().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}/{}",
        style("Blocks:").bold(),
        format_number(report.blocks_completed),
        format_big(&report.blocks_total)
    );
    println!("  {} {}", style("Keys:").bold(), format_number(report.keys_evaluated));
    println!(
        "  {} {:.1}s ({:.0} keys/sec)",
        style("Duration:").bold(),
        duration_secs,
        report.keys_per_second()
    );
    if report.blocks_failed > 0 {
        println!(
            "  {} {}",
            style("Failed blocks:").yellow().bold(),
            format_number(report.blocks_failed)
        );
    }
    if report.duplicate_results > 0 {
        println!(
            "  {} {}",
            style("Duplicate results:").dim(),
            format_number(report.duplicate_results)
        );
    }
    println!();

    if report.best.is_empty() {
        println!("  {}", style("No candidates").dim());
    } else {
        println!(
            "  {} ({})",
            style("Best keys").bold(),
            report.best.relation()
        );
        for (rank, candidate) in report.best.iter().enumerate() {
            print_candidate(rank, candidate);
        }
    }
    println!();
}

/// Print a header at the start of the search
pub fn print_header(job: &str, keys: &BigUint, blocks: &BigUint, mode: &str) {
    println!();
    println!(
        "{} {}",
        style("keysearcher").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Job:").bold(), job);
    println!("  {} {}", style("Keys:").bold(), format_big(keys));
    println!("  {} {}", style("Blocks:").bold(), format_big(blocks));
    println!("  {} {}", style("Mode:").bold(), mode);
    println!();
}

/// Print where a packed job went
pub fn print_packed(path: &Path, size: usize, hash: &str) {
    println!();
    println!("{}", style("Job Packed").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} ({})",
        style("Payload:").bold(),
        path.display(),
        format_size(size as u64, BINARY)
    );
    println!("  {} {}", style("Hash:").bold(), hash);
    println!();
}
