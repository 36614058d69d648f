//! Stats rendering for the CLI.

use sqldiff::DiffSummary;

/// Print the end-of-run summary, human or JSON.
pub fn print_stats(summary: &DiffSummary, json: bool) {
    if json {
        match serde_json::to_string(summary) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("failed to serialize stats: {}", e),
        }
        return;
    }

    println!();
    println!("Stats:");
    println!("  status:           {:?}", summary.status);
    println!(
        "  rows different:   {} ({} added, {} removed)",
        summary.diff_count, summary.plus_count, summary.minus_count
    );
    println!("  rows compared:    {}", summary.rows_compared);
    println!("  rows downloaded:  {}", summary.rows_downloaded);
    println!("  bytes downloaded: {}", summary.bytes_downloaded);
    println!("  percent different: {:.4}%", summary.percent_different());
    if summary.limit_reached {
        println!("  limit reached:    yes");
    }
    println!("  duration:         {:.2}s", summary.duration_ms as f64 / 1000.0);
}
