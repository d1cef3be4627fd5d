//! Terminal rendering and frontier CSV export of analysis reports.

use crate::pipeline::AnalysisReport;
use colored::Colorize;
use tabled::{builder::Builder, settings::Style};

/// Analysis report formatter.
pub struct ReportFormatter;

impl ReportFormatter {
    /// Print a full report to stdout.
    ///
    /// `amount` is the portfolio's dollar value; when positive, the
    /// recommendation table also shows a dollar allocation per ticker.
    pub fn print_report(report: &AnalysisReport, amount: f64) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " PORTFOLIO ANALYSIS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Tickers:         {}", report.assets.join(", "));
        println!("  As of:           {}", report.as_of.format("%Y-%m-%d"));
        println!("  Observations:    {}", report.observations);
        println!("  Horizon:         {} years", report.comparison.horizon_years);
        if amount > 0.0 {
            println!("  Amount:          ${:.2}", amount);
        }
        println!();

        println!("{}", "Allocations".bold().underline());
        println!("{}", Self::allocation_table(report));
        for outcome in report.allocations.iter().filter(|o| o.error.is_some()) {
            println!(
                "  {} {}: {}",
                "!".yellow(),
                outcome.name,
                outcome.error.as_deref().unwrap_or_default()
            );
        }
        println!();

        if let Some(solution) = &report.max_sharpe {
            println!("{}", "Optimizer".bold().underline());
            let converged = if solution.converged {
                "converged".green()
            } else {
                "not converged".red()
            };
            println!(
                "  Max Sharpe:      {:>10.4}  ({}, {} iterations, {})",
                solution.sharpe(),
                converged,
                solution.iterations,
                solution.status
            );
            if let Some(cloud) = &report.monte_carlo {
                println!(
                    "  Monte-Carlo:     {:>10.4}  (best of {} draws)",
                    cloud.sharpes[cloud.best_index],
                    cloud.sharpes.len()
                );
            }
            let solved = report.frontier.iter().filter(|p| p.converged).count();
            println!(
                "  Frontier:        {:>10}  of {} points solved",
                solved,
                report.frontier.len()
            );
            println!();
        }

        println!("{}", "Strategy Comparison".bold().underline());
        println!("{}", Self::comparison_table(report));
        println!();

        match &report.comparison.best {
            Some(best) => {
                println!(
                    "{} {} {}",
                    "Best strategy:".bold(),
                    best.name.green().bold(),
                    Self::format_pct_change(best.total_return * 100.0)
                );
                println!("{}", Self::recommendation_table(report, amount));
            }
            None => println!("{}", "No strategy could be evaluated.".red()),
        }

        println!("{}", "═".repeat(60).blue());
    }

    /// Format percentage change with color.
    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }

    /// Weights of every allocator, one column per strategy.
    pub fn allocation_table(report: &AnalysisReport) -> String {
        let mut builder = Builder::new();
        let mut header = vec!["Ticker".to_string(), "User".to_string()];
        header.extend(report.allocations.iter().map(|o| o.name.clone()));
        if report.betas.is_some() {
            header.push("β".to_string());
        }
        builder.push_record(header);

        for (i, asset) in report.assets.iter().enumerate() {
            let mut row = vec![asset.clone(), format!("{:.4}", report.user_weights[i])];
            for outcome in &report.allocations {
                row.push(match &outcome.weights {
                    Some(w) => format!("{:.4}", w[i]),
                    None => "-".to_string(),
                });
            }
            if let Some(betas) = &report.betas {
                row.push(format!("{:.3}", betas[i]));
            }
            builder.push_record(row);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Total return of every strategy in evaluation order.
    pub fn comparison_table(report: &AnalysisReport) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Strategy", "Total Return %", "Status"]);

        for result in &report.comparison.results {
            builder.push_record([
                result.name.clone(),
                format!("{:.2}", result.total_return * 100.0),
                result
                    .rejection
                    .clone()
                    .unwrap_or_else(|| "scored".to_string()),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Recommended weights (and dollar amounts) of the best strategy.
    pub fn recommendation_table(report: &AnalysisReport, amount: f64) -> String {
        let mut builder = Builder::new();
        if amount > 0.0 {
            builder.push_record(["Ticker", "Weight", "Amount $"]);
        } else {
            builder.push_record(["Ticker", "Weight"]);
        }

        for (ticker, weight) in &report.comparison.recommendation {
            let mut row = vec![ticker.clone(), format!("{:.4}", weight)];
            if amount > 0.0 {
                row.push(format!("{:.2}", weight * amount));
            }
            builder.push_record(row);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Efficient frontier as `target_return,volatility,converged` CSV.
    pub fn frontier_csv(report: &AnalysisReport) -> String {
        let mut out = String::from("target_return,volatility,converged\n");
        for p in &report.frontier {
            out.push_str(&format!(
                "{:.8},{:.8},{}\n",
                p.target_return, p.volatility, p.converged
            ));
        }
        out
    }
}
