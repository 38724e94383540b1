//! Compare an edited ACL against the original one.
//!
//! The original ACL permits traffic to `1.1.1.0/24`; the edit also permits `1.1.2.0/24`.
//!
//! Run with:
//! ```bash
//! cargo run --example filter_change -- --dst 1.1.2.0/25 --action permit
//! ```

use acl_bdd::acl::{AclLine, IpAccessList, LineAction};
use acl_bdd::configuration::Configuration;
use acl_bdd::expr::AclLineMatchExpr;
use acl_bdd::filter_change::{FilterChangeAnalyzer, FilterChangeQuery};
use acl_bdd::header_space::HeaderSpace;
use acl_bdd::ip::Prefix;
use acl_bdd::ip_space::{IpSpace, NamedIpSpaces};
use acl_bdd::reachability::line_reachability;
use acl_bdd::settings::Settings;
use clap::{Parser, ValueEnum};

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Action {
    Permit,
    Deny,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Differential analysis of an ACL edit")]
struct Cli {
    /// Destination prefix the edit is meant for
    #[arg(long)]
    dst: Option<Prefix>,

    /// Intended action for that traffic
    #[arg(long, value_enum)]
    action: Option<Action>,

    /// Print the answer as JSON
    #[arg(long)]
    json: bool,
}

fn snapshot(prefixes: &[&str]) -> color_eyre::Result<Configuration> {
    let mut lines = Vec::new();
    for p in prefixes {
        lines.push(AclLine::permit(AclLineMatchExpr::match_dst(IpSpace::Prefix(p.parse()?))));
    }
    Ok(Configuration::new(
        "A",
        [IpAccessList::new("acl", lines)],
        NamedIpSpaces::new(),
        Vec::<String>::new(),
    )?)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let cli = Cli::parse();

    let original = snapshot(&["1.1.1.0/24"])?;
    let edited = snapshot(&["1.1.1.0/24", "1.1.2.0/24"])?;
    let settings = Settings::default();

    let mut query = FilterChangeQuery::new();
    if let Some(dst) = cli.dst {
        query = query.with_header_space(HeaderSpace::new().with_dst_ips(dst));
    }
    if let Some(action) = cli.action {
        query = query.with_action(match action {
            Action::Permit => LineAction::Permit,
            Action::Deny => LineAction::Deny,
        });
    }

    let answer = FilterChangeAnalyzer::new(&settings).analyze(&edited, &original, "acl", &query)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("Redundant flows:");
    for row in &answer.redundant {
        println!("  {} {:<8} {}", row.action, row.line, row.flow);
    }
    println!("Incorrect flows:");
    for row in &answer.incorrect {
        println!("  {} {:<8} {}", row.action, row.line, row.flow);
    }
    println!("Collateral damage:");
    for row in &answer.collateral_damage {
        println!(
            "  {} {:<8} -> {} {:<8} {}",
            row.delta_action, row.delta_line, row.base_action, row.base_line, row.flow
        );
    }

    println!("Line reachability of the edited ACL:");
    for row in line_reachability(&edited, "acl", &settings)? {
        println!(
            "  line:{} {} reachable={} explained_by={:?}",
            row.index, row.action, row.reachable, row.explaining_line
        );
    }
    Ok(())
}
