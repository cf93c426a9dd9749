use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use flowlens::handlers::{
    GlobalOptions, handle_cache_clear, handle_chord, handle_dns_lookup, handle_dns_status,
    handle_dns_toggle, handle_overview, handle_sankey, print_banner, verbosity_level,
};

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Global flags are propagated downwards, so the innermost matches see them all
    let leaf = leaf_matches(&chosen_command);
    tracing_subscriber::fmt()
        .with_max_level(verbosity_level(leaf.get_count("verbose")))
        .with_writer(std::io::stderr)
        .init();

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    let global = match GlobalOptions::from_matches(leaf, quiet) {
        Ok(global) => global,
        Err(e) => fail(e),
    };

    let result = match chosen_command.subcommand() {
        Some(("chord", primary_command)) => handle_chord(&global, primary_command).await,
        Some(("sankey", primary_command)) => handle_sankey(&global, primary_command).await,
        Some(("overview", primary_command)) => handle_overview(&global, primary_command).await,
        Some(("dns", primary_command)) => match primary_command.subcommand() {
            Some(("status", _)) => handle_dns_status(&global).await,
            Some(("enable", _)) => handle_dns_toggle(&global, true).await,
            Some(("disable", _)) => handle_dns_toggle(&global, false).await,
            Some(("lookup", secondary_command)) => handle_dns_lookup(&global, secondary_command).await,
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("cache", primary_command)) => match primary_command.subcommand() {
            Some(("clear", _)) => handle_cache_clear(&global),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        fail(e);
    }
}

fn leaf_matches(matches: &ArgMatches) -> &ArgMatches {
    match matches.subcommand() {
        Some((_, sub)) => leaf_matches(sub),
        None => matches,
    }
}

fn fail(e: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "✗".red().bold(), e);
    std::process::exit(1);
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
