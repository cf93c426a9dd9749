use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

fn selection_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-d --"device" <DEVICE_ID>)
            .required(true)
            .help("The firewall device whose flows are graphed"),
    )
    .arg(
        arg!(-c --"client" <IP>)
            .required(false)
            .help("Limit the graph to traffic of a single client address"),
    )
}

fn output_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-o --"output" <PATH>)
            .required(false)
            .help("Save report to file (default: display to screen)")
            .value_parser(clap::value_parser!(std::path::PathBuf)),
    )
    .arg(
        arg!(-f --"format" <FORMAT>)
            .required(false)
            .help("Report format: text, json")
            .value_parser(["text", "json"])
            .default_value("text"),
    )
}

fn diagram_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-C --"categories" <LIST>)
            .required(false)
            .help(
                "Comma separated flow categories to merge: rfc1918, all, outbound, inbound, \
            transit (default: the dashboard's saved selection)",
            ),
    )
    .arg(
        arg!(-n --"limit" <NUM_FLOWS>)
            .required(false)
            .help("Keep only the largest flows before building the graph")
            .value_parser(clap::value_parser!(usize))
            .default_value("50"),
    )
    .arg(
        arg!(--"no-dns")
            .required(false)
            .help("Skip reverse DNS even if the dashboard has it enabled")
            .action(clap::ArgAction::SetTrue),
    )
    .arg(
        arg!(--"no-cache")
            .required(false)
            .help("Ignore cached flow results and always query the backend")
            .action(clap::ArgAction::SetTrue),
    )
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("flowlens")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("flowlens")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" ... "Increase log verbosity (-v info, -vv debug)")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"api" <URL>)
                .required(false)
                .help("Base URL of the dashboard backend")
                .value_parser(clap::value_parser!(Url))
                .default_value("http://127.0.0.1:8080")
                .global(true),
        )
        .arg(
            arg!(--"cache-dir" <PATH>)
                .required(false)
                .help("Where the flow result cache is kept")
                .default_value("~/.config/flowlens/")
                .global(true),
        )
        .arg(
            arg!(--"timeout" <SECS>)
                .required(false)
                .help("HTTP request timeout in seconds")
                .value_parser(clap::value_parser!(u64))
                .default_value("10")
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(output_args(diagram_args(selection_args(
            command!("chord").about("Build a chord diagram of pairwise endpoint traffic"),
        ))))
        .subcommand(output_args(diagram_args(selection_args(
            command!("sankey")
                .about("Build a sankey diagram of source → application → destination traffic"),
        ))))
        .subcommand(output_args(selection_args(
            command!("overview")
                .about("Load the internal and internet chord diagrams side by side")
                .arg(
                    arg!(-n --"limit" <NUM_FLOWS>)
                        .required(false)
                        .help("Keep only the largest flows before building each graph")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("50"),
                ),
        )))
        .subcommand(
            command!("dns")
                .about("Manage hostname resolution")
                .subcommand_required(true)
                .subcommand(command!("status").about("Show whether reverse DNS is enabled"))
                .subcommand(command!("enable").about("Enable reverse DNS for flow graphs"))
                .subcommand(command!("disable").about("Disable reverse DNS for flow graphs"))
                .subcommand(
                    command!("lookup").about("Resolve public addresses through the backend").arg(
                        arg!(<IP> ...)
                            .required(true)
                            .help("One or more addresses to resolve"),
                    ),
                ),
        )
        .subcommand(
            command!("cache")
                .about("Manage the flow result cache")
                .subcommand_required(true)
                .subcommand(command!("clear").about("Remove every cached flow result")),
        )
}
