use std::path::PathBuf;

use clap::{value_parser, Arg, ArgMatches, Command};
use tracing::error;

use gales_api::app::{absolute, default_slim_map, default_ui_dir, launch, Config, DEFAULT_HOST, DEFAULT_PORT};
use gales_api::logging;

fn app() -> Command {
    Command::new("gales-view")
        .about("Prepares an annotation directory and serves it to the genome viewer")
        .arg(Arg::new("input_directory")
            .long("input_directory")
            .short('i')
            .required(true)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("fasta_file")
            .long("fasta_file")
            .short('f')
            .required(true)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("port")
            .long("port")
            .short('p')
            .default_value("8081")
            .value_parser(value_parser!(u16)))
        .arg(Arg::new("host")
            .long("host")
            .default_value(DEFAULT_HOST))
        .arg(Arg::new("slim_map")
            .long("slim_map")
            .short('s')
            .help("GO slim map, defaults to <exe>/../data/go_slim.map.tsv")
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("ui_dir")
            .long("ui_dir")
            .help("Viewer UI served at /, defaults to <exe>/../ui")
            .value_parser(value_parser!(PathBuf)))
}

fn main() {
    logging::init();
    let matches = app().get_matches();

    match run(&matches) {
        Ok(()) => (),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn config(args: &ArgMatches) -> anyhow::Result<Config> {
    let input_dir = args.get_one::<PathBuf>("input_directory")
        .map(absolute)
        .ok_or_else(|| anyhow::anyhow!("missing --input_directory"))?;
    let fasta_file = args.get_one::<PathBuf>("fasta_file")
        .map(absolute)
        .ok_or_else(|| anyhow::anyhow!("missing --fasta_file"))?;
    let slim_map = args.get_one::<PathBuf>("slim_map")
        .cloned()
        .unwrap_or_else(default_slim_map);

    Ok(Config {
        input_dir,
        fasta_file,
        slim_map,
        ui_dir: args.get_one::<PathBuf>("ui_dir").cloned().unwrap_or_else(default_ui_dir),
        host: args.get_one::<String>("host").cloned().unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: args.get_one::<u16>("port").copied().unwrap_or(DEFAULT_PORT),
    })
}

fn run(args: &ArgMatches) -> anyhow::Result<()> {
    launch(config(args)?)
}
