//! Command-line driver: one process per MPC party.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use privmail_search::channel::TcpChannel;
use privmail_search::circuit::CircuitBuilder;
use privmail_search::corpus::{load_index_file, load_mail_dir, SearchIndex};
use privmail_search::encoding::char_len_from_base64;
use privmail_search::protocol::Party;
use privmail_search::query::load_query_file;
use privmail_search::search::{build_search_circuit, SearchMode};
use privmail_search::stats::{human_report, json_report, AccumulatedStats, ReportShape};

/// Secure multi-party keyword search over secret-shared email.
#[derive(Debug, Parser)]
#[command(name = "privmail-search", version)]
struct Cli {
    /// This party's id.
    #[arg(long)]
    my_id: Option<usize>,
    /// Info (id,IP,port) for each party, e.g.
    /// --parties 0,127.0.0.1,23000 1,127.0.0.1,23001
    #[arg(long, num_args = 1..)]
    parties: Vec<String>,
    /// Search mode, one of: normal | hidden | bucket | index.
    #[arg(long)]
    search_mode: Option<String>,
    /// This party's query share file.
    #[arg(long)]
    query_file_path: Option<PathBuf>,
    /// This party's directory of mail share files.
    #[arg(long)]
    mail_dir_path: Option<PathBuf>,
    /// This party's index share file (index mode).
    #[arg(long)]
    index_file_path: Option<PathBuf>,
    /// Write the statistics as JSON to this path instead of stdout.
    #[arg(long)]
    json_path: Option<PathBuf>,
    /// Configuration file; command-line arguments overwrite its values.
    #[arg(long, short = 'f')]
    configuration_file: Option<PathBuf>,
    /// Disable logging.
    #[arg(long, short = 'l')]
    disable_logging: bool,
    /// Print the parsed configuration.
    #[arg(long, short = 'p')]
    print_configuration: bool,
    /// Number of benchmark iterations.
    #[arg(long)]
    num_iterations: Option<u32>,
}

/// The configuration file mirrors the long flag names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
struct ConfigFile {
    my_id: Option<usize>,
    parties: Option<Vec<String>>,
    search_mode: Option<String>,
    query_file_path: Option<PathBuf>,
    mail_dir_path: Option<PathBuf>,
    index_file_path: Option<PathBuf>,
    json_path: Option<PathBuf>,
    disable_logging: Option<bool>,
    print_configuration: Option<bool>,
    num_iterations: Option<u32>,
}

/// The fully resolved session configuration.
#[derive(Debug)]
struct Config {
    my_id: usize,
    addrs: Vec<SocketAddr>,
    search_mode: SearchMode,
    query_file_path: PathBuf,
    mail_dir_path: Option<PathBuf>,
    index_file_path: Option<PathBuf>,
    json_path: Option<PathBuf>,
    disable_logging: bool,
    print_configuration: bool,
    num_iterations: u32,
}

/// Parses one `id,dotted_ipv4,port` party argument.
fn parse_party_argument(arg: &str) -> anyhow::Result<(usize, SocketAddr)> {
    let err = || anyhow!("incorrect party argument syntax `{arg}`");
    let parts: Vec<&str> = arg.split(',').collect();
    let &[id, ip, port] = parts.as_slice() else {
        return Err(err());
    };
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4
        || octets
            .iter()
            .any(|o| o.is_empty() || o.len() > 3 || !o.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(err());
    }
    if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    let id: usize = id.parse().map_err(|_| err())?;
    let ip: Ipv4Addr = ip.parse().map_err(|_| err())?;
    let port: u16 = port.parse().map_err(|_| err())?;
    Ok((id, SocketAddr::from((ip, port))))
}

/// Merges command line and configuration file (command line wins) and
/// validates the result.
fn resolve(cli: Cli) -> anyhow::Result<Config> {
    let file = match &cli.configuration_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("could not read configuration file {}", path.display()))?;
            serde_yaml::from_str::<ConfigFile>(&content)
                .with_context(|| format!("could not parse configuration file {}", path.display()))?
        }
        None => ConfigFile::default(),
    };

    let my_id = cli
        .my_id
        .or(file.my_id)
        .ok_or_else(|| anyhow!("my id is not set but required"))?;

    let party_args = if cli.parties.is_empty() {
        file.parties.unwrap_or_default()
    } else {
        cli.parties
    };
    if party_args.is_empty() {
        bail!("other parties' information is not set but required");
    }
    let n_parties = party_args.len();
    let mut addrs: Vec<Option<SocketAddr>> = vec![None; n_parties];
    for arg in &party_args {
        let (id, addr) = parse_party_argument(arg)?;
        if id >= n_parties {
            bail!("party id needs to be in the range [0, {}], got {id}", n_parties - 1);
        }
        if addrs[id].replace(addr).is_some() {
            bail!("party id {id} was specified twice");
        }
    }
    let addrs: Vec<SocketAddr> = addrs.into_iter().flatten().collect();
    if my_id >= n_parties {
        bail!(
            "my id needs to be in the range [0, {}], got {my_id}",
            n_parties - 1
        );
    }

    let search_mode = cli
        .search_mode
        .or(file.search_mode)
        .unwrap_or_else(|| "normal".to_string())
        .parse::<SearchMode>()
        .map_err(|e| anyhow!("{e}"))?;

    let query_file_path = cli
        .query_file_path
        .or(file.query_file_path)
        .ok_or_else(|| anyhow!("query file path is not set but required"))?;
    let mail_dir_path = cli.mail_dir_path.or(file.mail_dir_path);
    let index_file_path = cli.index_file_path.or(file.index_file_path);
    match search_mode {
        SearchMode::Index => {
            if index_file_path.is_none() {
                bail!("index file path is required in index mode");
            }
        }
        _ => {
            if mail_dir_path.is_none() {
                bail!("mail directory path is required outside index mode");
            }
        }
    }

    let num_iterations = cli.num_iterations.or(file.num_iterations).unwrap_or(1);
    if num_iterations == 0 {
        bail!("at least one iteration is required");
    }

    Ok(Config {
        my_id,
        addrs,
        search_mode,
        query_file_path,
        mail_dir_path,
        index_file_path,
        json_path: cli.json_path.or(file.json_path),
        disable_logging: cli.disable_logging || file.disable_logging.unwrap_or(false),
        print_configuration: cli.print_configuration || file.print_configuration.unwrap_or(false),
        num_iterations,
    })
}

fn print_configuration(config: &Config) {
    println!("My id {}", config.my_id);
    let parties: Vec<String> = config.addrs.iter().map(|a| a.to_string()).collect();
    println!("Parties: {}", parties.join(" "));
    println!("Search mode: {}", config.search_mode);
    println!("Query file: {}", config.query_file_path.display());
    if let Some(dir) = &config.mail_dir_path {
        println!("Mail directory: {}", dir.display());
    }
    if let Some(path) = &config.index_file_path {
        println!("Index file: {}", path.display());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = resolve(Cli::parse())?;
    if !config.disable_logging {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }
    if config.print_configuration {
        print_configuration(&config);
    }

    let query = load_query_file(&config.query_file_path)?;
    let mails = match &config.mail_dir_path {
        Some(dir) => load_mail_dir(dir, &query.bucket_scheme)?,
        None => vec![],
    };
    let index = match &config.index_file_path {
        Some(path) => load_index_file(path)?,
        None => SearchIndex::default(),
    };

    let mut accumulated = AccumulatedStats::default();
    for iteration in 1..=config.num_iterations {
        info!("starting iteration {iteration}");
        // Party and circuit are recreated per iteration; neither is
        // re-entrant across runs.
        let channel = TcpChannel::connect(config.my_id, &config.addrs)
            .await
            .context("could not establish the party mesh")?;
        let mut party = Party::new(config.my_id, config.addrs.len(), channel);

        let mut builder = CircuitBuilder::new(config.addrs.len());
        let results = build_search_circuit(
            &mut builder,
            &query,
            &mails,
            &index,
            config.search_mode,
        )?;
        let circuit = builder.finish(results)?;

        // The result bits stay secret-shared; declassification is a
        // deployment decision outside the engine.
        let _result_shares = party.run(&circuit).await?;
        let stats = party.finish().await?;
        accumulated.add(&stats);
    }

    let shape = ReportShape {
        search_mode: config.search_mode.to_string(),
        num_of_parties: config.addrs.len(),
        num_of_emails: mails.len(),
        num_of_emails_in_index: index.num_of_emails,
        keyword_characters: query
            .queries
            .iter()
            .map(|q| char_len_from_base64(&q.keyword_truncated))
            .sum(),
        keyword_buckets: query.queries.iter().map(|q| q.bucket_size).sum(),
        email_characters: mails
            .iter()
            .map(|m| char_len_from_base64(&m.secret_share_truncated_block))
            .sum(),
    };
    match &config.json_path {
        Some(path) => {
            let report = json_report(&shape, &accumulated);
            std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        }
        None => print!("{}", human_report(&shape, &accumulated)),
    }
    Ok(())
}
