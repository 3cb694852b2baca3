use std::{
    fs,
    io::Write,
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use error::Error;
use render::{
    KeyMode,
    keyfile::{DEFAULT_KEYFILE_DIR, KeyPurpose, KeyfileLayout, render_keyfiles},
    netdev::render_netdev,
    network::{ActivationPolicy, render_network},
    nft::{Warning, render_nftables},
};
use wg::config::{WgConfig, interface_name_from_path};

pub(crate) mod error;
mod render;
mod wg;

const KEYFILE_MODE: u32 = 0o640;
const UNIT_MODE: u32 = 0o644;

/// Converts wg-quick configs into systemd-networkd units and an nftables ruleset
#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Print one generated artifact to stdout
    Generate(GenerateArgs),

    /// Write every artifact into the output directory
    Install(CommonArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputKind {
    Network,
    Netdev,
    Keyfile,
    Nft,
}

#[derive(Debug, clap::Args)]
struct GenerateArgs {
    #[arg(short = 't', long = "type", value_enum)]
    kind: OutputKind,

    /// Path the netdev unit uses for the private key file
    #[arg(short, long)]
    keyfile: Option<PathBuf>,

    /// Write private and preshared keys into the netdev unit
    #[arg(long)]
    inline_keys: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, clap::Args)]
struct CommonArgs {
    /// Directory holding the generated files and keyfiles
    #[arg(short, long, default_value = DEFAULT_KEYFILE_DIR)]
    output_dir: PathBuf,

    /// Interface name, defaults to the config file name
    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long, value_enum, default_value_t)]
    activation_policy: ActivationPolicy,

    config: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let res = match args.command {
        Command::Generate(args) => generate(args),
        Command::Install(args) => install(args),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn load_wg_config(args: &CommonArgs) -> Result<WgConfig, Error> {
    let data = fs::read_to_string(&args.config).map_err(|source| Error::ReadConfig {
        path: args.config.clone(),
        source,
    })?;

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| interface_name_from_path(&args.config));

    let config = WgConfig::parse_config(&name, &data)?;
    for note in config.unsupported_fields() {
        log::warn!("{note}");
    }

    Ok(config)
}

fn log_warnings(warnings: &[Warning]) {
    for warning in warnings {
        log::warn!(
            "line {}: {} hook `{}` not translated: {}",
            warning.line,
            warning.stage,
            warning.command,
            warning.reason
        );
    }
}

fn generate(args: GenerateArgs) -> Result<(), Error> {
    let config = load_wg_config(&args.common)?;

    let mut layout = KeyfileLayout::new(&args.common.output_dir);
    if let Some(keyfile) = &args.keyfile {
        layout = layout.with_private_keyfile(keyfile);
    }

    let out = match args.kind {
        OutputKind::Netdev if args.inline_keys => render_netdev(&config, KeyMode::Inline),
        OutputKind::Netdev => render_netdev(&config, KeyMode::Keyfile(&layout)),
        OutputKind::Network => render_network(&config, args.common.activation_policy),
        OutputKind::Keyfile => render_keyfiles(&config, &layout)
            .remove(&KeyPurpose::Private)
            .map(|keyfile| keyfile.contents())
            .unwrap_or_default(),
        OutputKind::Nft => {
            let ruleset = render_nftables(&config)?;
            log_warnings(&ruleset.warnings);
            ruleset.text
        }
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(out.as_bytes())?;
    stdout.flush()?;

    Ok(())
}

fn write_file(path: &Path, contents: &str, mode: u32) -> Result<(), Error> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;

    // mode() only applies to newly created files
    file.set_permissions(fs::Permissions::from_mode(mode))?;
    file.write_all(contents.as_bytes())?;
    log::info!("wrote {}", path.display());

    Ok(())
}

fn install(args: CommonArgs) -> Result<(), Error> {
    let config = load_wg_config(&args)?;
    let name = &config.interface.name;
    let dir = &args.output_dir;

    // nothing is written until every artifact has rendered
    let layout = KeyfileLayout::new(dir);
    let netdev = render_netdev(&config, KeyMode::Keyfile(&layout));
    let network = render_network(&config, args.activation_policy);
    let keyfiles = render_keyfiles(&config, &layout);
    let ruleset = render_nftables(&config)?;

    log_warnings(&ruleset.warnings);

    fs::create_dir_all(dir)?;

    for keyfile in keyfiles.values() {
        write_file(&keyfile.path, &keyfile.contents(), KEYFILE_MODE)?;
    }

    write_file(&dir.join(format!("{name}.netdev")), &netdev, UNIT_MODE)?;
    write_file(&dir.join(format!("{name}.network")), &network, UNIT_MODE)?;
    write_file(&dir.join(format!("{name}.nft")), &ruleset.text, UNIT_MODE)?;

    Ok(())
}
