//! Bluetooth Mesh command line tool.
//!
//! Derives keys, secures and segments PDUs, and manages a mesh network
//! stored as a Mesh Configuration Database document.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod logging;

use commands::{parse_key, HexBytes, PduKind};
use config::{MeshConfig, StorageKind};
use logging::MeshLogFormatter;
use mesh_crypto::Key;
use uuid::Uuid;

/// Bluetooth Mesh security and network management
#[derive(Parser, Debug)]
#[command(name = "btmesh", version, about = "Bluetooth Mesh security and network management")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "btmesh.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Storage mode: memory, file
    #[arg(long)]
    storage: Option<StorageKind>,

    /// Data directory for file storage
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the material derived from a network key and the AID of an application key
    Derive {
        /// Network key (hex)
        #[arg(long, value_parser = parse_key)]
        net_key: Option<Key>,
        /// Application key (hex)
        #[arg(long, value_parser = parse_key)]
        app_key: Option<Key>,
        /// Use directed flooding credentials
        #[arg(long)]
        directed: bool,
    },

    /// AES-CCM encrypt data
    Encrypt {
        /// Key (hex)
        #[arg(long, value_parser = parse_key)]
        key: Key,
        /// 13-byte nonce (hex)
        #[arg(long)]
        nonce: HexBytes,
        /// MIC size in bytes: 4 or 8
        #[arg(long, default_value_t = 4)]
        mic: u8,
        /// Additional authenticated data, e.g. a Label UUID (hex)
        #[arg(long)]
        aad: Option<HexBytes>,
        /// Plaintext (hex)
        data: HexBytes,
    },

    /// AES-CCM decrypt and authenticate data
    Decrypt {
        /// Key (hex)
        #[arg(long, value_parser = parse_key)]
        key: Key,
        /// 13-byte nonce (hex)
        #[arg(long)]
        nonce: HexBytes,
        /// MIC size in bytes: 4 or 8
        #[arg(long, default_value_t = 4)]
        mic: u8,
        /// Additional authenticated data (hex)
        #[arg(long)]
        aad: Option<HexBytes>,
        /// Ciphertext followed by the MIC (hex)
        data: HexBytes,
    },

    /// Split a message into Proxy PDUs
    Segment {
        /// Message type
        #[arg(long = "type", value_enum, default_value = "network")]
        kind: PduKind,
        /// Proxy MTU, defaults to the configured one
        #[arg(long)]
        mtu: Option<usize>,
        /// Message (hex)
        data: HexBytes,
    },

    /// Reassemble Proxy PDUs given in order
    Reassemble {
        /// Proxy PDUs (hex)
        #[arg(required = true)]
        pdus: Vec<HexBytes>,
    },

    /// Send a message over an in-memory proxy connection and print what arrives
    Loopback {
        /// Message type
        #[arg(long = "type", value_enum, default_value = "network")]
        kind: PduKind,
        /// Proxy MTU, defaults to the configured one
        #[arg(long)]
        mtu: Option<usize>,
        /// Receive timeout, e.g. 500ms
        #[arg(long)]
        timeout: Option<humantime::Duration>,
        /// Message (hex)
        data: HexBytes,
    },

    /// Print the virtual address of a Label UUID
    VirtualAddress {
        /// Label UUID
        label: Uuid,
    },

    /// Decode a configuration message access payload
    ConfigDecode {
        /// Opcode and parameters (hex)
        payload: HexBytes,
    },

    /// Manage the stored network
    Network {
        #[command(subcommand)]
        command: NetworkCommand,
    },

    /// Export the stored network as a Mesh CDB document
    Export {
        /// Output file, stdout when omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Leave device keys out
        #[arg(long)]
        without_device_keys: bool,
    },

    /// Import a Mesh CDB document as the stored network
    Import {
        /// Mesh CDB JSON file
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum NetworkCommand {
    /// Create a network with a random primary network key
    Create {
        /// Network name
        #[arg(long)]
        name: Option<String>,
        /// Local provisioner name
        #[arg(long)]
        provisioner: Option<String>,
    },

    /// Print a summary of the network
    Show,

    /// Add a network key
    AddNetKey {
        /// Key index, the lowest free one when omitted
        #[arg(long)]
        index: Option<u16>,
        /// Key (hex), random when omitted
        #[arg(long, value_parser = parse_key)]
        key: Option<Key>,
        /// Key name
        #[arg(long, default_value = "Network Key")]
        name: String,
    },

    /// Add an application key
    AddAppKey {
        /// Key index, the lowest free one when omitted
        #[arg(long)]
        index: Option<u16>,
        /// Index of the network key to bind to
        #[arg(long, default_value_t = 0)]
        bound: u16,
        /// Key (hex), random when omitted
        #[arg(long, value_parser = parse_key)]
        key: Option<Key>,
        /// Key name
        #[arg(long, default_value = "Application Key")]
        name: String,
    },

    /// Set the IV index
    SetIvIndex {
        /// New IV index
        index: u32,
        /// Enter the IV Update in Progress state
        #[arg(long)]
        update_active: bool,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let mut env_filter = EnvFilter::new("warn");
    for target in [
        "btmesh",
        "mesh_crypto",
        "mesh_wire",
        "mesh_storage",
        "mesh_model",
        "mesh_foundation",
        "mesh_bearer",
    ] {
        env_filter = env_filter.add_directive(format!("{}={}", target, level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .event_format(MeshLogFormatter::new("btmesh"))
        .init();
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = MeshConfig::load_from_file(&args.config)?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(storage) = args.storage {
        config.storage = storage;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    init_logging(&config.log_level)?;
    debug!("Starting btmesh v{} with {:?}", env!("CARGO_PKG_VERSION"), config);

    let mut stdout = std::io::stdout().lock();
    let out = &mut stdout;
    match args.command {
        Command::Derive {
            net_key,
            app_key,
            directed,
        } => commands::derive(out, net_key, app_key, directed),
        Command::Encrypt {
            key,
            nonce,
            mic,
            aad,
            data,
        } => commands::encrypt(out, &key, &nonce, mic, aad.as_ref(), &data),
        Command::Decrypt {
            key,
            nonce,
            mic,
            aad,
            data,
        } => commands::decrypt(out, &key, &nonce, mic, aad.as_ref(), &data),
        Command::Segment { kind, mtu, data } => {
            commands::segment(out, kind, mtu.unwrap_or(config.proxy_mtu), &data)
        }
        Command::Reassemble { pdus } => commands::reassemble(out, &pdus),
        Command::Loopback {
            kind,
            mtu,
            timeout,
            data,
        } => {
            let timeout = timeout.map(Into::into).unwrap_or(config.receive_timeout);
            commands::loopback(out, kind, mtu.unwrap_or(config.proxy_mtu), timeout, &data).await
        }
        Command::VirtualAddress { label } => commands::virtual_address(out, label),
        Command::ConfigDecode { payload } => commands::config_decode(out, &payload),
        Command::Network { command } => match command {
            NetworkCommand::Create { name, provisioner } => {
                commands::network_create(out, &config, name, provisioner).await
            }
            NetworkCommand::Show => commands::network_show(out, &config).await,
            NetworkCommand::AddNetKey { index, key, name } => {
                commands::network_add_net_key(out, &config, index, key, name).await
            }
            NetworkCommand::AddAppKey {
                index,
                bound,
                key,
                name,
            } => commands::network_add_app_key(out, &config, index, bound, key, name).await,
            NetworkCommand::SetIvIndex {
                index,
                update_active,
            } => commands::network_set_iv_index(out, &config, index, update_active).await,
        },
        Command::Export {
            output,
            without_device_keys,
        } => commands::export(out, &config, output.as_deref(), without_device_keys).await,
        Command::Import { file } => commands::import(out, &config, &file).await,
    }
}
