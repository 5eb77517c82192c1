//! Subcommand implementations.
//!
//! Every command writes its result to `out`; diagnostics go through tracing.

use crate::config::{MeshConfig, StorageKind};
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use mesh_bearer::{Bearer, ChannelBearer, ProxyConnection};
use mesh_crypto::{
    calculate_key_derivatives, create_virtual_address, decrypt_with_aad, encrypt_with_aad, k4,
    key_from_slice, Credentials, Key, MicSize, Nonce,
};
use mesh_foundation::{parse_page0, ConfigMessage};
use mesh_model::{cdb, generate_key, ExportConfiguration, MeshNetwork, NetworkHandle, Selection};
use mesh_storage::Storage;
use mesh_wire::{PduType, ProxyProtocolHandler};
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Bytes given on the command line as hex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches("0x");
        hex::decode(s.replace([' ', ':'], "")).map(HexBytes)
    }
}

/// Parses a 128-bit key given as hex
pub fn parse_key(s: &str) -> Result<Key, String> {
    let bytes = HexBytes::from_str(s).map_err(|e| e.to_string())?;
    key_from_slice(&bytes.0).map_err(|e| e.to_string())
}

/// Proxy PDU message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PduKind {
    /// Network PDU
    Network,
    /// Mesh beacon
    Beacon,
    /// Proxy configuration message
    ProxyConfig,
    /// Provisioning PDU
    Provisioning,
}

impl From<PduKind> for PduType {
    fn from(kind: PduKind) -> Self {
        match kind {
            PduKind::Network => PduType::NetworkPdu,
            PduKind::Beacon => PduType::MeshBeacon,
            PduKind::ProxyConfig => PduType::ProxyConfiguration,
            PduKind::Provisioning => PduType::ProvisioningPdu,
        }
    }
}

fn mic_size(bytes: u8) -> Result<MicSize> {
    match bytes {
        4 => Ok(MicSize::Small),
        8 => Ok(MicSize::Large),
        other => bail!("MIC size must be 4 or 8 bytes, got {}", other),
    }
}

fn nonce(bytes: &HexBytes) -> Result<Nonce> {
    bytes
        .0
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("nonce must be 13 bytes, got {}", bytes.0.len()))
}

/// Prints the material derived from a network key and the AID of an
/// application key
pub fn derive(
    out: &mut dyn Write,
    net_key: Option<Key>,
    app_key: Option<Key>,
    directed: bool,
) -> Result<()> {
    if net_key.is_none() && app_key.is_none() {
        bail!("nothing to derive: pass --net-key and/or --app-key");
    }
    if let Some(key) = net_key {
        let credentials = if directed {
            Credentials::DirectedFlooding
        } else {
            Credentials::ManagedFlooding
        };
        let d = calculate_key_derivatives(&key, credentials);
        writeln!(out, "NID:                {:#04x}", d.nid)?;
        writeln!(out, "Encryption key:     {}", hex::encode(d.encryption_key))?;
        writeln!(out, "Privacy key:        {}", hex::encode(d.privacy_key))?;
        writeln!(out, "Network ID:         {}", hex::encode(d.network_id))?;
        writeln!(out, "Identity key:       {}", hex::encode(d.identity_key))?;
        writeln!(out, "Beacon key:         {}", hex::encode(d.beacon_key))?;
        writeln!(out, "Private beacon key: {}", hex::encode(d.private_beacon_key))?;
    }
    if let Some(key) = app_key {
        writeln!(out, "AID:                {:#04x}", k4(&key))?;
    }
    Ok(())
}

/// AES-CCM encrypts `data`
pub fn encrypt(
    out: &mut dyn Write,
    key: &Key,
    nonce_bytes: &HexBytes,
    mic: u8,
    aad: Option<&HexBytes>,
    data: &HexBytes,
) -> Result<()> {
    let aad = aad.map(|a| a.0.as_slice()).unwrap_or_default();
    let encrypted = encrypt_with_aad(&data.0, key, &nonce(nonce_bytes)?, mic_size(mic)?, aad)?;
    writeln!(out, "{}", hex::encode(encrypted))?;
    Ok(())
}

/// AES-CCM decrypts and authenticates `data`
pub fn decrypt(
    out: &mut dyn Write,
    key: &Key,
    nonce_bytes: &HexBytes,
    mic: u8,
    aad: Option<&HexBytes>,
    data: &HexBytes,
) -> Result<()> {
    let aad = aad.map(|a| a.0.as_slice()).unwrap_or_default();
    let decrypted = decrypt_with_aad(&data.0, key, &nonce(nonce_bytes)?, mic_size(mic)?, aad)
        .ok_or_else(|| anyhow!("authentication failed"))?;
    writeln!(out, "{}", hex::encode(decrypted))?;
    Ok(())
}

/// Prints the Proxy PDUs carrying `data`, one per line
pub fn segment(out: &mut dyn Write, kind: PduKind, mtu: usize, data: &HexBytes) -> Result<()> {
    for pdu in ProxyProtocolHandler::segment(&data.0, kind.into(), mtu)? {
        writeln!(out, "{}", hex::encode(pdu))?;
    }
    Ok(())
}

/// Feeds Proxy PDUs in order and prints every completed message
pub fn reassemble(out: &mut dyn Write, pdus: &[HexBytes]) -> Result<()> {
    let mut protocol = ProxyProtocolHandler::new();
    for pdu in pdus {
        if let Some(message) = protocol.reassemble(&pdu.0) {
            writeln!(out, "{:?}: {}", message.pdu_type, hex::encode(&message.data))?;
        }
    }
    if protocol.is_reassembling() {
        warn!("Last message is incomplete");
    }
    Ok(())
}

/// Sends `data` through an in-memory proxy connection and prints what the
/// other end reassembles
pub async fn loopback(
    out: &mut dyn Write,
    kind: PduKind,
    mtu: usize,
    timeout: Duration,
    data: &HexBytes,
) -> Result<()> {
    let (client, proxy) = ChannelBearer::pair(mtu);
    let mut client = ProxyConnection::new(client);
    let mut proxy = ProxyConnection::new(proxy);
    client.open().await?;
    proxy.open().await?;

    client.send(kind.into(), &data.0).await?;
    let message = tokio::time::timeout(timeout, proxy.receive())
        .await
        .context("no message received in time")??
        .ok_or_else(|| anyhow!("bearer closed"))?;
    writeln!(
        out,
        "{:?} over mtu {}: {}",
        message.pdu_type,
        proxy.bearer().mtu(),
        hex::encode(&message.data)
    )?;

    client.close().await?;
    proxy.close().await?;
    Ok(())
}

/// Prints the virtual address of a Label UUID
pub fn virtual_address(out: &mut dyn Write, label: Uuid) -> Result<()> {
    writeln!(out, "{:#06x}", create_virtual_address(label.as_bytes()))?;
    Ok(())
}

/// Decodes a configuration message access payload
pub fn config_decode(out: &mut dyn Write, payload: &HexBytes) -> Result<()> {
    let message = ConfigMessage::parse(&payload.0)?;
    writeln!(out, "{:#06x} {:?}", message.opcode(), message)?;
    if let ConfigMessage::CompositionDataStatus { page: 0, data } = &message {
        let composition = parse_page0(data)?;
        writeln!(
            out,
            "CID {:#06x} PID {:#06x} VID {:#06x} CRPL {} features {:?}",
            composition.company_identifier,
            composition.product_identifier,
            composition.version_identifier,
            composition.minimum_replay_protection_list,
            composition.features
        )?;
        for (i, element) in composition.elements.iter().enumerate() {
            let models: Vec<String> = element
                .models
                .iter()
                .map(|m| format!("{:?}", m.model_id))
                .collect();
            writeln!(out, "  element {} (location {:#06x}): {}", i, element.location, models.join(", "))?;
        }
    }
    Ok(())
}

async fn storage(config: &MeshConfig) -> Result<Storage> {
    if config.storage == StorageKind::Memory {
        warn!("Memory storage selected; nothing outlives this command");
    }
    Ok(Storage::from_mode(config.storage_mode()).await?)
}

async fn open_network(config: &MeshConfig) -> Result<NetworkHandle> {
    NetworkHandle::load(storage(config).await?)
        .await?
        .ok_or_else(|| anyhow!("no network in {:?}; run `btmesh network create` first", config.data_dir))
}

/// Creates a network with a primary network key and a local provisioner
pub async fn network_create(
    out: &mut dyn Write,
    config: &MeshConfig,
    name: Option<String>,
    provisioner: Option<String>,
) -> Result<()> {
    let storage = storage(config).await?;
    if storage.network.load().await?.is_some() {
        bail!("a network already exists in {:?}", config.data_dir);
    }
    let network = MeshNetwork::create(
        name.unwrap_or_else(|| config.network_name.clone()),
        provisioner.unwrap_or_else(|| config.provisioner_name.clone()),
    )?;
    let handle = NetworkHandle::create(network, storage).await?;
    info!(component = "network", "Network {} created", handle.uuid());
    writeln!(out, "{}", handle.uuid())?;
    handle.shutdown();
    Ok(())
}

fn render(network: &MeshNetwork) -> String {
    let mut s = String::new();
    let iv = network.iv_index();
    let _ = writeln!(s, "{} ({})", network.name, network.uuid);
    let _ = writeln!(
        s,
        "IV index {}{}",
        iv.index,
        if iv.is_iv_update_active { " (update in progress)" } else { "" }
    );

    let _ = writeln!(s, "Network keys:");
    for key in network.network_keys() {
        let _ = writeln!(
            s,
            "  {:>4} {:<20} phase {:?} NID {:#04x} network ID {}",
            key.index,
            key.name,
            key.phase(),
            key.transmit_derivatives().nid,
            hex::encode(key.network_id())
        );
    }
    let _ = writeln!(s, "Application keys:");
    for key in network.application_keys() {
        let _ = writeln!(
            s,
            "  {:>4} {:<20} bound to {} AID {:#04x}",
            key.index,
            key.name,
            key.bound_network_key(),
            key.aid()
        );
    }
    let _ = writeln!(s, "Provisioners:");
    for provisioner in network.provisioners() {
        let ranges: Vec<String> = provisioner.unicast_ranges.iter().map(|r| r.to_string()).collect();
        let _ = writeln!(s, "  {} ({}) unicast {}", provisioner.name, provisioner.uuid, ranges.join(" "));
    }
    let _ = writeln!(s, "Nodes:");
    for node in network.nodes() {
        let _ = writeln!(
            s,
            "  {} {:<20} {} net keys {:?} app keys {:?}{}",
            node.address_range(),
            node.name,
            node.uuid,
            node.net_keys.iter().map(|k| k.index).collect::<Vec<_>>(),
            node.app_keys.iter().map(|k| k.index).collect::<Vec<_>>(),
            if node.excluded { " (excluded)" } else { "" }
        );
    }
    if !network.groups().is_empty() {
        let _ = writeln!(s, "Groups:");
        for group in network.groups() {
            let _ = writeln!(s, "  {} {}", group.address, group.name);
        }
    }
    if !network.scenes().is_empty() {
        let _ = writeln!(s, "Scenes:");
        for scene in network.scenes() {
            let _ = writeln!(s, "  {:#06x} {}", scene.number, scene.name);
        }
    }
    s
}

/// Prints a summary of the stored network
pub async fn network_show(out: &mut dyn Write, config: &MeshConfig) -> Result<()> {
    let handle = open_network(config).await?;
    let summary = handle.query(render).await?;
    write!(out, "{}", summary)?;
    handle.shutdown();
    Ok(())
}

/// Adds a network key, generated when `key` is `None`
pub async fn network_add_net_key(
    out: &mut dyn Write,
    config: &MeshConfig,
    index: Option<u16>,
    key: Option<Key>,
    name: String,
) -> Result<()> {
    let handle = open_network(config).await?;
    let index = match index {
        Some(index) => index,
        None => handle
            .query(|n| n.next_available_network_key_index())
            .await?
            .ok_or_else(|| anyhow!("no network key index left"))?,
    };
    handle
        .add_network_key(index, key.unwrap_or_else(generate_key), name)
        .await?;
    info!(component = "network", "Network key {} added", index);
    writeln!(out, "{}", index)?;
    handle.shutdown();
    Ok(())
}

/// Adds an application key bound to `bound`, generated when `key` is `None`
pub async fn network_add_app_key(
    out: &mut dyn Write,
    config: &MeshConfig,
    index: Option<u16>,
    bound: u16,
    key: Option<Key>,
    name: String,
) -> Result<()> {
    let handle = open_network(config).await?;
    let index = match index {
        Some(index) => index,
        None => handle
            .query(|n| n.next_available_application_key_index())
            .await?
            .ok_or_else(|| anyhow!("no application key index left"))?,
    };
    handle
        .add_application_key(index, key.unwrap_or_else(generate_key), bound, name)
        .await?;
    info!(component = "network", "Application key {} added", index);
    writeln!(out, "{}", index)?;
    handle.shutdown();
    Ok(())
}

/// Moves the network to a new IV index
pub async fn network_set_iv_index(
    out: &mut dyn Write,
    config: &MeshConfig,
    index: u32,
    update_active: bool,
) -> Result<()> {
    let handle = open_network(config).await?;
    let reset = handle.set_iv_index(index, update_active).await?;
    writeln!(
        out,
        "IV index {}{}",
        index,
        if reset { ", sequence numbers reset" } else { "" }
    )?;
    handle.shutdown();
    Ok(())
}

/// Exports the stored network as a Mesh CDB document
pub async fn export(
    out: &mut dyn Write,
    config: &MeshConfig,
    output: Option<&Path>,
    without_device_keys: bool,
) -> Result<()> {
    let handle = open_network(config).await?;
    let export_config = if without_device_keys {
        ExportConfiguration::Partial {
            network_keys: Selection::All,
            application_keys: Selection::All,
            provisioners: Selection::All,
            nodes: Selection::All,
            groups: Selection::All,
            scenes: Selection::All,
            export_device_keys: false,
        }
    } else {
        ExportConfiguration::Full
    };
    let document = handle.export(export_config).await?;
    handle.shutdown();

    match output {
        Some(path) => {
            tokio::fs::write(path, &document)
                .await
                .with_context(|| format!("failed to write {:?}", path))?;
            info!(component = "cdb", "Network exported to {:?}", path);
        }
        None => {
            out.write_all(&document)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Imports a Mesh CDB document, replacing nothing
pub async fn import(out: &mut dyn Write, config: &MeshConfig, file: &Path) -> Result<()> {
    let document = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {:?}", file))?;
    let network = cdb::import(&document)?;

    let storage = storage(config).await?;
    if storage.network.load().await?.is_some() {
        bail!("a network already exists in {:?}", config.data_dir);
    }
    let handle = NetworkHandle::create(network, storage).await?;
    info!(component = "cdb", "Network {} imported from {:?}", handle.uuid(), file);
    writeln!(out, "{}", handle.uuid())?;
    handle.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn output(buffer: Vec<u8>) -> String {
        String::from_utf8(buffer).unwrap()
    }

    fn file_config(dir: &TempDir) -> MeshConfig {
        MeshConfig {
            data_dir: dir.path().to_path_buf(),
            storage: StorageKind::File,
            ..MeshConfig::default()
        }
    }

    #[test]
    fn test_hex_bytes() {
        assert_eq!("0x0102".parse::<HexBytes>().unwrap(), HexBytes(vec![1, 2]));
        assert_eq!("01 02:03".parse::<HexBytes>().unwrap(), HexBytes(vec![1, 2, 3]));
        assert!("0g".parse::<HexBytes>().is_err());
        assert!(parse_key("0102").is_err());
    }

    #[test]
    fn test_derive_sample_keys() {
        let mut out = Vec::new();
        derive(
            &mut out,
            Some(parse_key("7dd7364cd842ad18c17c2b820c84c3d6").unwrap()),
            Some(parse_key("63964771734fbd76e3b40519d1d94a48").unwrap()),
            false,
        )
        .unwrap();
        let text = output(out);
        assert!(text.contains("NID:                0x68"));
        assert!(text.contains("Network ID:         3ecaff672f673370"));
        assert!(text.contains("AID:                0x26"));
        assert!(derive(&mut Vec::new(), None, None, false).is_err());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = [0x11; 16];
        let nonce_bytes = HexBytes(vec![0x22; 13]);
        let data = HexBytes(b"mesh".to_vec());

        let mut out = Vec::new();
        encrypt(&mut out, &key, &nonce_bytes, 8, None, &data).unwrap();
        let encrypted: HexBytes = output(out).trim().parse().unwrap();
        assert_eq!(encrypted.0.len(), 4 + 8);

        let mut out = Vec::new();
        decrypt(&mut out, &key, &nonce_bytes, 8, None, &encrypted).unwrap();
        assert_eq!(output(out).trim(), hex::encode(b"mesh"));

        assert!(decrypt(&mut Vec::new(), &[0x12; 16], &nonce_bytes, 8, None, &encrypted).is_err());
        assert!(encrypt(&mut Vec::new(), &key, &nonce_bytes, 6, None, &data).is_err());
        assert!(encrypt(&mut Vec::new(), &key, &HexBytes(vec![0; 12]), 4, None, &data).is_err());
    }

    #[test]
    fn test_segment_then_reassemble() {
        let data = HexBytes((0..30).collect());
        let mut out = Vec::new();
        segment(&mut out, PduKind::Network, 20, &data).unwrap();
        let pdus: Vec<HexBytes> = output(out)
            .lines()
            .map(|line| line.parse().unwrap())
            .collect();
        assert_eq!(pdus.len(), 2);
        assert_eq!(pdus[0].0[0], 0x40);
        assert_eq!(pdus[1].0[0], 0xC0);

        let mut out = Vec::new();
        reassemble(&mut out, &pdus).unwrap();
        assert_eq!(output(out).trim(), format!("NetworkPdu: {}", hex::encode(&data.0)));
    }

    #[tokio::test]
    async fn test_loopback() {
        let mut out = Vec::new();
        loopback(
            &mut out,
            PduKind::ProxyConfig,
            8,
            Duration::from_secs(1),
            &HexBytes(vec![0xAB; 20]),
        )
        .await
        .unwrap();
        assert!(output(out).starts_with("ProxyConfiguration over mtu 8"));
    }

    #[test]
    fn test_virtual_address() {
        let mut out = Vec::new();
        let label = Uuid::parse_str("f4a002c7-fb1e-4ca0-a469-a021de0db875").unwrap();
        virtual_address(&mut out, label).unwrap();
        assert_eq!(output(out).trim(), "0x9736");
    }

    #[test]
    fn test_config_decode() {
        let mut out = Vec::new();
        config_decode(&mut out, &"8044000100".parse().unwrap()).unwrap();
        assert!(output(out).starts_with("0x8044 NetKeyStatus"));
        assert!(config_decode(&mut Vec::new(), &HexBytes(vec![])).is_err());
    }

    #[tokio::test]
    async fn test_network_lifecycle() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir);

        let mut out = Vec::new();
        network_create(&mut out, &config, Some("Home".to_string()), None)
            .await
            .unwrap();
        let uuid: Uuid = output(out).trim().parse().unwrap();
        assert!(network_create(&mut Vec::new(), &config, None, None).await.is_err());

        let mut out = Vec::new();
        network_add_net_key(&mut out, &config, None, None, "Guest".to_string())
            .await
            .unwrap();
        assert_eq!(output(out).trim(), "1");

        let mut out = Vec::new();
        network_add_app_key(&mut out, &config, Some(5), 1, Some([7; 16]), "Lights".to_string())
            .await
            .unwrap();
        assert_eq!(output(out).trim(), "5");

        network_set_iv_index(&mut Vec::new(), &config, 1, true).await.unwrap();

        let mut out = Vec::new();
        network_show(&mut out, &config).await.unwrap();
        let summary = output(out);
        assert!(summary.starts_with(&format!("Home ({})", uuid)));
        assert!(summary.contains("IV index 1 (update in progress)"));
        assert!(summary.contains("Guest"));
        assert!(summary.contains("bound to 1"));

        let exported = dir.path().join("export.json");
        export(&mut Vec::new(), &config, Some(&exported), false).await.unwrap();
        let document = std::fs::read(&exported).unwrap();
        assert_eq!(cdb::import(&document).unwrap().uuid, uuid);

        let other = TempDir::new().unwrap();
        let mut out = Vec::new();
        import(&mut out, &file_config(&other), &exported).await.unwrap();
        assert_eq!(output(out).trim(), uuid.to_string());
    }

    #[tokio::test]
    async fn test_show_without_network() {
        let dir = TempDir::new().unwrap();
        assert!(network_show(&mut Vec::new(), &file_config(&dir)).await.is_err());
    }
}
