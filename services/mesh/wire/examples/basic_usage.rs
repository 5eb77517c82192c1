//! Basic usage example for the mesh wire formats.

use bytes::Bytes;
use mesh_crypto::{calculate_key_derivatives, Credentials};
use mesh_wire::{BeaconFlags, MeshBeacon, NetworkPdu, PduType, ProxyProtocolHandler, SecureNetworkBeacon};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Mesh Wire Example ===\n");

    let net_key = [
        0x7d, 0xd7, 0x36, 0x4c, 0xd8, 0x42, 0xad, 0x18, 0xc1, 0x7c, 0x2b, 0x82, 0x0c, 0x84, 0xc3,
        0xd6,
    ];
    let keys = calculate_key_derivatives(&net_key, Credentials::ManagedFlooding);
    println!("1. Network key derivatives: NID 0x{:02x}", keys.nid);

    // 2. Secure a control message
    let pdu = NetworkPdu {
        iv_index: 0x12345678,
        nid: keys.nid,
        ctl: true,
        ttl: 0,
        seq: 1,
        src: 0x1201,
        dst: 0xfffd,
        transport_pdu: Bytes::from_static(&[
            0x03, 0x4b, 0x50, 0x05, 0x7e, 0x40, 0x00, 0x00, 0x01, 0x00, 0x00,
        ]),
    };
    let encoded = pdu.encode(&keys)?;
    println!("\n2. Network PDU: {} bytes", encoded.len());

    // 3. Send it through a proxy connection with a small MTU
    let segments = ProxyProtocolHandler::segment(&encoded, PduType::NetworkPdu, 20)?;
    println!("\n3. Segmented into {} proxy PDUs", segments.len());

    let mut handler = ProxyProtocolHandler::new();
    for segment in &segments {
        if let Some(message) = handler.reassemble(segment) {
            let decoded = NetworkPdu::decode(&message.data, [&keys], 0x12345678);
            println!("   Reassembled {:?}, decodes: {}", message.pdu_type, decoded.is_some());
        }
    }

    // 4. Beacons
    let beacon = SecureNetworkBeacon::new(
        BeaconFlags::empty(),
        keys.network_id,
        0x12345678,
        &keys.beacon_key,
    );
    if let MeshBeacon::SecureNetwork(parsed) = MeshBeacon::parse(&beacon.to_bytes())? {
        println!("\n4. Secure Network beacon authenticated: {}", parsed.verify(&keys.beacon_key));
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
