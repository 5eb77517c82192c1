//! A provisioner configures a node, then exchanges a network PDU with it
//! over a proxy connection and survives a restart.

use bytes::Bytes;
use mesh_bearer::{ChannelBearer, ProxyConnection};
use mesh_foundation::{ConfigMessage, ConfigStatus, ConfigurationMessageHandler};
use mesh_model::{MeshNetwork, NetworkHandle};
use mesh_storage::{Storage, StorageMode};
use mesh_wire::{NetworkPdu, PduType};
use tempfile::TempDir;
use uuid::Uuid;

fn file_mode(dir: &TempDir) -> StorageMode {
    StorageMode::File {
        data_dir: dir.path().to_path_buf(),
        fsync_every: 1,
    }
}

#[tokio::test]
async fn test_configure_send_and_restart() {
    let dir = TempDir::new().unwrap();
    let storage = Storage::from_mode(file_mode(&dir)).await.unwrap();

    let mut network = MeshNetwork::create("Home", "Phone").unwrap();
    network
        .add_application_key(0, &[0x63; 16], 0, "Lights")
        .unwrap();
    let network_uuid = network.uuid;
    let handle = NetworkHandle::create(network, storage).await.unwrap();

    let lamp_uuid = Uuid::new_v4();
    let lamp = handle
        .provision_node(lamp_uuid, "Lamp", [0x42; 16], 2, 0, None)
        .await
        .unwrap();
    assert_eq!(lamp, 0x0002);

    // Configuration: the lamp confirms the application key
    let client = ConfigurationMessageHandler::new(handle.clone());
    client
        .request(
            lamp,
            ConfigMessage::AppKeyAdd {
                net_index: 0,
                app_index: 0,
                key: [0x63; 16],
            },
        )
        .await
        .unwrap();
    let status = ConfigMessage::AppKeyStatus {
        status: ConfigStatus::Success,
        net_index: 0,
        app_index: 0,
    };
    client.handle(lamp, &status.encode()).await.unwrap();

    // Secure a PDU from the local node to the lamp
    let (keys, iv_index) = handle
        .query(|n| {
            (
                *n.network_key(0).unwrap().transmit_derivatives(),
                n.iv_index().transmit_index(),
            )
        })
        .await
        .unwrap();
    let seq = handle.next_sequence_number(0x0001).await.unwrap();
    let pdu = NetworkPdu {
        iv_index,
        nid: keys.nid,
        ctl: false,
        ttl: 4,
        seq,
        src: 0x0001,
        dst: lamp,
        transport_pdu: Bytes::from_static(&[0x66, 0xCA, 0x6C, 0xD8, 0x8E]),
    };
    let encoded = pdu.encode(&keys).unwrap();

    // Carry it over a proxy connection with the minimum GATT MTU
    let (phone, proxy) = ChannelBearer::pair(20);
    let mut phone = ProxyConnection::new(phone);
    let mut proxy = ProxyConnection::new(proxy);
    phone.open().await.unwrap();
    proxy.open().await.unwrap();
    phone.send(PduType::NetworkPdu, &encoded).await.unwrap();

    let received = proxy.receive().await.unwrap().unwrap();
    assert_eq!(received.pdu_type, PduType::NetworkPdu);
    let decoded = NetworkPdu::decode(&received.data, [&keys], iv_index).unwrap();
    assert_eq!(decoded, pdu);

    let guard = handle.replay_guard();
    assert!(guard
        .check_and_record(decoded.src, decoded.iv_index, decoded.seq)
        .await
        .unwrap());
    assert!(!guard
        .check_and_record(decoded.src, decoded.iv_index, decoded.seq)
        .await
        .unwrap());
    handle.shutdown();

    // Restart from disk
    let storage = Storage::from_mode(file_mode(&dir)).await.unwrap();
    let restored = NetworkHandle::load(storage).await.unwrap().unwrap();
    assert_eq!(restored.uuid(), network_uuid);

    let knows_app_key = restored
        .query(move |n| n.node(lamp_uuid).unwrap().knows_app_key(0))
        .await
        .unwrap();
    assert!(knows_app_key);

    let next = restored.next_sequence_number(0x0001).await.unwrap();
    assert!(next > seq);
    assert!(!restored
        .replay_guard()
        .check_and_record(decoded.src, decoded.iv_index, decoded.seq)
        .await
        .unwrap());
}
