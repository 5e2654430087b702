//! End-to-end tests for the per-room TCP control channel and UDP input
//! relay, driven through a real lobby session.

mod common;

use std::time::Duration;

use common::*;
use mpn_proto::constants::{SPECTATOR_REG_ID, STATUS_DESYNC};
use mpn_proto::control::decode_registration_table;
use mpn_proto::relay::{
    encode_cp0_info, encode_key_info_client, encode_player_input_request, KeyInfoServer,
    KEY_INFO_SERVER, KEY_INFO_SERVER_GRATUITOUS,
};

/// Small pause so the server's UDP loop drains a datagram before the test
/// sends the packet that depends on it.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn input_relay_round_trip() {
    let addr = spawn_server(46210, 10, false).await;
    let (_host, _guest, port) = start_two_player_game(addr).await;

    let (mut control_a, seat_a) = ControlClient::connect(port).await;
    assert_eq!(seat_a, 0);
    let (mut control_b, seat_b) = ControlClient::connect(port).await;
    assert_eq!(seat_b, 1);
    control_a.send_registration(42, 2, 0).await;
    control_b.send_registration(43, 2, 0).await;
    settle().await;

    let relay_a = RelayClient::connect(port).await;
    let relay_b = RelayClient::connect(port).await;

    // Player A reports frame 100.
    relay_a
        .send(&encode_key_info_client(0, 100, 0xAABBCCDD, 0x02))
        .await;
    settle().await;

    // Player B polls slot 0 at frame 100 with its own registration ID.
    relay_b
        .send(&encode_player_input_request(0, 43, 100, false))
        .await;
    let reply = KeyInfoServer::decode(&relay_b.recv().await).unwrap();
    assert!(!reply.gratuitous);
    assert_eq!(reply.slot, 0);
    assert_eq!(reply.entries[0].count, 100);
    assert_eq!(reply.entries[0].keys, 0xAABBCCDD);
    assert_eq!(reply.entries[0].plugin, 0x02);

    // B's address is now known: A's next report is pushed to B unasked.
    relay_a
        .send(&encode_key_info_client(0, 101, 0x11223344, 0x02))
        .await;
    let pushed = relay_b.recv().await;
    assert_eq!(pushed[0], KEY_INFO_SERVER_GRATUITOUS);
    let pushed = KeyInfoServer::decode(&pushed).unwrap();
    assert_eq!(pushed.slot, 0);
    assert_eq!(pushed.entries[0].count, 101);
    assert_eq!(pushed.entries[0].keys, 0x11223344);
}

#[tokio::test]
async fn spectator_poll_of_unknown_counter_yields_nothing() {
    let addr = spawn_server(46220, 10, false).await;
    let (_host, _guest, port) = start_two_player_game(addr).await;

    let (mut control_a, _) = ControlClient::connect(port).await;
    control_a.send_registration(42, 2, 0).await;
    settle().await;

    let relay = RelayClient::connect(port).await;
    relay
        .send(&encode_key_info_client(0, 100, 0xAABBCCDD, 0x02))
        .await;
    settle().await;

    // Nothing recorded at 999 and spectators never get synthesis.
    relay
        .send(&encode_player_input_request(0, SPECTATOR_REG_ID, 999, true))
        .await;
    assert!(relay.recv_nothing(Duration::from_millis(300)).await);

    // The recorded frame is served verbatim.
    relay
        .send(&encode_player_input_request(0, SPECTATOR_REG_ID, 100, true))
        .await;
    let reply = KeyInfoServer::decode(&relay.recv().await).unwrap();
    assert_eq!(reply.entries[0].count, 100);
    assert_eq!(reply.entries[0].keys, 0xAABBCCDD);
}

#[tokio::test]
async fn unregistered_slots_and_garbage_are_dropped() {
    let addr = spawn_server(46230, 10, false).await;
    let (_host, _guest, port) = start_two_player_game(addr).await;

    let relay = RelayClient::connect(port).await;

    // Slot 2 never registered over TCP.
    relay
        .send(&encode_player_input_request(2, SPECTATOR_REG_ID, 0, true))
        .await;
    assert!(relay.recv_nothing(Duration::from_millis(300)).await);

    // Out-of-range slot and truncated frames die in the codec.
    relay.send(&encode_key_info_client(7, 0, 0, 0)).await;
    relay.send(&[0, 0]).await;
    assert!(relay.recv_nothing(Duration::from_millis(300)).await);
}

#[tokio::test]
async fn registration_table_and_settings_exchange() {
    let addr = spawn_server(46240, 10, false).await;
    let (_host, _guest, port) = start_two_player_game(addr).await;

    let (mut control_a, _) = ControlClient::connect(port).await;
    let (mut control_b, _) = ControlClient::connect(port).await;
    control_a.send_registration(42, 2, 1).await;
    control_b.send_registration(43, 4, 0).await;
    settle().await;

    let table = decode_registration_table(&control_b.request_registrations().await).unwrap();
    let reg_a = table[0].unwrap();
    assert_eq!((reg_a.reg_id, reg_a.plugin, reg_a.raw), (42, 2, 1));
    let reg_b = table[1].unwrap();
    assert_eq!((reg_b.reg_id, reg_b.plugin, reg_b.raw), (43, 4, 0));
    assert!(table[2].is_none());
    assert!(table[3].is_none());

    // First settings upload wins; later uploads are ignored.
    control_a.upload_settings(b"rom-settings-a").await;
    settle().await;
    control_b.upload_settings(b"rom-settings-b").await;
    settle().await;
    assert_eq!(control_b.request_settings().await, b"rom-settings-a");

    // File store round trip; missing files come back empty.
    control_a.upload_file("save.st", b"\x00\x01\x02").await;
    settle().await;
    assert_eq!(control_b.request_file("save.st").await, b"\x00\x01\x02");
    assert!(control_b.request_file("missing.st").await.is_empty());
}

#[tokio::test]
async fn desync_sets_sticky_status_and_relay_continues() {
    let addr = spawn_server(46250, 10, false).await;
    let (_host, _guest, port) = start_two_player_game(addr).await;

    let (mut control_a, _) = ControlClient::connect(port).await;
    let (mut control_b, _) = ControlClient::connect(port).await;
    control_a.send_registration(42, 2, 0).await;
    control_b.send_registration(43, 2, 0).await;
    settle().await;

    let relay_a = RelayClient::connect(port).await;
    let relay_b = RelayClient::connect(port).await;

    // Same frame, different sync blobs: desync.
    relay_a.send(&encode_cp0_info(0, 500, &[1, 2, 3, 4])).await;
    settle().await;
    relay_b.send(&encode_cp0_info(1, 500, &[9, 9, 9, 9])).await;
    settle().await;

    // The relay keeps working and every reply now carries the flag.
    relay_a
        .send(&encode_key_info_client(0, 10, 0xCAFEF00D, 1))
        .await;
    settle().await;
    relay_b
        .send(&encode_player_input_request(0, 43, 10, false))
        .await;
    let reply = relay_b.recv().await;
    assert_eq!(reply[0], KEY_INFO_SERVER);
    let reply = KeyInfoServer::decode(&reply).unwrap();
    assert_eq!(reply.status & STATUS_DESYNC, STATUS_DESYNC);
    assert_eq!(reply.entries[0].keys, 0xCAFEF00D);
}

#[tokio::test]
async fn player_poll_synthesises_future_frames() {
    let addr = spawn_server(46260, 10, false).await;
    let (_host, _guest, port) = start_two_player_game(addr).await;

    let (mut control_a, _) = ControlClient::connect(port).await;
    let (mut control_b, _) = ControlClient::connect(port).await;
    control_a.send_registration(42, 2, 0).await;
    control_b.send_registration(43, 2, 0).await;
    settle().await;

    let relay_b = RelayClient::connect(port).await;
    let relay_a = RelayClient::connect(port).await;
    relay_a.send(&encode_key_info_client(0, 50, 0x0000BEEF, 3)).await;
    settle().await;

    // Frames 51..54 do not exist yet; a player poll gets the last known
    // input carried forward for all four frames.
    relay_b
        .send(&encode_player_input_request(0, 43, 51, false))
        .await;
    let reply = KeyInfoServer::decode(&relay_b.recv().await).unwrap();
    assert_eq!(reply.entries.len(), 4);
    assert_eq!(reply.entries[0].count, 51);
    assert!(reply.entries.iter().all(|e| e.keys == 0x0000BEEF && e.plugin == 3));
}
