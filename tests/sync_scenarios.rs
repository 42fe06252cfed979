//! End-to-end scenarios through `Server::on_packet`, the real worker queues
//! and an in-memory transport.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use world_sync::colshape::ColShapeGeometry;
use world_sync::config::Config;
use world_sync::net::{EndpointId, MemoryTransport};
use world_sync::packets::{
    KeySyncPacket, Packet, PacketId, PlayerPureSyncPacket, ReturnSyncPacket, TrailerSync,
    VehiclePureSyncPacket,
};
use world_sync::server::Server;
use world_sync::world::{
    Element, ElementId, ElementKind, QuitReason, Vector3, VehicleState, WorldEvent,
};

fn start() -> (Server, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let config = Config {
        sync_sleep_interval_ms: 1,
        ..Config::default()
    };
    (Server::new(&config, transport.clone()), transport)
}

async fn eventually(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn send<P: Packet>(server: &Server, endpoint: u64, packet: &P) {
    server.on_packet(EndpointId(endpoint), P::ID as u8, packet.write(), Some(30));
}

/// Connect `endpoint` with a harmless key sync and return its player id
fn join(server: &Server, endpoint: u64) -> ElementId {
    send(server, endpoint, &KeySyncPacket::default());
    let client = server.clients().get(EndpointId(endpoint)).expect("client created");
    client.player()
}

fn vehicle(server: &Server, model: u16) -> ElementId {
    server
        .repository()
        .insert(Element::new(ElementKind::Vehicle(VehicleState::new(model))))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pure_sync_is_echoed_relayed_and_committed() {
    let (server, transport) = start();
    let a = join(&server, 1);
    join(&server, 2);
    join(&server, 3);

    send(
        &server,
        1,
        &PlayerPureSyncPacket {
            position: Vector3::new(1.0, 2.0, 3.0),
            ..Default::default()
        },
    );
    eventually(|| transport.sent_to(EndpointId(2), PacketId::PlayerPureSync).len() == 1).await;

    let echoes = transport.sent_to(EndpointId(1), PacketId::ReturnSync);
    assert_eq!(echoes.len(), 1);
    assert_eq!(echoes[0].destinations, vec![EndpointId(1)]);
    let echo: ReturnSyncPacket = echoes[0].decode().unwrap();
    assert_eq!(echo.position, Vector3::new(1.0, 2.0, 3.0));

    let relays = transport.sent_to(EndpointId(3), PacketId::PlayerPureSync);
    assert!(!relays[0].destinations.contains(&EndpointId(1)));
    let relay: PlayerPureSyncPacket = relays[0].decode().unwrap();
    assert_eq!(relay.player, a);
    assert_eq!(relay.position, Vector3::new(1.0, 2.0, 3.0));

    assert_eq!(
        server.repository().with_element(a, |e| e.position),
        Some(Vector3::new(1.0, 2.0, 3.0))
    );
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tow_chain_is_built_then_released() {
    let (server, _transport) = start();
    let driver = join(&server, 1);
    let truck = vehicle(&server, 403);
    let t1 = vehicle(&server, 435);
    let t2 = vehicle(&server, 450);
    server.repository().set_vehicle_driver(truck, Some(driver)).unwrap();
    let repository = server.repository().clone();

    let link = |trailer| TrailerSync {
        trailer,
        position: Vector3::ZERO,
        rotation: Vector3::ZERO,
    };
    send(
        &server,
        1,
        &VehiclePureSyncPacket {
            vehicle: truck,
            trailers: vec![link(t1), link(t2)],
            ..Default::default()
        },
    );
    eventually(|| repository.towing_vehicle(t2).unwrap() == Some(t1)).await;
    assert_eq!(repository.towing_vehicle(t1).unwrap(), Some(truck));

    send(
        &server,
        1,
        &VehiclePureSyncPacket {
            vehicle: truck,
            ..Default::default()
        },
    );
    eventually(|| repository.towing_vehicle(t1).unwrap().is_none()).await;
    assert_eq!(repository.towed_vehicle(truck).unwrap(), None);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_driver_packets_reach_others_but_not_the_vehicle() {
    let (server, transport) = start();
    let driver = join(&server, 1);
    let rider = join(&server, 2);
    join(&server, 3);
    let car = vehicle(&server, 411);
    server.repository().set_vehicle_driver(car, Some(driver)).unwrap();
    server.repository().seat_passenger(car, rider).unwrap();

    send(
        &server,
        2,
        &VehiclePureSyncPacket {
            vehicle: car,
            position: Vector3::new(50.0, 0.0, 0.0),
            ..Default::default()
        },
    );
    eventually(|| transport.sent_to(EndpointId(3), PacketId::VehiclePureSync).len() == 1).await;

    let relay: VehiclePureSyncPacket = transport.sent_to(EndpointId(1), PacketId::VehiclePureSync)[0]
        .decode()
        .unwrap();
    assert_eq!(relay.player, rider);
    assert_eq!(relay.position, Vector3::new(50.0, 0.0, 0.0));
    assert_eq!(server.repository().with_element(car, |e| e.position), Some(Vector3::ZERO));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sphere_membership_follows_movement() {
    let (server, _transport) = start();
    let player = join(&server, 1);
    let mut events = server.events().subscribe();
    let sphere = server
        .colshapes()
        .create_shape(ColShapeGeometry::Sphere { radius: 3.0 }, Vector3::ZERO)
        .unwrap();

    for (position, inside) in [
        (Vector3::new(1.0, 1.0, 1.0), true),
        (Vector3::new(3.0, 3.0, 3.0), false),
    ] {
        send(
            &server,
            1,
            &PlayerPureSyncPacket {
                position,
                ..Default::default()
            },
        );
        let repository = server.repository().clone();
        eventually(|| repository.with_element(player, |e| e.position) == Some(position)).await;
        server.colshapes().run_pass();
        assert_eq!(server.colshapes().is_element_within(sphere, player), inside);
    }

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        transitions.push(event);
    }
    assert_eq!(
        transitions,
        vec![
            WorldEvent::ColShapeEntered {
                shape: sphere,
                element: player,
            },
            WorldEvent::ColShapeLeft {
                shape: sphere,
                element: player,
            },
        ]
    );
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_while_driving_frees_the_vehicle() {
    let (server, transport) = start();
    let mut events = server.events().subscribe();
    let driver = join(&server, 1);
    let car = vehicle(&server, 411);
    server.repository().set_vehicle_driver(car, Some(driver)).unwrap();

    server.on_packet(EndpointId(1), PacketId::PlayerTimeout as u8, Bytes::new(), None);
    server.on_packet(EndpointId(1), PacketId::PlayerQuit as u8, Bytes::new(), None);

    assert!(!server.repository().contains(driver));
    assert_eq!(
        server.repository().with_element(car, |e| e.vehicle().unwrap().driver()),
        Some(None)
    );
    assert_eq!(transport.disconnected(), vec![EndpointId(1)]);

    let mut disconnects = 0;
    while let Ok(event) = events.try_recv() {
        if let WorldEvent::ClientDisconnected { reason, player, .. } = event {
            assert_eq!(reason, QuitReason::Timeout);
            assert_eq!(player, driver);
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 1);
    server.shutdown().await;
}
