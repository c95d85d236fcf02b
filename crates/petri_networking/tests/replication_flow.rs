//! # Replication Flow Integration Test
//!
//! Proves the full protocol stack holds together: a client joins over
//! real loopback sockets, drives its cell, and ends up agreeing with
//! the server about where that cell is.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use petri_networking::protocol::InputMessage;
use petri_networking::server::TickPacer;
use petri_networking::simulation::{BotSwarm, LinkConditions};
use petri_networking::{
    Channel, ClientState, Message, OutgoingPacket, PetriClient, PetriServer, ServerConfig,
    TransportEvent, UdpEndpoint, MAX_PACKET_SIZE,
};
use petri_shared::constants::{DISH_MAX, DISH_MIN, TICK_RATE};
use petri_shared::{EntityId, EntityKind};

/// Encodes a message and hands it to the server as a transport event.
fn deliver(events: &Sender<TransportEvent>, addr: SocketAddr, message: &Message) {
    let mut data = [0u8; MAX_PACKET_SIZE];
    let len = message.encode(&mut data).unwrap();
    events
        .send(TransportEvent::Message {
            addr,
            channel: message.channel(),
            data,
            len,
        })
        .unwrap();
}

/// Drains everything the server queued and decodes it per destination.
fn drain_outgoing(outgoing: &Receiver<OutgoingPacket>) -> Vec<(SocketAddr, Message)> {
    let mut decoded = Vec::new();
    while let Ok(packet) = outgoing.try_recv() {
        decoded.push((packet.addr, Message::decode(&packet.data[..packet.len]).unwrap()));
    }
    decoded
}

fn sock(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Test: a complete session over loopback UDP.
///
/// Join, receive the dish, hold full throttle for half a second, then
/// coast to a stop. Once every input has been consumed the server and
/// the predicted client must describe the same cell.
#[test]
fn test_session_over_loopback_sockets() {
    let mut server_endpoint = UdpEndpoint::bind("127.0.0.1:0").unwrap();
    let server_addr = server_endpoint.local_addr().unwrap();

    let config = ServerConfig {
        ai_count: 3,
        max_clients: 4,
        seed: 7,
        ..ServerConfig::default()
    };
    let (mut server, server_events, server_outgoing) = PetriServer::new(config);
    let mut pacer = TickPacer::new(TICK_RATE);

    let mut client_endpoint = UdpEndpoint::bind("127.0.0.1:0").unwrap();
    let (client_events_tx, client_events_rx) = bounded::<TransportEvent>(10_000);
    let (client_out_tx, client_out_rx) = bounded::<OutgoingPacket>(10_000);
    let mut client = PetriClient::new();

    let start = Instant::now();
    let mut last_frame = Instant::now();
    let mut outbox = vec![client.begin_join()];
    let mut joined_at: Option<Instant> = None;
    let mut spawn_position = None;

    loop {
        if start.elapsed() > Duration::from_secs(6) {
            break;
        }

        // Client frame: predict, send, receive.
        let frame_dt = last_frame.elapsed().as_secs_f32();
        last_frame = Instant::now();

        let (throttle, steer) = match joined_at {
            None => (0.0, 0.0),
            Some(at) if at.elapsed() < Duration::from_millis(500) => (1.0, 0.0),
            Some(_) => (0.0, 0.0),
        };
        client.advance(frame_dt, throttle, steer, &mut outbox);

        for message in outbox.drain(..) {
            let mut data = [0u8; MAX_PACKET_SIZE];
            let len = message.encode(&mut data).unwrap();
            client_out_tx
                .send(OutgoingPacket {
                    addr: server_addr,
                    channel: message.channel(),
                    data,
                    len,
                })
                .unwrap();
        }
        client_endpoint.flush(&client_out_rx);
        client_endpoint.pump(&client_events_tx);

        let now_ms = start.elapsed().as_millis() as u64;
        while let Ok(event) = client_events_rx.try_recv() {
            if let TransportEvent::Message { data, len, .. } = event {
                let message = Message::decode(&data[..len]).unwrap();
                client.handle_message(&message, now_ms);
            }
        }

        if joined_at.is_none() && client.state() == ClientState::Active {
            joined_at = Some(Instant::now());
            spawn_position = client.entity(client.controlled()).map(|cell| cell.position);
        }

        // Server ticks on its own clock.
        for _ in 0..pacer.due_ticks() {
            let tick_start = Instant::now();
            server_endpoint.pump(&server_events);
            server.tick();
            server_endpoint.flush(&server_outgoing);
            pacer.record(tick_start.elapsed());
        }

        // Half a second of driving, then enough settle time for the
        // in-flight inputs to land and the cell to brake to rest.
        if let Some(at) = joined_at {
            if at.elapsed() > Duration::from_millis(2500) {
                break;
            }
        }

        thread::sleep(Duration::from_millis(2));
    }

    // Grace period: the server stops ticking, so the world is frozen
    // while any in-flight snapshots and corrective unicasts land.
    for _ in 0..150 {
        client_endpoint.pump(&client_events_tx);
        let now_ms = start.elapsed().as_millis() as u64;
        while let Ok(event) = client_events_rx.try_recv() {
            if let TransportEvent::Message { data, len, .. } = event {
                let message = Message::decode(&data[..len]).unwrap();
                client.handle_message(&message, now_ms);
            }
        }
        thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(client.state(), ClientState::Active, "join never completed");
    assert_eq!(client.entities().len(), 4, "dish not fully replicated");
    assert_eq!(server.active_connections(), 1);

    let id = client.controlled();
    let server_cell = *server.world().entity(id).unwrap();
    let client_cell = *client.entity(id).unwrap();

    let spawn = spawn_position.unwrap();
    assert!(
        server_cell.position.distance(spawn) > 0.2,
        "cell never moved from spawn"
    );
    assert!(
        server_cell.speed.abs() < 1e-3,
        "cell still moving after settle: {}",
        server_cell.speed
    );
    // Exactly equal without a collision; within one quantizer step if
    // an absorption forced the client onto a decoded pose.
    assert!(
        server_cell.position.distance(client_cell.position) < 0.05,
        "prediction diverged: server {:?} vs client {:?}",
        server_cell.position,
        client_cell.position
    );

    let now_ms = start.elapsed().as_millis() as u64;
    for cell in client.render_entities(now_ms) {
        assert!(cell.position.x >= DISH_MIN.x - 1.0 && cell.position.x <= DISH_MAX.x + 1.0);
        assert!(cell.position.y >= DISH_MIN.y - 1.0 && cell.position.y <= DISH_MAX.y + 1.0);
    }

    println!("Session settled in {:?}", start.elapsed());
    println!("Server stats: {:?}", server_endpoint.stats());
    println!("Corrections: {}", client.corrections());
}

/// Test: a bot swarm on a decent link stays in sync with the server.
///
/// 20ms latency and a little jitter, no loss. The only disagreement
/// left is the in-flight input window, which is far below a cell
/// diameter.
#[test]
fn test_swarm_stays_smooth_on_a_good_link() {
    let config = ServerConfig {
        max_clients: 8,
        ai_count: 6,
        seed: 11,
        ..ServerConfig::default()
    };
    let mut swarm = BotSwarm::new(config, 6, LinkConditions::GOOD, 11);

    swarm.run(30 * u64::from(TICK_RATE));

    for index in 0..swarm.bot_count() {
        assert_eq!(
            swarm.bot(index).state(),
            ClientState::Active,
            "bot {index} never joined"
        );
        assert_eq!(swarm.bot(index).entities().len(), 12);
    }

    // Absorption teleports losing cells, so the odd sample spikes
    // until the corrective unicast lands a link-latency later. The
    // mean is what smoothness is about.
    let stats = *swarm.stats();
    assert!(
        stats.avg_position_error() < 1.0,
        "movement too jerky: avg error {}",
        stats.avg_position_error()
    );
    assert_eq!(stats.messages_dropped, 0);

    println!("Swarm ran {} steps", stats.ticks);
    println!("Avg error: {:.4}", stats.avg_position_error());
    println!("Max error: {:.4}", stats.max_position_error);
    println!("Corrections: {}", swarm.corrections_total());
}

/// Test: garbage on the wire never takes the server down.
#[test]
fn test_server_ignores_garbage_datagrams() {
    let config = ServerConfig {
        ai_count: 1,
        seed: 3,
        ..ServerConfig::default()
    };
    let (mut server, events, outgoing) = PetriServer::new(config);
    let addr = sock(50_200);

    events.send(TransportEvent::Connected { addr }).unwrap();

    // Unknown tag.
    let mut data = [0u8; MAX_PACKET_SIZE];
    data[0] = 0xFF;
    events
        .send(TransportEvent::Message {
            addr,
            channel: Channel::Unreliable,
            data,
            len: 32,
        })
        .unwrap();

    // Empty payload.
    events
        .send(TransportEvent::Message {
            addr,
            channel: Channel::Unreliable,
            data: [0u8; MAX_PACKET_SIZE],
            len: 0,
        })
        .unwrap();

    // Valid input, truncated mid-field.
    let input = Message::Input(InputMessage {
        entity_id: EntityId(0),
        input_id: 1,
        reference_id: 0,
        controls: Some((1.0, 0.0)),
    });
    let mut truncated = [0u8; MAX_PACKET_SIZE];
    let full_len = input.encode(&mut truncated).unwrap();
    events
        .send(TransportEvent::Message {
            addr,
            channel: Channel::Unreliable,
            data: truncated,
            len: full_len - 2,
        })
        .unwrap();

    server.tick();
    let _ = drain_outgoing(&outgoing);

    // The same peer can still join normally afterwards.
    let mut client = PetriClient::new();
    deliver(&events, addr, &client.begin_join());
    server.tick();

    for (dest, message) in drain_outgoing(&outgoing) {
        assert_eq!(dest, addr);
        client.handle_message(&message, 0);
    }

    assert_eq!(client.state(), ClientState::Active);
    assert_eq!(client.entities().len(), 2);
}

/// Test: a late joiner receives the whole existing world.
#[test]
fn test_late_joiner_sees_existing_world() {
    let config = ServerConfig {
        ai_count: 4,
        seed: 9,
        ..ServerConfig::default()
    };
    let (mut server, events, outgoing) = PetriServer::new(config);

    let alpha_addr = sock(50_100);
    let beta_addr = sock(50_101);

    let mut alpha = PetriClient::new();
    events.send(TransportEvent::Connected { addr: alpha_addr }).unwrap();
    deliver(&events, alpha_addr, &alpha.begin_join());
    server.tick();

    for (dest, message) in drain_outgoing(&outgoing) {
        if dest == alpha_addr {
            alpha.handle_message(&message, 0);
        }
    }
    assert_eq!(alpha.state(), ClientState::Active);
    assert_eq!(alpha.entities().len(), 5);

    // Let the dish move on before the second player shows up.
    for _ in 0..10 {
        server.tick();
    }
    let _ = drain_outgoing(&outgoing);

    let mut beta = PetriClient::new();
    events.send(TransportEvent::Connected { addr: beta_addr }).unwrap();
    deliver(&events, beta_addr, &beta.begin_join());
    server.tick();

    for (dest, message) in drain_outgoing(&outgoing) {
        if dest == alpha_addr {
            alpha.handle_message(&message, 0);
        } else {
            beta.handle_message(&message, 0);
        }
    }

    assert_eq!(beta.state(), ClientState::Active);
    assert_eq!(beta.entities().len(), 6, "late joiner missed part of the world");

    let alpha_cell = beta.entity(alpha.controlled()).unwrap();
    assert_eq!(alpha_cell.kind, EntityKind::Player);

    // The first player learns about the newcomer too.
    assert_eq!(alpha.entities().len(), 6);
    assert_eq!(alpha.entity(beta.controlled()).unwrap().kind, EntityKind::Player);
}
