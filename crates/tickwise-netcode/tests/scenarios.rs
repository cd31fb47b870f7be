//! End-to-end behaviour of prediction, reconciliation and authority

use serde::{Deserialize, Serialize};
use test_log::test;
use tickwise_core::{
    Approx, AuthorityRole, ChangePolicy, Channel, EntityId, EntityKind, NetConfig, PeerId,
    StepFlags, Tick, TickHistory, TickRate,
};
use tickwise_netcode::transport::{InputMessage, Packet, PacketKind, SnapshotMessage};
use tickwise_netcode::{
    owned_by, AuthoritativeSim, AuthorityResolver, CorrectionKind, DirtyTracker, Error, Lerp,
    LoopbackNetwork, LoopbackTransport, NetEntity, Ownership, Predictor, Session, Transport,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct MoveData {
    horizontal: f32,
    vertical: f32,
}

const RIGHT: MoveData = MoveData {
    horizontal: 1.0,
    vertical: 0.0,
};

const UP: MoveData = MoveData {
    horizontal: 0.0,
    vertical: 1.0,
};

/// A point mass that sprints while it has stamina
#[derive(Debug, Clone, Default)]
struct Motor {
    pos: [f32; 2],
    vel: [f32; 2],
    stamina: f32,
    /// Footstep sounds played; cosmetic, never replicated
    footsteps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct MotorState {
    pos: [f32; 2],
    vel: [f32; 2],
    stamina: f32,
}

impl Approx for MotorState {
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.pos.approx_eq(&other.pos, epsilon)
            && self.vel.approx_eq(&other.vel, epsilon)
            && self.stamina.approx_eq(&other.stamina, epsilon)
    }
}

impl Lerp for MotorState {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        MotorState {
            pos: self.pos.lerp(&to.pos, t),
            vel: to.vel,
            stamina: to.stamina,
        }
    }
}

const SPEED: f32 = 5.0;

fn step(motor: &mut Motor, input: &MoveData, flags: StepFlags) {
    let moving = input.horizontal != 0.0 || input.vertical != 0.0;
    let boost = if moving && motor.stamina >= 1.0 {
        motor.stamina -= 1.0;
        2.0
    } else {
        1.0
    };
    motor.vel = [
        input.horizontal * SPEED * boost,
        input.vertical * SPEED * boost,
    ];
    if !moving {
        motor.stamina = (motor.stamina + 0.5).min(10.0);
    }
    if moving && !flags.replaying {
        motor.footsteps += 1;
    }
}

fn integrate(motor: &mut Motor, dt: f32) {
    motor.pos[0] += motor.vel[0] * dt;
    motor.pos[1] += motor.vel[1] * dt;
}

fn reconcile(motor: &mut Motor, state: &MotorState) {
    motor.pos = state.pos;
    motor.vel = state.vel;
    motor.stamina = state.stamina;
}

fn capture(motor: &Motor) -> MotorState {
    MotorState {
        pos: motor.pos,
        vel: motor.vel,
        stamina: motor.stamina,
    }
}

fn motor_kind() -> EntityKind<Motor, MoveData, MotorState> {
    EntityKind::new("motor", step, reconcile, capture).with_integrate(integrate)
}

fn fresh_motor() -> Motor {
    Motor {
        stamina: 3.0,
        ..Motor::default()
    }
}

/// Small deterministic generator for randomized checks
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    fn input(&mut self) -> MoveData {
        match self.below(4) {
            0 => MoveData::default(),
            1 => RIGHT,
            2 => UP,
            _ => MoveData {
                horizontal: -1.0,
                vertical: 1.0,
            },
        }
    }
}

fn scenario_config() -> NetConfig {
    NetConfig::from_ron_str(
        "(tick_rate_hz: 30, retention_horizon: 10, input_redundancy: 1, \
         snapshot: (interval_ticks: 1, redundancy: 1))",
    )
    .unwrap()
}

#[test]
fn lost_input_is_corrected_by_replay() {
    let config = scenario_config();
    let kind = motor_kind();
    let dt = TickRate::new(30).unwrap().delta_seconds();

    let mut client = Predictor::new(kind, &config);
    let mut server = AuthoritativeSim::new(kind, &config);
    let mut client_body = fresh_motor();
    let mut server_body = fresh_motor();

    let mut latest = None;
    for tick in 100..=104 {
        let window = client.predict(&mut client_body, tick, RIGHT);
        assert_eq!(window, vec![(tick, RIGHT)]);
        // The input of tick 102 never reaches the server
        if tick != 102 {
            server.receive_inputs(window);
        }
        server.simulate(&mut server_body, tick);
        if let Some(out) = server.post_tick(&server_body, tick) {
            latest = Some(out.message);
        }
    }

    let snapshot = latest.unwrap();
    assert_eq!(snapshot.tick, 104);
    assert_eq!(snapshot.exact_since, Some(103));
    assert_eq!(server.stats().defaulted_inputs, 1);

    for tick in 105..=107 {
        client.predict(&mut client_body, tick, RIGHT);
    }
    let predicted = capture(&client_body);

    client.receive_snapshot(snapshot);
    let correction = client.reconcile(&mut client_body).unwrap();
    assert_eq!(correction.kind, CorrectionKind::Replayed(3));
    assert_eq!(correction.before, predicted);

    // Where the server ends up once inputs 105..=107 arrive
    let mut expected = server_body.clone();
    for _ in 105..=107 {
        kind.simulate(&mut expected, &RIGHT, StepFlags::SERVER, dt);
    }
    assert_eq!(capture(&client_body), capture(&expected));
    assert_ne!(capture(&client_body), predicted);

    // Replay skipped cosmetic effects: 8 live moving ticks only
    assert_eq!(client_body.footsteps, 8);
    assert!(client.inputs().get(104).is_none());
    assert!(client.inputs().get(105).is_some());
    assert_eq!(client.stats().mispredictions, 1);
    assert_eq!(client.stats().nondeterminism, 0);
}

#[test]
fn snapshot_beyond_horizon_hard_resets() {
    let config = scenario_config();
    let mut client = Predictor::new(motor_kind(), &config);
    let mut body = fresh_motor();
    for tick in 1..=20 {
        client.predict(&mut body, tick, RIGHT);
    }

    let authoritative = MotorState {
        pos: [1.0, 1.0],
        vel: [0.0, 0.0],
        stamina: 0.0,
    };
    client.receive_snapshot(SnapshotMessage {
        tick: 5,
        exact_since: None,
        state: authoritative,
    });
    let correction = client.reconcile(&mut body).unwrap();

    assert_eq!(correction.kind, CorrectionKind::HardReset);
    assert_eq!(capture(&body), authoritative);
    assert_eq!(client.stats().hard_resets, 1);
}

#[test]
fn ownership_transfer_moves_input_authority() {
    const A: PeerId = PeerId(1);
    const B: PeerId = PeerId(2);
    let entity = EntityId(7);

    let mut resolver = AuthorityResolver::new(PeerId::SERVER);
    resolver.register(entity, Ownership::new(Some(A), 0)).unwrap();
    let mut server = AuthoritativeSim::new(motor_kind(), &scenario_config());

    assert!(resolver.check_input(entity, A, 49).is_ok());
    let change = resolver
        .transfer_ownership(PeerId::SERVER, entity, Some(B), 50)
        .unwrap();
    let ownership = change.ownership();

    // A's input at or after the transfer is rejected
    let from_a = server.receive_from(entity, &ownership, A, vec![(50, RIGHT), (51, RIGHT)]);
    assert!(matches!(from_a, Err(Error::AuthorityViolation { .. })));

    // B is honored from tick 50, not before
    let from_b = server.receive_from(entity, &ownership, B, vec![(49, UP), (50, UP)]);
    assert_eq!(from_b.unwrap(), 1);

    let mut body = fresh_motor();
    for tick in 48..=50 {
        server.simulate(&mut body, tick);
    }
    assert_eq!(body.vel, [0.0, 10.0]);

    assert_eq!(resolver.role(entity, A), AuthorityRole::Observing);
    assert_eq!(resolver.role(entity, B), AuthorityRole::Predicting);
}

struct World {
    network: LoopbackNetwork,
    server: Session<LoopbackTransport>,
    a: Session<LoopbackTransport>,
    b: Session<LoopbackTransport>,
}

const PEER_A: PeerId = PeerId(1);
const PEER_B: PeerId = PeerId(2);
const MOTOR: EntityId = EntityId(1);

impl World {
    fn new() -> Self {
        let network = LoopbackNetwork::new();
        let config = NetConfig::default();
        let mut server = Session::new(config.clone(), network.endpoint(PeerId::SERVER)).unwrap();
        let mut a = Session::new(config.clone(), network.endpoint(PEER_A)).unwrap();
        let mut b = Session::new(config.clone(), network.endpoint(PEER_B)).unwrap();
        server.connect_peer(PEER_A);
        server.connect_peer(PEER_B);

        for session in [&mut server, &mut a, &mut b] {
            let local = session.local_peer();
            let input = if local == PEER_A { RIGHT } else { UP };
            let motor = NetEntity::new(
                MOTOR,
                motor_kind(),
                fresh_motor(),
                local,
                owned_by(Some(PEER_A)),
                &config,
            )
            .with_input(move |_: Tick| Some(input));
            session.spawn(motor).unwrap();
        }

        Self { network, server, a, b }
    }

    fn round(&mut self) {
        self.a.step();
        self.b.step();
        self.server.step();
    }

    fn state(session: &Session<LoopbackTransport>) -> MotorState {
        session
            .entities()
            .get::<Motor, MoveData, MotorState>(MOTOR)
            .unwrap()
            .state()
    }
}

#[test]
fn ownership_transfer_between_clients() {
    let mut world = World::new();
    for _ in 0..10 {
        world.round();
    }
    assert_eq!(world.a.role(MOTOR), AuthorityRole::Predicting);
    assert_eq!(world.b.role(MOTOR), AuthorityRole::Observing);
    assert_eq!(World::state(&world.server).vel[1], 0.0);

    let change = world.server.transfer_ownership(MOTOR, Some(PEER_B)).unwrap();
    assert_eq!(change.previous, Some(PEER_A));
    assert_eq!(change.tick, 11);

    for _ in 0..5 {
        world.round();
    }
    assert_eq!(world.a.role(MOTOR), AuthorityRole::Observing);
    assert_eq!(world.b.role(MOTOR), AuthorityRole::Predicting);

    // The server now follows B's input, and B's prediction agrees
    let server_state = World::state(&world.server);
    assert_eq!(server_state.vel[0], 0.0);
    assert!(server_state.vel[1] > 0.0);
    assert_eq!(World::state(&world.b), server_state);

    // A forged input from A after the transfer is refused
    let rogue = world.network.endpoint(PEER_A);
    let forged = Packet::new(
        MOTOR,
        PacketKind::Input,
        &InputMessage {
            inputs: vec![(17, RIGHT)],
        },
    )
    .unwrap();
    rogue
        .send(&forged.to_bytes().unwrap(), PeerId::SERVER, Channel::Unreliable)
        .unwrap();
    world.server.step();
    let server_entity = world
        .server
        .entities()
        .get::<Motor, MoveData, MotorState>(MOTOR)
        .unwrap();
    assert_eq!(server_entity.rejected_inputs(), 1);
}

#[test]
fn lossy_network_stays_converged() {
    let network = LoopbackNetwork::new().with_loss(0.2, 7);
    let config = NetConfig::default();
    let mut server = Session::new(config.clone(), network.endpoint(PeerId::SERVER)).unwrap();
    let mut client = Session::new(config.clone(), network.endpoint(PEER_A)).unwrap();
    server.connect_peer(PEER_A);

    let mut rng = XorShift(99);
    let inputs: Vec<MoveData> = (0..200).map(|_| rng.input()).collect();

    server
        .spawn(NetEntity::new(
            MOTOR,
            motor_kind(),
            fresh_motor(),
            PeerId::SERVER,
            owned_by(Some(PEER_A)),
            &config,
        ))
        .unwrap();
    client
        .spawn(
            NetEntity::new(
                MOTOR,
                motor_kind(),
                fresh_motor(),
                PEER_A,
                owned_by(Some(PEER_A)),
                &config,
            )
            .with_input(move |tick: Tick| inputs.get(tick as usize).copied()),
        )
        .unwrap();

    for _ in 0..200 {
        client.step();
        server.step();
    }
    // Let the last snapshots arrive with no new input
    for _ in 0..40 {
        client.step();
        server.step();
    }

    let (_, dropped) = network.counts();
    assert!(dropped > 0);

    let client_entity = client
        .entities()
        .get::<Motor, MoveData, MotorState>(MOTOR)
        .unwrap();
    let server_state = World::state(&server);
    assert!(client_entity.state().approx_eq(&server_state, 1e-4));
    assert_eq!(client_entity.prediction_stats().nondeterminism, 0);
}

#[test]
fn delayed_lossy_network_with_input_lead_converges() {
    let network = LoopbackNetwork::new().with_loss(0.1, 13).with_latency(2);
    let config = NetConfig {
        input_lead: 3,
        ..NetConfig::default()
    };
    let mut server = Session::new(config.clone(), network.endpoint(PeerId::SERVER)).unwrap();
    let mut client = Session::new(config.clone(), network.endpoint(PEER_A)).unwrap();
    server.connect_peer(PEER_A);

    let mut rng = XorShift(5);
    let inputs: Vec<MoveData> = (0..200).map(|_| rng.input()).collect();

    server
        .spawn(NetEntity::new(
            MOTOR,
            motor_kind(),
            fresh_motor(),
            PeerId::SERVER,
            owned_by(Some(PEER_A)),
            &config,
        ))
        .unwrap();
    client
        .spawn(
            NetEntity::new(
                MOTOR,
                motor_kind(),
                fresh_motor(),
                PEER_A,
                owned_by(Some(PEER_A)),
                &config,
            )
            .with_input(move |tick: Tick| inputs.get(tick as usize).copied()),
        )
        .unwrap();

    for _ in 0..240 {
        client.step();
        server.step();
        network.advance(1);
    }

    let (_, dropped) = network.counts();
    assert!(dropped > 0);
    assert!(client.stats().resyncs >= 1);

    // The client predicts ahead of the server, and most inputs make it in time
    let client_tick = client.clock().current_tick().unwrap();
    let server_tick = server.clock().current_tick().unwrap();
    assert!(client_tick > server_tick);
    let server_entity = server
        .entities()
        .get::<Motor, MoveData, MotorState>(MOTOR)
        .unwrap();
    let server_stats = server_entity.server_stats();
    assert!(server_stats.accepted_inputs > server_stats.defaulted_inputs);

    let client_entity = client
        .entities()
        .get::<Motor, MoveData, MotorState>(MOTOR)
        .unwrap();
    assert!(client_entity.state().approx_eq(&server_entity.state(), 1e-4));
    assert_eq!(client_entity.prediction_stats().nondeterminism, 0);
    assert!(client_entity.input_history().tick_span() < config.retention_horizon as u64);
}

#[test]
fn late_joiner_predicts_with_accepted_input() {
    let network = LoopbackNetwork::new();
    let config = NetConfig::default();
    let mut server = Session::new(config.clone(), network.endpoint(PeerId::SERVER)).unwrap();
    server
        .spawn(NetEntity::new(
            MOTOR,
            motor_kind(),
            fresh_motor(),
            PeerId::SERVER,
            owned_by(None),
            &config,
        ))
        .unwrap();
    for _ in 0..100 {
        server.step();
    }
    server.transfer_ownership(MOTOR, Some(PEER_A)).unwrap();

    // The ownership change is received before the client spawns the motor
    let mut client = Session::new(config.clone(), network.endpoint(PEER_A)).unwrap();
    server.connect_peer(PEER_A);
    client.step();
    client
        .spawn(
            NetEntity::new(
                MOTOR,
                motor_kind(),
                fresh_motor(),
                PEER_A,
                owned_by(None),
                &config,
            )
            .with_input(|_: Tick| Some(RIGHT)),
        )
        .unwrap();
    assert_eq!(client.role(MOTOR), AuthorityRole::Predicting);

    for _ in 0..20 {
        server.step();
        client.step();
    }

    let server_entity = server
        .entities()
        .get::<Motor, MoveData, MotorState>(MOTOR)
        .unwrap();
    assert!(server_entity.server_stats().accepted_inputs >= 18);
    let server_state = server_entity.state();
    assert!(server_state.pos[0] > 0.0);

    // One tick of lead keeps the prediction just past the server
    let client_entity = client
        .entities()
        .get::<Motor, MoveData, MotorState>(MOTOR)
        .unwrap();
    assert_eq!(client_entity.prediction_stats().nondeterminism, 0);
    assert!(client_entity.state().pos[0] > server_state.pos[0]);
}

#[test]
fn replay_reproduces_correct_prediction() {
    let config = scenario_config();
    let kind = motor_kind();
    let mut rng = XorShift(0x5eed);

    for _ in 0..50 {
        let mut client = Predictor::new(kind, &config);
        let mut server = AuthoritativeSim::new(kind, &config);
        let mut client_body = fresh_motor();
        let mut server_body = fresh_motor();

        let last = 1 + rng.below(9) + 1;
        let confirmed = 1 + rng.below(last - 1);
        for tick in 1..=last {
            let window = client.predict(&mut client_body, tick, rng.input());
            if tick <= confirmed {
                server.receive_inputs(window);
                server.simulate(&mut server_body, tick);
                server.post_tick(&server_body, tick);
            }
        }
        let snapshot = SnapshotMessage {
            tick: confirmed,
            exact_since: Some(1),
            state: *server.state_at(confirmed).unwrap(),
        };

        let before = capture(&client_body);
        client.receive_snapshot(snapshot);
        let correction = client.reconcile(&mut client_body).unwrap();

        assert_eq!(correction.after, before);
        assert_eq!(client.stats().mispredictions, 0);
        assert_eq!(client.stats().nondeterminism, 0);
    }
}

#[test]
fn snapshots_apply_monotonically() {
    let config = scenario_config();
    let mut rng = XorShift(3);

    for _ in 0..20 {
        let mut client = Predictor::new(motor_kind(), &config);
        let mut body = fresh_motor();
        let mut ticks: Vec<Tick> = (1..=12).collect();
        // Fisher-Yates
        for i in (1..ticks.len()).rev() {
            let j = rng.below(i as u64 + 1) as usize;
            ticks.swap(i, j);
        }

        let mut applied: Vec<Tick> = Vec::new();
        for (round, tick) in ticks.into_iter().enumerate() {
            client.predict(&mut body, 100 + round as Tick, MoveData::default());
            client.receive_snapshot(SnapshotMessage {
                tick,
                exact_since: None,
                state: capture(&fresh_motor()),
            });
            if let Some(correction) = client.reconcile(&mut body) {
                applied.push(correction.tick);
            }
        }

        assert!(applied.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(applied.last(), Some(&12));
    }
}

#[test]
fn missing_input_never_breaks_simulation() {
    let config = scenario_config();
    let mut first = AuthoritativeSim::new(motor_kind(), &config);
    let mut second = AuthoritativeSim::new(motor_kind(), &config);
    let mut a = fresh_motor();
    let mut b = fresh_motor();

    for tick in 1..=100 {
        first.simulate(&mut a, tick);
        second.simulate(&mut b, tick);
        first.post_tick(&a, tick);
        second.post_tick(&b, tick);
    }

    assert_eq!(first.stats().defaulted_inputs, 100);
    assert_eq!(capture(&a), capture(&b));
    assert_eq!(a.stamina, 10.0);
}

#[test]
fn quiet_value_sent_exactly_redundancy_times() {
    let mut rng = XorShift(11);
    for _ in 0..30 {
        let redundancy = 1 + rng.below(5) as u32;
        let interval = 1 + rng.below(3);
        let hold = 40;
        let mut tracker = DirtyTracker::new(ChangePolicy::unreliable(interval, redundancy));

        let sent = (0..hold)
            .filter(|tick| tracker.update(*tick, &42u32).is_some())
            .count();
        assert_eq!(sent as u32, redundancy);
    }
}

#[test]
fn at_most_one_predicting_peer() {
    let entity = EntityId(1);
    let peers = [PeerId(1), PeerId(2), PeerId(3)];
    let mut resolver = AuthorityResolver::new(PeerId::SERVER);
    resolver.register(entity, Ownership::new(None, 0)).unwrap();
    let mut rng = XorShift(21);

    for tick in 1..200 {
        let pick = rng.below(peers.len() as u64 + 1) as usize;
        let owner = peers.get(pick).copied();
        resolver
            .transfer_ownership(PeerId::SERVER, entity, owner, tick)
            .unwrap();

        let predicting: Vec<_> = peers
            .iter()
            .filter(|p| resolver.role(entity, **p) == AuthorityRole::Predicting)
            .collect();
        assert!(predicting.len() <= 1);
        for peer in peers {
            let accepted = resolver.check_input(entity, peer, tick).is_ok();
            assert_eq!(accepted, owner == Some(peer));
        }
    }
}
