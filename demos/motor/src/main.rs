//! Motor Demo
//!
//! A server and two clients share one motor over a lossy, delayed loopback
//! network. The first client drives it with predicted input; halfway
//! through, the server hands control to the second client. A server-owned
//! colour field changes on a timer and is replicated to both clients.
//!
//! Run with `RUST_LOG=tickwise_netcode=debug` to watch corrections.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tickwise_core::{Approx, ChangePolicy, EntityId, EntityKind, NetConfig, PeerId, StepFlags, Tick};
use tickwise_netcode::{
    owned_by, Lerp, LoopbackNetwork, LoopbackTransport, NetEntity, Session, SyncVar,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"(
    tick_rate_hz: 30,
    retention_horizon: 64,
    input_redundancy: 3,
    input_lead: 3,
    snapshot: (interval_ticks: 1, redundancy: 2, keyframe_interval: Some(30)),
)"#;

const MOTOR: EntityId = EntityId(1);
const ALICE: PeerId = PeerId(1);
const BOB: PeerId = PeerId(2);

const ROUNDS: u32 = 240;
const HANDOVER: u32 = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Throttle {
    horizontal: f32,
    vertical: f32,
}

#[derive(Debug, Clone, Default)]
struct Motor {
    pos: [f32; 2],
    vel: [f32; 2],
    stamina: f32,
    /// Engine sounds played; cosmetic only
    revs: u32,
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
            vel: self.vel.lerp(&to.vel, t),
            stamina: to.stamina,
        }
    }
}

fn step(motor: &mut Motor, throttle: &Throttle, flags: StepFlags) {
    let moving = throttle.horizontal != 0.0 || throttle.vertical != 0.0;
    let boost = if moving && motor.stamina >= 1.0 {
        motor.stamina -= 1.0;
        1.5
    } else {
        1.0
    };
    motor.vel = [
        throttle.horizontal * 4.0 * boost,
        throttle.vertical * 4.0 * boost,
    ];
    if !moving {
        motor.stamina = (motor.stamina + 0.25).min(20.0);
    }
    if moving && !flags.replaying {
        motor.revs += 1;
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

/// Drive in a square, pausing every fourth second to recover stamina
fn driver(tick: Tick) -> Option<Throttle> {
    let throttle = match (tick / 30) % 4 {
        0 => Throttle { horizontal: 1.0, vertical: 0.0 },
        1 => Throttle { horizontal: 0.0, vertical: 1.0 },
        2 => Throttle { horizontal: -1.0, vertical: 0.0 },
        _ => return None,
    };
    Some(throttle)
}

fn spawn_motor(session: &mut Session<LoopbackTransport>, config: &NetConfig) -> Result<()> {
    let kind = EntityKind::new("motor", step, reconcile, capture).with_integrate(integrate);
    let local = session.local_peer();
    let body = Motor {
        stamina: 20.0,
        ..Motor::default()
    };
    let mut motor = NetEntity::new(MOTOR, kind, body, local, owned_by(Some(ALICE)), config)
        .with_input(driver);
    motor.add_field(
        SyncVar::new(0u8, ChangePolicy::reliable(1)).on_change(move |previous, next, as_server| {
            info!(peer = %local, previous, next, as_server, "colour changed");
        }),
    );
    session.spawn(motor)?;
    Ok(())
}

fn motor_of(session: &Session<LoopbackTransport>) -> Result<&NetEntity<Motor, Throttle, MotorState>> {
    session
        .entities()
        .get::<Motor, Throttle, MotorState>(MOTOR)
        .context("motor not spawned")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Tickwise Motor Demo ===\n");

    let config = NetConfig::from_ron_str(CONFIG)?;
    let network = LoopbackNetwork::new().with_loss(0.1, 42).with_latency(2);

    let mut server = Session::new(config.clone(), network.endpoint(PeerId::SERVER))?;
    let mut alice = Session::new(config.clone(), network.endpoint(ALICE))?;
    let mut bob = Session::new(config.clone(), network.endpoint(BOB))?;
    server.connect_peer(ALICE);
    server.connect_peer(BOB);

    for session in [&mut server, &mut alice, &mut bob] {
        spawn_motor(session, &config)?;
    }

    // Repaint the motor every two seconds
    server.schedule_every(60, |tick, entities| {
        if let Some(motor) = entities.get_mut::<Motor, Throttle, MotorState>(MOTOR) {
            if let Some(colour) = motor.field_mut::<u8>(0) {
                let next = colour.get().wrapping_add(1) % 8;
                colour.set(next);
                info!(tick, next, "server repainted motor");
            }
        }
    });

    for round in 0..ROUNDS {
        if round == HANDOVER {
            let change = server.transfer_ownership(MOTOR, Some(BOB))?;
            println!("Round {}: motor handed to {} from tick {}\n", round, BOB, change.tick);
        }
        alice.step();
        bob.step();
        server.step();
        network.advance(1);
    }

    let (delivered, dropped) = network.counts();
    println!("Network: {} datagrams delivered, {} dropped\n", delivered, dropped);

    let on_server = motor_of(&server)?;
    let stats = on_server.server_stats();
    println!("Server");
    println!("  position: {:?}", on_server.state().pos);
    println!(
        "  inputs accepted: {}, defaulted: {}, rejected: {}",
        stats.accepted_inputs,
        stats.defaulted_inputs,
        on_server.rejected_inputs()
    );
    println!("  snapshots sent: {}\n", stats.snapshots_sent);

    for (name, session) in [("Alice", &alice), ("Bob", &bob)] {
        let motor = motor_of(session)?;
        let prediction = motor.prediction_stats();
        let colour = motor.field::<u8>(0).map(|c| *c.get()).unwrap_or_default();
        println!("{} ({})", name, session.role(MOTOR));
        println!("  position: {:?}", motor.render_state(0.0).pos);
        println!("  colour: {}", colour);
        println!(
            "  replays: {}, hard resets: {}, mispredictions: {}, nondeterminism: {}",
            prediction.replays,
            prediction.hard_resets,
            prediction.mispredictions,
            prediction.nondeterminism
        );
        let history = motor.input_history();
        println!(
            "  input history: {} ticks buffered, span {}, {:.0}% of horizon",
            history.count,
            history.tick_span(),
            history.fill_ratio() * 100.0
        );
        println!("  clock resyncs: {}", session.stats().resyncs);
        println!("  engine revs: {}\n", motor.body().revs);
    }

    info!(ticks = server.stats().ticks, "demo finished");
    Ok(())
}
