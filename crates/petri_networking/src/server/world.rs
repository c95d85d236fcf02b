//! # Authoritative World
//!
//! The dish everything swims in. The server owns the only true copy of
//! every entity; clients see it exclusively through `NewEntity` spawns
//! and per-tick `Snapshot` samples.
//!
//! ## Design
//!
//! - AI cells drift between random waypoints
//! - Player cells move only through consumed inputs
//! - Overlapping cells absorb: the bigger grows, the smaller shrinks
//!   and respawns elsewhere
//! - All randomness flows through one seeded generator, so a dish with
//!   a fixed seed replays identically

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use petri_shared::constants::{
    AI_ARRIVE_DISTANCE, AI_WANDER_SPEED, CLIENT_TICK_SECONDS, DISH_MAX, DISH_MIN, MAX_CLIENTS,
    SIZE_MAX, SIZE_MIN,
};
use petri_shared::entity::{Color, Entity, EntityId, EntityKind};
use petri_shared::math::Vec2;

/// AI cells seed from the lower size band so a fresh dish starts
/// player-beatable.
const AI_SPAWN_SIZE_MIN: f32 = 4.0;
const AI_SPAWN_SIZE_MAX: f32 = 10.0;

/// A drifting cell's current destination.
#[derive(Clone, Copy, Debug)]
struct Waypoint {
    /// Index into the entity table. AI cells are seeded first and
    /// entities are never removed, so the index stays valid for the
    /// life of the world.
    entity: usize,
    /// Where the cell is headed.
    target: Vec2,
}

/// The authoritative petri dish.
pub struct World {
    entities: Vec<Entity>,
    waypoints: Vec<Waypoint>,
    rng: ChaCha8Rng,
    next_id: u16,
    tick: u32,
    collision_hits: Vec<EntityId>,
}

impl World {
    /// Creates a dish seeded with `ai_count` drifting AI cells.
    #[must_use]
    pub fn new(seed: u64, ai_count: usize) -> Self {
        let mut world = Self {
            entities: Vec::with_capacity(ai_count + MAX_CLIENTS),
            waypoints: Vec::with_capacity(ai_count),
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_id: 0,
            tick: 0,
            collision_hits: Vec::new(),
        };
        for _ in 0..ai_count {
            world.seed_ai();
        }
        world
    }

    fn seed_ai(&mut self) {
        let id = self.allocate_id();
        let position = self.random_position();
        let size = self.rng.gen_range(AI_SPAWN_SIZE_MIN..AI_SPAWN_SIZE_MAX);
        let color = self.random_color();
        let target = self.random_position();
        self.waypoints.push(Waypoint {
            entity: self.entities.len(),
            target,
        });
        self.entities.push(Entity::ai(id, position, size, color));
    }

    /// Spawns a player cell at a random spot and returns its id.
    pub fn spawn_player(&mut self) -> EntityId {
        let id = self.allocate_id();
        let position = self.random_position();
        let color = self.random_color();
        self.entities.push(Entity::player(id, position, color));
        id
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    fn random_position(&mut self) -> Vec2 {
        Vec2::new(
            self.rng.gen_range(DISH_MIN.x..DISH_MAX.x),
            self.rng.gen_range(DISH_MIN.y..DISH_MAX.y),
        )
    }

    fn random_color(&mut self) -> Color {
        Color::new(255, self.rng.gen(), self.rng.gen(), 255)
    }

    /// Current server tick.
    #[must_use]
    pub const fn tick(&self) -> u32 {
        self.tick
    }

    /// Every live entity, AI cells first.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Looks up an entity by id.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|entity| entity.id == id)
    }

    /// Player entities mutated by absorption during the last [`step`].
    ///
    /// Their owners need a corrective snapshot out-of-band of the
    /// regular broadcast.
    ///
    /// [`step`]: World::step
    #[must_use]
    pub fn collision_hits(&self) -> &[EntityId] {
        &self.collision_hits
    }

    /// Steps one queued input through a player entity.
    ///
    /// `input_id` stamps the entity so its next snapshot tells the
    /// owner exactly which input the pose accounts for.
    pub fn consume_input(&mut self, id: EntityId, throttle: f32, steer: f32, input_id: u32) {
        if let Some(entity) = self.entity_mut(id) {
            entity.apply_input(throttle, steer, CLIENT_TICK_SECONDS);
            entity.last_tick = input_id;
        }
    }

    /// Advances the dish one server tick.
    pub fn step(&mut self, dt: f32) {
        self.tick += 1;
        self.collision_hits.clear();
        self.step_wander(dt);
        self.resolve_collisions();
    }

    fn step_wander(&mut self, dt: f32) {
        for waypoint in &mut self.waypoints {
            let entity = &mut self.entities[waypoint.entity];
            if entity.position.distance(waypoint.target) < AI_ARRIVE_DISTANCE {
                waypoint.target = Vec2::new(
                    self.rng.gen_range(DISH_MIN.x..DISH_MAX.x),
                    self.rng.gen_range(DISH_MIN.y..DISH_MAX.y),
                );
            }
            let offset = waypoint.target - entity.position;
            let distance = offset.length();
            if distance > f32::EPSILON {
                let step = (AI_WANDER_SPEED * dt).min(distance);
                entity.position = entity.position + offset * (step / distance);
            }
            entity.last_tick = self.tick;
        }
    }

    /// Absorption over all unordered pairs, resolved in table order.
    fn resolve_collisions(&mut self) {
        for second in 1..self.entities.len() {
            let (head, tail) = self.entities.split_at_mut(second);
            let b = &mut tail[0];
            for a in head.iter_mut() {
                if !overlaps(a, b) {
                    continue;
                }
                let (a_span, b_span) = (a.collision_span(), b.collision_span());
                if a_span == b_span {
                    continue; // stalemate
                }

                let teleport = Vec2::new(
                    self.rng.gen_range(DISH_MIN.x..DISH_MAX.x),
                    self.rng.gen_range(DISH_MIN.y..DISH_MAX.y),
                );
                let (winner, loser) = if a_span > b_span {
                    (&mut *a, &mut *b)
                } else {
                    (&mut *b, &mut *a)
                };

                // The winner's gain reads the loser's pre-shrink size.
                let gain = loser.size * 0.5;
                winner.size = (winner.size + gain).min(SIZE_MAX);
                loser.size = (loser.size * 0.5).max(SIZE_MIN);
                loser.position = teleport;

                if winner.kind == EntityKind::Player {
                    self.collision_hits.push(winner.id);
                }
                if loser.kind == EntityKind::Player {
                    self.collision_hits.push(loser.id);
                }
            }
        }
    }
}

/// Circle-circle overlap; centers and radii.
fn circles_overlap(a: Vec2, radius_a: f32, b: Vec2, radius_b: f32) -> bool {
    let reach = radius_a + radius_b;
    a.distance_squared(b) < reach * reach
}

/// Axis-aligned square overlap; centers and half-extents.
fn squares_overlap(a: Vec2, half_a: f32, b: Vec2, half_b: f32) -> bool {
    let reach = half_a + half_b;
    (a.x - b.x).abs() < reach && (a.y - b.y).abs() < reach
}

/// Circle against axis-aligned square: clamp the center into the
/// square and compare the remaining distance with the radius.
fn circle_square_overlap(center: Vec2, radius: f32, square: Vec2, half: f32) -> bool {
    let nearest = Vec2::new(
        center.x.clamp(square.x - half, square.x + half),
        center.y.clamp(square.y - half, square.y + half),
    );
    center.distance_squared(nearest) < radius * radius
}

/// Shape-appropriate overlap test: AI cells are circles, player cells
/// are squares, both scaled by the shared extent mapping.
fn overlaps(a: &Entity, b: &Entity) -> bool {
    use EntityKind::Ai;
    let half_a = a.extent() * 0.5;
    let half_b = b.extent() * 0.5;
    match (a.kind, b.kind) {
        (Ai, Ai) => circles_overlap(a.position, half_a, b.position, half_b),
        (Ai, _) => circle_square_overlap(a.position, half_a, b.position, half_b),
        (_, Ai) => circle_square_overlap(b.position, half_b, a.position, half_a),
        _ => squares_overlap(a.position, half_a, b.position, half_b),
    }
}
