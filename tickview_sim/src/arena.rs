//! Arena - a small domain driving the bridge in simulation.
//!
//! One hero faces a handful of enemies. `arena.attack` damages a living
//! enemy and starts a cooldown; `arena.guard` changes stance and is always
//! ready. The automated controller attacks the first living enemy whenever
//! the cooldown allows.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tickview_core::shared;
use tickview_core::{
    ActionDomain, ActionId, CapabilityContract, CoreResult, FrameWriter, Intent, Namespace,
    Registrar, RejectionReason, SchemaProvider, SlotId, ValueType,
};
use tickview_env::{EntityRef, Tick};
use tracing::debug;

pub const NAMESPACE: &str = "arena";
pub const STANCE_ENUM: &str = "arena.stance";

pub const MAX_ENEMIES: usize = 4;
pub const ATTACK_COOLDOWN_TICKS: u64 = 10;
pub const ATTACK_DAMAGE: i64 = 25;

pub const ATTACK: ActionId = ActionId(256);
pub const GUARD: ActionId = ActionId(257);

pub const HERO_COOLDOWN: SlotId = SlotId(256);
pub const HERO_TARGET: SlotId = SlotId(257);
pub const HERO_STANCE: SlotId = SlotId(258);
pub const HERO_ATTACKS: SlotId = SlotId(259);
pub const ENEMIES_ALIVE: SlotId = SlotId(260);

const ENEMY_HEALTH_BASE: u32 = 264;
const ENEMY_ID_BASE: u32 = 272;

/// Health slot of enemy `index`.
pub fn enemy_health_slot(index: usize) -> SlotId {
    SlotId(ENEMY_HEALTH_BASE + index as u32)
}

/// Entity slot of enemy `index`.
pub fn enemy_id_slot(index: usize) -> SlotId {
    SlotId(ENEMY_ID_BASE + index as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stance {
    Idle,
    Attacking,
    Guarding,
}

impl Stance {
    pub fn code(self) -> i64 {
        match self {
            Stance::Idle => 0,
            Stance::Attacking => 1,
            Stance::Guarding => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enemy {
    pub id: EntityRef,
    pub health: i64,
}

impl Enemy {
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

/// One executed action. Deliberately carries no source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executed {
    pub tick: Tick,
    pub action: ActionId,
    pub target: Option<EntityRef>,
}

/// Arena state and its schema.
#[derive(Debug, Clone)]
pub struct ArenaDomain {
    enemies: Vec<Enemy>,
    stance: Stance,
    target: Option<EntityRef>,
    /// First tick at which an attack is ready again
    ready_at: Tick,
    history: Vec<Executed>,
}

impl ArenaDomain {
    /// Spawns `enemies` (at most [`MAX_ENEMIES`]) with seeded health.
    pub fn new(seed: u64, enemies: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let enemies = (0..enemies.min(MAX_ENEMIES))
            .map(|i| Enemy {
                id: EntityRef::from_seed(seed.wrapping_add(i as u64)),
                health: rng.gen_range(60..=120),
            })
            .collect();
        Self {
            enemies,
            stance: Stance::Idle,
            target: None,
            ready_at: Tick::ZERO,
            history: Vec::new(),
        }
    }

    pub fn enemies(&self) -> &[Enemy] {
        &self.enemies
    }

    pub fn enemy(&self, id: EntityRef) -> Option<&Enemy> {
        self.enemies.iter().find(|e| e.id == id)
    }

    pub fn first_living(&self) -> Option<EntityRef> {
        self.enemies.iter().find(|e| e.is_alive()).map(|e| e.id)
    }

    pub fn stance(&self) -> Stance {
        self.stance
    }

    pub fn history(&self) -> &[Executed] {
        &self.history
    }

    /// Cooldown ticks left as of `tick`.
    pub fn cooldown_remaining(&self, tick: Tick) -> u64 {
        self.ready_at.since(tick)
    }
}

/// Contract of the standard arena HUD: control state, the hero cooldown
/// and the attack button, with the current target as a nice-to-have.
pub fn hud_contract() -> CapabilityContract {
    CapabilityContract::new("hud")
        .require_slot(shared::BLOCK_REASON, ValueType::Int)
        .require_slot(shared::LAST_ACTOR, ValueType::Int)
        .require_slot("arena.hero.cooldown", ValueType::Int)
        .require_action("arena.attack")
        .optional_slot("arena.hero.target", ValueType::Entity)
}

impl SchemaProvider for ArenaDomain {
    fn namespace(&self) -> Namespace {
        Namespace::domain(NAMESPACE)
    }

    fn register(&self, r: &mut Registrar<'_>) {
        r.slot("arena.hero.cooldown", HERO_COOLDOWN.0, ValueType::Int)
            .slot("arena.hero.target", HERO_TARGET.0, ValueType::Entity)
            .slot("arena.hero.stance", HERO_STANCE.0, ValueType::Int)
            .slot("arena.hero.attacks", HERO_ATTACKS.0, ValueType::Int)
            .slot("arena.enemies.alive", ENEMIES_ALIVE.0, ValueType::Int)
            // Mana was removed when casting went away
            .retire_slot("arena.hero.mana", 261)
            .action("arena.attack", ATTACK.0)
            .action("arena.guard", GUARD.0)
            .retire_action("arena.taunt", 258)
            .enum_code(STANCE_ENUM, Stance::Idle.code(), "idle")
            .enum_code(STANCE_ENUM, Stance::Attacking.code(), "attacking")
            .enum_code(STANCE_ENUM, Stance::Guarding.code(), "guarding");

        for i in 0..MAX_ENEMIES {
            r.slot(&format!("arena.enemy.{i}.health"), enemy_health_slot(i).0, ValueType::Int)
                .slot(&format!("arena.enemy.{i}.id"), enemy_id_slot(i).0, ValueType::Entity);
        }
    }
}

impl ActionDomain for ArenaDomain {
    fn validate(&self, intent: &Intent, _tick: Tick) -> Result<(), RejectionReason> {
        match intent.action {
            ATTACK => match intent.target.and_then(|t| self.enemy(t)) {
                Some(enemy) if enemy.is_alive() => Ok(()),
                _ => Err(RejectionReason::InvalidTarget),
            },
            GUARD => Ok(()),
            _ => Err(RejectionReason::UnknownAction),
        }
    }

    fn readiness(&self, intent: &Intent, tick: Tick) -> Result<(), RejectionReason> {
        if intent.action == ATTACK && self.cooldown_remaining(tick) > 0 {
            return Err(RejectionReason::Cooldown);
        }
        Ok(())
    }

    fn execute(&mut self, intent: &Intent, tick: Tick) {
        match intent.action {
            ATTACK => {
                if let Some(enemy) = self
                    .enemies
                    .iter_mut()
                    .find(|e| Some(e.id) == intent.target)
                {
                    enemy.health = (enemy.health - ATTACK_DAMAGE).max(0);
                }
                self.ready_at = tick.after(ATTACK_COOLDOWN_TICKS);
                self.stance = Stance::Attacking;
                self.target = intent.target;
            }
            GUARD => self.stance = Stance::Guarding,
            _ => return,
        }
        debug!("{}: executed {} on {:?}", tick, intent.action, intent.target);
        self.history.push(Executed {
            tick,
            action: intent.action,
            target: intent.target,
        });
    }

    fn automated_intent(&mut self, tick: Tick) -> Option<Intent> {
        if self.cooldown_remaining(tick) > 0 {
            return None;
        }
        self.first_living()
            .map(|target| Intent::new(ATTACK).with_target(target))
    }

    fn publish(&self, frame: &mut FrameWriter<'_>) -> CoreResult<()> {
        let tick = frame.tick();
        frame.write(HERO_COOLDOWN, self.cooldown_remaining(tick) as i64)?;
        frame.write(HERO_TARGET, self.target)?;
        frame.write(HERO_STANCE, self.stance.code())?;
        frame.write(HERO_ATTACKS, self.history.iter().filter(|e| e.action == ATTACK).count() as i64)?;
        frame.write(
            ENEMIES_ALIVE,
            self.enemies.iter().filter(|e| e.is_alive()).count() as i64,
        )?;
        for i in 0..MAX_ENEMIES {
            let enemy = self.enemies.get(i);
            frame.write(enemy_health_slot(i), enemy.map(|e| e.health))?;
            frame.write(enemy_id_slot(i), enemy.map(|e| e.id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickview_core::{SchemaBuilder, SharedSchema};

    #[test]
    fn test_arena_schema_builds() {
        let domain = ArenaDomain::new(1, 3);
        let schema = SchemaBuilder::new()
            .with(&SharedSchema)
            .with(&domain)
            .build()
            .unwrap();
        assert_eq!(schema.slot("arena.enemy.2.health"), Some(enemy_health_slot(2)));
        assert_eq!(schema.action("arena.attack"), Some(ATTACK));
        assert!(schema.is_retired(tickview_core::SchemaKind::Slot, 261));
        assert!(hud_contract().validate(&schema).missing_required().is_empty());
    }

    #[test]
    fn test_attack_starts_cooldown() {
        let mut domain = ArenaDomain::new(1, 2);
        let target = domain.first_living().unwrap();
        let intent = Intent::new(ATTACK).with_target(target);

        assert!(domain.validate(&intent, Tick(10)).is_ok());
        domain.execute(&intent, Tick(10));
        assert_eq!(domain.cooldown_remaining(Tick(15)), 5);
        assert_eq!(domain.readiness(&intent, Tick(15)), Err(RejectionReason::Cooldown));
        assert!(domain.readiness(&intent, Tick(20)).is_ok());
        assert_eq!(domain.automated_intent(Tick(19)), None);
    }

    #[test]
    fn test_invalid_targets() {
        let domain = ArenaDomain::new(1, 1);
        let no_target = Intent::new(ATTACK);
        let stranger = Intent::new(ATTACK).with_target(EntityRef(12345));
        assert_eq!(domain.validate(&no_target, Tick(1)), Err(RejectionReason::InvalidTarget));
        assert_eq!(domain.validate(&stranger, Tick(1)), Err(RejectionReason::InvalidTarget));
        assert!(domain.validate(&Intent::new(GUARD), Tick(1)).is_ok());
    }

    #[test]
    fn test_defeated_enemy_is_invalid_target() {
        let mut domain = ArenaDomain::new(9, 1);
        let target = domain.first_living().unwrap();
        let intent = Intent::new(ATTACK).with_target(target);
        let mut tick = Tick(1);
        while domain.enemy(target).unwrap().is_alive() {
            domain.execute(&intent, tick);
            tick = tick.after(ATTACK_COOLDOWN_TICKS);
        }
        assert_eq!(domain.validate(&intent, tick), Err(RejectionReason::InvalidTarget));
        assert_eq!(domain.automated_intent(tick), None);
    }
}
