//! Append-only action history with type and entity indexes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use super::{Action, ActionType};
use crate::types::EntityId;

#[derive(Default)]
struct LogIndex {
    actions: Vec<Action>,
    by_type: HashMap<ActionType, Vec<usize>>,
    by_entity: HashMap<EntityId, Vec<usize>>,
}

impl LogIndex {
    fn collect(&self, indices: impl IntoIterator<Item = usize>) -> Vec<Action> {
        indices
            .into_iter()
            .map(|i| self.actions[i].clone())
            .collect()
    }

    fn type_indices(&self, ty: ActionType, include_subtypes: bool) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .by_type
            .iter()
            .filter(|(concrete, _)| ty.matches(**concrete, include_subtypes))
            .flat_map(|(_, list)| list.iter().copied())
            .collect();
        // Buckets are each ordered; merging them needs a sort.
        indices.sort_unstable();
        indices
    }
}

/// History of every applied action for one simulation run.
///
/// There is no removal operation. Every query returns a subsequence of
/// [`ActionLog::all_actions`] in insertion order.
///
/// The indexes sit behind a reader/writer lock, so appends from entity
/// programs and reads from verifiers may happen concurrently.
pub struct ActionLog {
    index: RwLock<LogIndex>,
    console_output: AtomicBool,
}

impl ActionLog {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(LogIndex::default()),
            console_output: AtomicBool::new(true),
        }
    }

    /// Appends an action and indexes it by concrete type and causing entity.
    pub fn log_action(&self, action: Action) {
        if self.console_output() {
            info!(
                target: "world::actions",
                tick = action.tick().value(),
                kind = %action.action_type(),
                "{}",
                action.description()
            );
        }

        let mut index = self.write();
        let position = index.actions.len();
        index
            .by_type
            .entry(action.action_type())
            .or_default()
            .push(position);
        if let Some(entity) = action.entity() {
            index.by_entity.entry(entity.id).or_default().push(position);
        }
        index.actions.push(action);
    }

    pub fn all_actions(&self) -> Vec<Action> {
        self.read().actions.clone()
    }

    pub fn last_action(&self) -> Option<Action> {
        self.read().actions.last().cloned()
    }

    pub fn actions_of_type(&self, ty: ActionType, include_subtypes: bool) -> Vec<Action> {
        let index = self.read();
        let indices = index.type_indices(ty, include_subtypes);
        index.collect(indices)
    }

    pub fn actions_of_entity(&self, entity: EntityId) -> Vec<Action> {
        let index = self.read();
        match index.by_entity.get(&entity) {
            Some(list) => index.collect(list.iter().copied()),
            None => Vec::new(),
        }
    }

    pub fn actions_of_type_of_entity(
        &self,
        entity: EntityId,
        ty: ActionType,
        include_subtypes: bool,
    ) -> Vec<Action> {
        let index = self.read();
        let Some(list) = index.by_entity.get(&entity) else {
            return Vec::new();
        };
        let matching = list
            .iter()
            .copied()
            .filter(|&i| ty.matches(index.actions[i].action_type(), include_subtypes));
        index.collect(matching)
    }

    pub fn len(&self) -> usize {
        self.read().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().actions.is_empty()
    }

    /// Enables or disables echoing appended actions to the `world::actions` target.
    pub fn set_console_output(&self, enabled: bool) {
        self.console_output.store(enabled, Ordering::Relaxed);
    }

    pub fn console_output(&self) -> bool {
        self.console_output.load(Ordering::Relaxed)
    }

    fn read(&self) -> RwLockReadGuard<'_, LogIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Capabilities, Entity, EntityKind};
    use crate::types::{Direction, PlayfieldId, Position, Tick};

    const WALKER: EntityKind = EntityKind::new("Walker", Capabilities::MOVABLE);

    fn sample_log() -> (ActionLog, EntityId, EntityId) {
        let log = ActionLog::new();
        log.set_console_output(false);
        let a = Entity::new(WALKER);
        let b = Entity::new(WALKER);
        let field = PlayfieldId(1);

        log.log_action(Action::spawn(Tick(0), &a, field, Position::ORIGIN));
        log.log_action(Action::step(Tick(1), &a, Position::new(0, 0), Position::new(1, 0)));
        log.log_action(Action::spawn(Tick(1), &b, field, Position::new(5, 5)));
        log.log_action(Action::teleport(Tick(2), &b, Position::new(5, 5), Position::new(0, 0)));
        log.log_action(Action::turn(Tick(3), &a, Direction::East, Direction::South));
        log.log_action(Action::step(Tick(4), &b, Position::new(0, 0), Position::new(0, 1)));
        log.log_action(Action::custom(Tick(4), None, "checkpoint"));

        (log, a.id(), b.id())
    }

    #[test]
    fn exact_type_query_matches_only_that_type() {
        let (log, _, _) = sample_log();
        let steps = log.actions_of_type(ActionType::Step, false);
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|a| a.action_type() == ActionType::Step));
        assert!(log.actions_of_type(ActionType::Move, false).is_empty());
    }

    #[test]
    fn subtype_query_preserves_insertion_order() {
        let (log, _, _) = sample_log();
        let moves = log.actions_of_type(ActionType::Move, true);
        let ticks: Vec<u64> = moves.iter().map(|a| a.tick().value()).collect();
        assert_eq!(ticks, vec![1, 2, 4]);
        assert_eq!(log.actions_of_type(ActionType::Any, true).len(), log.len());
        assert_eq!(log.actions_of_type(ActionType::Entity, true).len(), 6);
    }

    #[test]
    fn entity_queries_only_see_that_entity() {
        let (log, a, b) = sample_log();
        assert_eq!(log.actions_of_entity(a).len(), 3);
        let b_moves = log.actions_of_type_of_entity(b, ActionType::Move, true);
        assert_eq!(b_moves.len(), 2);
        assert_eq!(b_moves[0].action_type(), ActionType::Teleport);
        assert!(
            log.actions_of_type_of_entity(a, ActionType::Teleport, false)
                .is_empty()
        );
        assert!(log.actions_of_entity(EntityId(u32::MAX)).is_empty());
    }

    #[test]
    fn description_mentions_both_positions() {
        let (log, _, _) = sample_log();
        let step = &log.actions_of_type(ActionType::Step, false)[0];
        assert!(step.description().contains("stepped from (x=0, y=0) to (x=1, y=0)"));
        assert_eq!(
            log.last_action().map(|a| a.action_type()),
            Some(ActionType::Custom)
        );
    }
}
