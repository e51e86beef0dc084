use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::blinds::actuator::Execution;
use crate::blinds::doors::{DoorEdge, DoorStateAggregator};
use crate::blinds::sunlight::{SunlightLevelClassifier, TemperatureThresholdTracker};
use crate::blinds::{BlindConfig, BlindRuntimeState, Position, SafetyOverride, Segment, SegmentKind};
use crate::error::HubResult;

/// A physical segment to drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub segment: String,
    pub target: Position,
}

/// Outcome of a recompute: motor work for the actuator plus changes already applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub moves: Vec<Move>,
    pub overrides: Vec<SafetyOverride>,
    /// Aggregate segments whose displayed position changed.
    pub displayed: Vec<(String, Position)>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty() && self.overrides.is_empty() && self.displayed.is_empty()
    }
}

pub struct BlindSunlightController {
    config: BlindConfig,
    classifier: SunlightLevelClassifier,
    temperature: TemperatureThresholdTracker,
    doors: DoorStateAggregator,
    state: BlindRuntimeState,
    positions: BTreeMap<String, Position>,
}

impl BlindSunlightController {
    pub fn new(
        config: BlindConfig,
        state: BlindRuntimeState,
        positions: &BTreeMap<String, Position>,
        doors: &BTreeMap<String, bool>,
    ) -> Self {
        let classifier = SunlightLevelClassifier::new(config.sunlight_thresholds);
        let temperature = TemperatureThresholdTracker::new(
            config.temp_high,
            config.temp_low,
            config.temp_gap,
            state.temp_outside_threshold,
        );
        let doors = DoorStateAggregator::new(&config.doors, doors);
        let positions = config
            .segments
            .iter()
            .map(|s| (s.id.clone(), positions.get(&s.id).copied().unwrap_or_default()))
            .collect();
        let state = BlindRuntimeState {
            door_open: doors.any_open(),
            ..state
        };
        BlindSunlightController {
            config,
            classifier,
            temperature,
            doors,
            state,
            positions,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BlindConfig {
        &self.config
    }

    pub fn state(&self) -> BlindRuntimeState {
        self.state
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, segment: &str) -> Option<Position> {
        self.positions.get(segment).copied()
    }

    pub fn doors(&self) -> &DoorStateAggregator {
        &self.doors
    }

    /// Full evaluation from a light and an outdoor temperature reading.
    pub fn evaluate(&mut self, lux: u32, temp: f64) -> Plan {
        let level_changed = self.observe_level(lux);
        let flipped = self.observe_temp(temp);
        if level_changed || flipped {
            self.recompute(None)
        } else {
            Plan::default()
        }
    }

    pub fn on_light(&mut self, lux: u32) -> Plan {
        if self.observe_level(lux) {
            self.recompute(None)
        } else {
            Plan::default()
        }
    }

    pub fn on_outdoor_temp(&mut self, temp: f64) -> Plan {
        if self.observe_temp(temp) {
            self.recompute(None)
        } else {
            Plan::default()
        }
    }

    pub fn on_door(&mut self, door: &str, open: bool) -> HubResult<Plan> {
        let edge = self.doors.update(door, open)?;
        self.state.door_open = self.doors.any_open();
        let plan = match edge {
            Some(edge) => {
                info!(blind = %self.config.name, door, ?edge, "door edge");
                self.recompute(Some(edge))
            }
            None => Plan::default(),
        };
        self.release_door_override();
        Ok(plan)
    }

    /// Releasing the override re-applies automation for the current conditions.
    pub fn set_auto_override(&mut self, enabled: bool) -> Plan {
        if self.state.auto_override == enabled {
            return Plan::default();
        }
        info!(blind = %self.config.name, enabled, "auto override");
        self.state.auto_override = enabled;
        if enabled {
            Plan::default()
        } else {
            self.recompute(None)
        }
    }

    fn observe_level(&mut self, lux: u32) -> bool {
        let level = self.classifier.classify(lux);
        if level == self.state.current_level {
            return false;
        }
        info!(blind = %self.config.name, from = self.state.current_level, to = level, lux, "sunlight level");
        self.state.previous_level = self.state.current_level;
        self.state.current_level = level;
        true
    }

    fn observe_temp(&mut self, temp: f64) -> bool {
        let flipped = self.temperature.update(temp);
        self.state.temp_outside_threshold = self.temperature.outside();
        if flipped {
            info!(blind = %self.config.name, temp, outside = self.temperature.outside(), "temperature threshold");
        }
        flipped
    }

    fn recompute(&mut self, edge: Option<DoorEdge>) -> Plan {
        if self.state.auto_override {
            debug!(blind = %self.config.name, "auto override set, holding");
            return Plan::default();
        }
        let desired = self.policy(edge);
        self.resolve(desired)
    }

    fn policy(&self, edge: Option<DoorEdge>) -> Vec<(String, Position)> {
        let every = |p: Position| -> Vec<(String, Position)> {
            self.config.segments.iter().map(|s| (s.id.clone(), p)).collect()
        };
        let door_segments = |p: Position| -> Vec<(String, Position)> {
            self.config
                .segments
                .iter()
                .filter(|s| s.door().is_some())
                .map(|s| (s.id.clone(), p))
                .collect()
        };

        let BlindRuntimeState {
            current_level,
            previous_level,
            temp_outside_threshold: outside,
            ..
        } = self.state;
        match current_level {
            4.. => every(Position::Closed),
            3 if previous_level <= 2 => every(Position::Venetian),
            3 => match edge {
                Some(DoorEdge::Opening) => door_segments(Position::Open),
                Some(DoorEdge::Closing) => door_segments(Position::Closed),
                None => Vec::new(),
            },
            2 if previous_level > 2 => every(Position::Venetian),
            2 if outside => every(Position::Closed),
            2 => every(Position::Open),
            1 if outside && !self.doors.any_open() => every(Position::Venetian),
            1 => every(Position::Open),
            _ => match edge {
                Some(DoorEdge::Opening) => door_segments(Position::Open),
                _ => Vec::new(),
            },
        }
    }

    /// Applies door safety to the desired positions. Aggregates only change what they display.
    pub(crate) fn resolve(&mut self, desired: Vec<(String, Position)>) -> Plan {
        let mut plan = Plan::default();
        for (id, requested) in desired {
            let Some(segment) = self.config.segment(&id) else {
                continue;
            };
            if segment.is_aggregate() {
                if self.positions.get(&id) != Some(&requested) {
                    self.positions.insert(id.clone(), requested);
                    plan.displayed.push((id, requested));
                }
                continue;
            }
            let (target, report) = self.apply_door_safety(segment, requested);
            if let Some(report) = report {
                warn!(blind = %self.config.name, "{}", report);
                plan.overrides.push(report);
            }
            if let Some(target) = target {
                plan.moves.push(Move { segment: id, target });
            }
        }
        if !plan.overrides.is_empty() {
            self.state.door_override = true;
        }
        plan
    }

    /// Target for a physical segment, if it has to move, and the override report
    /// when an open door forced a substitution.
    pub(crate) fn apply_door_safety(
        &self,
        segment: &Segment,
        requested: Position,
    ) -> (Option<Position>, Option<SafetyOverride>) {
        let current = self.position(&segment.id).unwrap_or_default();
        if let SegmentKind::Door { door } = &segment.kind {
            if requested.is_lowered() && self.doors.is_open(door) {
                let report = SafetyOverride {
                    blind: self.config.name.clone(),
                    segment: segment.id.clone(),
                    door: door.clone(),
                    requested,
                    applied: Position::Open,
                };
                return (current.is_lowered().then_some(Position::Open), Some(report));
            }
        }
        ((requested != current).then_some(requested), None)
    }

    /// Records what the actuator achieved. Returns every segment whose position changed.
    pub fn commit(&mut self, execution: &Execution) -> Vec<(String, Position)> {
        let mut changed = Vec::new();
        for (segment, position) in &execution.committed {
            if self.positions.insert(segment.clone(), *position) != Some(*position) {
                changed.push((segment.clone(), *position));
            }
        }
        if !execution.overrides.is_empty() {
            self.state.door_override = true;
        }
        changed.extend(self.sync_aggregates());
        changed
    }

    /// An aggregate whose members agree shows their position.
    fn sync_aggregates(&mut self) -> Vec<(String, Position)> {
        let mut changed = Vec::new();
        for segment in &self.config.segments {
            let SegmentKind::Aggregate { members } = &segment.kind else {
                continue;
            };
            if let Some(first) = self.agreed_position(members) {
                if self.positions.insert(segment.id.clone(), first) != Some(first) {
                    changed.push((segment.id.clone(), first));
                }
            }
        }
        self.release_door_override();
        changed
    }

    fn agreed_position(&self, members: &[String]) -> Option<Position> {
        let mut positions = members.iter().filter_map(|m| self.positions.get(m).copied());
        let first = positions.next()?;
        positions.all(|p| p == first).then_some(first)
    }

    /// The override stays recorded while a door is open or an aggregate disagrees with its members.
    fn release_door_override(&mut self) {
        if !self.state.door_override || self.doors.any_open() {
            return;
        }
        let consistent = self.config.segments.iter().all(|s| match &s.kind {
            SegmentKind::Aggregate { members } => members.is_empty() || self.agreed_position(members).is_some(),
            _ => true,
        });
        if consistent {
            debug!(blind = %self.config.name, "door override released");
            self.state.door_override = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blinds::patio_config;

    fn controller(level: u8, positions: &[(&str, Position)], door_open: bool) -> BlindSunlightController {
        let state = BlindRuntimeState {
            current_level: level,
            previous_level: level,
            ..BlindRuntimeState::default()
        };
        let positions = positions.iter().map(|(s, p)| (s.to_string(), *p)).collect();
        let doors = BTreeMap::from([("Patio Door".to_owned(), door_open)]);
        BlindSunlightController::new(patio_config(), state, &positions, &doors)
    }

    fn targets(plan: &Plan) -> Vec<(&str, Position)> {
        plan.moves.iter().map(|m| (m.segment.as_str(), m.target)).collect()
    }

    /// Commits every move as if the motors did exactly what was asked.
    fn apply(c: &mut BlindSunlightController, plan: &Plan) {
        let execution = Execution {
            committed: plan.moves.iter().map(|m| (m.segment.clone(), m.target)).collect(),
            overrides: Vec::new(),
        };
        c.commit(&execution);
    }

    #[test]
    fn rising_into_level_three_goes_venetian() {
        let mut c = controller(1, &[], false);
        let plan = c.on_light(15000);
        assert_eq!(c.state().current_level, 3);
        assert_eq!(c.state().previous_level, 1);
        assert_eq!(
            targets(&plan),
            vec![
                ("Left", Position::Venetian),
                ("Right", Position::Venetian),
                ("Door", Position::Venetian)
            ]
        );
        assert_eq!(plan.displayed, vec![("All".to_owned(), Position::Venetian)]);
        assert!(plan.overrides.is_empty());
    }

    #[test]
    fn evaluate_twice_is_idempotent() {
        let mut c = controller(1, &[], false);
        let plan = c.evaluate(25000, 20.0);
        assert_eq!(plan.moves.len(), 3);
        apply(&mut c, &plan);
        assert!(c.evaluate(25000, 20.0).is_empty());
        assert_eq!(c.position("All"), Some(Position::Closed));
    }

    #[test]
    fn strong_sun_with_door_open_keeps_door_segment_open() {
        let mut c = controller(2, &[], true);
        let plan = c.on_light(30000);
        assert_eq!(targets(&plan), vec![("Left", Position::Closed), ("Right", Position::Closed)]);
        assert_eq!(plan.overrides.len(), 1);
        assert_eq!(plan.overrides[0].segment, "Door");
        apply(&mut c, &plan);

        assert_eq!(c.position("Door"), Some(Position::Open));
        assert_eq!(c.position("All"), Some(Position::Closed));
        assert!(c.state().door_override);
    }

    #[test]
    fn open_door_raises_a_lowered_door_segment() {
        let closed = [("Left", Position::Closed), ("Right", Position::Closed), ("Door", Position::Closed)];
        let mut c = controller(4, &closed, false);
        let plan = c.on_door("Patio Door", true).unwrap();
        assert_eq!(targets(&plan), vec![("Door", Position::Open)]);
        assert_eq!(plan.overrides.len(), 1);
    }

    #[test]
    fn door_closing_at_level_four_closes_and_clears_override() {
        let mut c = controller(2, &[], true);
        let plan = c.on_light(30000);
        apply(&mut c, &plan);

        let plan = c.on_door("Patio Door", false).unwrap();
        assert_eq!(targets(&plan), vec![("Door", Position::Closed)]);
        apply(&mut c, &plan);
        assert!(!c.state().door_override);
        assert_eq!(c.position("All"), Some(Position::Closed));
    }

    #[test]
    fn level_three_from_above_only_follows_door_edges() {
        let closed = [("Left", Position::Closed), ("Right", Position::Closed), ("Door", Position::Closed)];
        let mut c = controller(4, &closed, false);
        assert!(c.on_light(15000).is_empty());

        let plan = c.on_door("Patio Door", true).unwrap();
        assert_eq!(targets(&plan), vec![("Door", Position::Open)]);
        apply(&mut c, &plan);

        let plan = c.on_door("Patio Door", false).unwrap();
        assert_eq!(targets(&plan), vec![("Door", Position::Closed)]);
    }

    #[test]
    fn level_two_forks_on_arrival_and_temperature() {
        let mut c = controller(1, &[], false);
        c.on_outdoor_temp(20.0);
        let plan = c.on_light(6000);
        assert!(plan.moves.is_empty());

        let mut c = controller(1, &[], false);
        let plan = c.evaluate(6000, 30.0);
        assert_eq!(plan.moves.len(), 3);
        assert!(plan.moves.iter().all(|m| m.target == Position::Closed));
        assert!(!c.state().door_override);

        // Hot and a door open: windows close, the door segment is held open.
        let mut c = controller(1, &[], true);
        let plan = c.evaluate(6000, 30.0);
        assert_eq!(targets(&plan), vec![("Left", Position::Closed), ("Right", Position::Closed)]);
        assert_eq!(plan.overrides.len(), 1);
        assert_eq!(plan.overrides[0].requested, Position::Closed);
        apply(&mut c, &plan);
        assert_eq!(c.position("Door"), Some(Position::Open));
        assert!(c.state().door_override);

        let mut c = controller(3, &[("Left", Position::Venetian)], false);
        let plan = c.evaluate(6000, 20.0);
        assert_eq!(plan.moves.len(), 2);
        assert!(plan.moves.iter().all(|m| m.target == Position::Venetian));
    }

    #[test]
    fn closing_door_releases_override_without_moves() {
        let state = BlindRuntimeState {
            door_override: true,
            ..BlindRuntimeState::default()
        };
        let doors = BTreeMap::from([("Patio Door".to_owned(), true)]);
        let mut c = BlindSunlightController::new(patio_config(), state, &BTreeMap::new(), &doors);

        let plan = c.on_door("Patio Door", false).unwrap();
        assert!(plan.is_empty());
        assert!(!c.state().door_override);
    }

    #[test]
    fn override_kept_while_aggregate_disagrees() {
        let mixed = [("Left", Position::Closed), ("Right", Position::Closed), ("Door", Position::Open)];
        let state = BlindRuntimeState {
            door_override: true,
            ..BlindRuntimeState::default()
        };
        let positions = mixed.iter().map(|(s, p)| (s.to_string(), *p)).collect();
        let doors = BTreeMap::from([("Patio Door".to_owned(), true)]);
        let mut c = BlindSunlightController::new(patio_config(), state, &positions, &doors);

        assert!(c.on_door("Patio Door", false).unwrap().is_empty());
        assert!(c.state().door_override);
    }

    #[test]
    fn level_one_opens_when_a_door_is_open() {
        let venetian = [("Left", Position::Venetian), ("Right", Position::Venetian), ("Door", Position::Venetian)];
        let mut c = controller(2, &venetian, false);
        c.on_outdoor_temp(30.0);
        assert!(c.on_light(1000).is_empty());

        let plan = c.on_door("Patio Door", true).unwrap();
        assert_eq!(plan.moves.len(), 3);
        assert!(plan.moves.iter().all(|m| m.target == Position::Open));
    }

    #[test]
    fn night_only_reacts_to_opening_door() {
        let mut c = controller(0, &[("Door", Position::Venetian), ("Left", Position::Venetian)], false);
        assert!(c.on_outdoor_temp(35.0).is_empty());
        let plan = c.on_door("Patio Door", true).unwrap();
        assert_eq!(targets(&plan), vec![("Door", Position::Open)]);
        apply(&mut c, &plan);
        assert!(c.on_door("Patio Door", false).unwrap().is_empty());
    }

    #[test]
    fn auto_override_holds_until_released() {
        let mut c = controller(1, &[], false);
        assert!(c.set_auto_override(true).is_empty());
        assert!(c.on_light(30000).is_empty());
        assert_eq!(c.state().current_level, 4);

        let plan = c.set_auto_override(false);
        assert_eq!(plan.moves.len(), 3);
        assert!(plan.moves.iter().all(|m| m.target == Position::Closed));
    }

    #[test]
    fn no_door_segment_is_ever_lowered_while_its_door_is_open() {
        for level in 0..=4u8 {
            for lux in [0, 1000, 6000, 15000, 30000] {
                for temp in [5.0, 20.0, 30.0] {
                    let mut c = controller(level, &[], true);
                    let plan = c.evaluate(lux, temp);
                    assert!(
                        !plan.moves.iter().any(|m| m.segment == "Door" && m.target.is_lowered()),
                        "level {} lux {} temp {}",
                        level,
                        lux,
                        temp
                    );
                }
            }
        }
    }
}
