use hub_protocol::blind::send_blind_command;
use hub_protocol::protos::generated::hub::BlindDirection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::blinds::{BlindConfig, Move, Position, SafetyOverride, SegmentKind};
use crate::clock::Clock;
use crate::error::{HubError, HubResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Stop,
}

impl From<Direction> for BlindDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => BlindDirection::UP,
            Direction::Down => BlindDirection::DOWN,
            Direction::Stop => BlindDirection::STOP,
        }
    }
}

/// Delivers one motor command to the blind controller.
pub trait BlindLink: Send {
    fn send(&mut self, blind: &str, segment: &str, direction: Direction) -> HubResult<()>;
}

pub struct TcpBlindLink {
    addr: String,
}

impl TcpBlindLink {
    pub fn new(addr: &str) -> Self {
        TcpBlindLink { addr: addr.to_owned() }
    }
}

impl BlindLink for TcpBlindLink {
    fn send(&mut self, blind: &str, segment: &str, direction: Direction) -> HubResult<()> {
        send_blind_command(&self.addr, blind, segment, direction.into()).map_err(|e| HubError::Comms {
            peer: self.addr.clone(),
            reason: format!("{:#}", e),
        })
    }
}

/// Door reports that arrived while a close sequence was running.
pub trait DoorProbe {
    /// Latest reported state of `door` since the sequence began, if any.
    fn door_report(&mut self, door: &str) -> Option<bool>;
}

/// What a run of moves achieved. Segments whose commands failed are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub committed: Vec<(String, Position)>,
    pub overrides: Vec<SafetyOverride>,
}

pub struct BlindActuator {
    link: Box<dyn BlindLink>,
    clock: Arc<dyn Clock>,
    failing: bool,
}

impl BlindActuator {
    pub fn new(link: Box<dyn BlindLink>, clock: Arc<dyn Clock>) -> Self {
        BlindActuator {
            link,
            clock,
            failing: false,
        }
    }

    /// Sends one command. Failures are logged once per streak.
    pub fn move_segment(&mut self, blind: &str, segment: &str, direction: Direction) -> HubResult<()> {
        debug!(blind, segment, ?direction, "blind command");
        match self.link.send(blind, segment, direction) {
            Ok(()) => {
                if self.failing {
                    info!("blind controller reachable again");
                    self.failing = false;
                }
                Ok(())
            }
            Err(e) => {
                if !self.failing {
                    warn!(blind, segment, "{}", e);
                    self.failing = true;
                }
                Err(e)
            }
        }
    }

    /// Raises first, then lowers. Venetian tilts and door segments go through the door watch.
    pub fn execute(&mut self, config: &BlindConfig, moves: &[Move], probe: &mut dyn DoorProbe) -> Execution {
        let mut execution = Execution::default();
        let mut watched = Vec::new();

        for m in moves.iter().filter(|m| m.target == Position::Open) {
            if self.move_segment(&config.name, &m.segment, Direction::Up).is_ok() {
                execution.committed.push((m.segment.clone(), Position::Open));
            }
        }
        for m in moves.iter().filter(|m| m.target.is_lowered()) {
            let is_window = matches!(config.segment(&m.segment).map(|s| &s.kind), Some(SegmentKind::Window));
            if is_window && m.target == Position::Closed {
                if self.move_segment(&config.name, &m.segment, Direction::Down).is_ok() {
                    execution.committed.push((m.segment.clone(), Position::Closed));
                }
            } else {
                watched.push(m.clone());
            }
        }
        if !watched.is_empty() {
            let watch = self.close_with_door_watch(config, &watched, probe);
            execution.committed.extend(watch.committed);
            execution.overrides.extend(watch.overrides);
        }
        execution
    }

    /// Lowers the segments for `close_duration` while watching their doors. A door
    /// opening sends its segments straight back up. Everything still lowered at the end
    /// is reversed, then stopped after the tilt time for Venetian.
    pub fn close_with_door_watch(
        &mut self,
        config: &BlindConfig,
        moves: &[Move],
        probe: &mut dyn DoorProbe,
    ) -> Execution {
        let mut execution = Execution::default();
        let mut lowering: Vec<(Move, Option<String>)> = Vec::new();
        for m in moves {
            if self.move_segment(&config.name, &m.segment, Direction::Down).is_ok() {
                let door = config.segment(&m.segment).and_then(|s| s.door()).map(str::to_owned);
                lowering.push((m.clone(), door));
            }
        }
        if lowering.is_empty() {
            return execution;
        }

        let started = self.clock.now();
        let deadline = started + chrono::Duration::from_std(config.close_duration).unwrap_or_else(|_| chrono::Duration::zero());
        loop {
            let now = self.clock.now();
            if now >= deadline || lowering.is_empty() {
                break;
            }
            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            self.clock.sleep(config.poll_interval.min(remaining));

            let mut i = 0;
            while i < lowering.len() {
                let opened = match &lowering[i].1 {
                    Some(door) => probe.door_report(door) == Some(true),
                    None => false,
                };
                if !opened {
                    i += 1;
                    continue;
                }
                let (m, door) = lowering.remove(i);
                let door = door.unwrap_or_default();
                let elapsed = (self.clock.now() - started).num_milliseconds();
                warn!(blind = %config.name, segment = %m.segment, door = %door, elapsed_ms = elapsed, "door opened while closing, reversing");
                if self.move_segment(&config.name, &m.segment, Direction::Up).is_ok() {
                    execution.committed.push((m.segment.clone(), Position::Open));
                }
                execution.overrides.push(SafetyOverride {
                    blind: config.name.clone(),
                    segment: m.segment,
                    door,
                    requested: m.target,
                    applied: Position::Open,
                });
            }
        }

        let (venetian, closed): (Vec<_>, Vec<_>) =
            lowering.into_iter().partition(|(m, _)| m.target == Position::Venetian);
        for (m, _) in closed {
            if self.move_segment(&config.name, &m.segment, Direction::Up).is_ok()
                && self.move_segment(&config.name, &m.segment, Direction::Stop).is_ok()
            {
                execution.committed.push((m.segment, Position::Closed));
            }
        }
        let tilting: Vec<Move> = venetian
            .into_iter()
            .filter(|(m, _)| self.move_segment(&config.name, &m.segment, Direction::Up).is_ok())
            .map(|(m, _)| m)
            .collect();
        if !tilting.is_empty() {
            self.clock.sleep(config.tilt_time);
        }
        for m in tilting {
            if self.move_segment(&config.name, &m.segment, Direction::Stop).is_ok() {
                execution.committed.push((m.segment, Position::Venetian));
            }
        }
        execution
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingLink, ScriptedProbe};
    use super::*;
    use crate::blinds::patio_config;
    use crate::clock::fake::FakeClock;

    fn setup() -> (Arc<FakeClock>, RecordingLink, BlindActuator) {
        let clock = Arc::new(FakeClock::at(2026, 10, 19, 13, 0));
        let link = RecordingLink::new(clock.clone());
        let actuator = BlindActuator::new(Box::new(link.clone()), clock.clone());
        (clock, link, actuator)
    }

    fn probe(clock: &Arc<FakeClock>, opens_after: Option<chrono::Duration>) -> ScriptedProbe {
        ScriptedProbe {
            clock: clock.clone(),
            door: "Patio Door".to_owned(),
            opens_at: opens_after.map(|d| clock.now() + d),
        }
    }

    fn mv(segment: &str, target: Position) -> Move {
        Move {
            segment: segment.to_owned(),
            target,
        }
    }

    #[test]
    fn door_opening_mid_close_reverses_immediately() {
        let (clock, link, mut actuator) = setup();
        let start = clock.now();
        let mut probe = probe(&clock, Some(chrono::Duration::seconds(3)));

        let execution = actuator.execute(&patio_config(), &[mv("Door", Position::Closed)], &mut probe);

        assert_eq!(execution.committed, vec![("Door".to_owned(), Position::Open)]);
        assert_eq!(execution.overrides.len(), 1);
        assert_eq!(execution.overrides[0].requested, Position::Closed);
        assert_eq!(link.commands(), vec![("Door".to_owned(), Direction::Down), ("Door".to_owned(), Direction::Up)]);

        // Reversed within one poll of the door opening.
        let sent = link.sent.lock().unwrap();
        let reversed_at = sent[1].2 - start;
        assert!(reversed_at >= chrono::Duration::seconds(3));
        assert!(reversed_at <= chrono::Duration::milliseconds(3500));
    }

    #[test]
    fn venetian_is_reversed_then_stopped() {
        let (clock, link, mut actuator) = setup();
        let start = clock.now();
        let mut probe = probe(&clock, None);
        let moves = [mv("Left", Position::Venetian), mv("Door", Position::Venetian)];

        let execution = actuator.execute(&patio_config(), &moves, &mut probe);

        assert_eq!(
            execution.committed,
            vec![("Left".to_owned(), Position::Venetian), ("Door".to_owned(), Position::Venetian)]
        );
        assert_eq!(
            link.commands(),
            vec![
                ("Left".to_owned(), Direction::Down),
                ("Door".to_owned(), Direction::Down),
                ("Left".to_owned(), Direction::Up),
                ("Door".to_owned(), Direction::Up),
                ("Left".to_owned(), Direction::Stop),
                ("Door".to_owned(), Direction::Stop),
            ]
        );
        assert_eq!(clock.now() - start, chrono::Duration::seconds(27));
    }

    #[test]
    fn window_close_and_open_need_no_watch() {
        let (clock, link, mut actuator) = setup();
        let start = clock.now();
        let mut probe = probe(&clock, None);
        let moves = [mv("Left", Position::Closed), mv("Right", Position::Open)];

        let execution = actuator.execute(&patio_config(), &moves, &mut probe);
        assert_eq!(execution.committed.len(), 2);
        assert_eq!(
            link.commands(),
            vec![("Right".to_owned(), Direction::Up), ("Left".to_owned(), Direction::Down)]
        );
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn failed_commands_keep_previous_position() {
        let (clock, mut link, _) = setup();
        link.fail = true;
        let mut actuator = BlindActuator::new(Box::new(link), clock.clone());
        let mut probe = probe(&clock, None);

        let execution = actuator.execute(&patio_config(), &[mv("Door", Position::Venetian)], &mut probe);
        assert!(execution.committed.is_empty());
        assert!(matches!(
            actuator.move_segment("Patio", "Left", Direction::Up),
            Err(HubError::Comms { .. })
        ));
    }
}
