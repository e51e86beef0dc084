use std::collections::BTreeMap;

use crate::error::{HubError, HubResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorEdge {
    /// A door opened while all were closed.
    Opening,
    /// The last open door closed.
    Closing,
}

/// Open/closed state of the doors relevant to one blind.
#[derive(Debug, Clone)]
pub struct DoorStateAggregator {
    doors: BTreeMap<String, bool>,
}

impl DoorStateAggregator {
    pub fn new(doors: &[String], known: &BTreeMap<String, bool>) -> Self {
        let doors = doors
            .iter()
            .map(|d| (d.clone(), known.get(d).copied().unwrap_or(false)))
            .collect();
        DoorStateAggregator { doors }
    }

    pub fn watches(&self, door: &str) -> bool {
        self.doors.contains_key(door)
    }

    pub fn is_open(&self, door: &str) -> bool {
        self.doors.get(door).copied().unwrap_or(false)
    }

    pub fn any_open(&self) -> bool {
        self.doors.values().any(|open| *open)
    }

    /// Records a report. Only a change of the any-open aggregate is an edge.
    pub fn update(&mut self, door: &str, open: bool) -> HubResult<Option<DoorEdge>> {
        let was_open = self.any_open();
        let state = self.doors.get_mut(door).ok_or_else(|| HubError::UnknownEntity {
            kind: "door",
            name: door.to_owned(),
        })?;
        *state = open;
        Ok(match (was_open, self.any_open()) {
            (false, true) => Some(DoorEdge::Opening),
            (true, false) => Some(DoorEdge::Closing),
            _ => None,
        })
    }

    pub fn states(&self) -> &BTreeMap<String, bool> {
        &self.doors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_doors() -> DoorStateAggregator {
        DoorStateAggregator::new(&["Patio".to_owned(), "Side".to_owned()], &BTreeMap::new())
    }

    #[test]
    fn edges_follow_the_aggregate() {
        let mut doors = two_doors();
        assert_eq!(doors.update("Patio", true), Ok(Some(DoorEdge::Opening)));
        // Second door toggling while one is already open is not an edge.
        assert_eq!(doors.update("Side", true), Ok(None));
        assert_eq!(doors.update("Patio", false), Ok(None));
        assert_eq!(doors.update("Side", false), Ok(Some(DoorEdge::Closing)));
        assert_eq!(doors.update("Side", false), Ok(None));
    }

    #[test]
    fn restores_known_state() {
        let known = BTreeMap::from([("Side".to_owned(), true), ("Garage".to_owned(), true)]);
        let doors = DoorStateAggregator::new(&["Patio".to_owned(), "Side".to_owned()], &known);
        assert!(doors.any_open());
        assert!(doors.is_open("Side"));
        assert!(!doors.watches("Garage"));
    }

    #[test]
    fn unknown_door() {
        let mut doors = two_doors();
        assert!(matches!(doors.update("Garage", true), Err(HubError::UnknownEntity { .. })));
    }
}
