use tracing::warn;

use crate::blinds::{BlindSunlightController, Move, Plan, Position, SegmentKind};
use crate::error::{HubError, HubResult};

/// Applies an explicit user request for one segment.
///
/// Open always goes through. Lowering a door segment while its door is open is
/// refused with `SafetyOverride`; lowering an aggregate lowers what it safely can
/// and reports the door segments it had to hold open.
pub fn apply(controller: &mut BlindSunlightController, segment: &str, requested: Position) -> HubResult<Plan> {
    let segment = controller
        .config()
        .segment(segment)
        .cloned()
        .ok_or_else(|| HubError::UnknownEntity {
            kind: "segment",
            name: format!("{}/{}", controller.name(), segment),
        })?;

    if let SegmentKind::Aggregate { members } = &segment.kind {
        let mut desired: Vec<(String, Position)> = members.iter().map(|m| (m.clone(), requested)).collect();
        desired.push((segment.id.clone(), requested));
        return Ok(controller.resolve(desired));
    }

    let (target, report) = controller.apply_door_safety(&segment, requested);
    if let Some(report) = report {
        warn!(blind = %controller.name(), "{}", report);
        return Err(HubError::SafetyOverride(report));
    }
    Ok(Plan {
        moves: target
            .map(|target| Move {
                segment: segment.id.clone(),
                target,
            })
            .into_iter()
            .collect(),
        ..Plan::default()
    })
}
