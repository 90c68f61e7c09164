//! Slot selection. The read half of allocation is a pure scan over a space's
//! slots; the write half (the occupy CAS) happens in the issue transaction
//! under the state write guard.

use std::cmp::Ordering;

use crate::model::*;

/// What `find_nearest` hands back to the issue flow: enough to price the
/// ticket plus the optimistic-concurrency token to present to the CAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPick {
    pub slot_id: SlotId,
    pub capacity: Size,
    /// Slot row version observed at read time. The occupy step rejects the
    /// write if the row has changed since.
    pub version: u64,
}

/// Pick the nearest available slot for a vehicle arriving at `entry_point_id`.
///
/// Candidates are available slots in the space with `capacity >= size`.
/// Ordering: smallest distance weight for the entry point, then smallest
/// capacity (tightest fit wastes the fewest large slots), then smallest slot
/// id for determinism.
pub fn find_nearest<'a>(
    slots: impl Iterator<Item = &'a Slot>,
    entry_point_id: EntryPointId,
    size: Size,
) -> Option<SlotPick> {
    slots
        .filter(|slot| slot.available && size.fits_in(slot.capacity))
        .min_by(|a, b| rank(a, entry_point_id).cmp(&rank(b, entry_point_id)))
        .map(|slot| SlotPick {
            slot_id: slot.id,
            capacity: slot.capacity,
            version: slot.version,
        })
}

/// Sort key for candidate slots. Weights live in [0, 1] and are never NaN
/// (validated at slot creation), so `total_cmp` is a plain numeric order.
fn rank(slot: &Slot, entry_point_id: EntryPointId) -> impl Ord {
    (
        F64Ord(slot.weight_for(entry_point_id)),
        slot.capacity,
        slot.id,
    )
}

#[derive(PartialEq)]
struct F64Ord(f64);

// `total_cmp` is a total order, so equality is reflexive here.
impl Eq for F64Ord {}

impl PartialOrd for F64Ord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for F64Ord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn slot(id: SlotId, capacity: Size, weight: f64) -> Slot {
        Slot {
            id,
            space_id: 1,
            capacity,
            available: true,
            distance: BTreeMap::from([(1, weight)]),
            version: 0,
        }
    }

    #[test]
    fn picks_smallest_distance() {
        let slots = vec![
            slot(1, Size::Small, 0.8),
            slot(2, Size::Small, 0.2),
            slot(3, Size::Small, 0.5),
        ];
        let pick = find_nearest(slots.iter(), 1, Size::Small).unwrap();
        assert_eq!(pick.slot_id, 2);
    }

    #[test]
    fn distance_tie_prefers_tightest_fit() {
        let slots = vec![slot(1, Size::Large, 0.3), slot(2, Size::Medium, 0.3)];
        let pick = find_nearest(slots.iter(), 1, Size::Small).unwrap();
        assert_eq!(pick.slot_id, 2);
    }

    #[test]
    fn full_tie_prefers_smallest_id() {
        let slots = vec![slot(9, Size::Small, 0.3), slot(4, Size::Small, 0.3)];
        let pick = find_nearest(slots.iter(), 1, Size::Small).unwrap();
        assert_eq!(pick.slot_id, 4);
    }

    #[test]
    fn skips_occupied_and_undersized() {
        let mut occupied = slot(1, Size::Large, 0.1);
        occupied.available = false;
        let slots = vec![occupied, slot(2, Size::Small, 0.2), slot(3, Size::Medium, 0.9)];
        // A medium vehicle cannot take the small slot even though it's nearer.
        let pick = find_nearest(slots.iter(), 1, Size::Medium).unwrap();
        assert_eq!(pick.slot_id, 3);
    }

    #[test]
    fn none_when_no_candidate() {
        let slots = vec![slot(1, Size::Small, 0.1), slot(2, Size::Medium, 0.2)];
        assert_eq!(find_nearest(slots.iter(), 1, Size::Large), None);
    }

    #[test]
    fn missing_entry_point_weight_ranks_farthest() {
        let mut unmapped = slot(1, Size::Small, 0.0);
        unmapped.distance.clear();
        let slots = vec![unmapped, slot(2, Size::Small, 0.9)];
        let pick = find_nearest(slots.iter(), 1, Size::Small).unwrap();
        assert_eq!(pick.slot_id, 2);
    }

    #[test]
    fn pick_carries_observed_version() {
        let mut s = slot(1, Size::Small, 0.5);
        s.version = 7;
        let pick = find_nearest([&s].into_iter(), 1, Size::Small).unwrap();
        assert_eq!(pick.version, 7);
    }
}
