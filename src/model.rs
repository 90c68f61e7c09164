use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Money in the smallest currency unit. Rates are whole units, so plain
/// integer arithmetic is exact.
pub type Amount = i64;

pub type SpaceId = u32;
pub type EntryPointId = u32;
pub type SlotId = u32;
pub type TicketId = u32;

/// Plate number — the vehicle's natural key.
pub type VehicleId = String;

/// Vehicle size and slot capacity share one closed, totally ordered set.
/// A vehicle fits a slot iff `slot.capacity >= vehicle.size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Size {
    Small,
    Medium,
    Large,
}

impl Size {
    pub const ALL: [Size; 3] = [Size::Small, Size::Medium, Size::Large];

    /// Integer value used at storage boundaries. Never compare raw ordinals
    /// outside this type — use the derived `Ord` instead.
    pub fn ordinal(self) -> u8 {
        match self {
            Size::Small => 0,
            Size::Medium => 1,
            Size::Large => 2,
        }
    }

    pub fn from_ordinal(value: u8) -> Option<Size> {
        match value {
            0 => Some(Size::Small),
            1 => Some(Size::Medium),
            2 => Some(Size::Large),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Size::Small => "small",
            Size::Medium => "medium",
            Size::Large => "large",
        }
    }

    pub fn parse(label: &str) -> Option<Size> {
        match label {
            "small" => Some(Size::Small),
            "medium" => Some(Size::Medium),
            "large" => Some(Size::Large),
            _ => None,
        }
    }

    /// Fit predicate: can a vehicle of this size park in a slot of `capacity`?
    pub fn fits_in(self, capacity: Size) -> bool {
        capacity >= self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
}

/// A named ingress to a space, the origin for slot distance weighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub id: EntryPointId,
    pub space_id: SpaceId,
    pub label: String,
}

/// A parking slot. `distance` maps entry-point id → weight in [0, 1]
/// (0 = right at the entry, 1 = maximally far). Sparse by design: entry
/// points can be added after slots exist, so the map is merged, never
/// reshaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub space_id: SpaceId,
    pub capacity: Size,
    pub available: bool,
    pub distance: BTreeMap<EntryPointId, f64>,
    /// Monotonic per-row version, bumped on every write. Serves as the
    /// optimistic-concurrency token for the occupy CAS.
    pub version: u64,
}

impl Slot {
    /// Distance weight for an entry point. A missing key reads as 1.0
    /// (maximally far), matching the default used when entry points are
    /// merged into pre-existing slots.
    pub fn weight_for(&self, entry_point_id: EntryPointId) -> f64 {
        self.distance.get(&entry_point_id).copied().unwrap_or(1.0)
    }
}

/// Request-side shape for bulk slot creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub capacity: Size,
    #[serde(default, deserialize_with = "distance_keys")]
    pub distance: BTreeMap<EntryPointId, f64>,
}

/// JSON object keys are strings, and the tagged request enum buffers its
/// content in a way that loses serde_json's string-to-integer key
/// conversion. Accept string keys and parse them into entry-point ids.
fn distance_keys<'de, D>(deserializer: D) -> Result<BTreeMap<EntryPointId, f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    BTreeMap::<String, f64>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, weight)| {
            key.parse::<EntryPointId>()
                .map(|id| (id, weight))
                .map_err(|_| D::Error::custom(format!("invalid entry point id key: {key:?}")))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub size: Size,
    /// Stamped at settlement, and only when a flat rate was actually
    /// charged — the input to the grace-period rule.
    pub last_departed_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub slot_id: SlotId,
    pub vehicle_id: VehicleId,
    /// Hourly rate snapshot taken at issuance. Immutable afterwards.
    pub rate: Amount,
    pub paid: bool,
    pub amount: Option<Amount>,
    pub started_at: Ms,
    pub ended_at: Option<Ms>,
}

/// The event types — flat, no nesting. This is the WAL record format.
/// One event per top-level operation, so a replayed log never exposes a
/// half-applied transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SpaceCreated {
        space: Space,
        entry_points: Vec<EntryPoint>,
    },
    EntryPointAdded {
        entry_point: EntryPoint,
    },
    SlotsCreated {
        slots: Vec<Slot>,
    },
    VehicleUpserted {
        id: VehicleId,
        size: Size,
        /// None on a live upsert; carries the stored clock when the event is
        /// rebuilt by WAL compaction.
        last_departed_at: Option<Ms>,
    },
    TicketIssued {
        ticket: Ticket,
    },
    TicketSettled {
        ticket_id: TicketId,
        slot_id: SlotId,
        vehicle_id: VehicleId,
        amount: Amount,
        ended_at: Ms,
        flat_charged: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_total_order() {
        assert!(Size::Small < Size::Medium);
        assert!(Size::Medium < Size::Large);
        assert_eq!(Size::Medium.max(Size::Small), Size::Medium);
    }

    #[test]
    fn size_fit_predicate() {
        assert!(Size::Small.fits_in(Size::Small));
        assert!(Size::Small.fits_in(Size::Large));
        assert!(Size::Large.fits_in(Size::Large));
        assert!(!Size::Large.fits_in(Size::Medium));
        assert!(!Size::Medium.fits_in(Size::Small));
    }

    #[test]
    fn size_ordinal_roundtrip() {
        for size in Size::ALL {
            assert_eq!(Size::from_ordinal(size.ordinal()), Some(size));
        }
        assert_eq!(Size::from_ordinal(3), None);
    }

    #[test]
    fn size_labels() {
        for size in Size::ALL {
            assert_eq!(Size::parse(size.label()), Some(size));
        }
        assert_eq!(Size::parse("extra_large"), None);
        assert_eq!(Size::parse("SMALL"), None); // labels are lowercase
    }

    #[test]
    fn slot_weight_defaults_to_farthest() {
        let slot = Slot {
            id: 1,
            space_id: 1,
            capacity: Size::Small,
            available: true,
            distance: BTreeMap::from([(1, 0.25)]),
            version: 0,
        };
        assert_eq!(slot.weight_for(1), 0.25);
        assert_eq!(slot.weight_for(2), 1.0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::TicketIssued {
            ticket: Ticket {
                id: 7,
                slot_id: 3,
                vehicle_id: "ABC 1234".into(),
                rate: 20,
                paid: false,
                amount: None,
                started_at: 1_700_000_000_000,
                ended_at: None,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn slot_spec_distance_keys_from_json_strings() {
        let spec: SlotSpec =
            serde_json::from_str(r#"{"capacity":"medium","distance":{"3":0.5}}"#).unwrap();
        assert_eq!(spec.capacity, Size::Medium);
        assert_eq!(spec.distance, BTreeMap::from([(3, 0.5)]));

        let bare: SlotSpec = serde_json::from_str(r#"{"capacity":"small"}"#).unwrap();
        assert!(bare.distance.is_empty());
    }

    #[test]
    fn size_json_form_is_lowercase() {
        assert_eq!(serde_json::to_string(&Size::Medium).unwrap(), "\"medium\"");
        let parsed: Size = serde_json::from_str("\"large\"").unwrap();
        assert_eq!(parsed, Size::Large);
    }
}
