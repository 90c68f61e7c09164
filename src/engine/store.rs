use std::collections::{BTreeMap, HashMap};

use crate::model::*;

/// The whole facility's persistent state, rebuilt from the WAL on startup.
/// One instance lives behind the engine's `RwLock`; mutation happens only by
/// applying events under the write guard, so disk and memory never diverge.
#[derive(Debug, Default)]
pub struct FacilityState {
    spaces: BTreeMap<SpaceId, Space>,
    entry_points: BTreeMap<EntryPointId, EntryPoint>,
    slots: BTreeMap<SlotId, Slot>,
    vehicles: HashMap<VehicleId, Vehicle>,
    tickets: BTreeMap<TicketId, Ticket>,
    /// Index: vehicle id → its open (unpaid) ticket, at most one per vehicle.
    unpaid_by_vehicle: HashMap<VehicleId, TicketId>,
    next_space_id: SpaceId,
    next_entry_point_id: EntryPointId,
    next_slot_id: SlotId,
    next_ticket_id: TicketId,
}

impl FacilityState {
    pub fn new() -> Self {
        Self {
            next_space_id: 1,
            next_entry_point_id: 1,
            next_slot_id: 1,
            next_ticket_id: 1,
            ..Self::default()
        }
    }

    // ── ID allocation ────────────────────────────────────────
    //
    // IDs are reserved while building an event under the write guard; the
    // counters advance when the event is applied, so replay reconstructs
    // them from the log alone.

    pub fn peek_space_id(&self) -> SpaceId {
        self.next_space_id
    }

    pub fn peek_entry_point_ids(&self, count: u32) -> impl Iterator<Item = EntryPointId> {
        self.next_entry_point_id..self.next_entry_point_id + count
    }

    pub fn peek_slot_ids(&self, count: u32) -> impl Iterator<Item = SlotId> {
        self.next_slot_id..self.next_slot_id + count
    }

    pub fn peek_ticket_id(&self) -> TicketId {
        self.next_ticket_id
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn space(&self, id: SpaceId) -> Option<&Space> {
        self.spaces.get(&id)
    }

    pub fn spaces(&self) -> impl Iterator<Item = &Space> {
        self.spaces.values()
    }

    pub fn space_name_taken(&self, name: &str) -> bool {
        self.spaces.values().any(|s| s.name == name)
    }

    pub fn entry_point(&self, id: EntryPointId) -> Option<&EntryPoint> {
        self.entry_points.get(&id)
    }

    pub fn entry_points_in(&self, space_id: SpaceId) -> impl Iterator<Item = &EntryPoint> {
        self.entry_points.values().filter(move |e| e.space_id == space_id)
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn slots_in(&self, space_id: SpaceId) -> impl Iterator<Item = &Slot> {
        self.slots.values().filter(move |s| s.space_id == space_id)
    }

    pub fn vehicle(&self, id: &str) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    pub fn ticket(&self, id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&id)
    }

    /// Tickets in issuance order.
    pub fn tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    pub fn unpaid_ticket_for(&self, vehicle_id: &str) -> Option<&Ticket> {
        self.unpaid_by_vehicle
            .get(vehicle_id)
            .and_then(|tid| self.tickets.get(tid))
    }

    /// Unpaid tickets referencing a slot. The availability invariant says
    /// this is exactly one iff the slot is occupied; exposed for tests.
    pub fn open_tickets_on_slot(&self, slot_id: SlotId) -> usize {
        self.tickets
            .values()
            .filter(|t| t.slot_id == slot_id && !t.paid)
            .count()
    }

    // ── Event application ────────────────────────────────────

    /// Apply one committed event. Must stay total and deterministic: replay
    /// calls this with historical events and has no way to reject them.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::SpaceCreated { space, entry_points } => {
                self.next_space_id = self.next_space_id.max(space.id + 1);
                self.spaces.insert(space.id, space.clone());
                for ep in entry_points {
                    self.next_entry_point_id = self.next_entry_point_id.max(ep.id + 1);
                    self.entry_points.insert(ep.id, ep.clone());
                }
            }
            Event::EntryPointAdded { entry_point } => {
                self.next_entry_point_id = self.next_entry_point_id.max(entry_point.id + 1);
                // Migration side effect: every existing slot in the space
                // learns the new entry point at weight 1.0 (maximally far).
                for slot in self.slots.values_mut() {
                    if slot.space_id == entry_point.space_id {
                        slot.distance.insert(entry_point.id, 1.0);
                    }
                }
                self.entry_points.insert(entry_point.id, entry_point.clone());
            }
            Event::SlotsCreated { slots } => {
                for slot in slots {
                    self.next_slot_id = self.next_slot_id.max(slot.id + 1);
                    self.slots.insert(slot.id, slot.clone());
                }
            }
            Event::VehicleUpserted { id, size, last_departed_at } => {
                // Idempotent: a repeat plate keeps the originally recorded
                // size and departure timestamp.
                self.vehicles.entry(id.clone()).or_insert_with(|| Vehicle {
                    id: id.clone(),
                    size: *size,
                    last_departed_at: *last_departed_at,
                });
            }
            Event::TicketIssued { ticket } => {
                self.next_ticket_id = self.next_ticket_id.max(ticket.id + 1);
                // A paid ticket only appears here via compaction; it holds
                // no slot and no spot in the unpaid index.
                if !ticket.paid {
                    if let Some(slot) = self.slots.get_mut(&ticket.slot_id) {
                        slot.available = false;
                        slot.version += 1;
                    }
                    self.unpaid_by_vehicle
                        .insert(ticket.vehicle_id.clone(), ticket.id);
                }
                self.tickets.insert(ticket.id, ticket.clone());
            }
            Event::TicketSettled {
                ticket_id,
                slot_id,
                vehicle_id,
                amount,
                ended_at,
                flat_charged,
            } => {
                if let Some(ticket) = self.tickets.get_mut(ticket_id) {
                    ticket.paid = true;
                    ticket.amount = Some(*amount);
                    ticket.ended_at = Some(*ended_at);
                }
                if let Some(slot) = self.slots.get_mut(slot_id) {
                    slot.available = true;
                    slot.version += 1;
                }
                self.unpaid_by_vehicle.remove(vehicle_id);
                if *flat_charged
                    && let Some(vehicle) = self.vehicles.get_mut(vehicle_id)
                {
                    vehicle.last_departed_at = Some(*ended_at);
                }
            }
        }
    }
}
