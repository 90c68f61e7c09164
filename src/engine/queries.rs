use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn find_ticket(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.state.read().await.ticket(ticket_id).cloned()
    }

    pub async fn get_vehicle(&self, plate_number: &str) -> Option<Vehicle> {
        self.state.read().await.vehicle(plate_number).cloned()
    }

    /// Does the vehicle already have an open (unpaid) ticket?
    pub async fn unpaid_ticket_exists(&self, plate_number: &str) -> bool {
        self.state
            .read()
            .await
            .unpaid_ticket_for(plate_number)
            .is_some()
    }

    pub async fn get_entry_point(&self, id: EntryPointId) -> Option<EntryPoint> {
        self.state.read().await.entry_point(id).cloned()
    }

    pub async fn list_spaces(&self) -> Vec<Space> {
        self.state.read().await.spaces().cloned().collect()
    }

    pub async fn list_slots(&self, space_id: SpaceId) -> Result<Vec<Slot>, EngineError> {
        let state = self.state.read().await;
        if state.space(space_id).is_none() {
            return Err(EngineError::not_found("space", space_id));
        }
        Ok(state.slots_in(space_id).cloned().collect())
    }

    /// Availability invariant check: a slot is unavailable iff exactly one
    /// unpaid ticket references it. Used by tests and the stress harness.
    pub async fn check_slot_invariant(&self) -> bool {
        let state = self.state.read().await;
        state.spaces().all(|space| {
            state.slots_in(space.id).all(|slot| {
                let open = state.open_tickets_on_slot(slot.id);
                if slot.available { open == 0 } else { open == 1 }
            })
        })
    }
}
