use tokio::sync::oneshot;

use crate::model::*;

use super::{Engine, EngineError, WalCommand, allocator, billing, now_ms};

impl Engine {
    /// Create a space together with its initial entry points. A space is
    /// never without an entry point — slots would be unreachable.
    pub async fn create_space(
        &self,
        name: &str,
        entry_point_labels: &[String],
    ) -> Result<(Space, Vec<EntryPoint>), EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::BadRequest("invalid_space_name"));
        }
        if entry_point_labels.is_empty() {
            return Err(EngineError::BadRequest("no_entry_points"));
        }

        let mut state = self.state.write().await;
        if state.space_name_taken(name) {
            return Err(EngineError::BadRequest("space_name_taken"));
        }

        let space = Space {
            id: state.peek_space_id(),
            name: name.to_string(),
        };
        let entry_points: Vec<EntryPoint> = state
            .peek_entry_point_ids(entry_point_labels.len() as u32)
            .zip(entry_point_labels)
            .map(|(id, label)| EntryPoint {
                id,
                space_id: space.id,
                label: label.clone(),
            })
            .collect();

        let event = Event::SpaceCreated {
            space: space.clone(),
            entry_points: entry_points.clone(),
        };
        self.persist_and_apply(&mut state, event).await?;
        Ok((space, entry_points))
    }

    /// Add an entry point to an existing space. Every slot already in the
    /// space learns the new entry point at weight 1.0 — a bulk merge over
    /// the distance maps, O(slots in space). Entry points are added rarely,
    /// so the scan cost is accepted.
    pub async fn add_entry_point(
        &self,
        space_id: SpaceId,
        label: &str,
    ) -> Result<EntryPoint, EngineError> {
        let mut state = self.state.write().await;
        if state.space(space_id).is_none() {
            return Err(EngineError::not_found("space", space_id));
        }

        let entry_point = EntryPoint {
            id: state.peek_entry_point_ids(1).next().unwrap_or_default(),
            space_id,
            label: label.to_string(),
        };
        let event = Event::EntryPointAdded {
            entry_point: entry_point.clone(),
        };
        self.persist_and_apply(&mut state, event).await?;
        Ok(entry_point)
    }

    /// Bulk-create slots in a space. Distance weights must be in [0, 1] and
    /// reference entry points of the same space; entry points a spec leaves
    /// out default to 1.0. All slots start available.
    pub async fn create_slots(
        &self,
        space_id: SpaceId,
        specs: &[SlotSpec],
    ) -> Result<Vec<Slot>, EngineError> {
        if specs.is_empty() {
            return Err(EngineError::BadRequest("no_slots"));
        }

        let mut state = self.state.write().await;
        if state.space(space_id).is_none() {
            return Err(EngineError::not_found("space", space_id));
        }
        let entry_point_ids: Vec<EntryPointId> =
            state.entry_points_in(space_id).map(|e| e.id).collect();

        for spec in specs {
            for (&ep_id, &weight) in &spec.distance {
                if !entry_point_ids.contains(&ep_id) {
                    return Err(EngineError::BadRequest("unknown_entry_point"));
                }
                if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                    return Err(EngineError::BadRequest("invalid_distance"));
                }
            }
        }

        let slots: Vec<Slot> = state
            .peek_slot_ids(specs.len() as u32)
            .zip(specs)
            .map(|(id, spec)| {
                let mut distance = spec.distance.clone();
                for &ep_id in &entry_point_ids {
                    distance.entry(ep_id).or_insert(1.0);
                }
                Slot {
                    id,
                    space_id,
                    capacity: spec.capacity,
                    available: true,
                    distance,
                    version: 0,
                }
            })
            .collect();

        let event = Event::SlotsCreated { slots: slots.clone() };
        self.persist_and_apply(&mut state, event).await?;
        Ok(slots)
    }

    /// Issue a ticket for a vehicle arriving at an entry point.
    ///
    /// The allocation read and the occupy write are deliberately separate:
    /// two concurrent calls may both pick the same slot, and the version CAS
    /// inside the write guard lets exactly one of them commit. The loser
    /// surfaces `no_available_slots` — no internal retry, the caller decides
    /// whether to re-run the flow.
    pub async fn issue_ticket(
        &self,
        entry_point_id: EntryPointId,
        plate_number: &str,
        declared_size: Size,
    ) -> Result<Ticket, EngineError> {
        if plate_number.trim().is_empty() {
            return Err(EngineError::BadRequest("invalid_plate_number"));
        }

        let space_id = {
            let state = self.state.read().await;
            state
                .entry_point(entry_point_id)
                .map(|ep| ep.space_id)
                .ok_or_else(|| EngineError::not_found("entry_point", entry_point_id))?
        };

        // Idempotent upsert: a repeat plate keeps its originally recorded
        // size, whatever the driver declared this time. The recorded size is
        // what allocation fits against.
        let vehicle_size = {
            let mut state = self.state.write().await;
            if state.vehicle(plate_number).is_none() {
                let event = Event::VehicleUpserted {
                    id: plate_number.to_string(),
                    size: declared_size,
                    last_departed_at: None,
                };
                self.persist_and_apply(&mut state, event).await?;
            }
            state.vehicle(plate_number).map(|v| v.size).unwrap_or(declared_size)
        };

        let pick = {
            let state = self.state.read().await;
            if state.unpaid_ticket_for(plate_number).is_some() {
                return Err(EngineError::BadRequest("already_parked"));
            }
            allocator::find_nearest(state.slots_in(space_id), entry_point_id, vehicle_size)
                .ok_or(EngineError::BadRequest("no_available_slots"))?
        };

        // Transaction: create the ticket and occupy the slot, atomically.
        let mut state = self.state.write().await;

        let (available, version) = state
            .slot(pick.slot_id)
            .map(|s| (s.available, s.version))
            .ok_or(EngineError::BadRequest("no_available_slots"))?;
        if !available || version != pick.version {
            // Someone else took the slot between our read and this write.
            metrics::counter!(crate::observability::ALLOCATION_CAS_LOSSES_TOTAL).increment(1);
            return Err(EngineError::BadRequest("no_available_slots"));
        }
        if state.unpaid_ticket_for(plate_number).is_some() {
            return Err(EngineError::BadRequest("already_parked"));
        }

        let ticket = Ticket {
            id: state.peek_ticket_id(),
            slot_id: pick.slot_id,
            vehicle_id: plate_number.to_string(),
            rate: self.rates.hourly(pick.capacity),
            paid: false,
            amount: None,
            started_at: now_ms(),
            ended_at: None,
        };
        let event = Event::TicketIssued {
            ticket: ticket.clone(),
        };
        self.persist_and_apply(&mut state, event).await?;
        Ok(ticket)
    }

    /// Settle a ticket: compute the total owed and atomically mark it paid,
    /// vacate the slot, and — only when a nonzero flat rate was charged —
    /// stamp the vehicle's departure time. Skipping the stamp on a waived
    /// flat rate keeps a vehicle from resetting its own grace clock by
    /// cycling in and out for free.
    pub async fn settle_ticket(
        &self,
        ticket_id: TicketId,
        end_at: Option<Ms>,
    ) -> Result<Ticket, EngineError> {
        if end_at.is_some() && !self.allow_client_end_time {
            return Err(EngineError::BadRequest("end_time_not_allowed"));
        }

        let (ticket, last_departed_at) = {
            let state = self.state.read().await;
            let ticket = state
                .ticket(ticket_id)
                .ok_or_else(|| EngineError::not_found("ticket", ticket_id))?;
            if ticket.paid {
                return Err(EngineError::BadRequest("paid"));
            }
            // Data-integrity guard; a ticket's vehicle always exists.
            let vehicle = state
                .vehicle(&ticket.vehicle_id)
                .ok_or_else(|| EngineError::not_found("vehicle", &ticket.vehicle_id))?;
            (ticket.clone(), vehicle.last_departed_at)
        };

        let ended_at = end_at.unwrap_or_else(now_ms);
        if ended_at < ticket.started_at {
            return Err(EngineError::BadRequest("invalid_end_time"));
        }

        // Both fee components are priced at the settlement instant, which is
        // the supplied end time when one was allowed.
        let flat = billing::flat_rate(
            last_departed_at,
            self.rates.grace_period_hours,
            self.rates.flat,
            ended_at,
        );
        let amount = flat
            + billing::duration_charge(
                ticket.started_at,
                ended_at,
                ticket.rate,
                self.rates.initial_free_hours,
                self.rates.full_day,
            );

        let mut state = self.state.write().await;
        // Re-check under the write guard; a concurrent settle may have won.
        match state.ticket(ticket_id) {
            None => return Err(EngineError::not_found("ticket", ticket_id)),
            Some(t) if t.paid => return Err(EngineError::BadRequest("paid")),
            Some(_) => {}
        }

        let event = Event::TicketSettled {
            ticket_id,
            slot_id: ticket.slot_id,
            vehicle_id: ticket.vehicle_id.clone(),
            amount,
            ended_at,
            flat_charged: flat > 0,
        };
        self.persist_and_apply(&mut state, event).await?;

        Ok(Ticket {
            paid: true,
            amount: Some(amount),
            ended_at: Some(ended_at),
            ..ticket
        })
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state: spaces with their entry points, slots with merged distance
    /// maps, vehicles with their departure clocks, then tickets.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let state = self.state.read().await;
        let mut events = Vec::new();

        for space in state.spaces() {
            events.push(Event::SpaceCreated {
                space: space.clone(),
                entry_points: state.entry_points_in(space.id).cloned().collect(),
            });
            let slots: Vec<Slot> = state.slots_in(space.id).cloned().collect();
            if !slots.is_empty() {
                events.push(Event::SlotsCreated { slots });
            }
        }
        for vehicle in state.vehicles() {
            events.push(Event::VehicleUpserted {
                id: vehicle.id.clone(),
                size: vehicle.size,
                last_departed_at: vehicle.last_departed_at,
            });
        }
        for ticket in state.tickets() {
            events.push(Event::TicketIssued {
                ticket: ticket.clone(),
            });
        }

        // Enqueue while still holding the read guard. Mutations append to
        // the WAL channel only under the write guard, so every append queued
        // ahead of this command is already in the snapshot, and none can
        // slip in between the snapshot and the command — an append flushed
        // to the old file and then dropped by the rewrite would be an acked
        // event lost from the durable log.
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        drop(state);

        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
