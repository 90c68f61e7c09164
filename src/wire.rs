//! Newline-delimited JSON wire surface: one request object per line, one
//! response object per line. This is deliberately thin — every rule lives in
//! the engine; the wire layer only parses, range-checks ids, and maps
//! `EngineError` to status-coded payloads.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::engine::{Engine, EngineError};
use crate::model::*;

const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct VehicleInput {
    pub plate_number: String,
    pub size: Size,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    IssueTicket {
        entry_point_id: i64,
        vehicle: VehicleInput,
    },
    SettleTicket {
        ticket_id: i64,
        #[serde(default)]
        end_at: Option<Ms>,
    },
    CreateSpace {
        name: String,
        entry_points: Vec<String>,
    },
    AddEntryPoint {
        space_id: i64,
        label: String,
    },
    CreateSlots {
        space_id: i64,
        slots: Vec<SlotSpec>,
    },
    GetTicket {
        ticket_id: i64,
    },
    ListSlots {
        space_id: i64,
    },
}

/// Short label for metrics.
fn op_label(request: &Request) -> &'static str {
    match request {
        Request::IssueTicket { .. } => "issue_ticket",
        Request::SettleTicket { .. } => "settle_ticket",
        Request::CreateSpace { .. } => "create_space",
        Request::AddEntryPoint { .. } => "add_entry_point",
        Request::CreateSlots { .. } => "create_slots",
        Request::GetTicket { .. } => "get_ticket",
        Request::ListSlots { .. } => "list_slots",
    }
}

/// Ids come in as JSON integers; anything below 1 never names a row.
fn positive_id(raw: i64, reason: &'static str) -> Result<u32, EngineError> {
    u32::try_from(raw)
        .ok()
        .filter(|&id| id >= 1)
        .ok_or(EngineError::BadRequest(reason))
}

async fn dispatch(engine: &Engine, request: Request) -> Result<Value, EngineError> {
    match request {
        Request::IssueTicket {
            entry_point_id,
            vehicle,
        } => {
            let entry_point_id = positive_id(entry_point_id, "invalid_entry_id")?;
            let ticket = engine
                .issue_ticket(entry_point_id, &vehicle.plate_number, vehicle.size)
                .await?;
            Ok(json!({ "ticket": ticket }))
        }
        Request::SettleTicket { ticket_id, end_at } => {
            let ticket_id = positive_id(ticket_id, "invalid_ticket_id")?;
            let ticket = engine.settle_ticket(ticket_id, end_at).await?;
            Ok(json!({ "ticket": ticket }))
        }
        Request::CreateSpace { name, entry_points } => {
            let (space, entry_points) = engine.create_space(&name, &entry_points).await?;
            Ok(json!({ "space": space, "entry_points": entry_points }))
        }
        Request::AddEntryPoint { space_id, label } => {
            let space_id = positive_id(space_id, "invalid_space_id")?;
            let entry_point = engine.add_entry_point(space_id, &label).await?;
            Ok(json!({ "entry_point": entry_point }))
        }
        Request::CreateSlots { space_id, slots } => {
            let space_id = positive_id(space_id, "invalid_space_id")?;
            let slots = engine.create_slots(space_id, &slots).await?;
            Ok(json!({ "slots": slots }))
        }
        Request::GetTicket { ticket_id } => {
            let ticket_id = positive_id(ticket_id, "invalid_ticket_id")?;
            let ticket = engine
                .find_ticket(ticket_id)
                .await
                .ok_or_else(|| EngineError::not_found("ticket", ticket_id))?;
            Ok(json!({ "ticket": ticket }))
        }
        Request::ListSlots { space_id } => {
            let space_id = positive_id(space_id, "invalid_space_id")?;
            let slots = engine.list_slots(space_id).await?;
            Ok(json!({ "slots": slots }))
        }
    }
}

fn error_payload(status: u16, reason: &str, message: &str) -> Value {
    json!({ "error": { "status": status, "reason": reason, "message": message } })
}

/// Run one parsed request to a response object.
pub async fn handle_request(engine: &Engine, request: Request) -> Value {
    match dispatch(engine, request).await {
        Ok(data) => json!({ "data": data }),
        Err(e) => error_payload(e.status(), e.reason(), &e.to_string()),
    }
}

/// Serve one connection until the peer hangs up. Malformed lines get an
/// error response; the connection stays open.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = framed.next().await {
        let line = line.map_err(io::Error::other)?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let op = op_label(&request);
                let start = Instant::now();
                let response = handle_request(&engine, request).await;
                let status = if response.get("error").is_some() { "error" } else { "ok" };
                metrics::counter!(
                    crate::observability::REQUESTS_TOTAL,
                    "op" => op,
                    "status" => status
                )
                .increment(1);
                metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => op)
                    .record(start.elapsed().as_secs_f64());
                response
            }
            Err(e) => error_payload(400, "malformed_request", &e.to_string()),
        };

        framed
            .send(response.to_string())
            .await
            .map_err(io::Error::other)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RatesConfig;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parq_test_wire");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn parse(line: &str) -> Request {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn issue_request_parses() {
        let req = parse(
            r#"{"op":"issue_ticket","entry_point_id":1,"vehicle":{"plate_number":"ABC 1234","size":"small"}}"#,
        );
        match req {
            Request::IssueTicket { entry_point_id, vehicle } => {
                assert_eq!(entry_point_id, 1);
                assert_eq!(vehicle.plate_number, "ABC 1234");
                assert_eq!(vehicle.size, Size::Small);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn settle_end_at_is_optional() {
        let req = parse(r#"{"op":"settle_ticket","ticket_id":3}"#);
        assert!(matches!(
            req,
            Request::SettleTicket { ticket_id: 3, end_at: None }
        ));
    }

    #[test]
    fn create_slots_distance_keys_parse() {
        // Distance keys arrive as JSON strings and must survive the tagged
        // enum's content buffering.
        let req = parse(
            r#"{"op":"create_slots","space_id":1,"slots":[{"capacity":"small","distance":{"2":0.25}},{"capacity":"large"}]}"#,
        );
        match req {
            Request::CreateSlots { space_id, slots } => {
                assert_eq!(space_id, 1);
                assert_eq!(slots[0].distance.get(&2), Some(&0.25));
                assert!(slots[1].distance.is_empty());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn create_slots_rejects_non_numeric_distance_key() {
        assert!(
            serde_json::from_str::<Request>(
                r#"{"op":"create_slots","space_id":1,"slots":[{"capacity":"small","distance":{"north":0.2}}]}"#,
            )
            .is_err()
        );
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"void_ticket","ticket_id":1}"#).is_err());
    }

    #[tokio::test]
    async fn nonpositive_entry_id_maps_to_invalid_entry_id() {
        let engine = Engine::new(&test_wal_path("bad_entry_id.wal"), RatesConfig::default()).unwrap();
        let response = handle_request(
            &engine,
            parse(
                r#"{"op":"issue_ticket","entry_point_id":0,"vehicle":{"plate_number":"X","size":"small"}}"#,
            ),
        )
        .await;
        assert_eq!(response["error"]["status"], 400);
        assert_eq!(response["error"]["reason"], "invalid_entry_id");
    }

    #[tokio::test]
    async fn missing_ticket_maps_to_404() {
        let engine = Engine::new(&test_wal_path("missing_ticket.wal"), RatesConfig::default()).unwrap();
        let response =
            handle_request(&engine, parse(r#"{"op":"get_ticket","ticket_id":99}"#)).await;
        assert_eq!(response["error"]["status"], 404);
        assert_eq!(response["error"]["reason"], "not_found");
    }

    #[tokio::test]
    async fn lifecycle_over_the_wire_shapes() {
        let engine = Engine::new(&test_wal_path("wire_lifecycle.wal"), RatesConfig::default()).unwrap();

        let created = handle_request(
            &engine,
            parse(r#"{"op":"create_space","name":"Mall","entry_points":["North"]}"#),
        )
        .await;
        assert_eq!(created["data"]["space"]["id"], 1);
        assert_eq!(created["data"]["entry_points"][0]["id"], 1);

        let slots = handle_request(
            &engine,
            parse(
                r#"{"op":"create_slots","space_id":1,"slots":[{"capacity":"medium","distance":{"1":0.1}}]}"#,
            ),
        )
        .await;
        assert_eq!(slots["data"]["slots"][0]["available"], true);

        let issued = handle_request(
            &engine,
            parse(
                r#"{"op":"issue_ticket","entry_point_id":1,"vehicle":{"plate_number":"ABC 1234","size":"small"}}"#,
            ),
        )
        .await;
        let ticket = &issued["data"]["ticket"];
        assert_eq!(ticket["id"], 1);
        assert_eq!(ticket["paid"], false);
        // Rate snapshots the slot capacity (medium), not the vehicle size.
        assert_eq!(ticket["rate"], 60);
    }
}
