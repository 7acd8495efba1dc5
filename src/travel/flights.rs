//! 航班与机票：检索航班、查询乘客行程、改签、退票

use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value};

use crate::actions::{
    handler_fn, ActionDescriptor, ActionFault, ActionRegistry, ArgKind, ArgSchema,
};
use crate::core::DispatchError;
use crate::travel::store::db_fault;
use crate::travel::{int_arg, text_arg, TravelStore};

const DEFAULT_LIMIT: i64 = 20;

pub fn register(registry: &mut ActionRegistry, store: &TravelStore) -> Result<(), DispatchError> {
    let s = store.clone();
    registry.register(
        ActionDescriptor::read_only(
            "search_flights",
            "Search scheduled flights by airports and departure date range.",
            ArgSchema::new()
                .optional("departure_airport", ArgKind::String, "IATA code, e.g. CDG")
                .optional("arrival_airport", ArgKind::String, "IATA code, e.g. BSL")
                .optional("start_date", ArgKind::Date, "earliest departure day")
                .optional("end_date", ArgKind::Date, "latest departure day")
                .optional("limit", ArgKind::Integer, "maximum number of results"),
        ),
        handler_fn(move |args| search_flights(s.clone(), args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::read_only(
            "fetch_user_flight_information",
            "List the passenger's active tickets with flight and seat details.",
            ArgSchema::new().required("passenger_id", ArgKind::String, "passenger identifier"),
        ),
        handler_fn(move |args| fetch_user_flights(s.clone(), args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            "update_ticket_to_new_flight",
            "Move a ticket to another flight.",
            ArgSchema::new()
                .required("ticket_no", ArgKind::String, "ticket number")
                .required("new_flight_id", ArgKind::Integer, "flight_id from search_flights")
                .required("passenger_id", ArgKind::String, "owner of the ticket"),
        ),
        handler_fn(move |args| update_ticket(s.clone(), args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            "cancel_ticket",
            "Cancel a ticket.",
            ArgSchema::new()
                .required("ticket_no", ArgKind::String, "ticket number")
                .required("passenger_id", ArgKind::String, "owner of the ticket"),
        ),
        handler_fn(move |args| cancel_ticket(s.clone(), args)),
    )?;
    Ok(())
}

async fn search_flights(store: TravelStore, args: Value) -> Result<Value, ActionFault> {
    let from = text_arg(&args, "departure_airport").map(|s| s.to_uppercase());
    let to = text_arg(&args, "arrival_airport").map(|s| s.to_uppercase());
    let start = text_arg(&args, "start_date");
    let end = text_arg(&args, "end_date");
    let limit = int_arg(&args, "limit").unwrap_or(DEFAULT_LIMIT).clamp(1, 100);
    store
        .read(move |c| {
            let mut stmt = c
                .prepare(
                    "SELECT flight_id, flight_no, departure_airport, arrival_airport, \
                     scheduled_departure, scheduled_arrival, status FROM flights \
                     WHERE (?1 IS NULL OR departure_airport = ?1) AND (?2 IS NULL OR arrival_airport = ?2) \
                     AND (?3 IS NULL OR scheduled_departure >= ?3) \
                     AND (?4 IS NULL OR scheduled_departure < date(?4, '+1 day')) \
                     ORDER BY scheduled_departure LIMIT ?5",
                )
                .map_err(db_fault)?;
            let rows = stmt
                .query_map(params![from, to, start, end, limit], |r| {
                    Ok(json!({
                        "flight_id": r.get::<_, i64>(0)?,
                        "flight_no": r.get::<_, String>(1)?,
                        "departure_airport": r.get::<_, String>(2)?,
                        "arrival_airport": r.get::<_, String>(3)?,
                        "scheduled_departure": r.get::<_, String>(4)?,
                        "scheduled_arrival": r.get::<_, String>(5)?,
                        "status": r.get::<_, String>(6)?,
                    }))
                })
                .map_err(db_fault)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_fault)?;
            Ok(Value::Array(rows))
        })
        .await
}

async fn fetch_user_flights(store: TravelStore, args: Value) -> Result<Value, ActionFault> {
    let passenger = text_arg(&args, "passenger_id").unwrap_or_default();
    store
        .read(move |c| {
            let mut stmt = c
                .prepare(
                    "SELECT t.ticket_no, t.flight_id, f.flight_no, f.departure_airport, f.arrival_airport, \
                     f.scheduled_departure, f.scheduled_arrival, t.seat_no, t.fare_conditions \
                     FROM tickets t JOIN flights f ON f.flight_id = t.flight_id \
                     WHERE t.passenger_id = ?1 AND t.cancelled = 0 ORDER BY f.scheduled_departure",
                )
                .map_err(db_fault)?;
            let rows = stmt
                .query_map(params![passenger], |r| {
                    Ok(json!({
                        "ticket_no": r.get::<_, String>(0)?,
                        "flight_id": r.get::<_, i64>(1)?,
                        "flight_no": r.get::<_, String>(2)?,
                        "departure_airport": r.get::<_, String>(3)?,
                        "arrival_airport": r.get::<_, String>(4)?,
                        "scheduled_departure": r.get::<_, String>(5)?,
                        "scheduled_arrival": r.get::<_, String>(6)?,
                        "seat_no": r.get::<_, Option<String>>(7)?,
                        "fare_conditions": r.get::<_, String>(8)?,
                    }))
                })
                .map_err(db_fault)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_fault)?;
            Ok(Value::Array(rows))
        })
        .await
}

/// 校验机票归属且未取消，返回当前 flight_id
fn owned_ticket(tx: &rusqlite::Connection, ticket_no: &str, passenger: &str) -> Result<i64, ActionFault> {
    let row: Option<(String, i64, i64)> = tx
        .query_row(
            "SELECT passenger_id, flight_id, cancelled FROM tickets WHERE ticket_no = ?1",
            params![ticket_no],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_fault)?;
    match row {
        Some((owner, flight_id, 0)) if owner == passenger => Ok(flight_id),
        Some((owner, _, _)) if owner == passenger => Err(ActionFault::conflict(format!(
            "ticket {ticket_no} is already cancelled"
        ))),
        // 不属于该乘客的机票与不存在的机票同样处理
        _ => Err(ActionFault::not_found(format!(
            "passenger {passenger} has no ticket {ticket_no}"
        ))),
    }
}

async fn update_ticket(store: TravelStore, args: Value) -> Result<Value, ActionFault> {
    let ticket_no = text_arg(&args, "ticket_no").unwrap_or_default();
    let passenger = text_arg(&args, "passenger_id").unwrap_or_default();
    let new_flight = int_arg(&args, "new_flight_id")
        .ok_or_else(|| ActionFault::invalid("new_flight_id is required"))?;
    store
        .write(move |tx| {
            let current = owned_ticket(tx, &ticket_no, &passenger)?;
            if current == new_flight {
                return Err(ActionFault::conflict(format!(
                    "ticket {ticket_no} is already on flight {new_flight}"
                )));
            }
            let flight_no: String = tx
                .query_row(
                    "SELECT flight_no FROM flights WHERE flight_id = ?1",
                    params![new_flight],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_fault)?
                .ok_or_else(|| ActionFault::not_found(format!("no flight with id {new_flight}")))?;
            tx.execute(
                "UPDATE tickets SET flight_id = ?2 WHERE ticket_no = ?1",
                params![ticket_no, new_flight],
            )
            .map_err(db_fault)?;
            Ok(json!({
                "status": "updated",
                "ticket_no": ticket_no,
                "flight_id": new_flight,
                "flight_no": flight_no,
            }))
        })
        .await
}

async fn cancel_ticket(store: TravelStore, args: Value) -> Result<Value, ActionFault> {
    let ticket_no = text_arg(&args, "ticket_no").unwrap_or_default();
    let passenger = text_arg(&args, "passenger_id").unwrap_or_default();
    store
        .write(move |tx| {
            owned_ticket(tx, &ticket_no, &passenger)?;
            tx.execute(
                "UPDATE tickets SET cancelled = 1 WHERE ticket_no = ?1",
                params![ticket_no],
            )
            .map_err(db_fault)?;
            Ok(json!({"status": "cancelled", "ticket_no": ticket_no}))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::FailureKind;

    const PASSENGER: &str = "3442 587242";

    fn setup() -> (ActionRegistry, TravelStore) {
        let store = TravelStore::in_memory().unwrap();
        let mut r = ActionRegistry::new();
        register(&mut r, &store).unwrap();
        (r, store)
    }

    #[tokio::test]
    async fn test_search_flights_by_route_and_day() {
        let (r, _) = setup();
        let out = r
            .resolve("search_flights")
            .unwrap()
            .handler
            .invoke(json!({"departure_airport": "cdg", "arrival_airport": "BSL", "start_date": "2025-03-04", "end_date": "2025-03-04"}))
            .await
            .unwrap();
        let ids: Vec<i64> = out
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f["flight_id"].as_i64())
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_update_then_cancel_ticket() {
        let (r, store) = setup();
        let h = |n: &str| r.resolve(n).unwrap().handler.clone();

        let info = h("fetch_user_flight_information")
            .invoke(json!({"passenger_id": PASSENGER}))
            .await
            .unwrap();
        assert_eq!(info.as_array().map(Vec::len), Some(2));

        let moved = h("update_ticket_to_new_flight")
            .invoke(json!({"ticket_no": "7240005432906569", "new_flight_id": 3, "passenger_id": PASSENGER}))
            .await
            .unwrap();
        assert_eq!(moved["flight_no"], "LX0114");

        let not_mine = h("cancel_ticket")
            .invoke(json!({"ticket_no": "7240005432906569", "passenger_id": "0000 000000"}))
            .await
            .unwrap_err();
        assert_eq!(not_mine.kind, FailureKind::NotFound);

        h("cancel_ticket")
            .invoke(json!({"ticket_no": "7240005432906569", "passenger_id": PASSENGER}))
            .await
            .unwrap();
        let again = h("cancel_ticket")
            .invoke(json!({"ticket_no": "7240005432906569", "passenger_id": PASSENGER}))
            .await
            .unwrap_err();
        assert_eq!(again.kind, FailureKind::Conflict);
        assert_eq!(store.mutation_count(), 2);
    }
}
