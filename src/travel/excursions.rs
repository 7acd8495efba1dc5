//! 游览推荐：检索、预订、修改备注、取消

use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value};

use crate::actions::{
    handler_fn, ActionDescriptor, ActionFault, ActionRegistry, ArgKind, ArgSchema,
};
use crate::core::DispatchError;
use crate::travel::store::{db_fault, like};
use crate::travel::{int_arg, text_arg, TravelStore};

pub fn register(registry: &mut ActionRegistry, store: &TravelStore) -> Result<(), DispatchError> {
    let s = store.clone();
    registry.register(
        ActionDescriptor::read_only(
            "search_trip_recommendations",
            "Search excursions and activities by location, name or keyword.",
            ArgSchema::new()
                .optional("location", ArgKind::String, "city, e.g. Basel")
                .optional("name", ArgKind::String, "name or part of it")
                .optional("keywords", ArgKind::String, "e.g. museum, history"),
        ),
        handler_fn(move |args| search(s.clone(), args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            "book_excursion",
            "Book an excursion by recommendation id.",
            ArgSchema::new().required("recommendation_id", ArgKind::Integer, "id from the search results"),
        ),
        handler_fn(move |args| set_booked(s.clone(), args, true)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            "update_excursion",
            "Replace the details / notes of a booked excursion.",
            ArgSchema::new()
                .required("recommendation_id", ArgKind::Integer, "id of the booked excursion")
                .required("details", ArgKind::String, "new details"),
        ),
        handler_fn(move |args| update(s.clone(), args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            "cancel_excursion",
            "Cancel a booked excursion.",
            ArgSchema::new().required("recommendation_id", ArgKind::Integer, "id of the booked excursion"),
        ),
        handler_fn(move |args| set_booked(s.clone(), args, false)),
    )?;
    Ok(())
}

async fn search(store: TravelStore, args: Value) -> Result<Value, ActionFault> {
    let location = text_arg(&args, "location").map(|s| like(&s));
    let name = text_arg(&args, "name").map(|s| like(&s));
    let keywords = text_arg(&args, "keywords").map(|s| like(&s));
    store
        .read(move |c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, name, location, keywords, details, booked FROM trip_recommendations \
                     WHERE (?1 IS NULL OR location LIKE ?1) AND (?2 IS NULL OR name LIKE ?2) \
                     AND (?3 IS NULL OR keywords LIKE ?3) ORDER BY id",
                )
                .map_err(db_fault)?;
            let rows = stmt
                .query_map(params![location, name, keywords], |r| {
                    Ok(json!({
                        "id": r.get::<_, i64>(0)?,
                        "name": r.get::<_, String>(1)?,
                        "location": r.get::<_, String>(2)?,
                        "keywords": r.get::<_, String>(3)?,
                        "details": r.get::<_, String>(4)?,
                        "booked": r.get::<_, i64>(5)? != 0,
                    }))
                })
                .map_err(db_fault)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_fault)?;
            Ok(Value::Array(rows))
        })
        .await
}

fn fetch(tx: &rusqlite::Connection, id: i64) -> Result<(String, bool), ActionFault> {
    tx.query_row(
        "SELECT name, booked FROM trip_recommendations WHERE id = ?1",
        params![id],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0)),
    )
    .optional()
    .map_err(db_fault)?
    .ok_or_else(|| ActionFault::not_found(format!("no excursion with id {id}")))
}

fn recommendation_id(args: &Value) -> Result<i64, ActionFault> {
    int_arg(args, "recommendation_id").ok_or_else(|| ActionFault::invalid("recommendation_id is required"))
}

async fn set_booked(store: TravelStore, args: Value, book: bool) -> Result<Value, ActionFault> {
    let id = recommendation_id(&args)?;
    store
        .write(move |tx| {
            let (name, booked) = fetch(tx, id)?;
            match (book, booked) {
                (true, true) => return Err(ActionFault::conflict(format!("{name} is already booked"))),
                (false, false) => {
                    return Err(ActionFault::conflict(format!("{name} has no active booking")))
                }
                _ => {}
            }
            tx.execute(
                "UPDATE trip_recommendations SET booked = ?2 WHERE id = ?1",
                params![id, book as i64],
            )
            .map_err(db_fault)?;
            let status = if book { "booked" } else { "cancelled" };
            Ok(json!({"status": status, "recommendation_id": id, "name": name}))
        })
        .await
}

async fn update(store: TravelStore, args: Value) -> Result<Value, ActionFault> {
    let id = recommendation_id(&args)?;
    let details = text_arg(&args, "details").unwrap_or_default();
    store
        .write(move |tx| {
            let (name, booked) = fetch(tx, id)?;
            if !booked {
                return Err(ActionFault::conflict(format!("{name} has no active booking")));
            }
            tx.execute(
                "UPDATE trip_recommendations SET details = ?2 WHERE id = ?1",
                params![id, details],
            )
            .map_err(db_fault)?;
            Ok(json!({"status": "updated", "recommendation_id": id, "name": name, "details": details}))
        })
        .await
}
