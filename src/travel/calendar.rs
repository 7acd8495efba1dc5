//! 日历：列出与添加行程事件

use rusqlite::params;
use serde_json::{json, Value};

use crate::actions::{
    handler_fn, ActionDescriptor, ActionFault, ActionRegistry, ArgKind, ArgSchema,
};
use crate::core::DispatchError;
use crate::travel::store::db_fault;
use crate::travel::{text_arg, TravelStore};

pub fn register(registry: &mut ActionRegistry, store: &TravelStore) -> Result<(), DispatchError> {
    let s = store.clone();
    registry.register(
        ActionDescriptor::read_only(
            "list_calendar_events",
            "List calendar events, optionally for a single day.",
            ArgSchema::new().optional("date", ArgKind::Date, "day to list, YYYY-MM-DD"),
        ),
        handler_fn(move |args| list(s.clone(), args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            "add_calendar_event",
            "Add an event to the traveller's calendar.",
            ArgSchema::new()
                .required("title", ArgKind::String, "short title")
                .required("date", ArgKind::Date, "YYYY-MM-DD")
                .optional("notes", ArgKind::String, "free-form notes"),
        ),
        handler_fn(move |args| add(s.clone(), args)),
    )?;
    Ok(())
}

async fn list(store: TravelStore, args: Value) -> Result<Value, ActionFault> {
    let date = text_arg(&args, "date");
    store
        .read(move |c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, title, date, notes FROM calendar_events \
                     WHERE (?1 IS NULL OR date = ?1) ORDER BY date, id",
                )
                .map_err(db_fault)?;
            let rows = stmt
                .query_map(params![date], |r| {
                    Ok(json!({
                        "id": r.get::<_, i64>(0)?,
                        "title": r.get::<_, String>(1)?,
                        "date": r.get::<_, String>(2)?,
                        "notes": r.get::<_, Option<String>>(3)?,
                    }))
                })
                .map_err(db_fault)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_fault)?;
            Ok(Value::Array(rows))
        })
        .await
}

async fn add(store: TravelStore, args: Value) -> Result<Value, ActionFault> {
    let title = text_arg(&args, "title").unwrap_or_default();
    let date = text_arg(&args, "date").unwrap_or_default();
    let notes = text_arg(&args, "notes");
    store
        .write(move |tx| {
            tx.execute(
                "INSERT INTO calendar_events (title, date, notes) VALUES (?1, ?2, ?3)",
                params![title, date, notes],
            )
            .map_err(db_fault)?;
            let id = tx.last_insert_rowid();
            Ok(json!({"status": "added", "id": id, "title": title, "date": date}))
        })
        .await
}
