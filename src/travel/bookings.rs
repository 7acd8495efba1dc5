//! 按日期区间预订的资源：酒店与租车
//!
//! 两者结构相同（名称、地点、价位、起止日期、是否已订），共用同一组查询与写操作。

use rusqlite::{params, OptionalExtension, Row};
use serde_json::{json, Value};

use crate::actions::schema::parse_date;
use crate::actions::{
    handler_fn, ActionDescriptor, ActionFault, ActionRegistry, ArgKind, ArgSchema,
};
use crate::core::DispatchError;
use crate::travel::store::{db_fault, like};
use crate::travel::{int_arg, text_arg, TravelStore};

#[derive(Debug, Clone, Copy)]
pub struct DatedResource {
    pub table: &'static str,
    /// 动作名中的名词：hotel / car_rental
    pub noun: &'static str,
    pub plural: &'static str,
    pub id_arg: &'static str,
    pub start: &'static str,
    pub end: &'static str,
}

pub const HOTEL: DatedResource = DatedResource {
    table: "hotels",
    noun: "hotel",
    plural: "hotels",
    id_arg: "hotel_id",
    start: "checkin_date",
    end: "checkout_date",
};

pub const CAR_RENTAL: DatedResource = DatedResource {
    table: "car_rentals",
    noun: "car_rental",
    plural: "car_rentals",
    id_arg: "rental_id",
    start: "start_date",
    end: "end_date",
};

impl DatedResource {
    fn label(&self) -> String {
        self.noun.replace('_', " ")
    }

    fn row_json(&self, r: &Row<'_>) -> rusqlite::Result<Value> {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "name": r.get::<_, String>(1)?,
            "location": r.get::<_, String>(2)?,
            "price_tier": r.get::<_, String>(3)?,
            self.start: r.get::<_, Option<String>>(4)?,
            self.end: r.get::<_, Option<String>>(5)?,
            "booked": r.get::<_, i64>(6)? != 0,
        }))
    }

    fn select(&self) -> String {
        format!(
            "SELECT id, name, location, price_tier, {}, {}, booked FROM {}",
            self.start, self.end, self.table
        )
    }
}

pub fn register(
    registry: &mut ActionRegistry,
    store: &TravelStore,
    res: DatedResource,
) -> Result<(), DispatchError> {
    let label = res.label();

    let s = store.clone();
    registry.register(
        ActionDescriptor::read_only(
            &format!("search_{}", res.plural),
            &format!("Search {label}s by location, name or price tier."),
            ArgSchema::new()
                .optional("location", ArgKind::String, "city, e.g. Zurich")
                .optional("name", ArgKind::String, "name or part of it")
                .optional("price_tier", ArgKind::String, "e.g. Luxury, Midscale, Economy"),
        ),
        handler_fn(move |args| search(s.clone(), res, args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            &format!("book_{}", res.noun),
            &format!("Book a {label} by id for a date range."),
            ArgSchema::new()
                .required(res.id_arg, ArgKind::Integer, "id from the search results")
                .required(res.start, ArgKind::Date, "first day, YYYY-MM-DD")
                .required(res.end, ArgKind::Date, "last day, YYYY-MM-DD")
                .date_order(res.start, res.end),
        ),
        handler_fn(move |args| book(s.clone(), res, args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            &format!("update_{}", res.noun),
            &format!("Change the dates of an existing {label} booking."),
            ArgSchema::new()
                .required(res.id_arg, ArgKind::Integer, "id of the booked item")
                .optional(res.start, ArgKind::Date, "new first day")
                .optional(res.end, ArgKind::Date, "new last day")
                .date_order(res.start, res.end)
                .at_least_one(&[res.start, res.end]),
        ),
        handler_fn(move |args| update(s.clone(), res, args)),
    )?;

    let s = store.clone();
    registry.register(
        ActionDescriptor::state_mutating(
            &format!("cancel_{}", res.noun),
            &format!("Cancel a {label} booking."),
            ArgSchema::new().required(res.id_arg, ArgKind::Integer, "id of the booked item"),
        ),
        handler_fn(move |args| cancel(s.clone(), res, args)),
    )?;
    Ok(())
}

async fn search(store: TravelStore, res: DatedResource, args: Value) -> Result<Value, ActionFault> {
    let location = text_arg(&args, "location").map(|s| like(&s));
    let name = text_arg(&args, "name").map(|s| like(&s));
    let tier = text_arg(&args, "price_tier").map(|s| like(&s));
    store
        .read(move |c| {
            let sql = format!(
                "{} WHERE (?1 IS NULL OR location LIKE ?1) AND (?2 IS NULL OR name LIKE ?2) \
                 AND (?3 IS NULL OR price_tier LIKE ?3) ORDER BY id",
                res.select()
            );
            let mut stmt = c.prepare(&sql).map_err(db_fault)?;
            let rows = stmt
                .query_map(params![location, name, tier], |r| res.row_json(r))
                .map_err(db_fault)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_fault)?;
            Ok(Value::Array(rows))
        })
        .await
}

/// 取 (name, booked, start, end)；不存在时返回 not_found
fn fetch(
    tx: &rusqlite::Connection,
    res: DatedResource,
    id: i64,
) -> Result<(String, bool, Option<String>, Option<String>), ActionFault> {
    let sql = format!(
        "SELECT name, booked, {}, {} FROM {} WHERE id = ?1",
        res.start, res.end, res.table
    );
    tx.query_row(&sql, params![id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, i64>(1)? != 0,
            r.get::<_, Option<String>>(2)?,
            r.get::<_, Option<String>>(3)?,
        ))
    })
    .optional()
    .map_err(db_fault)?
    .ok_or_else(|| ActionFault::not_found(format!("no {} with id {id}", res.label())))
}

fn required_id(args: &Value, res: DatedResource) -> Result<i64, ActionFault> {
    int_arg(args, res.id_arg)
        .ok_or_else(|| ActionFault::invalid(format!("{} is required", res.id_arg)))
}

async fn book(store: TravelStore, res: DatedResource, args: Value) -> Result<Value, ActionFault> {
    let id = required_id(&args, res)?;
    let start = text_arg(&args, res.start).unwrap_or_default();
    let end = text_arg(&args, res.end).unwrap_or_default();
    store
        .write(move |tx| {
            let (name, booked, _, _) = fetch(tx, res, id)?;
            if booked {
                return Err(ActionFault::conflict(format!("{name} is already booked")));
            }
            let sql = format!(
                "UPDATE {} SET booked = 1, {} = ?2, {} = ?3 WHERE id = ?1",
                res.table, res.start, res.end
            );
            tx.execute(&sql, params![id, start, end]).map_err(db_fault)?;
            tracing::info!(table = res.table, id, "booked");
            Ok(json!({
                "status": "booked",
                res.id_arg: id,
                "name": name,
                res.start: start,
                res.end: end,
            }))
        })
        .await
}

async fn update(store: TravelStore, res: DatedResource, args: Value) -> Result<Value, ActionFault> {
    let id = required_id(&args, res)?;
    let new_start = text_arg(&args, res.start);
    let new_end = text_arg(&args, res.end);
    store
        .write(move |tx| {
            let (name, booked, old_start, old_end) = fetch(tx, res, id)?;
            if !booked {
                return Err(ActionFault::conflict(format!("{name} has no active booking")));
            }
            let start = new_start.or(old_start).unwrap_or_default();
            let end = new_end.or(old_end).unwrap_or_default();
            if let (Some(s), Some(e)) = (parse_date(&start), parse_date(&end)) {
                if e <= s {
                    return Err(ActionFault::invalid(format!(
                        "{} ({e}) must be after {} ({s})",
                        res.end, res.start
                    )));
                }
            }
            let sql = format!(
                "UPDATE {} SET {} = ?2, {} = ?3 WHERE id = ?1",
                res.table, res.start, res.end
            );
            tx.execute(&sql, params![id, start, end]).map_err(db_fault)?;
            Ok(json!({
                "status": "updated",
                res.id_arg: id,
                "name": name,
                res.start: start,
                res.end: end,
            }))
        })
        .await
}

async fn cancel(store: TravelStore, res: DatedResource, args: Value) -> Result<Value, ActionFault> {
    let id = required_id(&args, res)?;
    store
        .write(move |tx| {
            let (name, booked, _, _) = fetch(tx, res, id)?;
            if !booked {
                return Err(ActionFault::conflict(format!("{name} has no active booking")));
            }
            let sql = format!(
                "UPDATE {} SET booked = 0, {} = NULL, {} = NULL WHERE id = ?1",
                res.table, res.start, res.end
            );
            tx.execute(&sql, params![id]).map_err(db_fault)?;
            Ok(json!({"status": "cancelled", res.id_arg: id, "name": name}))
        })
        .await
}
