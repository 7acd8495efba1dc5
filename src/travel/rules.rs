//! 离线规则集：没有 LLM Key 时每个作用域使用的正则规则

use regex::Captures;
use serde_json::{json, Map, Value};

use crate::actions::control::{COMPLETE, DELEGATE, ESCALATE};
use crate::reasoning::{Decision, RuleAdapter};
use crate::travel::scopes::{CALENDAR, CAR_RENTAL, EXCURSION, FLIGHT, HOTEL, PRIMARY};

const DATE: &str = r"\d{4}-\d{2}-\d{2}";
const DONE: &str = r"(?i)\b(done|that's all|that is all|thanks|thank you)\b";

fn text(c: &Captures<'_>, name: &str) -> Option<String> {
    c.name(name).map(|m| m.as_str().trim().to_string())
}

fn int(c: &Captures<'_>, name: &str) -> Value {
    c.name(name)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(Value::from)
        .unwrap_or(Value::Null)
}

/// 只保留有值的键
fn args(pairs: &[(&str, Option<String>)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), Value::String(v.clone()))))
        .collect();
    Value::Object(map)
}

fn delegate(scope: &str, context: Value, goal: &str) -> Decision {
    Decision::propose(DELEGATE, json!({"scope": scope, "context": context, "goal": goal}))
}

fn complete(summary: &str) -> Decision {
    Decision::propose(COMPLETE, json!({"summary": summary}))
}

fn escalate(reason: &str) -> Decision {
    Decision::propose(ESCALATE, json!({"reason": reason}))
}

/// 按作用域名取规则适配器
pub fn rule_adapter(scope: &str) -> Result<RuleAdapter, regex::Error> {
    match scope {
        PRIMARY => primary(),
        FLIGHT => flight(),
        HOTEL => dated(HOTEL, "hotel", "hotel_id", "checkin_date", "checkout_date", r"hotels?"),
        CAR_RENTAL => dated(CAR_RENTAL, "car_rental", "rental_id", "start_date", "end_date", r"(?:cars?|rentals?)"),
        EXCURSION => excursion(),
        CALENDAR => calendar(),
        _ => Ok(RuleAdapter::new("I can't help with that here.")),
    }
}

fn primary() -> Result<RuleAdapter, regex::Error> {
    RuleAdapter::new("I can help with flights, hotels, car rentals, excursions and your calendar.")
        .intent("hotels", r"(?i)\bhotels?\b")?
        .intent("car rentals", r"(?i)\b(cars?|rentals?)\b")?
        .intent("excursions", r"(?i)\b(excursions?|tours?|activit(y|ies)|sightseeing)\b")?
        .intent("flight changes", r"(?i)\b(change|cancel|rebook|move)\b.*\b(flight|ticket)s?\b")?
        .rule(r"(?i)\bhotels?\b(?:.*?\bin (?P<location>[a-z]+))?", |c| {
            delegate(HOTEL, args(&[("location", text(c, "location"))]), "find or book a hotel")
        })?
        .rule(r"(?i)\b(?:cars?|rentals?)\b(?:.*?\bin (?P<location>[a-z]+))?", |c| {
            delegate(CAR_RENTAL, args(&[("location", text(c, "location"))]), "find or book a car rental")
        })?
        .rule(
            r"(?i)\b(?:excursions?|tours?|activit(?:y|ies)|sightseeing)\b(?:.*?\bin (?P<location>[a-z]+))?",
            |c| delegate(EXCURSION, args(&[("location", text(c, "location"))]), "recommend an excursion"),
        )?
        .rule(r"(?i)\b(?:change|cancel|rebook|move)\b.*\b(?:flight|ticket)s?\b", |_| {
            delegate(FLIGHT, json!({}), "change or cancel a flight")
        })?
        .rule(r"(?i)\bcalendar\b", |_| delegate(CALENDAR, json!({}), "manage calendar events"))?
        .rule(r"(?P<pid>\d{4} \d{6})", |c| {
            Decision::propose(
                "fetch_user_flight_information",
                args(&[("passenger_id", text(c, "pid"))]),
            )
        })
}

fn flight() -> Result<RuleAdapter, regex::Error> {
    RuleAdapter::new("Tell me the ticket number and your passenger id, or the route you want to search.")
        .rule(
            r"(?i)move ticket (?P<ticket>\d+) to flight (?P<flight>\d+) for (?P<pid>\d{4} \d{6})",
            |c| {
                Decision::propose(
                    "update_ticket_to_new_flight",
                    json!({
                        "ticket_no": text(c, "ticket"),
                        "new_flight_id": int(c, "flight"),
                        "passenger_id": text(c, "pid"),
                    }),
                )
            },
        )?
        .rule(r"(?i)cancel ticket (?P<ticket>\d+) for (?P<pid>\d{4} \d{6})", |c| {
            Decision::propose(
                "cancel_ticket",
                args(&[("ticket_no", text(c, "ticket")), ("passenger_id", text(c, "pid"))]),
            )
        })?
        .rule(r"(?i)flights? from (?P<from>[a-z]{3}) to (?P<to>[a-z]{3})", |c| {
            Decision::propose(
                "search_flights",
                args(&[("departure_airport", text(c, "from")), ("arrival_airport", text(c, "to"))]),
            )
        })?
        .rule(r"(?i)\b(hotel|car|excursion)s?\b", |_| {
            escalate("the request is not about flights")
        })?
        .rule(DONE, |_| complete("flight request handled"))?
        .rule(r"(?P<pid>\d{4} \d{6})", |c| {
            Decision::propose(
                "fetch_user_flight_information",
                args(&[("passenger_id", text(c, "pid"))]),
            )
        })
}

/// 酒店与租车共用的规则形状
fn dated(
    scope: &'static str,
    noun: &'static str,
    id_arg: &'static str,
    start: &'static str,
    end: &'static str,
    search_word: &str,
) -> Result<RuleAdapter, regex::Error> {
    let label = noun.replace('_', " ");
    RuleAdapter::new(format!(
        "Which {label} would you like? You can search by city, or say e.g. \"book 3 from 2025-03-03 to 2025-03-05\"."
    ))
    .rule(
        &format!(r"(?i)\bbook (?:\w+ )?(?P<id>\d+) from (?P<start>{DATE}) to (?P<end>{DATE})"),
        move |c| {
            Decision::propose(
                format!("book_{noun}"),
                json!({id_arg: int(c, "id"), start: text(c, "start"), end: text(c, "end")}),
            )
        },
    )?
    .rule(
        &format!(r"(?i)\b(?:change|move|extend) (?:\w+ )?(?P<id>\d+) to end (?P<end>{DATE})"),
        move |c| {
            Decision::propose(format!("update_{noun}"), json!({id_arg: int(c, "id"), end: text(c, "end")}))
        },
    )?
    .rule(r"(?i)\bflights?\b", move |_| {
        escalate(&format!("the {scope} assistant cannot change flights"))
    })?
    .rule(r"(?i)\bcancel (?:\w+ )?(?P<id>\d+)", move |c| {
        Decision::propose(format!("cancel_{noun}"), json!({id_arg: int(c, "id")}))
    })?
    .rule(r"(?i)\b(calendar|remind)", |_| {
        delegate(CALENDAR, json!({}), "add the booking to the calendar")
    })?
    .rule(DONE, move |_| complete(&format!("{scope} request handled")))?
    .rule(
        &format!(r"(?i)\b{search_word}\b(?:.*?\bin (?P<location>[a-z]+))?"),
        move |c| Decision::propose(format!("search_{noun}s"), args(&[("location", text(c, "location"))])),
    )
}

fn excursion() -> Result<RuleAdapter, regex::Error> {
    RuleAdapter::new("Where would you like to go? I can recommend museums, landmarks and outdoor trips.")
        .rule(r"(?i)\bbook (?:excursion )?(?P<id>\d+)", |c| {
            Decision::propose("book_excursion", json!({"recommendation_id": int(c, "id")}))
        })?
        .rule(r"(?i)\bcancel (?:excursion )?(?P<id>\d+)", |c| {
            Decision::propose("cancel_excursion", json!({"recommendation_id": int(c, "id")}))
        })?
        .rule(r"(?i)\b(calendar|remind)", |_| {
            delegate(CALENDAR, json!({}), "add the excursion to the calendar")
        })?
        .rule(r"(?i)\bflights?\b", |_| escalate("the excursion assistant cannot change flights"))?
        .rule(DONE, |_| complete("excursion request handled"))?
        .rule(r"(?i)\bin (?P<location>[a-z]+)", |c| {
            Decision::propose(
                "search_trip_recommendations",
                args(&[("location", text(c, "location"))]),
            )
        })
}

fn calendar() -> Result<RuleAdapter, regex::Error> {
    RuleAdapter::new("Say e.g. \"add Museum visit on 2025-03-04\" or \"show events on 2025-03-04\".")
        .rule(&format!(r"(?i)\badd (?P<title>.+?) on (?P<date>{DATE})"), |c| {
            Decision::propose(
                "add_calendar_event",
                args(&[("title", text(c, "title")), ("date", text(c, "date"))]),
            )
        })?
        .rule(DONE, |_| complete("calendar updated"))?
        .rule(&format!(r"(?i)\b(?:events|calendar)\b(?:.*?(?P<date>{DATE}))?"), |c| {
            Decision::propose("list_calendar_events", args(&[("date", text(c, "date"))]))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_scope_has_rules() {
        for name in [PRIMARY, FLIGHT, HOTEL, CAR_RENTAL, EXCURSION, CALENDAR] {
            assert!(rule_adapter(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_primary_routes_hotel_search() {
        let d = rule_adapter(PRIMARY).unwrap().decide("search hotels in Zurich");
        assert_eq!(
            d,
            delegate(HOTEL, json!({"location": "Zurich"}), "find or book a hotel")
        );
    }

    #[test]
    fn test_primary_detects_two_intents() {
        let d = rule_adapter(PRIMARY).unwrap().decide("book a hotel and rent a car");
        assert!(matches!(d, Decision::Ambiguous { ref intents, .. } if intents.len() == 2));
    }

    #[test]
    fn test_hotel_rules() {
        let hotel = rule_adapter(HOTEL).unwrap();
        assert_eq!(
            hotel.decide("search hotels in Zurich"),
            Decision::propose("search_hotels", json!({"location": "Zurich"}))
        );
        assert_eq!(
            hotel.decide("book hotel 8 from 2025-03-03 to 2025-03-05"),
            Decision::propose(
                "book_hotel",
                json!({"hotel_id": 8, "checkin_date": "2025-03-03", "checkout_date": "2025-03-05"})
            )
        );
        assert_eq!(
            hotel.decide("actually I need a flight change"),
            escalate("the hotel assistant cannot change flights")
        );
    }

    #[test]
    fn test_car_rental_search_uses_plural_action() {
        let cars = rule_adapter(CAR_RENTAL).unwrap();
        assert_eq!(
            cars.decide("rental cars in Basel"),
            Decision::propose("search_car_rentals", json!({"location": "Basel"}))
        );
    }
}
