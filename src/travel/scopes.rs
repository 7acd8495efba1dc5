//! 旅行客服的作用域表：主助手与五个专职助手

use std::sync::Arc;

use crate::reasoning::ReasoningAdapter;
use crate::scope::Scope;

pub const PRIMARY: &str = "primary";
pub const FLIGHT: &str = "flight";
pub const HOTEL: &str = "hotel";
pub const CAR_RENTAL: &str = "car_rental";
pub const EXCURSION: &str = "excursion";
pub const CALENDAR: &str = "calendar";

pub struct ScopeSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub actions: &'static [&'static str],
    /// 委派时接受的上下文键
    pub carry_keys: &'static [&'static str],
}

impl ScopeSpec {
    pub fn build(&self, adapter: Arc<dyn ReasoningAdapter>) -> Scope {
        Scope::new(self.name, self.description, adapter)
            .with_actions(self.actions)
            .with_carry_keys(self.carry_keys)
    }
}

/// 主作用域排在第一位
pub const SCOPES: &[ScopeSpec] = &[
    ScopeSpec {
        name: PRIMARY,
        description: "Primary travel assistant. Looks up the passenger's flights and hands \
                      hotel, car rental, excursion, flight-change and calendar requests to \
                      the matching specialist.",
        actions: &["search_flights", "fetch_user_flight_information"],
        carry_keys: &[],
    },
    ScopeSpec {
        name: FLIGHT,
        description: "Flight specialist. Searches flights, rebooks and cancels tickets.",
        actions: &[
            "search_flights",
            "fetch_user_flight_information",
            "update_ticket_to_new_flight",
            "cancel_ticket",
        ],
        carry_keys: &[
            "passenger_id",
            "ticket_no",
            "departure_airport",
            "arrival_airport",
            "start_date",
            "end_date",
        ],
    },
    ScopeSpec {
        name: HOTEL,
        description: "Hotel specialist. Searches, books, changes and cancels hotel stays; \
                      may hand calendar entries to the calendar assistant.",
        actions: &["search_hotels", "book_hotel", "update_hotel", "cancel_hotel"],
        carry_keys: &[
            "passenger_id",
            "location",
            "name",
            "price_tier",
            "checkin_date",
            "checkout_date",
        ],
    },
    ScopeSpec {
        name: CAR_RENTAL,
        description: "Car rental specialist. Searches, books, changes and cancels rentals; \
                      may hand calendar entries to the calendar assistant.",
        actions: &[
            "search_car_rentals",
            "book_car_rental",
            "update_car_rental",
            "cancel_car_rental",
        ],
        carry_keys: &["passenger_id", "location", "name", "price_tier", "start_date", "end_date"],
    },
    ScopeSpec {
        name: EXCURSION,
        description: "Excursion specialist. Recommends, books, changes and cancels trips and \
                      activities; may hand calendar entries to the calendar assistant.",
        actions: &[
            "search_trip_recommendations",
            "book_excursion",
            "update_excursion",
            "cancel_excursion",
        ],
        carry_keys: &["passenger_id", "location", "name", "keywords"],
    },
    ScopeSpec {
        name: CALENDAR,
        description: "Calendar assistant. Lists and adds travel events.",
        actions: &["list_calendar_events", "add_calendar_event"],
        carry_keys: &["title", "date", "notes"],
    },
];
