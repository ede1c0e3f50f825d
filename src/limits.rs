//! Hard bounds on user-supplied input. These are anti-abuse limits, not
//! business rules — the booking policy itself lives in `engine::admission`.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_BUSES_PER_FLEET: usize = 4096;
pub const MAX_RESERVATIONS_PER_BUS: usize = 65_536;

pub const MAX_BUS_NAME_LEN: usize = 256;
pub const MAX_PLATE_LEN: usize = 32;

/// Purpose, destination and rejection-note fields.
pub const MAX_TEXT_LEN: usize = 2048;

/// Longest trip window, in calendar days (inclusive span).
pub const MAX_TRIP_DAYS: i64 = 60;

/// Dates outside this year range are rejected outright — they are typos,
/// not bookings.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;
