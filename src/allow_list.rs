//! Event-type codes considered forensically interesting.
//!
//! Logon/logoff activity, account and group management, scheduled tasks, service
//! installation, audit log clearing, firewall and Windows Defender detections.

/// Every code a record may carry in its `<EventID>` element to survive filtering.
pub const EVENT_ALLOW_LIST: [&str; 34] = [
    "1000", "1001", "1002", "1106", "1107", "1115", "1116", "258", "259", "102", "1102", "4624",
    "4625", "4648", "4697", "4698", "4706", "4720", "4724", "4728", "4732", "4735", "4740",
    "4756", "4778", "4781", "4950", "4964", "104", "1125", "1127", "1129", "4719", "7045",
];

/// Returns true when `event_id` (already trimmed) is allow-listed.
pub fn is_allowed(event_id: &str) -> bool {
    EVENT_ALLOW_LIST.contains(&event_id)
}
