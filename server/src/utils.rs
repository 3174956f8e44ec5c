use log::{debug, log_enabled, Level};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;

// Current unix time in whole seconds, truncated to the 32-bit wire field
pub fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as u32
}

// Elapsed time since 1 January of the current year, split the way the
// host-date reply wants it: (seconds into the current day, whole days)
pub fn year_offsets(now: OffsetDateTime) -> (u32, u32) {
    let days = u32::from(now.ordinal()) - 1;
    let (h, m, s) = now.time().as_hms();
    let seconds = u32::from(h) * 3600 + u32::from(m) * 60 + u32::from(s);
    (seconds, days)
}

// Classic 16-bytes-per-line dump with an ASCII gutter
pub fn hexdump(data: &[u8]) -> impl Iterator<Item = String> + '_ {
    data.chunks(16).enumerate().map(|(line, chunk)| {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (32..=126).contains(&b) { b as char } else { '.' })
            .collect();
        format!("{:08x}  {:<48}  |{}|", line * 16, hex.join(" "), ascii)
    })
}

// Logs `data` at debug level, one record per dump line
pub fn debug_dump(data: &[u8]) {
    if log_enabled!(Level::Debug) {
        for line in hexdump(data) {
            debug!("{}", line);
        }
    }
}
