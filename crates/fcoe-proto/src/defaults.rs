//! Tunable protocol timing parameters.
//!
//! Wire-format constants (descriptor codes, flags, sizes) live in
//! [`crate::constants`]. The values here are protocol tuning knobs
//! carried over from the reference FIP implementation; none of them is
//! separately fixed by the standard.

use std::time::Duration;

/// Delay after the first validated advertisement before an FCF may be
/// selected, so competing advertisements can arrive first.
pub const FCF_START_DELAY: Duration = Duration::from_millis(2000);

/// Minimum spacing between multicast solicitations.
pub const SOL_TOV: Duration = Duration::from_millis(2000);

/// Hard cap on FCF registry entries. Inserts beyond the cap are
/// rejected, never evicted.
pub const FCF_LIMIT: usize = 20;

/// Lowest acceptable advertised keep-alive period; anything below it
/// falls back to [`DEF_FKA`].
pub const MIN_FKA: Duration = Duration::from_millis(500);

/// Default keep-alive advertisement period.
pub const DEF_FKA: Duration = Duration::from_millis(8000);

/// Aging fuzz added (×3) to the three-keep-alive dead threshold.
pub const FCF_FUZZ: Duration = Duration::from_millis(100);

/// Fixed port keep-alive period, independent of the FCF's period.
pub const PORT_KA_PERIOD: Duration = Duration::from_millis(90_000);

/// Retry interval for unanswered FIP VLAN discovery requests.
pub const VLAN_DISC_RETRY_TOV: Duration = Duration::from_millis(2000);

/// Number of FLOGI attempts held back in auto mode before the
/// controller commits to non-FIP addressing.
pub const FLOGI_AUTO_RETRIES: u8 = 3;

/// Depth of the bounded received-frame queue. Frames arriving while the
/// queue is full are dropped.
pub const RECV_QUEUE_DEPTH: usize = 512;
