//! FCF candidate registry.
//!
//! One record per (switch name, fabric name, FC-MAP, MAC) tuple seen in
//! an advertisement. Records age out after three missed keep-alive
//! periods plus fuzz; selection is conflict-aware and aborts when the
//! registry advertises incompatible fabrics.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use fcoe_proto::constants::{FIP_FL_AVAIL, FIP_FL_SOL};
use fcoe_proto::defaults;
use fcoe_proto::MacAddr;

/// Identity tuple of an FCF record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcfKey {
    pub switch_name: u64,
    pub fabric_name: u64,
    pub fc_map: u32,
    pub mac: MacAddr,
}

/// One FCF candidate, built from a received advertisement.
#[derive(Debug, Clone)]
pub struct Fcf {
    pub fcf_mac: MacAddr,
    pub switch_name: u64,
    pub fabric_name: u64,
    pub vfid: u16,
    pub fc_map: u32,
    /// Lower wins.
    pub pri: u8,
    /// FIP header flags from the latest accepted advertisement.
    pub flags: u16,
    pub fka_period: Duration,
    /// The FCF asked that keep-alives not be sent (FKA D-bit).
    pub fka_disabled: bool,
    /// Last advertisement refresh.
    pub time: Instant,
}

impl Fcf {
    pub fn key(&self) -> FcfKey {
        FcfKey {
            switch_name: self.switch_name,
            fabric_name: self.fabric_name,
            fc_map: self.fc_map,
            mac: self.fcf_mac,
        }
    }

    /// Maximum frame size verified via a solicited advertisement.
    pub fn mtu_valid(&self) -> bool {
        self.flags & FIP_FL_SOL != 0
    }

    /// Eligible for selection: validated and available.
    pub fn usable(&self) -> bool {
        const USABLE: u16 = FIP_FL_SOL | FIP_FL_AVAIL;
        self.flags & USABLE == USABLE
    }

    fn dead_deadline(&self) -> Instant {
        self.time + self.fka_period * 3 + defaults::FCF_FUZZ * 3
    }

    fn miss_deadline(&self) -> Instant {
        self.time + self.fka_period + self.fka_period / 2
    }
}

/// Result of folding an advertisement into the registry.
#[derive(Debug, Clone, Copy)]
pub struct Upsert {
    pub key: FcfKey,
    /// A new record was inserted (as opposed to refreshing one).
    pub created: bool,
    /// The registry was empty before this advertisement.
    pub was_empty: bool,
    /// The selected FCF changed its keep-alive period: (old, new).
    pub selected_ka_change: Option<(Duration, Duration)>,
}

/// Result of one aging pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgeOutcome {
    pub removed: usize,
    /// The selected FCF was among the removed.
    pub sel_lost: bool,
    /// The selected FCF has not been refreshed within 1.5 keep-alive
    /// periods (observability only).
    pub missed_ka: bool,
    /// Earliest upcoming aging deadline among surviving records.
    pub next: Option<Instant>,
    /// Earliest refresh time among validated survivors, anchoring the
    /// selection deadline.
    pub sel_candidate: Option<Instant>,
}

/// The registry. Iteration order is maintained so that validated
/// records come first: new records are inserted at the front and a
/// record is promoted to the front when its solicited advertisement
/// arrives, which also makes ties in `select` favor the forwarder that
/// answered us directly.
#[derive(Debug, Default)]
pub struct FcfTable {
    fcfs: Vec<Fcf>,
    sel: Option<FcfKey>,
}

impl FcfTable {
    pub fn new() -> FcfTable {
        FcfTable::default()
    }

    pub fn len(&self) -> usize {
        self.fcfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fcfs.is_empty()
    }

    pub fn clear(&mut self) {
        self.fcfs.clear();
        self.sel = None;
    }

    pub fn find(&self, key: &FcfKey) -> Option<&Fcf> {
        self.fcfs.iter().find(|f| f.key() == *key)
    }

    pub fn selection(&self) -> Option<FcfKey> {
        self.sel
    }

    pub fn selected(&self) -> Option<&Fcf> {
        self.sel.as_ref().and_then(|k| self.fcfs.iter().find(|f| f.key() == *k))
    }

    pub fn selected_mut(&mut self) -> Option<&mut Fcf> {
        let key = self.sel?;
        self.fcfs.iter_mut().find(|f| f.key() == key)
    }

    /// Insert or refresh a record from a parsed advertisement.
    ///
    /// Returns `None` when a new record is rejected by the registry cap.
    /// Flags of a record that has already proven usable are sticky: an
    /// unsolicited advertisement no longer changes them, only a fresh
    /// solicited one does.
    pub fn upsert(&mut self, new: Fcf) -> Option<Upsert> {
        let was_empty = self.fcfs.is_empty();
        let key = new.key();
        let Some(idx) = self.fcfs.iter().position(|f| f.key() == key) else {
            if self.fcfs.len() >= defaults::FCF_LIMIT {
                debug!(limit = defaults::FCF_LIMIT, "FCF registry full, ignoring new FCF");
                return None;
            }
            self.fcfs.insert(0, new);
            return Some(Upsert {
                key,
                created: true,
                was_empty,
                selected_ka_change: None,
            });
        };

        let selected = Some(key) == self.sel;
        let fcf = &mut self.fcfs[idx];
        fcf.fka_disabled = new.fka_disabled;
        if !fcf.usable() || new.flags & FIP_FL_SOL != 0 {
            fcf.flags = new.flags;
        }
        let ka_change = (selected && !fcf.fka_disabled && fcf.fka_period != new.fka_period)
            .then_some((fcf.fka_period, new.fka_period));
        fcf.fka_period = new.fka_period;
        fcf.time = new.time;
        if fcf.mtu_valid() && idx != 0 {
            let fcf = self.fcfs.remove(idx);
            self.fcfs.insert(0, fcf);
        }
        Some(Upsert {
            key,
            created: false,
            was_empty,
            selected_ka_change: ka_change,
        })
    }

    /// Remove records not refreshed within the dead threshold, note a
    /// missed keep-alive on a stale selected record, and compute the
    /// next aging deadline plus the selection-deadline anchor.
    ///
    /// Idempotent for a fixed `now`: a second pass removes nothing
    /// further and changes no flags.
    pub fn age(&mut self, now: Instant) -> AgeOutcome {
        let mut out = AgeOutcome::default();
        let sel = self.sel;
        self.fcfs.retain(|fcf| {
            let selected = Some(fcf.key()) == sel;
            if selected && now > fcf.miss_deadline() {
                out.missed_ka = true;
                let recheck = now + fcf.fka_period + fcf.fka_period / 2;
                out.next = min_deadline(out.next, recheck);
            }
            if now >= fcf.dead_deadline() {
                out.removed += 1;
                if selected {
                    out.sel_lost = true;
                }
                return false;
            }
            out.next = min_deadline(out.next, fcf.dead_deadline());
            if fcf.mtu_valid() {
                out.sel_candidate = match out.sel_candidate {
                    Some(t) if t <= fcf.time => Some(t),
                    _ => Some(fcf.time),
                };
            }
            true
        });
        if out.sel_lost {
            self.sel = None;
        }
        out
    }

    /// Pick the best usable FCF, or none when usable records advertise
    /// conflicting (fabric name, vfid, FC-MAP) triples. Ties on
    /// priority keep the earlier record in iteration order.
    pub fn select(&mut self) -> Option<FcfKey> {
        let mut best: Option<&Fcf> = None;
        for fcf in &self.fcfs {
            if !fcf.usable() {
                debug!(
                    fabric = format_args!("{:016x}", fcf.fabric_name),
                    flags = fcf.flags,
                    "skipping unusable FCF"
                );
                continue;
            }
            match best {
                None => best = Some(fcf),
                Some(b) => {
                    if fcf.fabric_name != b.fabric_name
                        || fcf.vfid != b.vfid
                        || fcf.fc_map != b.fc_map
                    {
                        debug!("conflicting fabric, VFID, or FC-MAP; no FCF selected");
                        self.sel = None;
                        return None;
                    }
                    if fcf.pri < b.pri {
                        best = Some(fcf);
                    }
                }
            }
        }
        self.sel = best.map(Fcf::key);
        self.sel
    }
}

fn min_deadline(cur: Option<Instant>, candidate: Instant) -> Option<Instant> {
    match cur {
        Some(t) if t <= candidate => Some(t),
        _ => Some(candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fcf(mac_low: u8, fabric: u64, pri: u8, flags: u16, now: Instant) -> Fcf {
        Fcf {
            fcf_mac: MacAddr([0x00, 0x0d, 0xec, 0x00, 0x00, mac_low]),
            switch_name: 0x2000_0000_0000_0000 | u64::from(mac_low),
            fabric_name: fabric,
            vfid: 1,
            fc_map: 0x0efc00,
            pri,
            flags,
            fka_period: defaults::DEF_FKA,
            fka_disabled: false,
            time: now,
        }
    }

    const USABLE: u16 = FIP_FL_SOL | FIP_FL_AVAIL;

    #[tokio::test(start_paused = true)]
    async fn test_upsert_dedupes_by_tuple() {
        let now = Instant::now();
        let mut t = FcfTable::new();
        assert!(t.upsert(fcf(1, 10, 5, USABLE, now)).unwrap().created);
        let up = t.upsert(fcf(1, 10, 5, USABLE, now)).unwrap();
        assert!(!up.created);
        assert_eq!(t.len(), 1);
        // Different MAC is a different tuple.
        assert!(t.upsert(fcf(2, 10, 5, USABLE, now)).unwrap().created);
        assert_eq!(t.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_cap_rejects_not_evicts() {
        let now = Instant::now();
        let mut t = FcfTable::new();
        for i in 0..defaults::FCF_LIMIT {
            assert!(t.upsert(fcf(i as u8, 10, 5, USABLE, now)).is_some());
        }
        assert!(t.upsert(fcf(200, 10, 5, USABLE, now)).is_none());
        assert_eq!(t.len(), defaults::FCF_LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_usable_flags_sticky_against_unsolicited() {
        let now = Instant::now();
        let mut t = FcfTable::new();
        let key = t.upsert(fcf(1, 10, 5, USABLE, now)).unwrap().key;
        // Unsolicited advertisement without the available bit.
        t.upsert(fcf(1, 10, 5, 0, now)).unwrap();
        assert!(t.find(&key).unwrap().usable());
        // A fresh solicited advertisement re-verifies the flags.
        t.upsert(fcf(1, 10, 5, FIP_FL_SOL, now)).unwrap();
        assert!(!t.find(&key).unwrap().usable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_prefers_lower_priority() {
        let now = Instant::now();
        for order in [[5u8, 1], [1, 5]] {
            let mut t = FcfTable::new();
            for (i, pri) in order.iter().enumerate() {
                t.upsert(fcf(i as u8, 10, *pri, USABLE, now));
            }
            let sel = t.select().unwrap();
            assert_eq!(t.find(&sel).unwrap().pri, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_aborts_on_fabric_conflict() {
        let now = Instant::now();
        let mut t = FcfTable::new();
        t.upsert(fcf(1, 10, 5, USABLE, now));
        t.upsert(fcf(2, 11, 1, USABLE, now));
        assert_eq!(t.select(), None);
        assert_eq!(t.selection(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_ignores_unusable() {
        let now = Instant::now();
        let mut t = FcfTable::new();
        t.upsert(fcf(1, 10, 1, FIP_FL_AVAIL, now));
        assert_eq!(t.select(), None);
        t.upsert(fcf(2, 10, 9, USABLE, now));
        assert!(t.select().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_removes_dead_retains_fresh() {
        let start = Instant::now();
        let mut t = FcfTable::new();
        t.upsert(fcf(1, 10, 5, USABLE, start));
        t.upsert(fcf(2, 10, 6, USABLE, start));

        // Refresh only the second record at 2x its keep-alive period.
        let mid = start + defaults::DEF_FKA * 2;
        t.upsert(fcf(2, 10, 6, USABLE, mid));

        let late = start + defaults::DEF_FKA * 3 + defaults::FCF_FUZZ * 3;
        let out = t.age(late);
        assert_eq!(out.removed, 1);
        assert_eq!(t.len(), 1);
        assert!(t.find(&fcf(2, 10, 6, USABLE, mid).key()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_is_idempotent() {
        let start = Instant::now();
        let mut t = FcfTable::new();
        t.upsert(fcf(1, 10, 5, USABLE, start));
        t.upsert(fcf(2, 10, 6, USABLE, start + defaults::DEF_FKA));

        let now = start + defaults::DEF_FKA * 3 + defaults::FCF_FUZZ * 3;
        let first = t.age(now);
        assert_eq!(first.removed, 1);
        let again = t.age(now);
        assert_eq!(again.removed, 0);
        assert_eq!(t.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_clears_lost_selection() {
        let start = Instant::now();
        let mut t = FcfTable::new();
        t.upsert(fcf(1, 10, 5, USABLE, start));
        t.select().unwrap();

        let out = t.age(start + defaults::DEF_FKA * 3 + defaults::FCF_FUZZ * 3);
        assert!(out.sel_lost);
        assert_eq!(t.selection(), None);
        assert!(t.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_reports_missed_keep_alive() {
        let start = Instant::now();
        let mut t = FcfTable::new();
        t.upsert(fcf(1, 10, 5, USABLE, start));
        t.select().unwrap();

        let out = t.age(start + defaults::DEF_FKA * 2);
        assert!(out.missed_ka);
        assert!(!out.sel_lost);
        assert_eq!(t.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validated_record_promoted_to_front() {
        let now = Instant::now();
        let mut t = FcfTable::new();
        t.upsert(fcf(1, 10, 5, USABLE, now));
        // Unvalidated record lands in front as the newest entry.
        t.upsert(fcf(2, 10, 5, FIP_FL_AVAIL, now));
        // Equal priority; ties favor the front of the list, and a
        // solicited refresh moves the answering FCF there.
        t.upsert(fcf(1, 10, 5, USABLE, now));
        let sel = t.select().unwrap();
        assert_eq!(sel.mac, MacAddr([0x00, 0x0d, 0xec, 0x00, 0x00, 1]));
    }
}
