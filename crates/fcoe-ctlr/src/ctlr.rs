//! Controller state machine, lifecycle, and background tasks.
//!
//! The timer task only does deadline arithmetic under the lock and
//! flags pending work; the work task builds frames, performs resets,
//! and drains the received-frame queue. Frames to transmit and upward
//! notifications are buffered on the state while the lock is held and
//! flushed after it is released, so no collaborator call ever runs
//! under the controller lock.

use std::mem;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use fcoe_proto::constants::*;
use fcoe_proto::defaults;
use fcoe_proto::error::FipError;
use fcoe_proto::{FrameBuilder, MacAddr};

use crate::els::{self, ElsSendOutcome};
use crate::fcf::{Fcf, FcfTable};
use crate::lport::{ElsDelivery, FcLport};
use crate::recv;
use crate::transport::FipTransport;
use crate::vlan;
use crate::vn2vn;

/// Controller protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FipState {
    /// Terminal; set at destroy. All frames are dropped.
    Disabled,
    /// Waiting for the L2 link to come up.
    LinkWait,
    /// Probing: FIP and legacy addressing both possible.
    Auto,
    /// Legacy point-to-point addressing, settled for this link.
    NonFip,
    /// FIP operation against a fabric FCF.
    Enabled,
    /// VN2VN multipoint states, driven externally.
    Vn2VnStart,
    Vn2VnClaim,
    Vn2VnUp,
}

impl FipState {
    pub fn is_vn2vn(self) -> bool {
        matches!(self, FipState::Vn2VnStart | FipState::Vn2VnClaim | FipState::Vn2VnUp)
    }
}

/// Discovery mode chosen at link-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FipMode {
    Auto,
    NonFip,
    Fabric,
    Vn2Vn,
}

/// Static controller configuration.
#[derive(Debug, Clone)]
pub struct CtlrConfig {
    pub mode: FipMode,
    /// Control-plane source MAC (the port's burned-in address).
    pub ctl_src_addr: MacAddr,
    /// Offer server-provided MAC addressing in addition to FPMA.
    pub spma: bool,
    /// Initial VLAN id: 0 requests FIP VLAN discovery,
    /// [`VLAN_DISCOVERY_DISABLED`] skips it.
    pub vlan_id: u16,
}

impl Default for CtlrConfig {
    fn default() -> CtlrConfig {
        CtlrConfig {
            mode: FipMode::Auto,
            ctl_src_addr: MacAddr::ZERO,
            spma: false,
            vlan_id: 0,
        }
    }
}

/// Observability counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CtlrStats {
    /// Selected FCF missed a discovery advertisement window.
    pub miss_disc_adv: u64,
    /// Virtual link failures: FCF timeouts and validated CVLs.
    pub vlink_failures: u64,
    /// ELS frames delivered upward.
    pub rx_frames: u64,
    /// 4-byte words in those frames.
    pub rx_words: u64,
}

/// Deferred collaborator call, flushed after the lock is released.
#[derive(Debug)]
pub(crate) enum FcEvent {
    LinkUp,
    LinkDown,
    Reset,
    UpdateMac(MacAddr),
    DeliverEls(ElsDelivery),
    SetVlanTag(u16),
}

/// All mutable controller state, guarded by one lock.
pub(crate) struct Ctlr {
    pub state: FipState,
    pub mode: FipMode,
    pub ctl_src_addr: MacAddr,
    /// Destination MAC for non-FIP (legacy) FCoE traffic.
    pub dest_addr: MacAddr,
    pub spma: bool,
    /// Derive legacy destination MACs from the FC-MAP instead of
    /// `dest_addr`.
    pub map_dest: bool,
    /// OX_ID of the outstanding FLOGI, or [`FC_XID_UNKNOWN`].
    pub flogi_oxid: u16,
    pub flogi_count: u8,
    pub vlan_id: u16,
    pub fcfs: FcfTable,
    pub stats: CtlrStats,

    /// Last multicast solicitation, pacing re-solicits.
    pub sol_time: Option<Instant>,
    /// Deadline after which selection may run.
    pub sel_time: Option<Instant>,
    pub ctlr_ka_time: Instant,
    pub port_ka_time: Instant,
    /// Next timer fire time; `None` parks the timer task.
    pub timer_at: Option<Instant>,

    // Work flagged by the timer, performed by the work task.
    pub reset_req: bool,
    pub send_ctlr_ka: bool,
    pub send_port_ka: bool,

    // Deferred outputs, drained by the caller after unlock.
    pub tx: Vec<Vec<u8>>,
    pub events: Vec<FcEvent>,
}

impl Ctlr {
    fn new(config: &CtlrConfig, now: Instant) -> Ctlr {
        Ctlr {
            state: FipState::LinkWait,
            mode: config.mode,
            ctl_src_addr: config.ctl_src_addr,
            dest_addr: MacAddr::ZERO,
            spma: config.spma,
            map_dest: false,
            flogi_oxid: FC_XID_UNKNOWN,
            flogi_count: 0,
            vlan_id: config.vlan_id,
            fcfs: FcfTable::new(),
            stats: CtlrStats::default(),
            sol_time: None,
            sel_time: None,
            ctlr_ka_time: now,
            port_ka_time: now,
            timer_at: None,
            reset_req: false,
            send_ctlr_ka: false,
            send_port_ka: false,
            tx: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Pull the timer fire time earlier if needed.
    pub(crate) fn arm_timer(&mut self, at: Instant) {
        if self.timer_at.map_or(true, |cur| at < cur) {
            self.timer_at = Some(at);
        }
    }

    /// Clear the registry, selection, and outstanding exchange. The
    /// timer stays armed while VLAN discovery is still unresolved.
    pub(crate) fn reset(&mut self, now: Instant) {
        self.fcfs.clear();
        self.sel_time = None;
        self.sol_time = None;
        self.ctlr_ka_time = now;
        self.port_ka_time = now;
        self.flogi_oxid = FC_XID_UNKNOWN;
        self.map_dest = false;
        if self.vlan_id != 0 {
            self.timer_at = None;
        }
    }

    /// Point legacy destinations at the FC-MAP-derived range.
    pub(crate) fn map_dest_addr(&mut self) {
        let fc_map = if self.mode == FipMode::Vn2Vn {
            FIP_VN_FC_MAP
        } else {
            FIP_DEF_FC_MAP
        };
        self.dest_addr = MacAddr::from_fc_id(fc_map, 0);
        self.map_dest = true;
    }

    /// Build a solicitation, multicast or targeted at one FCF.
    pub(crate) fn solicit(&mut self, lport: &dyn FcLport, target: Option<MacAddr>, now: Instant) {
        if self.vlan_id == 0 {
            return;
        }
        let mut flags = FIP_FL_FPMA;
        if self.spma {
            flags |= FIP_FL_SPMA;
        }
        let dest = target.unwrap_or(MacAddr::ALL_FCFS);
        let mut b = FrameBuilder::new(dest, self.ctl_src_addr, FIP_OP_DISC, FIP_SC_SOL, flags);
        b.mac_desc(self.ctl_src_addr);
        b.wwn_desc(FIP_DT_NAME, lport.wwnn());
        b.fcoe_size_desc(fcoe_size(lport.mfs()));
        self.tx.push(b.finish());
        if target.is_none() {
            self.sol_time = Some(now);
            self.arm_timer(now + defaults::FCF_START_DELAY);
        }
    }

    /// Build one keep-alive to the selected FCF. `port` carries the
    /// VN_Port identity for a port keep-alive; `None` builds the
    /// controller-level one.
    pub(crate) fn send_keep_alive(&mut self, lport: &dyn FcLport, port: Option<PortKa>) {
        let Some(fcf_mac) = self.fcfs.selected().map(|f| f.fcf_mac) else {
            return;
        };
        if lport.port_id() == 0 {
            return;
        }
        let src = port.as_ref().map_or(self.ctl_src_addr, |p| p.mac);
        let mut flags = FIP_FL_FPMA;
        if self.spma {
            flags |= FIP_FL_SPMA;
        }
        let mut b = FrameBuilder::new(fcf_mac, src, FIP_OP_CTRL, FIP_SC_KEEP_ALIVE, flags);
        b.mac_desc(self.ctl_src_addr);
        if let Some(p) = port {
            b.vn_id_desc(p.mac, p.port_id, p.wwpn);
        }
        self.tx.push(b.finish());
    }

    /// Timer expiry: age the registry, run deferred selection, mark
    /// keep-alives due, and compute the next fire time. Returns true
    /// when the work task must run. Never builds frames.
    pub(crate) fn on_timer(&mut self, now: Instant) -> bool {
        if self.state == FipState::Disabled {
            return false;
        }
        if self.mode == FipMode::Vn2Vn {
            return true;
        }
        if self.vlan_id == 0 {
            // VLAN discovery unanswered; retry from the work task.
            self.arm_timer(now + defaults::VLAN_DISC_RETRY_TOV);
            return true;
        }

        let mut work = false;
        let prev_sel = self.fcfs.selection();
        let age = self.fcfs.age(now);
        if age.missed_ka {
            self.stats.miss_disc_adv += 1;
        }
        self.stats.vlink_failures += age.removed as u64;
        let mut next = age.next;

        if self.fcfs.selection().is_none() {
            if let Some(at) = self.sel_time {
                if now >= at {
                    self.sel_time = None;
                    self.fcfs.select();
                } else {
                    next = Some(next.map_or(at, |n| n.min(at)));
                }
            }
        }

        if self.fcfs.selection() != prev_sel {
            match self.fcfs.selected().map(|f| (f.fcf_mac, f.fka_period)) {
                Some((mac, fka)) => {
                    info!(fcf = %mac, "FIP selected Fibre-Channel Forwarder");
                    self.dest_addr = mac;
                    self.map_dest = false;
                    self.port_ka_time = now + defaults::PORT_KA_PERIOD;
                    self.ctlr_ka_time = now + fka;
                }
                None => {
                    warn!("Fibre-Channel Forwarder timed out, restarting discovery");
                    self.reset_req = true;
                    work = true;
                }
            }
        }

        if let Some((fka, fka_disabled)) =
            self.fcfs.selected().map(|f| (f.fka_period, f.fka_disabled))
        {
            if !fka_disabled {
                if now >= self.ctlr_ka_time {
                    self.ctlr_ka_time = now + fka;
                    self.send_ctlr_ka = true;
                }
                if now >= self.port_ka_time {
                    self.port_ka_time = now + defaults::PORT_KA_PERIOD;
                    self.send_port_ka = true;
                }
                next = Some(next.map_or(self.ctlr_ka_time, |n| n.min(self.ctlr_ka_time)));
                next = Some(next.map_or(self.port_ka_time, |n| n.min(self.port_ka_time)));
            }
        }

        if let Some(candidate) = age.sel_candidate {
            if self.fcfs.selection().is_none() && self.sel_time.is_none() {
                let at = candidate + defaults::FCF_START_DELAY;
                self.sel_time = Some(at);
                next = Some(next.map_or(at, |n| n.min(at)));
            }
        }

        if let Some(at) = next {
            self.arm_timer(at);
        }
        work || self.send_ctlr_ka || self.send_port_ka
    }
}

/// VN_Port identity for a port keep-alive.
pub(crate) struct PortKa {
    pub mac: MacAddr,
    pub port_id: u32,
    pub wwpn: u64,
}

/// Maximum FCoE frame size for the port's MFS: payload plus FC header,
/// FCoE header, and CRC/EOF trailer.
pub(crate) fn fcoe_size(mfs: u16) -> u16 {
    mfs + (FC_FRAME_HDR_LEN + FCOE_HDR_LEN + FCOE_CRC_EOF_LEN) as u16
}

struct Shared {
    ctlr: Mutex<Ctlr>,
    transport: Arc<dyn FipTransport>,
    lport: Arc<dyn FcLport>,
    work_notify: Notify,
    timer_notify: Notify,
    shutdown: Notify,
}

impl Shared {
    /// Deliver deferred notifications, then transmit deferred frames,
    /// then let the timer task pick up any new deadline.
    async fn flush(&self, events: Vec<FcEvent>, frames: Vec<Vec<u8>>) {
        for ev in events {
            match ev {
                FcEvent::LinkUp => self.lport.link_up().await,
                FcEvent::LinkDown => self.lport.link_down().await,
                FcEvent::Reset => self.lport.reset().await,
                FcEvent::UpdateMac(mac) => self.lport.update_mac(mac).await,
                FcEvent::DeliverEls(d) => self.lport.deliver_els(d).await,
                FcEvent::SetVlanTag(vlan_id) => {
                    if !self.transport.set_vlan_tag(vlan_id).await {
                        debug!(vlan_id, "failed to apply VLAN tag");
                    }
                }
            }
        }
        for frame in frames {
            self.transport.send(frame).await;
        }
        self.timer_notify.notify_one();
    }
}

/// One FIP controller instance per initiator port.
pub struct FcoeCtlr {
    shared: Arc<Shared>,
    frame_tx: Option<mpsc::Sender<Vec<u8>>>,
    work_task: Option<JoinHandle<()>>,
    timer_task: Option<JoinHandle<()>>,
}

impl FcoeCtlr {
    /// Construct the controller and spawn its timer and work tasks.
    /// The state machine starts in `LinkWait`.
    pub fn new(
        config: CtlrConfig,
        transport: Arc<dyn FipTransport>,
        lport: Arc<dyn FcLport>,
    ) -> FcoeCtlr {
        let shared = Arc::new(Shared {
            ctlr: Mutex::new(Ctlr::new(&config, Instant::now())),
            transport,
            lport,
            work_notify: Notify::new(),
            timer_notify: Notify::new(),
            shutdown: Notify::new(),
        });
        let (frame_tx, frame_rx) = mpsc::channel(defaults::RECV_QUEUE_DEPTH);
        let work_task = tokio::spawn(work_loop(Arc::clone(&shared), frame_rx));
        let timer_task = tokio::spawn(timer_loop(Arc::clone(&shared)));
        FcoeCtlr {
            shared,
            frame_tx: Some(frame_tx),
            work_task: Some(work_task),
            timer_task: Some(timer_task),
        }
    }

    /// Enqueue a received FIP frame for dispatch. Never blocks; frames
    /// arriving while the queue is full are dropped.
    pub fn recv(&self, frame: Vec<u8>) {
        if let Some(tx) = &self.frame_tx {
            if tx.try_send(frame).is_err() {
                debug!("received-frame queue full, dropping FIP frame");
            }
        }
    }

    /// L2 link came up: choose a mode and start discovery.
    pub async fn link_up(&self) {
        let (events, frames) = {
            let mut c = self.shared.ctlr.lock().await;
            let now = Instant::now();
            match c.state {
                FipState::NonFip | FipState::Auto => {
                    c.events.push(FcEvent::LinkUp);
                }
                FipState::LinkWait => {
                    c.state = match c.mode {
                        FipMode::Auto => FipState::Auto,
                        FipMode::NonFip => FipState::NonFip,
                        FipMode::Fabric => FipState::Enabled,
                        FipMode::Vn2Vn => FipState::Vn2VnStart,
                    };
                    info!(mode = ?c.mode, "link up");
                    c.events.push(FcEvent::LinkUp);
                    match c.mode {
                        FipMode::Vn2Vn => {
                            vn2vn::vn_start(&mut c);
                            if self.shared.transport.static_vlan().is_none() {
                                info!("no static VLAN id set for VN2VN operation");
                            }
                        }
                        FipMode::NonFip => {}
                        FipMode::Auto | FipMode::Fabric => {
                            self.start_discovery(&mut c, now);
                        }
                    }
                }
                _ => {}
            }
            (mem::take(&mut c.events), mem::take(&mut c.tx))
        };
        self.shared.flush(events, frames).await;
    }

    fn start_discovery(&self, c: &mut Ctlr, now: Instant) {
        let lport = self.shared.lport.as_ref();
        if c.vlan_id != 0 {
            c.solicit(lport, None, now);
            return;
        }
        let static_vlan = self
            .shared
            .transport
            .static_vlan()
            .filter(|v| *v != 0 && *v <= VLAN_VID_MASK);
        if let Some(vlan_id) = static_vlan {
            debug!(vlan_id, "VLAN id already known, skipping FIP VLAN discovery");
            c.vlan_id = VLAN_DISCOVERY_DISABLED;
            c.solicit(lport, None, now);
        } else {
            vlan::vlan_request(c, now);
        }
    }

    /// L2 link went down. Returns true if the controller was active.
    pub async fn link_down(&self) -> bool {
        let (dropped, events, frames) = {
            let mut c = self.shared.ctlr.lock().await;
            debug!("link down");
            c.reset(Instant::now());
            let dropped = c.state != FipState::LinkWait;
            c.state = FipState::LinkWait;
            if dropped {
                c.events.push(FcEvent::LinkDown);
            }
            (dropped, mem::take(&mut c.events), mem::take(&mut c.tx))
        };
        self.shared.flush(events, frames).await;
        dropped
    }

    /// Encapsulate and send an outgoing ELS frame, or tell the caller
    /// to send it natively / drop it. `reply_encaps` is the descriptor
    /// type recorded when the request being answered arrived.
    pub async fn els_send(&self, els: &[u8], reply_encaps: Option<u8>) -> ElsSendOutcome {
        let (outcome, events, frames) = {
            let mut c = self.shared.ctlr.lock().await;
            let out = els::els_send(&mut c, self.shared.lport.as_ref(), els, reply_encaps);
            (out, mem::take(&mut c.events), mem::take(&mut c.tx))
        };
        self.shared.flush(events, frames).await;
        outcome
    }

    /// Snoop a non-FIP FC frame for FLOGI traffic while the addressing
    /// mode is unsettled. `Ok(Some(mac))` supplies the granted MAC for
    /// an accepted login; an error means the frame must be suppressed.
    pub async fn recv_flogi(
        &self,
        frame: &[u8],
        source: MacAddr,
    ) -> Result<Option<MacAddr>, FipError> {
        let mut c = self.shared.ctlr.lock().await;
        els::recv_flogi(&mut c, frame, source)
    }

    /// Current protocol state.
    pub async fn state(&self) -> FipState {
        self.shared.ctlr.lock().await.state
    }

    /// Snapshot of the observability counters.
    pub async fn stats(&self) -> CtlrStats {
        self.shared.ctlr.lock().await.stats
    }

    /// The currently selected FCF, if any.
    pub async fn selected_fcf(&self) -> Option<Fcf> {
        self.shared.ctlr.lock().await.fcfs.selected().cloned()
    }

    /// Resolved VLAN id, if discovery has completed.
    pub async fn vlan_id(&self) -> u16 {
        self.shared.ctlr.lock().await.vlan_id
    }

    /// Tear the controller down: stop new enqueues, drain the queue,
    /// disable the state machine, then stop the timer. After this no
    /// further work or timer activity exists.
    pub async fn destroy(mut self) {
        self.frame_tx.take();
        if let Some(task) = self.work_task.take() {
            let _ = task.await;
        }
        {
            let mut c = self.shared.ctlr.lock().await;
            c.state = FipState::Disabled;
            c.fcfs.clear();
            c.sel_time = None;
            c.timer_at = None;
            c.tx.clear();
            c.events.clear();
        }
        // notify_one stores a permit, so the timer task cannot miss the
        // shutdown even if it is mid-iteration.
        self.shared.shutdown.notify_one();
        if let Some(task) = self.timer_task.take() {
            let _ = task.await;
        }
    }
}

/// Single-shot timer, always rearmed to the nearest pending deadline.
async fn timer_loop(shared: Arc<Shared>) {
    loop {
        let at = { shared.ctlr.lock().await.timer_at };
        let fired = tokio::select! {
            _ = shared.shutdown.notified() => return,
            _ = shared.timer_notify.notified() => false,
            _ = async {
                match at {
                    Some(t) => time::sleep_until(t).await,
                    None => std::future::pending::<()>().await,
                }
            } => true,
        };
        if !fired {
            continue;
        }
        let wake = {
            let mut c = shared.ctlr.lock().await;
            c.timer_at = None;
            c.on_timer(Instant::now())
        };
        if wake {
            shared.work_notify.notify_one();
        }
    }
}

/// Single-flight work task: drains the received-frame queue and
/// performs timer-flagged work. Exits when the queue is closed and
/// empty.
async fn work_loop(shared: Arc<Shared>, mut frame_rx: mpsc::Receiver<Vec<u8>>) {
    loop {
        tokio::select! {
            maybe = frame_rx.recv() => match maybe {
                Some(frame) => handle_frame(&shared, frame).await,
                None => return,
            },
            _ = shared.work_notify.notified() => run_deferred(&shared).await,
        }
    }
}

async fn handle_frame(shared: &Shared, frame: Vec<u8>) {
    let (events, frames) = {
        let mut c = shared.ctlr.lock().await;
        recv::on_frame(&mut c, shared.lport.as_ref(), Instant::now(), &frame);
        (mem::take(&mut c.events), mem::take(&mut c.tx))
    };
    shared.flush(events, frames).await;
}

/// Perform work flagged by the timer. Tolerates being woken with
/// nothing to do.
async fn run_deferred(shared: &Shared) {
    let (events, frames) = {
        let mut c = shared.ctlr.lock().await;
        let now = Instant::now();
        if c.mode == FipMode::Vn2Vn {
            vn2vn::vn_timeout(&mut c);
        } else {
            let lport = shared.lport.as_ref();
            if mem::take(&mut c.reset_req) {
                c.reset(now);
                c.events.push(FcEvent::Reset);
                if c.vlan_id == VLAN_DISCOVERY_DISABLED {
                    c.solicit(lport, None, now);
                } else {
                    vlan::vlan_request(&mut c, now);
                }
            } else if c.vlan_id == 0 && shared.transport.l2_link_ok() {
                debug!("FIP VLAN id still unknown, retrying VLAN discovery");
                vlan::vlan_request(&mut c, now);
            }
            if mem::take(&mut c.send_ctlr_ka) {
                c.send_keep_alive(lport, None);
            }
            if mem::take(&mut c.send_port_ka) {
                c.send_keep_alive(
                    lport,
                    Some(PortKa {
                        mac: lport.get_src_addr(),
                        port_id: lport.port_id(),
                        wwpn: lport.wwpn(),
                    }),
                );
                for vp in lport.vn_ports() {
                    c.send_keep_alive(
                        lport,
                        Some(PortKa {
                            mac: vp.mac,
                            port_id: vp.port_id,
                            wwpn: vp.wwpn,
                        }),
                    );
                }
            }
        }
        (mem::take(&mut c.events), mem::take(&mut c.tx))
    };
    shared.flush(events, frames).await;
}
