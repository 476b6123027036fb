//! End-to-end controller scenarios against fake transport and FC layers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

use fcoe_ctlr::{
    CtlrConfig, ElsDelivery, ElsSendOutcome, FcLport, FcoeCtlr, FipMode, FipState, FipTransport,
    VnPort,
};
use fcoe_proto::constants::*;
use fcoe_proto::fc::{
    ELS_FLOGI, ELS_LS_ACC, ELS_LS_RJT, FC_RCTL_ELS_REP, FC_RCTL_ELS_REQ, FC_TYPE_ELS,
};
use fcoe_proto::wire::FipFrame;
use fcoe_proto::{FrameBuilder, MacAddr};

const CTL_MAC: MacAddr = MacAddr([0x02, 0x50, 0x56, 0x00, 0x00, 0x01]);
const FCF_MAC: MacAddr = MacAddr([0x00, 0x0d, 0xec, 0x00, 0x00, 0x01]);
const FCF2_MAC: MacAddr = MacAddr([0x00, 0x0d, 0xec, 0x00, 0x00, 0x02]);
const SWITCH_NAME: u64 = 0x2000_000d_ec00_0001;
const FABRIC_NAME: u64 = 0x2001_000d_ec00_0001;

#[derive(Default)]
struct FakeTransport {
    frames: Mutex<Vec<Vec<u8>>>,
    vlan_tags: Mutex<Vec<u16>>,
    static_vlan: Option<u16>,
}

#[async_trait]
impl FipTransport for FakeTransport {
    async fn send(&self, frame: Vec<u8>) {
        self.frames.lock().unwrap().push(frame);
    }

    async fn set_vlan_tag(&self, vlan_id: u16) -> bool {
        self.vlan_tags.lock().unwrap().push(vlan_id);
        true
    }

    fn static_vlan(&self) -> Option<u16> {
        self.static_vlan
    }

    fn l2_link_ok(&self) -> bool {
        true
    }
}

impl FakeTransport {
    fn sent(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    /// Sent frames matching a FIP (op, subcode) pair.
    fn sent_ops(&self, op: u16, subcode: u8) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter(|raw| {
                FipFrame::parse(raw)
                    .map(|f| f.hdr.op == op && f.hdr.subcode == subcode)
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LportEvent {
    LinkUp,
    LinkDown,
    Reset,
    UpdateMac(MacAddr),
}

struct FakeLport {
    port_id: AtomicU32,
    events: Mutex<Vec<LportEvent>>,
    els: Mutex<Vec<ElsDelivery>>,
}

impl FakeLport {
    fn new() -> FakeLport {
        FakeLport {
            port_id: AtomicU32::new(0),
            events: Mutex::new(Vec::new()),
            els: Mutex::new(Vec::new()),
        }
    }

    fn logged_in(fc_id: u32) -> FakeLport {
        let lp = FakeLport::new();
        lp.port_id.store(fc_id, Ordering::SeqCst);
        lp
    }

    fn events(&self) -> Vec<LportEvent> {
        self.events.lock().unwrap().clone()
    }

    fn delivered(&self) -> Vec<ElsDelivery> {
        self.els.lock().unwrap().clone()
    }
}

#[async_trait]
impl FcLport for FakeLport {
    fn wwnn(&self) -> u64 {
        0x1000_0250_5600_0001
    }

    fn wwpn(&self) -> u64 {
        0x2000_0250_5600_0001
    }

    fn port_id(&self) -> u32 {
        self.port_id.load(Ordering::SeqCst)
    }

    fn mfs(&self) -> u16 {
        2112
    }

    fn get_src_addr(&self) -> MacAddr {
        MacAddr::from_fc_id(FIP_DEF_FC_MAP, self.port_id())
    }

    fn vn_ports(&self) -> Vec<VnPort> {
        Vec::new()
    }

    async fn link_up(&self) {
        self.events.lock().unwrap().push(LportEvent::LinkUp);
    }

    async fn link_down(&self) {
        self.events.lock().unwrap().push(LportEvent::LinkDown);
    }

    async fn reset(&self) {
        self.events.lock().unwrap().push(LportEvent::Reset);
    }

    async fn update_mac(&self, mac: MacAddr) {
        self.events.lock().unwrap().push(LportEvent::UpdateMac(mac));
    }

    async fn deliver_els(&self, delivery: ElsDelivery) {
        self.els.lock().unwrap().push(delivery);
    }
}

fn config(vlan_id: u16) -> CtlrConfig {
    CtlrConfig {
        mode: FipMode::Auto,
        ctl_src_addr: CTL_MAC,
        spma: false,
        vlan_id,
    }
}

fn advertisement(fcf_mac: MacAddr, switch_name: u64, fabric_name: u64, pri: u8, fka_ms: u32) -> Vec<u8> {
    advertisement_fka(fcf_mac, switch_name, fabric_name, pri, 0, fka_ms)
}

fn advertisement_fka(
    fcf_mac: MacAddr,
    switch_name: u64,
    fabric_name: u64,
    pri: u8,
    fka_flags: u8,
    fka_ms: u32,
) -> Vec<u8> {
    let mut b = FrameBuilder::new(
        MacAddr::ALL_ENODES,
        fcf_mac,
        FIP_OP_DISC,
        FIP_SC_ADV,
        FIP_FL_FPMA | FIP_FL_SOL | FIP_FL_AVAIL,
    );
    b.pri_desc(pri);
    b.mac_desc(fcf_mac);
    b.wwn_desc(FIP_DT_NAME, switch_name);
    b.fabric_desc(fabric_name, 1, 0x0efc00);
    b.fka_desc(fka_flags, fka_ms);
    b.finish()
}

fn vlan_notification(vlan_id: u16) -> Vec<u8> {
    let mut b = FrameBuilder::new(CTL_MAC, FCF_MAC, FIP_OP_VLAN, FIP_SC_VL_NOTE, 0);
    b.mac_desc(FCF_MAC);
    b.vlan_desc(vlan_id);
    b.finish()
}

fn els_frame(r_ctl: u8, d_id: u32, s_id: u32, ox_id: u16, opcode: u8) -> Vec<u8> {
    let mut f = vec![0u8; FC_FRAME_HDR_LEN + 4];
    f[0] = r_ctl;
    f[1..4].copy_from_slice(&[(d_id >> 16) as u8, (d_id >> 8) as u8, d_id as u8]);
    f[5..8].copy_from_slice(&[(s_id >> 16) as u8, (s_id >> 8) as u8, s_id as u8]);
    f[8] = FC_TYPE_ELS;
    f[16..18].copy_from_slice(&ox_id.to_be_bytes());
    f[FC_FRAME_HDR_LEN] = opcode;
    f
}

fn flogi(ox_id: u16) -> Vec<u8> {
    els_frame(FC_RCTL_ELS_REQ, FC_FID_FLOGI, 0, ox_id, ELS_FLOGI)
}

/// Wrap an ELS frame the way an FCF replying to us would.
fn fip_els_reply(dtype: u8, els: &[u8], granted: Option<MacAddr>) -> Vec<u8> {
    let mut b = FrameBuilder::new(CTL_MAC, FCF_MAC, FIP_OP_LS, FIP_SC_REP, 0);
    b.encaps_desc(dtype, els);
    if let Some(mac) = granted {
        b.mac_desc(mac);
    }
    b.finish()
}

async fn settle() {
    time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_vlan_discovery_then_solicitation() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::new());
    let ctlr = FcoeCtlr::new(config(0), transport.clone(), lport.clone());

    ctlr.link_up().await;
    settle().await;
    assert_eq!(transport.sent_ops(FIP_OP_VLAN, FIP_SC_VL_REQ).len(), 1);
    assert_eq!(*transport.vlan_tags.lock().unwrap(), vec![0]);
    // Discovery is held back until the VLAN is known.
    assert!(transport.sent_ops(FIP_OP_DISC, FIP_SC_SOL).is_empty());

    ctlr.recv(vlan_notification(42));
    settle().await;
    assert_eq!(ctlr.vlan_id().await, 42);
    assert_eq!(*transport.vlan_tags.lock().unwrap(), vec![0, 42]);

    let sols = transport.sent_ops(FIP_OP_DISC, FIP_SC_SOL);
    assert_eq!(sols.len(), 1);
    let sol = FipFrame::parse(&sols[0]).unwrap();
    assert_eq!(sol.eth.dest, MacAddr::ALL_FCFS);
    assert_eq!(sol.eth.source, CTL_MAC);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_static_vlan_skips_discovery() {
    let transport = Arc::new(FakeTransport {
        static_vlan: Some(42),
        ..FakeTransport::default()
    });
    let ctlr = FcoeCtlr::new(config(0), transport.clone(), Arc::new(FakeLport::new()));

    // The link already carries a known VLAN tag: discovery starts with
    // a solicitation directly, without any FIP VLAN request.
    ctlr.link_up().await;
    settle().await;
    assert!(transport.sent_ops(FIP_OP_VLAN, FIP_SC_VL_REQ).is_empty());
    assert_eq!(transport.sent_ops(FIP_OP_DISC, FIP_SC_SOL).len(), 1);
    assert_eq!(ctlr.vlan_id().await, VLAN_DISCOVERY_DISABLED);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_vlan_request_retries() {
    let transport = Arc::new(FakeTransport::default());
    let ctlr = FcoeCtlr::new(config(0), transport.clone(), Arc::new(FakeLport::new()));

    ctlr.link_up().await;
    time::sleep(Duration::from_millis(4500)).await;
    // Initial request plus two 2-second retries.
    assert_eq!(transport.sent_ops(FIP_OP_VLAN, FIP_SC_VL_REQ).len(), 3);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_selection_prefers_lower_priority() {
    let transport = Arc::new(FakeTransport::default());
    let ctlr = FcoeCtlr::new(
        config(VLAN_DISCOVERY_DISABLED),
        transport.clone(),
        Arc::new(FakeLport::new()),
    );

    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 9, 8000));
    ctlr.recv(advertisement(FCF2_MAC, SWITCH_NAME + 1, FABRIC_NAME, 3, 8000));
    settle().await;
    assert_eq!(ctlr.state().await, FipState::Enabled);
    // Selection waits out the start delay.
    assert!(ctlr.selected_fcf().await.is_none());

    time::sleep(Duration::from_millis(2500)).await;
    let sel = ctlr.selected_fcf().await.unwrap();
    assert_eq!(sel.fcf_mac, FCF2_MAC);
    assert_eq!(sel.pri, 3);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_fabric_conflict_blocks_selection() {
    let transport = Arc::new(FakeTransport::default());
    let ctlr = FcoeCtlr::new(
        config(VLAN_DISCOVERY_DISABLED),
        transport.clone(),
        Arc::new(FakeLport::new()),
    );

    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 9, 8000));
    ctlr.recv(advertisement(FCF2_MAC, SWITCH_NAME + 1, FABRIC_NAME + 1, 3, 8000));
    time::sleep(Duration::from_millis(2500)).await;
    assert!(ctlr.selected_fcf().await.is_none());

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_flogi_auto_fallback_to_non_fip() {
    let transport = Arc::new(FakeTransport::default());
    let ctlr = FcoeCtlr::new(
        config(VLAN_DISCOVERY_DISABLED),
        transport.clone(),
        Arc::new(FakeLport::new()),
    );
    ctlr.link_up().await;
    assert_eq!(ctlr.state().await, FipState::Auto);

    // No FIP traffic: the first three attempts are held back, the
    // fourth goes out unencapsulated.
    for attempt in 0..3u16 {
        let out = ctlr.els_send(&flogi(0x1000 + attempt), None).await;
        assert_eq!(out, ElsSendOutcome::Drop, "attempt {attempt}");
    }
    let out = ctlr.els_send(&flogi(0x1003), None).await;
    assert_eq!(out, ElsSendOutcome::Native);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_flogi_encapsulated_with_zeroed_fpma_mac() {
    let transport = Arc::new(FakeTransport::default());
    let ctlr = FcoeCtlr::new(
        config(VLAN_DISCOVERY_DISABLED),
        transport.clone(),
        Arc::new(FakeLport::new()),
    );
    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 5, 8000));
    time::sleep(Duration::from_millis(2500)).await;
    assert!(ctlr.selected_fcf().await.is_some());

    assert_eq!(ctlr.els_send(&flogi(0x1234), None).await, ElsSendOutcome::Sent);
    let reqs = transport.sent_ops(FIP_OP_LS, FIP_SC_REQ);
    assert_eq!(reqs.len(), 1);
    let frame = FipFrame::parse(&reqs[0]).unwrap();
    assert_eq!(frame.eth.dest, FCF_MAC);

    let mut saw_flogi = false;
    let mut mac_desc = None;
    for desc in frame.descriptors() {
        let desc = desc.unwrap();
        match desc.dtype {
            FIP_DT_FLOGI => saw_flogi = true,
            FIP_DT_MAC => mac_desc = Some(desc.mac().unwrap()),
            other => panic!("unexpected descriptor {other}"),
        }
    }
    assert!(saw_flogi);
    // FPMA login: the forwarder assigns our MAC, the descriptor is zero.
    assert_eq!(mac_desc, Some(MacAddr::ZERO));

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_fdisc_without_source_id_refused() {
    let transport = Arc::new(FakeTransport::default());
    let ctlr = FcoeCtlr::new(
        config(VLAN_DISCOVERY_DISABLED),
        transport.clone(),
        Arc::new(FakeLport::new()),
    );
    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 5, 8000));
    time::sleep(Duration::from_millis(2500)).await;

    let fdisc = els_frame(FC_RCTL_ELS_REQ, FC_FID_FLOGI, 0, 0x2000, fcoe_proto::fc::ELS_FDISC);
    assert_eq!(ctlr.els_send(&fdisc, None).await, ElsSendOutcome::Drop);

    let fdisc = els_frame(FC_RCTL_ELS_REQ, FC_FID_FLOGI, 0x010203, 0x2001, fcoe_proto::fc::ELS_FDISC);
    assert_eq!(ctlr.els_send(&fdisc, None).await, ElsSendOutcome::Sent);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_granted_mac_delivered_and_exchange_cleared() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::new());
    let ctlr = FcoeCtlr::new(config(VLAN_DISCOVERY_DISABLED), transport.clone(), lport.clone());
    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 5, 8000));
    time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(ctlr.els_send(&flogi(0x1234), None).await, ElsSendOutcome::Sent);

    let granted = MacAddr::from_fc_id(FIP_DEF_FC_MAP, 0x010203);
    let acc = els_frame(FC_RCTL_ELS_REP, 0x010203, FC_FID_FLOGI, 0x1234, ELS_LS_ACC);
    ctlr.recv(fip_els_reply(FIP_DT_FLOGI, &acc, Some(granted)));
    settle().await;

    let delivered = lport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].encaps, FIP_DT_FLOGI);
    assert_eq!(delivered[0].granted_mac, Some(granted));
    assert_eq!(delivered[0].els, acc);

    let stats = ctlr.stats().await;
    assert_eq!(stats.rx_frames, 1);
    assert_eq!(stats.rx_words, (acc.len() / 4) as u64);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_flogi_reject_fails_over_to_next_fcf() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::new());
    let ctlr = FcoeCtlr::new(config(VLAN_DISCOVERY_DISABLED), transport.clone(), lport.clone());
    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 9, 8000));
    ctlr.recv(advertisement(FCF2_MAC, SWITCH_NAME + 1, FABRIC_NAME, 3, 8000));
    time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(ctlr.selected_fcf().await.unwrap().fcf_mac, FCF2_MAC);

    assert_eq!(ctlr.els_send(&flogi(0x1234), None).await, ElsSendOutcome::Sent);

    // The selected FCF rejects the login: fail over to the other one.
    let rjt = els_frame(FC_RCTL_ELS_REP, 0, FC_FID_FLOGI, 0x1234, ELS_LS_RJT);
    ctlr.recv(fip_els_reply(FIP_DT_FLOGI, &rjt, None));
    settle().await;
    assert_eq!(ctlr.selected_fcf().await.unwrap().fcf_mac, FCF_MAC);

    // The reject still reaches the FC layer, and the retried login is
    // addressed to the new forwarder.
    let delivered = lport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].els, rjt);

    assert_eq!(ctlr.els_send(&flogi(0x1235), None).await, ElsSendOutcome::Sent);
    let reqs = transport.sent_ops(FIP_OP_LS, FIP_SC_REQ);
    assert_eq!(reqs.len(), 2);
    assert_eq!(FipFrame::parse(&reqs[1]).unwrap().eth.dest, FCF_MAC);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_keep_alives_for_controller_and_port() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::logged_in(0x010203));
    let ctlr = FcoeCtlr::new(config(VLAN_DISCOVERY_DISABLED), transport.clone(), lport.clone());
    ctlr.link_up().await;
    // Long keep-alive period so the record outlives the port KA mark.
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 5, 60_000));
    time::sleep(Duration::from_millis(2500)).await;
    assert!(ctlr.selected_fcf().await.is_some());

    // Selection at ~2s arms the controller KA one period later and the
    // port KA at the fixed 90s mark.
    time::sleep(Duration::from_secs(91)).await;
    let kas = transport.sent_ops(FIP_OP_CTRL, FIP_SC_KEEP_ALIVE);
    assert_eq!(kas.len(), 2);

    let ctlr_ka = FipFrame::parse(&kas[0]).unwrap();
    assert_eq!(ctlr_ka.eth.dest, FCF_MAC);
    assert_eq!(ctlr_ka.eth.source, CTL_MAC);
    assert!(ctlr_ka.descriptors().all(|d| d.unwrap().dtype == FIP_DT_MAC));

    let port_ka = FipFrame::parse(&kas[1]).unwrap();
    assert_eq!(port_ka.eth.source, lport.get_src_addr());
    let vn = port_ka
        .descriptors()
        .map(|d| d.unwrap())
        .find(|d| d.dtype == FIP_DT_VN_ID)
        .expect("port keep-alive carries a VN_Port descriptor");
    let vn = vn.vn_id().unwrap();
    assert_eq!(vn.fc_id, 0x010203);
    assert_eq!(vn.wwpn, lport.wwpn());

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_fka_d_bit_suppresses_keep_alives() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::logged_in(0x010203));
    let ctlr = FcoeCtlr::new(config(VLAN_DISCOVERY_DISABLED), transport.clone(), lport.clone());
    ctlr.link_up().await;
    // The FCF asks that keep-alives not be sent at all.
    ctlr.recv(advertisement_fka(
        FCF_MAC,
        SWITCH_NAME,
        FABRIC_NAME,
        5,
        FIP_FKA_ADV_D,
        60_000,
    ));
    time::sleep(Duration::from_millis(2500)).await;
    assert!(ctlr.selected_fcf().await.is_some());

    // Well past both the controller and the fixed 90s port deadline:
    // neither keep-alive goes out, and the login stays up.
    time::sleep(Duration::from_secs(95)).await;
    assert!(transport.sent_ops(FIP_OP_CTRL, FIP_SC_KEEP_ALIVE).is_empty());
    assert!(ctlr.selected_fcf().await.is_some());

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_fcf_timeout_restarts_discovery() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::new());
    let ctlr = FcoeCtlr::new(config(VLAN_DISCOVERY_DISABLED), transport.clone(), lport.clone());
    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 5, 8000));
    time::sleep(Duration::from_millis(2500)).await;
    assert!(ctlr.selected_fcf().await.is_some());

    // No further advertisements: dead after three periods plus fuzz.
    time::sleep(Duration::from_secs(30)).await;
    assert!(ctlr.selected_fcf().await.is_none());
    assert!(lport.events().contains(&LportEvent::Reset));
    assert!(ctlr.stats().await.vlink_failures >= 1);
    // Discovery restarted with a fresh multicast solicitation.
    assert!(transport.sent_ops(FIP_OP_DISC, FIP_SC_SOL).len() >= 2);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_virtual_link_validation() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::logged_in(0x010203));
    let ctlr = FcoeCtlr::new(config(VLAN_DISCOVERY_DISABLED), transport.clone(), lport.clone());
    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 5, 8000));
    time::sleep(Duration::from_millis(2500)).await;
    assert!(ctlr.selected_fcf().await.is_some());

    // CVL naming a different VN_Port is ignored entirely.
    let mut b = FrameBuilder::new(CTL_MAC, FCF_MAC, FIP_OP_CTRL, FIP_SC_CLR_VLINK, 0);
    b.mac_desc(FCF_MAC);
    b.wwn_desc(FIP_DT_NAME, SWITCH_NAME);
    b.vn_id_desc(lport.get_src_addr(), 0x999999, lport.wwpn());
    ctlr.recv(b.finish());
    settle().await;
    assert!(ctlr.selected_fcf().await.is_some());
    assert!(!lport.events().contains(&LportEvent::Reset));

    // A fully matching CVL tears the login down.
    let mut b = FrameBuilder::new(CTL_MAC, FCF_MAC, FIP_OP_CTRL, FIP_SC_CLR_VLINK, 0);
    b.mac_desc(FCF_MAC);
    b.wwn_desc(FIP_DT_NAME, SWITCH_NAME);
    b.vn_id_desc(lport.get_src_addr(), 0x010203, lport.wwpn());
    ctlr.recv(b.finish());
    settle().await;
    assert!(ctlr.selected_fcf().await.is_none());
    assert!(lport.events().contains(&LportEvent::Reset));
    assert_eq!(ctlr.stats().await.vlink_failures, 1);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_fip_flogi_snoop_settles_mode() {
    let transport = Arc::new(FakeTransport::default());
    let ctlr = FcoeCtlr::new(
        config(VLAN_DISCOVERY_DISABLED),
        transport.clone(),
        Arc::new(FakeLport::new()),
    );
    ctlr.link_up().await;
    assert_eq!(ctlr.state().await, FipState::Auto);

    // Outstanding FLOGI (held back, but the exchange id is recorded).
    assert_eq!(ctlr.els_send(&flogi(0x4242), None).await, ElsSendOutcome::Drop);

    // A plain-FCoE accept from a peer settles non-FIP mode and derives
    // the granted MAC from the assigned FC_ID.
    let peer = MacAddr([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
    let acc = els_frame(FC_RCTL_ELS_REP, 0x7f0001, FC_FID_FLOGI, 0x4242, ELS_LS_ACC);
    let granted = ctlr.recv_flogi(&acc, peer).await.unwrap();
    assert_eq!(granted, Some(MacAddr::from_fc_id(FIP_DEF_FC_MAP, 0x7f0001)));
    assert_eq!(ctlr.state().await, FipState::NonFip);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_down_returns_to_link_wait() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::new());
    let ctlr = FcoeCtlr::new(config(VLAN_DISCOVERY_DISABLED), transport.clone(), lport.clone());
    ctlr.link_up().await;
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 5, 8000));
    time::sleep(Duration::from_millis(2500)).await;
    assert!(ctlr.selected_fcf().await.is_some());

    assert!(ctlr.link_down().await);
    assert_eq!(ctlr.state().await, FipState::LinkWait);
    assert!(ctlr.selected_fcf().await.is_none());
    assert!(lport.events().contains(&LportEvent::LinkDown));
    // A second link-down is a no-op.
    assert!(!ctlr.link_down().await);

    ctlr.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_frames_in_link_wait_are_dropped() {
    let transport = Arc::new(FakeTransport::default());
    let lport = Arc::new(FakeLport::new());
    let ctlr = FcoeCtlr::new(config(VLAN_DISCOVERY_DISABLED), transport.clone(), lport.clone());

    // Never linked up: advertisements must not populate the registry.
    ctlr.recv(advertisement(FCF_MAC, SWITCH_NAME, FABRIC_NAME, 5, 8000));
    time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(ctlr.state().await, FipState::LinkWait);
    assert!(ctlr.selected_fcf().await.is_none());

    ctlr.destroy().await;
}
