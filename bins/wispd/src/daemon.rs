use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_core::arena::Id;
use wisp_core::clock::Clock;
use wisp_core::timer::{ClassId, TimerWheel};
use wisp_ifs::{MANET_MULTICAST_V4, MANET_MULTICAST_V6};
use wisp_nhdp::db::LinkId;
use wisp_nhdp::link_metric::LinkMetric;
use wisp_nhdp::reader::HelloReader;
use wisp_nhdp::writer::{build_hello, hello_families};
use wisp_nhdp::{HopCountMetric, IfaceId, Nhdp, NhdpContext, NhdpEvent};
use wisp_olsrv2::reader::TcReader;
use wisp_olsrv2::routing::RouteBackend;
use wisp_olsrv2::writer::build_tc;
use wisp_olsrv2::{Olsrv2, Olsrv2Context};
use wisp_rfc5444::iana::MANET_PORT;
use wisp_rfc5444::reader::{process_packet, Consumer};
use wisp_rfc5444::{PacketBuilder, PacketMeta};

use crate::config::Config;
use crate::etx::{EtxConfig, EtxMetric};
use crate::routes::LogRouteBackend;
use crate::sysctl::SysctlGuard;

/// Granularity of the timer walk.
const TICK: Duration = Duration::from_millis(50);

/// All protocol state, handed to the RFC 5444 consumers as context.
pub struct State {
    pub nhdp: Nhdp,
    pub olsrv2: Olsrv2,
    pub wheel: TimerWheel,
    now: u64,
}

impl NhdpContext for State {
    fn nhdp_split(&mut self) -> (&mut Nhdp, &mut TimerWheel) {
        (&mut self.nhdp, &mut self.wheel)
    }
    fn now(&self) -> u64 {
        self.now
    }
}

impl Olsrv2Context for State {
    fn olsrv2_split(&mut self) -> (&mut Olsrv2, &mut Nhdp, &mut TimerWheel) {
        (&mut self.olsrv2, &mut self.nhdp, &mut self.wheel)
    }
}

struct IfaceSockets {
    iface: IfaceId,
    if_index: u32,
    v4: Option<Arc<UdpSocket>>,
    v6: Option<Arc<UdpSocket>>,
}

struct Incoming {
    if_index: u32,
    source: SocketAddr,
    data: Vec<u8>,
}

pub struct Daemon {
    state: State,
    clock: Clock,
    etx: EtxMetric,
    etx_sampling: ClassId,
    hello_reader: HelloReader,
    tc_reader: TcReader,
    sockets: Vec<IfaceSockets>,
    backend: LogRouteBackend,
    rx: mpsc::Receiver<Incoming>,
    pkt_seqno: u16,
    _sysctls: SysctlGuard,
}

impl Daemon {
    pub fn new(config: Config) -> anyhow::Result<Daemon> {
        if config.interface.is_empty() {
            bail!("no mesh interfaces configured");
        }

        let clock = Clock::new();
        let mut wheel = TimerWheel::new();
        let mut nhdp = Nhdp::new(&mut wheel);

        // domains: configuration order, domain 0 on extension 0 when
        // nothing is configured
        let domain_sections: Vec<(u8, String)> = if config.domain.is_empty() {
            vec![(0, "etx".to_string())]
        } else {
            config
                .domain
                .iter()
                .map(|d| (d.ext, d.metric.clone()))
                .collect()
        };

        let etx_config = EtxConfig {
            interval: (config.etx.interval * 1000.0) as u64,
            window: config.etx.window,
            start_window: config.etx.start_window,
        };
        let mut etx: Option<EtxMetric> = None;
        for (ext, metric_name) in &domain_sections {
            let params = match metric_name.as_str() {
                "etx" => {
                    let plugin = EtxMetric::new(&mut wheel, etx_config, nhdp.domains.len());
                    let params = plugin.params();
                    if etx.is_none() {
                        etx = Some(plugin);
                    }
                    params
                }
                "hopcount" => HopCountMetric.params(),
                other => bail!("unknown metric plug-in '{other}'"),
            };
            nhdp.domains
                .add(*ext, metric_name, params)
                .with_context(|| format!("domain extension {ext}"))?;
        }
        let etx = match etx {
            Some(etx) => etx,
            None => EtxMetric::new(&mut wheel, etx_config, 0),
        };
        let etx_sampling = wheel.add_class("etx sampling", true, 0);

        // interface bring-up
        let timing = config.nhdp_timing()?;
        let os_interfaces = NetworkInterface::show().context("cannot list interfaces")?;
        let mut sockets = Vec::new();
        let (tx, rx) = mpsc::channel(64);

        for section in &config.interface {
            let mode = config.iface_mode(section)?;
            let filter = config.iface_filter(section)?;
            let if_index = wisp_ifs::if_index_by_name(&section.name)
                .with_context(|| format!("interface '{}'", section.name))?;

            let iface =
                nhdp.interfaces
                    .add(&section.name, if_index, mode, timing.clone(), filter)?;
            {
                let iface_mut = nhdp.interfaces.get_mut(iface).unwrap();
                iface_mut.willingness = config.nhdp.willingness & 0x0f;
            }

            // local addresses of the interface
            let timers = nhdp.timers;
            for os_iface in os_interfaces.iter().filter(|i| i.name == section.name) {
                let Some(addr) = os_iface.addr.as_ref() else {
                    continue;
                };
                let addr: NetAddr = addr.ip().into();
                if !mode.accepts(addr.family()) {
                    continue;
                }
                nhdp.interfaces.addr_add(&mut wheel, &timers, iface, addr);
            }

            let mut entry = IfaceSockets {
                iface,
                if_index,
                v4: None,
                v6: None,
            };
            if mode.accepts(AddrFamily::Ipv4) {
                let socket = wisp_ifs::open_v4(&section.name, if_index, MANET_PORT)
                    .with_context(|| format!("v4 socket on '{}'", section.name))?;
                let socket = Arc::new(UdpSocket::from_std(socket)?);
                spawn_receiver(socket.clone(), if_index, tx.clone());
                entry.v4 = Some(socket);
            }
            if mode.accepts(AddrFamily::Ipv6) {
                let socket = wisp_ifs::open_v6(&section.name, if_index, MANET_PORT)
                    .with_context(|| format!("v6 socket on '{}'", section.name))?;
                let socket = Arc::new(UdpSocket::from_std(socket)?);
                spawn_receiver(socket.clone(), if_index, tx.clone());
                entry.v6 = Some(socket);
            }
            sockets.push(entry);
        }

        // originators: configured, or the lowest address of the mesh
        let mut olsrv2 = Olsrv2::new(
            &mut wheel,
            config.olsrv2_config()?,
            rand::thread_rng().gen(),
        );
        let now = clock.now();
        for key in ["originator_v4", "originator_v6"] {
            if let Some(addr) = config.originator(key)? {
                olsrv2.set_originator(&mut wheel, now, addr);
                nhdp.set_originator(addr);
            }
        }
        for family in [AddrFamily::Ipv4, AddrFamily::Ipv6] {
            if !olsrv2.originators.get(family).is_unspec() {
                continue;
            }
            let auto = nhdp
                .interfaces
                .iter()
                .flat_map(|(_, iface)| iface.addresses.keys())
                .find(|addr| addr.family() == family)
                .copied();
            if let Some(addr) = auto {
                olsrv2.set_originator(&mut wheel, now, addr);
                nhdp.set_originator(addr);
            }
        }

        // locally attached networks
        for lan in config.lans() {
            let Some(domain) = nhdp.domains.get_by_ext(lan.domain_ext) else {
                bail!("lan '{}' names unknown domain {}", lan.prefix, lan.domain_ext);
            };
            olsrv2
                .lans
                .add(domain.index, lan.prefix, lan.metric, lan.distance);
        }

        // periodic work
        let nhdp_timers = nhdp.timers;
        for entry in &sockets {
            wheel.set(
                now,
                nhdp_timers.iface_hello,
                entry.iface.to_token(),
                timing.refresh_interval,
            );
        }
        wheel.set(
            now,
            olsrv2.timers.tc_generation,
            0,
            olsrv2.config.tc_interval,
        );
        wheel.set(now, etx_sampling, 0, etx_config.interval);

        let names: Vec<String> = config.interface.iter().map(|i| i.name.clone()).collect();
        let sysctls = SysctlGuard::apply(&names);

        Ok(Daemon {
            state: State {
                nhdp,
                olsrv2,
                wheel,
                now,
            },
            clock,
            etx,
            etx_sampling,
            hello_reader: HelloReader::new(),
            tc_reader: TcReader::new(),
            sockets,
            backend: LogRouteBackend,
            rx,
            pkt_seqno: rand::thread_rng().gen(),
            _sysctls: sysctls,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!("mesh daemon running");
        let mut tick = tokio::time::interval(TICK);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.walk_timers().await;
                }
                Some(incoming) = self.rx.recv() => {
                    self.ingest(incoming).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn walk_timers(&mut self) {
        let now = self.clock.now();
        self.state.now = now;

        while let Some(firing) = self.state.wheel.poll(now) {
            let nhdp_timers = self.state.nhdp.timers;
            let olsrv2_timers = self.state.olsrv2.timers;

            if firing.class == nhdp_timers.iface_hello {
                self.emit_hello(Id::from_token(firing.token)).await;
            } else if firing.class == olsrv2_timers.tc_generation {
                self.emit_tc().await;
            } else if firing.class == olsrv2_timers.dijkstra_ratelimit {
                if self.state.olsrv2.routing.take_trigger() {
                    self.run_dijkstra(false).await;
                }
            } else if firing.class == self.etx_sampling {
                self.sample_metrics();
            } else if firing.class == self.etx.hello_lost_class() {
                let link: LinkId = Id::from_token(firing.token);
                self.etx
                    .on_hello_lost(&mut self.state.wheel, now, link);
            } else {
                let handled = self
                    .state
                    .nhdp
                    .handle_timer(&mut self.state.wheel, now, &firing)
                    || self
                        .state
                        .olsrv2
                        .handle_timer(&mut self.state.wheel, now, &firing);
                if !handled {
                    tracing::debug!(class = self.state.wheel.class_name(firing.class),
                        "unhandled timer");
                }
            }
        }

        self.post_process().await;
    }

    async fn ingest(&mut self, incoming: Incoming) {
        let now = self.clock.now();
        self.state.now = now;

        let meta = PacketMeta {
            if_index: incoming.if_index,
            source: incoming.source.into(),
            // the mesh sockets only join the MANET groups
            is_multicast: true,
            pkt_seqno: None,
        };

        let hello = self.hello_reader.consumers::<State>();
        let tc = self.tc_reader.consumers::<State>();
        let consumers: Vec<&dyn Consumer<State>> =
            hello.into_iter().chain(tc.into_iter()).collect();

        match process_packet(&mut self.state, &consumers, &incoming.data, &meta) {
            Ok(packet) => {
                // packet sequence numbers feed the loss-counting metric
                if let Some(link) = self.link_by_source(incoming.if_index, &meta.source) {
                    self.etx.on_packet(link, packet.seqno);
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, source = %meta.source, "undecodable packet");
            }
        }

        self.post_process().await;
    }

    fn link_by_source(&self, if_index: u32, source: &NetAddr) -> Option<LinkId> {
        let nhdp = &self.state.nhdp;
        let iface = nhdp.interfaces.by_os_index(if_index)?;
        let laddr = nhdp.interfaces.laddr_lookup(iface, source)?;
        Some(nhdp.db.laddrs.index(laddr).link)
    }

    /// Digest the change notifications of the last dispatch: feed the
    /// metric plug-in, restart routing, flush queued floods.
    async fn post_process(&mut self) {
        let now = self.state.now;

        let mut link_down = false;
        for event in self.state.nhdp.take_events() {
            match event {
                NhdpEvent::LinkAdded(link) => self.etx.link_added(link),
                NhdpEvent::LinkRemoved(link) => {
                    link_down = true;
                    self.etx.link_removed(&mut self.state.wheel, link)
                }
                NhdpEvent::LinkChanged(link) => {
                    if let Some(l) = self.state.nhdp.db.links.get(link) {
                        let (vtime, itime) = (l.vtime_value, l.itime_value);
                        self.etx
                            .on_hello(&mut self.state.wheel, now, link, vtime, itime);
                    }
                }
            }
        }

        if self.state.nhdp.take_neighborhood_changed() {
            self.state.olsrv2.mark_neighborhood_changed();
            if link_down {
                // routes over a vanished link must not wait out the
                // rate window
                self.run_dijkstra(true).await;
            } else {
                self.state
                    .olsrv2
                    .trigger_dijkstra(&mut self.state.wheel, now);
            }
        }

        let floods = self.state.olsrv2.take_flood_queue();
        for raw in floods {
            self.flood_message(raw).await;
        }
    }

    fn sample_metrics(&mut self) {
        let domain_index = self.etx.domain_index();
        let changed = self.etx.sample(
            &mut self.state.nhdp.db,
            &mut self.state.nhdp.domains,
            domain_index,
        );
        if changed {
            let neighbor_ids = self.state.nhdp.db.neighbors.ids();
            for id in neighbor_ids {
                self.state
                    .nhdp
                    .db
                    .calculate_neighbor_metric(&mut self.state.nhdp.domains, id);
            }
            self.state.nhdp.update_mprs();
            let now = self.state.now;
            self.state
                .olsrv2
                .trigger_dijkstra(&mut self.state.wheel, now);
        }
    }

    async fn run_dijkstra(&mut self, force: bool) {
        let now = self.state.now;
        let ran = self.state.olsrv2.run_dijkstra(
            &mut self.state.nhdp,
            &mut self.state.wheel,
            now,
            force,
        );
        if ran {
            self.flush_kernel_queue().await;
        }
    }

    async fn flush_kernel_queue(&mut self) {
        for op in self.state.olsrv2.routing.take_kernel_queue() {
            let result = if op.add {
                self.backend.set_route(&op.request).await
            } else {
                self.backend.delete_route(&op.request).await
            };
            self.state
                .olsrv2
                .routing
                .route_finished(op.domain, &op.request.dst, result);
        }
    }

    fn next_pkt_seqno(&mut self) -> u16 {
        self.pkt_seqno = self.pkt_seqno.wrapping_add(1);
        self.pkt_seqno
    }

    async fn emit_hello(&mut self, iface: IfaceId) {
        let Some(mode) = self.state.nhdp.interfaces.get(iface).map(|i| i.mode) else {
            return;
        };
        for family in hello_families(mode) {
            let built = build_hello(&self.state.nhdp, &self.state.wheel, iface, *family);
            match built {
                Ok(Some(raw)) => self.send_message(iface, *family, raw).await,
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "cannot build HELLO"),
            }
        }
    }

    async fn emit_tc(&mut self) {
        self.state.olsrv2.update_ansn(&mut self.state.nhdp);
        for family in [AddrFamily::Ipv4, AddrFamily::Ipv6] {
            match build_tc(&mut self.state.olsrv2, &self.state.nhdp, family) {
                Ok(Some(raw)) => self.flood_message(raw).await,
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "cannot build TC"),
            }
        }
    }

    /// Re-emit one raw message on every flood-active interface of its
    /// family.
    async fn flood_message(&mut self, raw: Vec<u8>) {
        if raw.len() < 2 {
            return;
        }
        let family = if raw[1] & 0x0f == 3 {
            AddrFamily::Ipv4
        } else {
            AddrFamily::Ipv6
        };

        let targets: Vec<IfaceId> = self
            .state
            .nhdp
            .interfaces
            .iter()
            .filter(|(_, iface)| match family {
                AddrFamily::Ipv4 => iface.use_ipv4_for_flooding,
                _ => iface.use_ipv6_for_flooding,
            })
            .map(|(id, _)| id)
            .collect();

        for iface in targets {
            self.send_message(iface, family, raw.clone()).await;
        }
    }

    async fn send_message(&mut self, iface: IfaceId, family: AddrFamily, raw: Vec<u8>) {
        let mut packet = PacketBuilder::new();
        packet.set_seqno(self.next_pkt_seqno());
        packet.add_message(raw);
        let data = packet.finish();

        let Some(entry) = self.sockets.iter().find(|s| s.iface == iface) else {
            return;
        };

        let (socket, dest): (&Arc<UdpSocket>, SocketAddr) = match family {
            AddrFamily::Ipv4 => {
                let Some(socket) = &entry.v4 else { return };
                (
                    socket,
                    SocketAddr::V4(SocketAddrV4::new(MANET_MULTICAST_V4, MANET_PORT)),
                )
            }
            _ => {
                let Some(socket) = &entry.v6 else { return };
                (
                    socket,
                    SocketAddr::V6(SocketAddrV6::new(
                        MANET_MULTICAST_V6,
                        MANET_PORT,
                        0,
                        entry.if_index,
                    )),
                )
            }
        };

        if let Err(err) = socket.send_to(&data, dest).await {
            tracing::warn!(error = %err, "cannot send packet");
        }
    }

    async fn shutdown(&mut self) {
        self.state.olsrv2.routing.initiate_shutdown();
        self.flush_kernel_queue().await;
    }
}

fn spawn_receiver(socket: Arc<UdpSocket>, if_index: u32, tx: mpsc::Sender<Incoming>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, source)) => {
                    let incoming = Incoming {
                        if_index,
                        source,
                        data: buf[..len].to_vec(),
                    };
                    if tx.send(incoming).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "socket receive failed");
                    return;
                }
            }
        }
    });
}
