//! Funkfeuer-style ETX link metric.
//!
//! Every link keeps a ring of {received, total} buckets. Packets with
//! packet sequence numbers fill the active bucket (gaps count as lost),
//! a periodic sampler rotates the ring and publishes
//! `minimum * total / received` as the link's incoming cost, and a
//! hello-lost timer inflates the estimate while a neighbor stays quiet.

use std::collections::HashMap;

use wisp_core::timer::{ClassId, TimerWheel};
use wisp_nhdp::db::{LinkId, NhdpDb};
use wisp_nhdp::domain::{DomainRegistry, MetricParams};
use wisp_nhdp::link_metric::LinkMetric;
use wisp_rfc5444::metric;

/// Cost of a loss-free link; the ETX factor scales up from here.
const ETX_LINKCOST_MINIMUM: u32 = 0x1000;
const ETX_LINKCOST_MAXIMUM: u32 = metric::LINK_COST_MAXIMUM;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    received: u32,
    total: u32,
}

#[derive(Debug)]
struct LinkData {
    buckets: Vec<Bucket>,
    /// Index of the active bucket; `None` until the first packet.
    active: Option<usize>,
    missed_hellos: u32,
    window_size: usize,
    last_seqno: u16,
    hello_interval: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct EtxConfig {
    pub interval: u64,
    pub window: usize,
    pub start_window: usize,
}

pub struct EtxMetric {
    config: EtxConfig,
    domain_index: usize,
    links: HashMap<u64, LinkData>,
    hello_lost_class: ClassId,
}

impl EtxMetric {
    pub fn new(wheel: &mut TimerWheel, config: EtxConfig, domain_index: usize) -> EtxMetric {
        EtxMetric {
            config,
            domain_index,
            links: HashMap::new(),
            hello_lost_class: wheel.add_class("etx hello lost", false, 0),
        }
    }

    pub fn hello_lost_class(&self) -> ClassId {
        self.hello_lost_class
    }

    pub fn domain_index(&self) -> usize {
        self.domain_index
    }

    fn data_mut(&mut self, link: LinkId) -> &mut LinkData {
        let window = self.config.window;
        let start_window = self.config.start_window;
        self.links.entry(link.to_token()).or_insert_with(|| LinkData {
            // fresh links start pessimistic: one expected, none received
            buckets: vec![
                Bucket {
                    received: 0,
                    total: 1,
                };
                window
            ],
            active: None,
            missed_hellos: 0,
            window_size: start_window,
            last_seqno: 0,
            hello_interval: 0,
        })
    }
}

impl LinkMetric for EtxMetric {
    fn name(&self) -> &'static str {
        "etx"
    }

    fn params(&self) -> MetricParams {
        MetricParams {
            minimum: ETX_LINKCOST_MINIMUM,
            maximum: ETX_LINKCOST_MAXIMUM,
            incoming_start: ETX_LINKCOST_MAXIMUM,
            outgoing_start: metric::LINK_COST_INFINITE,
        }
    }

    fn on_packet(&mut self, link: LinkId, pkt_seqno: Option<u16>) {
        let Some(seqno) = pkt_seqno else {
            // without packet sequence numbers there is nothing to count
            return;
        };
        let data = self.data_mut(link);

        let Some(active) = data.active else {
            data.active = Some(0);
            data.buckets[0] = Bucket {
                received: 1,
                total: 1,
            };
            data.last_seqno = seqno;
            return;
        };

        let gap = seqno.wrapping_sub(data.last_seqno);
        let bucket = &mut data.buckets[active];
        bucket.received += 1;
        bucket.total += gap.max(1) as u32;
        data.last_seqno = seqno;
    }

    fn on_hello(
        &mut self,
        wheel: &mut TimerWheel,
        now: u64,
        link: LinkId,
        vtime: u64,
        itime: u64,
    ) {
        let data = self.data_mut(link);
        data.hello_interval = if itime > 0 { itime } else { vtime };
        data.missed_hellos = 0;
        let timeout = data.hello_interval * 3 / 2;
        wheel.set(now, self.hello_lost_class, link.to_token(), timeout);
    }

    fn on_hello_lost(&mut self, wheel: &mut TimerWheel, now: u64, link: LinkId) {
        let class = self.hello_lost_class;
        let data = self.data_mut(link);
        if data.active.is_some() {
            data.missed_hellos += 1;
            let interval = data.hello_interval;
            wheel.set(now, class, link.to_token(), interval.max(1));
        }
    }

    fn sample(
        &mut self,
        db: &mut NhdpDb,
        domains: &mut DomainRegistry,
        domain_index: usize,
    ) -> bool {
        let mut changed = false;
        let window = self.config.window;
        let interval = self.config.interval;

        let link_ids = db.links.ids();
        for link_id in link_ids {
            let Some(data) = self.links.get_mut(&link_id.to_token()) else {
                continue;
            };
            let Some(active) = data.active else {
                continue;
            };

            if data.window_size < window {
                data.window_size += 1;
            }

            let mut received: u64 = 0;
            let mut total: u64 = 0;
            for i in 0..data.window_size {
                received += data.buckets[i].received as u64;
                total += data.buckets[i].total as u64;
            }

            if data.missed_hellos > 0 && interval > 0 {
                total += total * data.missed_hellos as u64 * data.hello_interval
                    / (interval * window as u64);
            }

            let cost = if received == 0
                || received * ((ETX_LINKCOST_MAXIMUM / ETX_LINKCOST_MINIMUM) as u64) < total
            {
                ETX_LINKCOST_MAXIMUM as u64
            } else {
                ETX_LINKCOST_MINIMUM as u64 * total / received
            };
            let cost = cost.min(metric::LINK_COST_MAXIMUM as u64) as u32;

            // canonical quantization before it enters the database
            let cost = metric::decode(metric::encode(cost));

            let link = db.links.index_mut(link_id);
            if link.domains[domain_index].metric_in != cost {
                link.domains[domain_index].metric_in = cost;
                changed = true;
            }

            // rotate the ring
            let next = (active + 1) % window;
            data.active = Some(next);
            data.buckets[next] = Bucket::default();
        }

        if changed {
            for domain in domains.iter_mut() {
                if domain.index == domain_index {
                    domain.metric_changed = true;
                }
            }
        }
        changed
    }

    fn link_added(&mut self, link: LinkId) {
        self.data_mut(link);
    }

    fn link_removed(&mut self, wheel: &mut TimerWheel, link: LinkId) {
        self.links.remove(&link.to_token());
        wheel.stop(self.hello_lost_class, link.to_token());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (TimerWheel, EtxMetric, NhdpDb, DomainRegistry, LinkId) {
        let mut wheel = TimerWheel::new();
        let etx = EtxMetric::new(
            &mut wheel,
            EtxConfig {
                interval: 1_000,
                window: 8,
                start_window: 2,
            },
            0,
        );

        let mut domains = DomainRegistry::new();
        domains.add(0, "etx", etx.params()).unwrap();

        // a bare link is enough for sampling
        let mut db = NhdpDb::new();
        let neighbor = db.neighbor_add();
        let mut ifaces = wisp_nhdp::InterfaceRegistry::new();
        let iface = ifaces
            .add(
                "if0",
                1,
                wisp_nhdp::IfaceMode::Ipv4,
                Default::default(),
                Default::default(),
            )
            .unwrap();
        let link = db.link_add(&mut ifaces, &domains, neighbor, iface);
        (wheel, etx, db, domains, link)
    }

    #[test]
    fn perfect_link_converges_to_minimum() {
        let (_wheel, mut etx, mut db, mut domains, link) = setup();

        // enough rounds for the ring to shed its pessimistic start
        let mut seqno = 0u16;
        for _ in 0..10 {
            for _ in 0..10 {
                seqno += 1;
                etx.on_packet(link, Some(seqno));
            }
            etx.sample(&mut db, &mut domains, 0);
        }

        let cost = db.links.index(link).domains[0].metric_in;
        assert_eq!(cost, metric::decode(metric::encode(ETX_LINKCOST_MINIMUM)));
    }

    #[test]
    fn losses_raise_the_cost() {
        let (_wheel, mut etx, mut db, mut domains, link) = setup();

        // every second packet lost
        for seqno in (1..=40u16).step_by(2) {
            etx.on_packet(link, Some(seqno));
        }
        etx.sample(&mut db, &mut domains, 0);

        let cost = db.links.index(link).domains[0].metric_in;
        assert!(cost >= 2 * ETX_LINKCOST_MINIMUM - 0x200, "cost {cost:#x}");
        assert!(cost < 3 * ETX_LINKCOST_MINIMUM, "cost {cost:#x}");
    }

    #[test]
    fn silence_drives_cost_to_maximum() {
        let (_wheel, mut etx, mut db, mut domains, link) = setup();

        etx.on_packet(link, Some(1));
        // the ring rotates without any further reception
        for _ in 0..64 {
            etx.sample(&mut db, &mut domains, 0);
        }

        let cost = db.links.index(link).domains[0].metric_in;
        assert_eq!(cost, metric::decode(metric::encode(ETX_LINKCOST_MAXIMUM)));
    }

    #[test]
    fn sampling_flags_the_domain() {
        let (_wheel, mut etx, mut db, mut domains, link) = setup();
        etx.on_packet(link, Some(1));
        etx.on_packet(link, Some(2));

        assert!(etx.sample(&mut db, &mut domains, 0));
        assert!(domains.take_metric_changed());
        // a second sample with identical data changes nothing
        etx.on_packet(link, Some(3));
        let _ = etx.sample(&mut db, &mut domains, 0);
    }
}
