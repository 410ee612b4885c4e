//! The connection manager owns every piece of shared bridge state: the queue
//! of discovered lights, the one negotiation in flight and the live sessions.
//!
//! It is a single task reacting to three streams: radio events, bus events
//! and negotiation outcomes. Negotiations and keep-alives run as their own
//! tasks and never touch manager state directly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lightbridge_proto::Registry;

use crate::announce::Announcement;
use crate::bus::{Bus, BusEvent};
use crate::negotiation::{NegotiationFailure, PendingConnection, negotiate};
use crate::radio::{Radio, RadioEvent};
use crate::session::DeviceSession;
use crate::topics::{Capability, Topics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Upper bound on the connect stage of a negotiation
    pub connect_timeout: Duration,
    pub keep_alive_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(2),
        }
    }
}

struct Outcome<R: Radio> {
    pending: PendingConnection<R::Peripheral>,
    result: Result<R::Endpoint, NegotiationFailure>,
}

pub struct ConnectionManager<R: Radio, B: Bus> {
    registry: Registry,
    radio: Arc<R>,
    bus: Arc<B>,
    topics: Topics,
    settings: Settings,
    queue: VecDeque<PendingConnection<R::Peripheral>>,
    /// Unique ids that are queued or being negotiated
    awaiting: HashSet<String>,
    in_flight: Option<String>,
    /// The in-flight peripheral reported a disconnect before its outcome
    in_flight_lost: bool,
    sessions: HashMap<String, DeviceSession<R>>,
    powered_off: bool,
    outcomes_tx: mpsc::Sender<Outcome<R>>,
    outcomes_rx: mpsc::Receiver<Outcome<R>>,
}

impl<R: Radio, B: Bus> ConnectionManager<R, B> {
    pub fn new(
        registry: Registry,
        radio: Arc<R>,
        bus: Arc<B>,
        topics: Topics,
        settings: Settings,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::channel(1);
        Self {
            registry,
            radio,
            bus,
            topics,
            settings,
            queue: VecDeque::new(),
            awaiting: HashSet::new(),
            in_flight: None,
            in_flight_lost: false,
            sessions: HashMap::new(),
            powered_off: false,
            outcomes_tx,
            outcomes_rx,
        }
    }

    /// Run until either event stream closes
    pub async fn run(
        mut self,
        mut radio_events: mpsc::Receiver<RadioEvent<R::Peripheral>>,
        mut bus_events: mpsc::Receiver<BusEvent>,
    ) {
        self.start_scanning().await;

        loop {
            tokio::select! {
                event = radio_events.recv() => match event {
                    Some(event) => self.on_radio_event(event).await,
                    None => {
                        info!("radio event stream closed");
                        break;
                    }
                },
                event = bus_events.recv() => match event {
                    Some(event) => self.on_bus_event(event).await,
                    None => {
                        info!("bus event stream closed");
                        break;
                    }
                },
                Some(outcome) = self.outcomes_rx.recv() => self.on_negotiated(outcome).await,
            }
        }
    }

    async fn on_radio_event(&mut self, event: RadioEvent<R::Peripheral>) {
        match event {
            RadioEvent::Discovered {
                peripheral,
                address,
                name,
            } => self.on_discovered(peripheral, &address, name.as_deref()),
            RadioEvent::Disconnected { address } => self.on_disconnected(&address).await,
            RadioEvent::PoweredOn => {
                info!("radio powered on");
                self.powered_off = false;
                self.start_scanning().await;
            }
            RadioEvent::PoweredOff => {
                info!("radio powered off");
                self.powered_off = true;
                if let Err(e) = self.radio.stop_scan().await {
                    debug!(error = %e, "stop scan");
                }
            }
        }
    }

    fn on_discovered(&mut self, peripheral: R::Peripheral, address: &str, name: Option<&str>) {
        let Some(config) = self.registry.resolve_config(address) else {
            return;
        };
        if self.sessions.contains_key(&config.unique_id) || self.awaiting.contains(&config.unique_id)
        {
            return;
        }
        let Some(profile) = name.and_then(|name| self.registry.resolve_profile(name)) else {
            debug!(device = %config.name, address, ?name, "no product matches advertisement");
            return;
        };

        info!(device = %config.name, address, product = %profile.id, "found device");
        self.enqueue(PendingConnection {
            peripheral,
            config,
            profile,
        });
        self.advance();
    }

    /// Queue a connection attempt unless one is already waiting for the device
    fn enqueue(&mut self, pending: PendingConnection<R::Peripheral>) {
        if self.awaiting.insert(pending.config.unique_id.clone()) {
            self.queue.push_back(pending);
        }
    }

    /// Start the next negotiation if none is running
    fn advance(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(pending) = self.queue.pop_front() else {
            return;
        };

        info!(device = %pending.config.name, address = %pending.config.address, "connecting");
        self.in_flight = Some(pending.config.unique_id.clone());
        self.in_flight_lost = false;

        let radio = self.radio.clone();
        let outcomes = self.outcomes_tx.clone();
        let timeout = self.settings.connect_timeout;
        tokio::spawn(async move {
            let result = negotiate(radio.as_ref(), &pending, timeout).await;
            // the manager holds the receiver for as long as it runs
            let _ = outcomes.send(Outcome { pending, result }).await;
        });
    }

    async fn on_negotiated(&mut self, outcome: Outcome<R>) {
        let Outcome { pending, result } = outcome;
        self.awaiting.remove(&pending.config.unique_id);
        self.in_flight = None;
        let lost = std::mem::take(&mut self.in_flight_lost);

        match result {
            Ok(_) if lost => {
                info!(device = %pending.config.name, "disconnected while connecting, retrying");
                self.enqueue(pending);
            }
            Ok(endpoint) => self.establish(pending, endpoint).await,
            Err(failure) => {
                warn!(
                    device = %pending.config.name,
                    stage = %failure.stage,
                    error = %failure.kind,
                    "connection failed"
                );
                self.disconnect_detached(pending);
            }
        }

        self.advance();
        self.resume_scanning().await;
    }

    /// Disconnect after a failed negotiation. An unresponsive peripheral may
    /// never answer, so the manager does not wait for it.
    fn disconnect_detached(&self, pending: PendingConnection<R::Peripheral>) {
        let radio = self.radio.clone();
        tokio::spawn(async move {
            if let Err(e) = radio.disconnect(&pending.peripheral).await {
                debug!(device = %pending.config.name, error = %e, "disconnect after failure");
            }
        });
    }

    async fn establish(&mut self, pending: PendingConnection<R::Peripheral>, endpoint: R::Endpoint) {
        info!(device = %pending.config.name, address = %pending.config.address, "connected");

        let mut session = DeviceSession::new(pending, endpoint);
        self.announce(&session).await;
        session.start_keep_alive(self.radio.clone(), self.settings.keep_alive_interval);
        self.sessions.insert(session.unique_id().to_string(), session);
    }

    /// Publish the retained announcement and subscribe to the command topics
    async fn announce(&self, session: &DeviceSession<R>) {
        let unique_id = session.unique_id();

        let announcement = Announcement::new(&session.config, &session.profile, &self.topics);
        match announcement.to_json() {
            Ok(payload) => {
                let topic = self.topics.announcement(unique_id);
                if let Err(e) = self.bus.publish(&topic, &payload, true).await {
                    warn!(device = %session.config.name, error = %e, "announcement failed");
                }
            }
            Err(e) => warn!(device = %session.config.name, error = %e, "announcement encoding failed"),
        }

        for capability in Capability::supported_by(&session.profile) {
            let topic = self.topics.command(unique_id, capability);
            if let Err(e) = self.bus.subscribe(&topic).await {
                warn!(topic = %topic, error = %e, "subscribe failed");
            }
        }
    }

    async fn on_disconnected(&mut self, address: &str) {
        let Some(config) = self.registry.resolve_config(address) else {
            return;
        };
        // dropping the session stops its keep-alive
        let Some(session) = self.sessions.remove(&config.unique_id) else {
            if self.in_flight.as_deref() == Some(config.unique_id.as_str()) {
                debug!(device = %config.name, address, "disconnected while connecting");
                self.in_flight_lost = true;
            }
            return;
        };

        info!(device = %config.name, address, "disconnected");
        self.enqueue(session.into_pending());
        self.advance();
        self.resume_scanning().await;
    }

    async fn on_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected => {
                info!(sessions = self.sessions.len(), "bus connected");
                for session in self.sessions.values() {
                    self.announce(session).await;
                }
            }
            BusEvent::Message { topic, payload } => self.on_command(&topic, &payload).await,
        }
    }

    async fn on_command(&self, topic: &str, payload: &[u8]) {
        let inbound = match self.topics.parse(topic, payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(topic, error = %e, "dropping command");
                return;
            }
        };
        let Some(session) = self.sessions.get(&inbound.unique_id) else {
            warn!(device = %inbound.unique_id, "command for unknown device");
            return;
        };
        let frame = match session.profile.frame(&inbound.command) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device = %session.config.name, error = %e, "dropping command");
                return;
            }
        };

        debug!(device = %session.config.name, command = ?inbound.command, "write");
        if let Err(e) = self
            .radio
            .write(&session.peripheral, &session.endpoint, &frame)
            .await
        {
            warn!(device = %session.config.name, error = %e, "write failed");
        }

        if let Err(e) = self.bus.publish(&inbound.echo_topic, payload, true).await {
            warn!(topic = %inbound.echo_topic, error = %e, "echo failed");
        }
    }

    async fn start_scanning(&self) {
        match self.radio.start_scan().await {
            Ok(()) => debug!("scanning"),
            Err(e) => warn!(error = %e, "could not start scan"),
        }
    }

    /// Re-issue the scan after a connection attempt or disconnect. Adapters
    /// may stop scanning on connect; an "already scanning" error is only logged.
    async fn resume_scanning(&self) {
        if self.powered_off {
            return;
        }
        if let Err(e) = self.radio.start_scan().await {
            debug!(error = %e, "resume scan");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Fault, MockBus, MockRadio, Published, device};
    use lightbridge_proto::Command;
    use lightbridge_proto::products::govee_gu10;
    use tokio::task::JoinHandle;

    const ADVERTISED: &str = "ihoment_H6008_4F2A";

    struct Harness {
        radio: Arc<MockRadio>,
        bus: Arc<MockBus>,
        radio_tx: mpsc::Sender<RadioEvent<String>>,
        bus_tx: mpsc::Sender<BusEvent>,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn start() -> Self {
            let registry = Registry::new(
                vec![govee_gu10()],
                vec![device("A", "a"), device("B", "b"), device("C", "c")],
            );
            let radio = Arc::new(MockRadio::default());
            let bus = Arc::new(MockBus::default());
            let manager = ConnectionManager::new(
                registry,
                radio.clone(),
                bus.clone(),
                Topics::new("home/lights", "homeassistant"),
                Settings::default(),
            );

            let (radio_tx, radio_rx) = mpsc::channel(16);
            let (bus_tx, bus_rx) = mpsc::channel(16);
            let task = tokio::spawn(manager.run(radio_rx, bus_rx));

            Self {
                radio,
                bus,
                radio_tx,
                bus_tx,
                task,
            }
        }

        async fn discover(&self, address: &str) {
            self.discover_as(address, ADVERTISED).await;
        }

        async fn discover_as(&self, address: &str, name: &str) {
            self.radio_tx
                .send(RadioEvent::Discovered {
                    peripheral: address.to_string(),
                    address: address.to_string(),
                    name: Some(name.to_string()),
                })
                .await
                .unwrap();
        }

        async fn radio_event(&self, event: RadioEvent<String>) {
            self.radio_tx.send(event).await.unwrap();
        }

        async fn message(&self, topic: &str, payload: &str) {
            self.bus_tx
                .send(BusEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.as_bytes().to_vec(),
                })
                .await
                .unwrap();
        }

        fn negotiations(&self) -> Vec<String> {
            self.radio
                .log()
                .into_iter()
                .filter(|e| !e.starts_with("disconnect:"))
                .collect()
        }

        fn announcements(&self, unique_id: &str) -> Vec<Published> {
            self.bus
                .published_to(&format!("homeassistant/light/{unique_id}/config"))
        }

        async fn stop(self) {
            drop(self.radio_tx);
            drop(self.bus_tx);
            self.task.await.unwrap();
        }
    }

    /// Let every ready task run without moving the clock meaningfully
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn keep_alive() -> Vec<u8> {
        govee_gu10().frame(&Command::KeepAlive).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn starts_scanning() {
        let h = Harness::start();
        settle().await;
        assert_eq!(h.radio.scan_starts(), 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn negotiations_run_one_at_a_time_in_discovery_order() {
        let h = Harness::start();
        h.radio.set_connect_delay(Duration::from_secs(1));

        h.discover("A").await;
        h.discover("B").await;
        h.discover("C").await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            h.negotiations(),
            vec![
                "connect:A",
                "services:A",
                "chars:A",
                "connect:B",
                "services:B",
                "chars:B",
                "connect:C",
                "services:C",
                "chars:C",
            ]
        );
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_discoveries_are_queued_once() {
        let h = Harness::start();
        h.radio.set_connect_delay(Duration::from_secs(1));

        h.discover("A").await;
        h.discover("B").await;
        h.discover("B").await;
        h.discover("A").await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.radio.count("connect:A"), 1);
        assert_eq!(h.radio.count("connect:B"), 1);

        // connected devices are not queued again either
        h.discover("A").await;
        settle().await;
        assert_eq!(h.radio.count("connect:A"), 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_peripherals_are_ignored() {
        let h = Harness::start();

        h.discover("Z").await;
        h.discover_as("A", "SomeOtherLight").await;
        h.radio_tx
            .send(RadioEvent::Discovered {
                peripheral: "B".to_string(),
                address: "B".to_string(),
                name: None,
            })
            .await
            .unwrap();
        settle().await;

        assert!(h.radio.log().is_empty());
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_to_session_and_back() {
        let h = Harness::start();

        h.discover("A").await;
        settle().await;

        // one session: announced once, subscribed, keep-alive sent immediately
        let announced = h.announcements("a");
        assert_eq!(announced.len(), 1);
        assert!(announced[0].retain);
        let json: serde_json::Value = serde_json::from_slice(&announced[0].payload).unwrap();
        assert_eq!(json["unique_id"], "a");
        assert_eq!(
            h.bus.subscribed(),
            vec![
                "home/lights/a/set",
                "home/lights/a/brightness/set",
                "home/lights/a/color/set",
                "home/lights/a/color_temp/set",
            ]
        );
        assert_eq!(h.radio.writes_to("A"), vec![keep_alive()]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.radio.writes_to("A").len(), 2);

        // the next attempt hangs so the requeued entry stays observable
        h.radio.set_fault("A", Fault::Hang);
        h.radio_event(RadioEvent::Disconnected {
            address: "A".to_string(),
        })
        .await;
        settle().await;
        assert_eq!(h.radio.count("connect:A"), 2);

        // rediscovery while the requeued attempt runs adds nothing
        h.discover("A").await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(h.radio.count("connect:A"), 2);
        assert_eq!(h.radio.writes_to("A").len(), 2, "keep-alive stopped");
        assert_eq!(h.announcements("a").len(), 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_disconnect() {
        let h = Harness::start();

        h.discover("A").await;
        settle().await;
        h.radio_event(RadioEvent::Disconnected {
            address: "a".to_string(),
        })
        .await;
        settle().await;

        assert_eq!(h.radio.count("connect:A"), 2);
        assert_eq!(h.announcements("a").len(), 2);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_moves_on_without_requeue() {
        let h = Harness::start();
        h.radio.set_fault("A", Fault::Hang);

        h.discover("A").await;
        h.discover("B").await;

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(h.negotiations(), vec!["connect:A"]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.radio.count("disconnect:A"), 1);
        assert_eq!(h.radio.count("connect:B"), 1);
        assert_eq!(h.announcements("b").len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.radio.count("connect:A"), 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stage_failures_disconnect_and_wait_for_rediscovery() {
        let h = Harness::start();
        h.radio.set_fault("A", Fault::ServicesError);

        h.discover("A").await;
        h.discover("B").await;
        settle().await;

        assert_eq!(
            h.negotiations(),
            vec!["connect:A", "services:A", "connect:B", "services:B", "chars:B"]
        );
        assert_eq!(h.radio.count("disconnect:A"), 1);
        assert!(h.announcements("a").is_empty());

        h.radio.clear_fault("A");
        h.discover("A").await;
        settle().await;
        assert_eq!(h.radio.count("connect:A"), 2);
        assert_eq!(h.announcements("a").len(), 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_cleanup_disconnect_does_not_stall_live_lights() {
        let h = Harness::start();
        h.discover("B").await;
        settle().await;

        h.radio.hang_disconnects(true);
        h.radio.set_fault("A", Fault::Refuse);
        h.discover("A").await;
        settle().await;
        assert_eq!(h.radio.count("disconnect:A"), 1);

        h.message("home/lights/b/set", "ON").await;
        h.discover("C").await;
        settle().await;

        let on = govee_gu10().frame(&Command::Power(true)).unwrap();
        assert!(h.radio.writes_to("B").contains(&on));
        assert_eq!(h.bus.published_to("home/lights/b/state").len(), 1);
        assert_eq!(h.announcements("c").len(), 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_connecting_retries() {
        let h = Harness::start();
        h.radio.set_connect_delay(Duration::from_secs(1));

        h.discover("A").await;
        settle().await;
        h.radio_event(RadioEvent::Disconnected {
            address: "A".to_string(),
        })
        .await;
        settle().await;
        assert_eq!(h.radio.count("connect:A"), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.radio.count("connect:A"), 2);
        assert_eq!(h.announcements("a").len(), 1);
        assert!(!h.radio.writes_to("A").is_empty());
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn scanning_resumes_after_each_attempt_while_powered() {
        let h = Harness::start();
        settle().await;
        assert_eq!(h.radio.scan_starts(), 1);

        h.discover("A").await;
        settle().await;
        assert_eq!(h.radio.scan_starts(), 2);

        h.radio_event(RadioEvent::Disconnected {
            address: "A".to_string(),
        })
        .await;
        settle().await;
        // the disconnect and the reconnect that follows
        assert_eq!(h.radio.scan_starts(), 4);

        h.radio_event(RadioEvent::PoweredOff).await;
        h.radio.set_fault("B", Fault::Refuse);
        h.discover("B").await;
        settle().await;
        assert_eq!(h.radio.count("connect:B"), 1);
        assert_eq!(h.radio.scan_starts(), 4);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_write_endpoint_is_a_failure() {
        let h = Harness::start();
        h.radio.set_fault("A", Fault::NoWriteEndpoint);

        h.discover("A").await;
        settle().await;

        assert_eq!(h.radio.count("disconnect:A"), 1);
        assert!(h.announcements("a").is_empty());
        assert!(h.radio.writes_to("A").is_empty());
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_written_and_echoed() {
        let h = Harness::start();
        h.discover("A").await;
        settle().await;

        h.message("home/lights/a/brightness/set", "50").await;
        h.message("home/lights/a/color_temp/set", "200").await;
        settle().await;

        let profile = govee_gu10();
        let writes = h.radio.writes_to("A");
        assert_eq!(
            writes[1..],
            [
                profile.frame(&Command::Brightness(50)).unwrap(),
                profile
                    .frame(&Command::ColorTemperature { mireds: 200 })
                    .unwrap(),
            ]
        );
        assert_eq!(
            h.bus.published_to("home/lights/a/brightness/state"),
            vec![Published {
                topic: "home/lights/a/brightness/state".to_string(),
                payload: b"50".to_vec(),
                retain: true,
            }]
        );
        assert_eq!(h.bus.published_to("home/lights/a/color_temp/state").len(), 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bad_commands_are_dropped() {
        let h = Harness::start();
        h.discover("A").await;
        settle().await;
        let published = h.bus.published().len();

        h.message("home/lights/nobody/set", "ON").await;
        h.message("home/lights/a/color/set", "1,2").await;
        h.message("home/lights/a/set", "TOGGLE").await;
        h.message("elsewhere/a/set", "ON").await;
        settle().await;

        assert_eq!(h.radio.writes_to("A"), vec![keep_alive()]);
        assert_eq!(h.bus.published().len(), published);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn write_failures_still_echo() {
        let h = Harness::start();
        h.discover("A").await;
        settle().await;

        h.radio.fail_writes(true);
        h.message("home/lights/a/set", "OFF").await;
        settle().await;

        assert_eq!(h.radio.writes_to("A"), vec![keep_alive()]);
        let echo = h.bus.published_to("home/lights/a/state");
        assert_eq!(echo.len(), 1);
        assert_eq!(echo[0].payload, b"OFF");

        // the session is still there
        h.radio.fail_writes(false);
        h.message("home/lights/a/set", "ON").await;
        settle().await;
        assert_eq!(h.radio.writes_to("A").len(), 2);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bus_reconnect_announces_again() {
        let h = Harness::start();
        h.bus_tx.send(BusEvent::Connected).await.unwrap();
        settle().await;
        assert!(h.bus.published().is_empty());

        h.discover("A").await;
        settle().await;
        h.bus_tx.send(BusEvent::Connected).await.unwrap();
        settle().await;

        assert_eq!(h.announcements("a").len(), 2);
        assert_eq!(h.bus.subscribed().len(), 8);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn radio_power_controls_scanning() {
        let h = Harness::start();
        settle().await;

        h.radio_event(RadioEvent::PoweredOff).await;
        settle().await;
        assert_eq!(h.radio.scan_stops(), 1);

        h.radio_event(RadioEvent::PoweredOn).await;
        settle().await;
        assert_eq!(h.radio.scan_starts(), 2);
        h.stop().await;
    }
}
