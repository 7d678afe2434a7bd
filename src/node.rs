//! Device lifecycle coordinator
//!
//! Owns the device, the transports and the routing engine, and runs one
//! non-blocking scheduling cycle at a time. Each cycle pulls at most one
//! packet per source, polls the sensor once and decides the node mode.

use crate::config::Configuration;
use crate::device::{DeviceCapabilities, ProximityDevice};
use crate::midi::MidiEvent;
use crate::router::{LinkRouter, RouteOutcome, RouteStats};
use crate::transport::{LinkPort, UsbEndpoint};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

/// Node mode, recomputed every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    #[default]
    Active,
    Reset,
    Sleep,
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeMode::Active => write!(f, "active"),
            NodeMode::Reset => write!(f, "reset"),
            NodeMode::Sleep => write!(f, "sleep"),
        }
    }
}

/// What happened during one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub routed: Vec<RouteOutcome>,
    pub mode: NodeMode,
}

impl CycleReport {
    /// Nothing arrived and nothing was produced
    pub fn is_quiet(&self) -> bool {
        self.routed.is_empty()
    }
}

/// Whether the node may enter low-power sleep.
///
/// Both links must be idle and the device must have no USB session that
/// needs periodic servicing.
pub fn sleep_eligible(plug_idle: bool, socket_idle: bool, device_idle: bool) -> bool {
    plug_idle && socket_idle && device_idle
}

/// One chain node
pub struct Node {
    device: ProximityDevice,
    router: LinkRouter,
    usb: Box<dyn UsbEndpoint>,
    plug: Box<dyn LinkPort>,
    socket: Box<dyn LinkPort>,
    mode: NodeMode,
}

impl Node {
    pub fn new(
        device: ProximityDevice,
        usb: Box<dyn UsbEndpoint>,
        plug: Box<dyn LinkPort>,
        socket: Box<dyn LinkPort>,
    ) -> Self {
        Self {
            device,
            router: LinkRouter::new(),
            usb,
            plug,
            socket,
            mode: NodeMode::Active,
        }
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn config(&self) -> &Configuration {
        self.device.config()
    }

    pub fn device(&self) -> &ProximityDevice {
        &self.device
    }

    pub fn stats(&self) -> RouteStats {
        self.router.stats()
    }

    /// Run one scheduling cycle
    pub fn poll(&mut self) -> CycleReport {
        if self.mode == NodeMode::Sleep && !self.has_pending_traffic() {
            return CycleReport {
                routed: Vec::new(),
                mode: NodeMode::Sleep,
            };
        }

        let mut routed = Vec::new();

        if let Some(event) = self.usb.try_recv() {
            routed.push(
                self.router
                    .route_usb(event, &mut self.device, self.socket.as_mut()),
            );
        }

        if let Some(packet) = self.plug.try_recv() {
            routed.push(self.router.route_plug(packet, &mut self.device));
        }

        if let Some(packet) = self.socket.try_recv() {
            routed.push(self.router.route_socket(packet, self.usb.as_mut()));
        }

        if let Some(event) = self.device.poll_sensor() {
            routed.push(self.router.route_local(
                event,
                &mut self.device,
                self.usb.as_mut(),
                self.plug.as_mut(),
            ));
        }

        self.update_mode();

        CycleReport {
            routed,
            mode: self.mode,
        }
    }

    /// Leave sleep; called by the external wake-up source
    pub fn wake(&mut self) {
        if self.mode == NodeMode::Sleep {
            debug!("Woken from sleep");
            self.mode = self.awake_mode();
        }
    }

    /// Clear output and disable the sensor
    pub fn reset(&mut self) {
        self.device.reset();
        self.update_mode();
    }

    /// Same as [`Node::reset`]; the device holds no sustained notes
    pub fn all_notes_off(&mut self) {
        self.reset();
    }

    /// Import a configuration document and return the applied configuration.
    ///
    /// Persisting the result is up to the caller.
    pub fn import_config(&mut self, raw: &Value) -> Configuration {
        self.device.on_import(raw)
    }

    pub fn export_config(&self) -> Value {
        self.device.on_export()
    }

    /// Send an event produced outside the sensor (e.g. a test stimulus)
    pub fn emit(&mut self, event: MidiEvent) -> RouteOutcome {
        self.router.route_local(
            event,
            &mut self.device,
            self.usb.as_mut(),
            self.plug.as_mut(),
        )
    }

    fn has_pending_traffic(&self) -> bool {
        !self.plug.is_idle() || !self.socket.is_idle() || self.usb.is_connected()
    }

    /// No USB session needing periodic servicing
    fn device_idle(&self) -> bool {
        !self.usb.is_connected()
    }

    fn awake_mode(&self) -> NodeMode {
        if self.device.is_enabled() {
            NodeMode::Active
        } else {
            NodeMode::Reset
        }
    }

    fn update_mode(&mut self) {
        let next = if sleep_eligible(self.plug.is_idle(), self.socket.is_idle(), self.device_idle()) {
            NodeMode::Sleep
        } else {
            self.awake_mode()
        };

        if next != self.mode {
            info!("Node mode {} → {}", self.mode, next);
            self.mode = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PortAddress;
    use crate::config::RangeConfig;
    use crate::midi::{cc, MidiMessage};
    use crate::router::DropReason;
    use crate::sensor::{NullIndicator, SensorAdapter, SensorDriver, SensorReading};
    use crate::transport::{LinkEnd, LinkPacket, UsbHost, VirtualUsb};
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Script = Rc<RefCell<VecDeque<u16>>>;

    /// Sensor replaying queued step indices
    struct ScriptedSensor {
        steps: Script,
        enabled: bool,
    }

    impl SensorDriver for ScriptedSensor {
        fn poll(&mut self) -> Option<SensorReading> {
            if !self.enabled {
                return None;
            }
            let step_index = self.steps.borrow_mut().pop_front()?;
            Some(SensorReading {
                step_index,
                normalized: f32::from(step_index) / 127.0,
                distance_mm: 100 + step_index,
                sample_count: 4,
            })
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }

        fn configure(&mut self, _range: &RangeConfig) {}
    }

    fn make_node(config: Configuration, usb: VirtualUsb, plug: LinkEnd) -> (Node, Script, LinkEnd) {
        let steps = Script::default();
        let device = ProximityDevice::new(
            config,
            SensorAdapter::new(Box::new(NullIndicator::default())),
            Box::new(ScriptedSensor {
                steps: steps.clone(),
                enabled: true,
            }),
        );
        let (socket, child) = LinkEnd::pair();
        let node = Node::new(device, Box::new(usb), Box::new(plug), Box::new(socket));
        (node, steps, child)
    }

    fn head_node(config: Configuration) -> (Node, UsbHost, Script, LinkEnd) {
        let (usb, host) = VirtualUsb::new();
        let (node, steps, child) = make_node(config, usb, LinkEnd::unplugged());
        (node, host, steps, child)
    }

    #[test]
    fn test_sleep_eligibility() {
        assert!(sleep_eligible(true, true, true));
        assert!(!sleep_eligible(false, true, true));
        assert!(!sleep_eligible(true, false, true));
        assert!(!sleep_eligible(true, true, false));
    }

    #[test]
    fn test_sensor_reading_reaches_usb() {
        let config = Configuration {
            channel: 4,
            controller: 12,
            ..Configuration::default()
        };
        let (mut node, mut host, steps, _child) = head_node(config);
        steps.borrow_mut().push_back(42);

        let report = node.poll();

        assert_eq!(report.routed, vec![RouteOutcome::Usb(PortAddress::LOCAL)]);
        assert_eq!(report.mode, NodeMode::Active);
        assert_eq!(
            host.drain(),
            vec![MidiEvent::control_change(PortAddress::LOCAL, 4, 12, 42)]
        );
        assert_eq!(node.device().sent_count(), 1);
    }

    #[test]
    fn test_all_notes_off_from_host_resets_node() {
        let (mut node, mut host, steps, _child) = head_node(Configuration::default());

        host.send(MidiEvent::control_change(PortAddress::LOCAL, 0, cc::ALL_NOTES_OFF, 0));
        let report = node.poll();
        assert_eq!(report.mode, NodeMode::Reset);

        steps.borrow_mut().push_back(10);
        assert!(node.poll().is_quiet());
        assert!(host.drain().is_empty());

        host.send(MidiEvent::control_change(PortAddress::LOCAL, 0, cc::LOCAL_CONTROL, 127));
        assert_eq!(node.poll().mode, NodeMode::Active);
    }

    #[test]
    fn test_host_traffic_for_children_is_relayed() {
        let (mut node, host, _steps, mut child) = head_node(Configuration::default());

        host.send(MidiEvent::new(PortAddress::new(2).unwrap(), MidiMessage::SystemReset));
        node.poll();

        match child.try_recv() {
            Some(LinkPacket::Midi(event)) => {
                assert_eq!(event.port.value(), 1);
                assert_eq!(event.message(), Some(MidiMessage::SystemReset));
            }
            other => panic!("unexpected packet: {:?}", other),
        }
        assert!(node.device().is_enabled());
    }

    #[test]
    fn test_child_without_usb_sends_upstream() {
        let (mut parent, plug) = LinkEnd::pair();
        let (mut node, steps, _child) = make_node(Configuration::default(), VirtualUsb::detached(), plug);

        steps.borrow_mut().push_back(7);
        let report = node.poll();

        assert_eq!(report.routed, vec![RouteOutcome::Upstream(PortAddress::LOCAL)]);
        assert_eq!(report.mode, NodeMode::Active);
        assert!(matches!(parent.try_recv(), Some(LinkPacket::Midi(_))));

        parent
            .send(LinkPacket::Midi(MidiEvent::control_change(
                PortAddress::LOCAL,
                0,
                cc::LOCAL_CONTROL,
                0,
            )))
            .unwrap();
        assert_eq!(node.poll().routed, vec![RouteOutcome::Local]);
        assert!(!node.device().is_enabled());
    }

    #[test]
    fn test_connected_parent_keeps_reset_node_awake() {
        let (_parent, plug) = LinkEnd::pair();
        let (mut node, _steps, _) = make_node(Configuration::default(), VirtualUsb::detached(), plug);

        node.reset();

        assert_eq!(node.mode(), NodeMode::Reset);
        assert_eq!(node.poll().mode, NodeMode::Reset);
    }

    #[test]
    fn test_connected_child_keeps_node_awake() {
        let (mut node, _steps, _child) =
            make_node(Configuration::default(), VirtualUsb::detached(), LinkEnd::unplugged());

        node.reset();

        assert_eq!(node.mode(), NodeMode::Reset);
    }

    #[test]
    fn test_isolated_node_sleeps_with_sensor_enabled() {
        let (mut node, steps, _) =
            make_node(Configuration::default(), VirtualUsb::detached(), LinkEnd::unplugged());
        assert!(node.device().is_enabled());

        steps.borrow_mut().push_back(7);
        let report = node.poll();

        assert_eq!(
            report.routed,
            vec![RouteOutcome::Dropped(DropReason::SendFailed)]
        );
        assert_eq!(report.mode, NodeMode::Sleep);

        // Asleep: the sensor is not polled
        steps.borrow_mut().push_back(8);
        assert!(node.poll().is_quiet());
        assert_eq!(steps.borrow().len(), 1);
    }

    #[test]
    fn test_usb_connection_wakes_sleeping_node() {
        let (usb, mut host) = VirtualUsb::new();
        host.set_connected(false);
        let (mut node, steps, _) = make_node(Configuration::default(), usb, LinkEnd::unplugged());

        node.poll();
        assert_eq!(node.mode(), NodeMode::Sleep);

        host.set_connected(true);
        steps.borrow_mut().push_back(9);
        let report = node.poll();

        assert_eq!(report.mode, NodeMode::Active);
        assert_eq!(host.drain(), vec![MidiEvent::control_change(PortAddress::LOCAL, 0, 0, 9)]);
    }

    #[test]
    fn test_wake_leaves_sleep() {
        let (mut node, _steps, _) =
            make_node(Configuration::default(), VirtualUsb::detached(), LinkEnd::unplugged());

        node.all_notes_off();
        assert_eq!(node.mode(), NodeMode::Sleep);

        node.wake();
        assert_eq!(node.mode(), NodeMode::Reset);
    }

    #[test]
    fn test_import_and_export_config() {
        let (mut node, mut host, steps, _child) = head_node(Configuration::default());

        let config = node.import_config(&json!({
            "midi": { "channel": 5 },
            "controller": 200,
            "range": { "min": 0, "max": 4000, "detect": 50 }
        }));

        assert_eq!(config.channel, 4);
        assert_eq!(config.controller, 127);
        assert_eq!(node.config(), &config);
        assert_eq!(node.export_config()["controller"], 127);

        steps.borrow_mut().push_back(3);
        node.poll();
        assert_eq!(
            host.drain(),
            vec![MidiEvent::control_change(PortAddress::LOCAL, 4, 127, 3)]
        );
    }

    #[test]
    fn test_emit_counts_in_stats() {
        let (mut node, mut host, _steps, _child) = head_node(Configuration::default());

        let event = MidiEvent::new(PortAddress::LOCAL, MidiMessage::ActiveSensing);
        assert_eq!(node.emit(event), RouteOutcome::Usb(PortAddress::LOCAL));

        assert_eq!(host.drain(), vec![event]);
        assert_eq!(node.stats().usb, 1);
    }
}
